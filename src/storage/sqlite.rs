//! Embedded SQLite storage backend.
//!
//! The reader/direct path and the background writer share one connection
//! behind a mutex, so file and in-memory databases behave identically.
//! Staged merges use temporary tables plus `INSERT OR IGNORE` (SQLite's
//! insert-if-absent shape); the left-outer-join merge shape is also
//! supported.

use std::sync::{Arc, Mutex};

use rusqlite::{params, params_from_iter, Connection};

use crate::vrs::{Annotation, StoredObjectType};

use super::batch::{
    AnnotationRow, LocationRow, MappingRow, MergeStyle, RowBatch, SequenceReferenceRow,
    VariationRow,
};
use super::sql::{SqlBackend, SqlStore};
use super::{StorageError, StoreOptions, TableNames, MAX_ROWS};

/// Parameter-list chunk size, kept under SQLite's host-parameter limit.
const CHUNK: usize = 500;

fn sql_err(e: rusqlite::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Open an embedded store.  `path` of `None` (or `:memory:`) keeps the
/// database in memory.
pub fn open_store(
    path: Option<&str>,
    options: StoreOptions,
) -> Result<SqlStore<SqliteBackend>, StorageError> {
    let conn = match path {
        Some(path) if path != ":memory:" => Connection::open(path)
            .map_err(|e| StorageError::Connection(format!("could not open {}: {}", path, e)))?,
        _ => Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(e.to_string()))?,
    };
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(sql_err)?;
    // The return value of the pragma is irrelevant; in-memory databases
    // report `memory` here.
    let _ = conn
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))
        .map_err(sql_err)?;

    let conn = Arc::new(Mutex::new(conn));
    let reader = SqliteBackend {
        conn: conn.clone(),
        tables: options.tables.clone(),
        merge_style: options.merge_style,
    };
    let writer = SqliteBackend {
        conn,
        tables: options.tables.clone(),
        merge_style: options.merge_style,
    };
    Ok(SqlStore::new(reader, writer, &options))
}

/// SQLite statement executor shared by the read and write paths.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    tables: TableNames,
    merge_style: MergeStyle,
}

impl SqliteBackend {
    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection lock poisoned")
    }

    fn merge_statement(&self, target: &str, stage: &str, key: &str) -> String {
        match self.merge_style {
            // SQLite expresses both conflict-skipping shapes with OR IGNORE.
            MergeStyle::OnConflictDoNothing | MergeStyle::MergeWhenNotMatched => {
                format!("INSERT OR IGNORE INTO {target} SELECT * FROM {stage}")
            }
            MergeStyle::InsertLeftJoin => format!(
                "INSERT INTO {target} SELECT DISTINCT s.* FROM {stage} s \
                 LEFT OUTER JOIN {target} t ON t.{key} = s.{key} WHERE t.{key} IS NULL"
            ),
        }
    }
}

impl SqlBackend for SqliteBackend {
    fn create_schema(&mut self) -> Result<(), StorageError> {
        let t = &self.tables;
        let schema = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {refs} (
                id TEXT PRIMARY KEY,
                molecule_type TEXT
            );
            CREATE TABLE IF NOT EXISTS {locs} (
                id TEXT PRIMARY KEY,
                digest TEXT NOT NULL,
                sequence_reference_id TEXT NOT NULL REFERENCES {refs} (id),
                start INTEGER,
                "end" INTEGER,
                start_outer INTEGER,
                start_inner INTEGER,
                end_outer INTEGER,
                end_inner INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_{locs}_search
                ON {locs} (sequence_reference_id, start, "end");
            CREATE TABLE IF NOT EXISTS {vars} (
                id TEXT PRIMARY KEY,
                digest TEXT NOT NULL,
                type TEXT NOT NULL,
                location_id TEXT NOT NULL REFERENCES {locs} (id),
                state TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {anns} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                object_id TEXT NOT NULL,
                annotation_type TEXT NOT NULL,
                annotation_value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{anns}_object_id_annotation_type
                ON {anns} (object_id, annotation_type);
            CREATE TABLE IF NOT EXISTS {maps} (
                source_id TEXT NOT NULL,
                dest_id TEXT NOT NULL,
                mapping_type TEXT NOT NULL,
                PRIMARY KEY (source_id, dest_id, mapping_type)
            );
            "#,
            refs = t.sequence_references,
            locs = t.locations,
            vars = t.alleles,
            anns = t.annotations,
            maps = t.variation_mappings,
        );
        self.conn().execute_batch(&schema).map_err(sql_err)
    }

    fn wipe(&mut self) -> Result<(), StorageError> {
        let t = &self.tables;
        let sql = format!(
            "DELETE FROM {anns}; DELETE FROM {maps}; DELETE FROM {vars}; \
             DELETE FROM {locs}; DELETE FROM {refs};",
            anns = t.annotations,
            maps = t.variation_mappings,
            vars = t.alleles,
            locs = t.locations,
            refs = t.sequence_references,
        );
        self.conn().execute_batch(&sql).map_err(sql_err)
    }

    fn merge_batch(&mut self, batch: &RowBatch) -> Result<(), StorageError> {
        let t = self.tables.clone();
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(sql_err)?;

        tx.execute_batch(
            r#"
            CREATE TEMP TABLE stage_refs (id TEXT, molecule_type TEXT);
            CREATE TEMP TABLE stage_locs (
                id TEXT, digest TEXT, sequence_reference_id TEXT,
                start INTEGER, "end" INTEGER,
                start_outer INTEGER, start_inner INTEGER,
                end_outer INTEGER, end_inner INTEGER
            );
            CREATE TEMP TABLE stage_vars (
                id TEXT, digest TEXT, type TEXT, location_id TEXT, state TEXT
            );
            "#,
        )
        .map_err(sql_err)?;

        {
            let mut stmt = tx
                .prepare("INSERT INTO stage_refs VALUES (?1, ?2)")
                .map_err(sql_err)?;
            for row in &batch.sequence_references {
                stmt.execute(params![row.id, row.molecule_type])
                    .map_err(sql_err)?;
            }
        }
        {
            let mut stmt = tx
                .prepare("INSERT INTO stage_locs VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)")
                .map_err(sql_err)?;
            for row in &batch.locations {
                stmt.execute(params![
                    row.id,
                    row.digest,
                    row.sequence_reference_id,
                    row.start,
                    row.end,
                    row.start_outer,
                    row.start_inner,
                    row.end_outer,
                    row.end_inner,
                ])
                .map_err(sql_err)?;
            }
        }
        {
            let mut stmt = tx
                .prepare("INSERT INTO stage_vars VALUES (?1, ?2, ?3, ?4, ?5)")
                .map_err(sql_err)?;
            for row in &batch.variations {
                stmt.execute(params![
                    row.id,
                    row.digest,
                    row.type_tag,
                    row.location_id,
                    row.state.to_string(),
                ])
                .map_err(sql_err)?;
            }
        }

        // Merge staged rows in dependency order, then land annotations
        // and mappings directly.
        tx.execute_batch(&format!(
            "{merge_refs};\n{merge_locs};\n{merge_vars};\n\
             DROP TABLE stage_refs; DROP TABLE stage_locs; DROP TABLE stage_vars;",
            merge_refs = self.merge_statement(&t.sequence_references, "stage_refs", "id"),
            merge_locs = self.merge_statement(&t.locations, "stage_locs", "id"),
            merge_vars = self.merge_statement(&t.alleles, "stage_vars", "id"),
        ))
        .map_err(sql_err)?;

        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (object_id, annotation_type, annotation_value) \
                     VALUES (?1, ?2, ?3)",
                    t.annotations
                ))
                .map_err(sql_err)?;
            for row in &batch.annotations {
                stmt.execute(params![
                    row.object_id,
                    row.annotation_type,
                    row.annotation_value.to_string(),
                ])
                .map_err(sql_err)?;
            }
        }
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT OR IGNORE INTO {} (source_id, dest_id, mapping_type) \
                     VALUES (?1, ?2, ?3)",
                    t.variation_mappings
                ))
                .map_err(sql_err)?;
            for row in &batch.mappings {
                stmt.execute(params![row.source_id, row.dest_id, row.mapping_type])
                    .map_err(sql_err)?;
            }
        }

        tx.commit().map_err(sql_err)
    }

    fn fetch_sequence_references(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<SequenceReferenceRow>, StorageError> {
        let conn = self.conn();
        let mut out = Vec::new();
        for chunk in ids.chunks(CHUNK) {
            let sql = format!(
                "SELECT id, molecule_type FROM {} WHERE id IN ({})",
                self.tables.sequence_references,
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok(SequenceReferenceRow {
                        id: row.get(0)?,
                        molecule_type: row.get(1)?,
                    })
                })
                .map_err(sql_err)?;
            for row in rows {
                out.push(row.map_err(sql_err)?);
            }
        }
        Ok(out)
    }

    fn fetch_locations(&mut self, ids: &[String]) -> Result<Vec<LocationRow>, StorageError> {
        let conn = self.conn();
        let mut out = Vec::new();
        for chunk in ids.chunks(CHUNK) {
            let sql = format!(
                "SELECT id, digest, sequence_reference_id, start, \"end\", \
                 start_outer, start_inner, end_outer, end_inner \
                 FROM {} WHERE id IN ({})",
                self.tables.locations,
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok(LocationRow {
                        id: row.get(0)?,
                        digest: row.get(1)?,
                        sequence_reference_id: row.get(2)?,
                        start: row.get(3)?,
                        end: row.get(4)?,
                        start_outer: row.get(5)?,
                        start_inner: row.get(6)?,
                        end_outer: row.get(7)?,
                        end_inner: row.get(8)?,
                    })
                })
                .map_err(sql_err)?;
            for row in rows {
                out.push(row.map_err(sql_err)?);
            }
        }
        Ok(out)
    }

    fn fetch_variations(
        &mut self,
        type_tag: Option<&str>,
        ids: &[String],
    ) -> Result<Vec<VariationRow>, StorageError> {
        let conn = self.conn();
        let mut out = Vec::new();
        for chunk in ids.chunks(CHUNK) {
            let sql = match type_tag {
                Some(_) => format!(
                    "SELECT id, digest, type, location_id, state FROM {} \
                     WHERE type = ?1 AND id IN ({})",
                    self.tables.alleles,
                    placeholders_from(2, chunk.len())
                ),
                None => format!(
                    "SELECT id, digest, type, location_id, state FROM {} WHERE id IN ({})",
                    self.tables.alleles,
                    placeholders(chunk.len())
                ),
            };
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let mut bound: Vec<&str> = Vec::with_capacity(chunk.len() + 1);
            if let Some(tag) = type_tag {
                bound.push(tag);
            }
            bound.extend(chunk.iter().map(|s| s.as_str()));
            let rows = stmt
                .query_map(params_from_iter(bound), map_variation_row)
                .map_err(sql_err)?;
            for row in rows {
                out.push(row.map_err(sql_err)??);
            }
        }
        Ok(out)
    }

    fn fetch_all_ids(&mut self) -> Result<Vec<String>, StorageError> {
        let t = &self.tables;
        let conn = self.conn();
        let sql = format!(
            "SELECT id FROM {} UNION ALL SELECT id FROM {} UNION ALL SELECT id FROM {}",
            t.alleles, t.locations, t.sequence_references
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
    }

    fn count_objects(&mut self, object_type: StoredObjectType) -> Result<u64, StorageError> {
        let conn = self.conn();
        let count: i64 = if object_type.is_variation() {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE type = ?1", self.tables.alleles),
                params![object_type.to_string()],
                |row| row.get(0),
            )
            .map_err(sql_err)?
        } else {
            let table = match object_type {
                StoredObjectType::SequenceLocation => &self.tables.locations,
                _ => &self.tables.sequence_references,
            };
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(sql_err)?
        };
        Ok(count as u64)
    }

    fn delete_object_rows(
        &mut self,
        object_type: StoredObjectType,
        ids: &[String],
    ) -> Result<(), StorageError> {
        let conn = self.conn();
        for chunk in ids.chunks(CHUNK) {
            if object_type.is_variation() {
                let sql = format!(
                    "DELETE FROM {} WHERE type = ?1 AND id IN ({})",
                    self.tables.alleles,
                    placeholders_from(2, chunk.len())
                );
                let tag = object_type.to_string();
                let mut bound: Vec<&str> = vec![tag.as_str()];
                bound.extend(chunk.iter().map(|s| s.as_str()));
                conn.execute(&sql, params_from_iter(bound)).map_err(sql_err)?;
            } else {
                let table = match object_type {
                    StoredObjectType::SequenceLocation => &self.tables.locations,
                    _ => &self.tables.sequence_references,
                };
                let sql = format!(
                    "DELETE FROM {} WHERE id IN ({})",
                    table,
                    placeholders(chunk.len())
                );
                conn.execute(&sql, params_from_iter(chunk.iter()))
                    .map_err(sql_err)?;
            }
        }
        Ok(())
    }

    fn any_variation_exists(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        self.any_in(&self.tables.alleles.clone(), "id", ids)
    }

    fn any_annotation_refs(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        self.any_in(&self.tables.annotations.clone(), "object_id", ids)
    }

    fn any_mapping_refs(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        Ok(self.any_in(&self.tables.variation_mappings.clone(), "source_id", ids)?
            || self.any_in(&self.tables.variation_mappings.clone(), "dest_id", ids)?)
    }

    fn any_location_refs(&mut self, location_ids: &[String]) -> Result<bool, StorageError> {
        self.any_in(&self.tables.alleles.clone(), "location_id", location_ids)
    }

    fn any_sequence_reference_refs(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        self.any_in(&self.tables.locations.clone(), "sequence_reference_id", ids)
    }

    fn insert_mapping(&mut self, row: &MappingRow) -> Result<(), StorageError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (source_id, dest_id, mapping_type) \
                     VALUES (?1, ?2, ?3)",
                    self.tables.variation_mappings
                ),
                params![row.source_id, row.dest_id, row.mapping_type],
            )
            .map(|_| ())
            .map_err(sql_err)
    }

    fn delete_mapping_row(&mut self, row: &MappingRow) -> Result<(), StorageError> {
        self.conn()
            .execute(
                &format!(
                    "DELETE FROM {} WHERE source_id = ?1 AND dest_id = ?2 AND mapping_type = ?3",
                    self.tables.variation_mappings
                ),
                params![row.source_id, row.dest_id, row.mapping_type],
            )
            .map(|_| ())
            .map_err(sql_err)
    }

    fn fetch_mappings(
        &mut self,
        source_id: &str,
        mapping_type: Option<&str>,
    ) -> Result<Vec<MappingRow>, StorageError> {
        let conn = self.conn();
        let (sql, bound) = match mapping_type {
            Some(mapping_type) => (
                format!(
                    "SELECT source_id, dest_id, mapping_type FROM {} \
                     WHERE source_id = ?1 AND mapping_type = ?2 LIMIT {}",
                    self.tables.variation_mappings, MAX_ROWS
                ),
                vec![source_id, mapping_type],
            ),
            None => (
                format!(
                    "SELECT source_id, dest_id, mapping_type FROM {} \
                     WHERE source_id = ?1 LIMIT {}",
                    self.tables.variation_mappings, MAX_ROWS
                ),
                vec![source_id],
            ),
        };
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(bound), |row| {
                Ok(MappingRow {
                    source_id: row.get(0)?,
                    dest_id: row.get(1)?,
                    mapping_type: row.get(2)?,
                })
            })
            .map_err(sql_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
    }

    fn insert_annotation(&mut self, row: &AnnotationRow) -> Result<(), StorageError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {} (object_id, annotation_type, annotation_value) \
                     VALUES (?1, ?2, ?3)",
                    self.tables.annotations
                ),
                params![
                    row.object_id,
                    row.annotation_type,
                    row.annotation_value.to_string()
                ],
            )
            .map(|_| ())
            .map_err(sql_err)
    }

    fn delete_annotation_row(&mut self, annotation: &Annotation) -> Result<(), StorageError> {
        if let Some(id) = annotation.id {
            self.conn()
                .execute(
                    &format!("DELETE FROM {} WHERE id = ?1", self.tables.annotations),
                    params![id],
                )
                .map(|_| ())
                .map_err(sql_err)
        } else {
            // Without a row id, delete one row matching the full triple.
            self.conn()
                .execute(
                    &format!(
                        "DELETE FROM {anns} WHERE id IN (\
                         SELECT id FROM {anns} WHERE object_id = ?1 \
                         AND annotation_type = ?2 AND annotation_value = ?3 LIMIT 1)",
                        anns = self.tables.annotations
                    ),
                    params![
                        annotation.object_id,
                        annotation.annotation_type,
                        annotation.annotation_value.to_string()
                    ],
                )
                .map(|_| ())
                .map_err(sql_err)
        }
    }

    fn fetch_annotations(
        &mut self,
        object_id: &str,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, StorageError> {
        let conn = self.conn();
        let (sql, bound) = match annotation_type {
            Some(annotation_type) => (
                format!(
                    "SELECT id, object_id, annotation_type, annotation_value FROM {} \
                     WHERE object_id = ?1 AND annotation_type = ?2 LIMIT {}",
                    self.tables.annotations, MAX_ROWS
                ),
                vec![object_id, annotation_type],
            ),
            None => (
                format!(
                    "SELECT id, object_id, annotation_type, annotation_value FROM {} \
                     WHERE object_id = ?1 LIMIT {}",
                    self.tables.annotations, MAX_ROWS
                ),
                vec![object_id],
            ),
        };
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(bound), |row| {
                let value: String = row.get(3)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    value,
                ))
            })
            .map_err(sql_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, object_id, annotation_type, value) = row.map_err(sql_err)?;
            out.push(Annotation {
                id: Some(id),
                object_id,
                annotation_type,
                annotation_value: serde_json::from_str(&value)
                    .map_err(|e| StorageError::Backend(e.to_string()))?,
            });
        }
        Ok(out)
    }

    fn search_allele_rows(
        &mut self,
        refget_accession: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<VariationRow>, StorageError> {
        let conn = self.conn();
        // Range coordinates compare by their loosest bound; a missing
        // bound on the queried side excludes the row.
        let sql = format!(
            "SELECT v.id, v.digest, v.type, v.location_id, v.state \
             FROM {vars} v JOIN {locs} l ON v.location_id = l.id \
             WHERE v.type = 'Allele' \
               AND l.sequence_reference_id = ?1 \
               AND COALESCE(l.start, l.start_outer) IS NOT NULL \
               AND COALESCE(l.\"end\", l.end_inner) IS NOT NULL \
               AND COALESCE(l.start, l.start_outer) >= ?2 \
               AND COALESCE(l.\"end\", l.end_inner) <= ?3 \
             LIMIT {max_rows}",
            vars = self.tables.alleles,
            locs = self.tables.locations,
            max_rows = MAX_ROWS,
        );
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(params![refget_accession, start, end], map_variation_row)
            .map_err(sql_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(sql_err)??);
        }
        Ok(out)
    }
}

impl SqliteBackend {
    fn any_in(&self, table: &str, column: &str, values: &[String]) -> Result<bool, StorageError> {
        let conn = self.conn();
        for chunk in values.chunks(CHUNK) {
            let sql = format!(
                "SELECT EXISTS (SELECT 1 FROM {} WHERE {} IN ({}))",
                table,
                column,
                placeholders(chunk.len())
            );
            let exists: bool = conn
                .query_row(&sql, params_from_iter(chunk.iter()), |row| row.get(0))
                .map_err(sql_err)?;
            if exists {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

type VariationRowResult = Result<VariationRow, StorageError>;

fn map_variation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VariationRowResult> {
    let state: String = row.get(4)?;
    Ok(match serde_json::from_str(&state) {
        Ok(state) => Ok(VariationRow {
            id: row.get(0)?,
            digest: row.get(1)?,
            type_tag: row.get(2)?,
            location_id: row.get(3)?,
            state,
        }),
        Err(e) => Err(StorageError::Backend(format!(
            "invalid state JSON in database: {}",
            e
        ))),
    })
}

fn placeholders(n: usize) -> String {
    placeholders_from(1, n)
}

fn placeholders_from(first: usize, n: usize) -> String {
    (0..n)
        .map(|i| format!("?{}", first + i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::storage::{BatchScope, Storage, StorageError, StoreOptions, MAX_ROWS};
    use crate::vrs::{
        digest, Allele, AlleleState, Annotation, SequenceLocation, SequenceReference,
        StoredObjectType, Variation, VariationMapping, VariationMappingType, VrsObject,
    };

    fn open_test_store() -> super::SqlStore<super::SqliteBackend> {
        let store = super::open_store(None, StoreOptions::default()).unwrap();
        store.setup().unwrap();
        store
    }

    fn identified_allele(accession: &str, start: i64, end: i64, sequence: &str) -> VrsObject {
        let mut variation = Variation::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation::new(SequenceReference::new(accession), start, end),
            state: AlleleState::literal(sequence),
        });
        digest::recursive_identify(&mut variation);
        variation.into()
    }

    fn braf_v600e() -> VrsObject {
        identified_allele(
            "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
            140753335,
            140753336,
            "T",
        )
    }

    #[test]
    fn round_trip_allele() {
        let store = open_test_store();
        let object = braf_v600e();
        store.add_objects(std::slice::from_ref(&object)).unwrap();

        let id = object.id().unwrap().to_string();
        let fetched = store
            .get_objects(StoredObjectType::Allele, &[id.clone()])
            .unwrap();
        assert_eq!(fetched, vec![object]);
        assert_eq!(
            store.get_object_count(StoredObjectType::Allele).unwrap(),
            1
        );
        assert_eq!(
            store
                .get_object_count(StoredObjectType::SequenceLocation)
                .unwrap(),
            1
        );
        store.close();
    }

    #[test]
    fn duplicate_add_is_noop() {
        let store = open_test_store();
        let object = braf_v600e();
        store.add_objects(std::slice::from_ref(&object)).unwrap();
        store.add_objects(std::slice::from_ref(&object)).unwrap();
        assert_eq!(
            store.get_object_count(StoredObjectType::Allele).unwrap(),
            1
        );
        store.close();
    }

    #[test]
    fn incomplete_object_is_rejected() {
        let store = open_test_store();
        let object = VrsObject::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation::new(
                SequenceReference::new("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"),
                1,
                2,
            ),
            state: AlleleState::literal("T"),
        });
        assert!(matches!(
            store.add_objects(&[object]),
            Err(StorageError::IncompleteObject(_))
        ));
        store.close();
    }

    #[test]
    fn flush_barrier_makes_batched_writes_visible() {
        let store = open_test_store();
        {
            let _scope = BatchScope::new(&store);
            for i in 0..100i64 {
                let object = identified_allele(
                    "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
                    i,
                    i + 1,
                    "T",
                );
                store.add_objects(&[object]).unwrap();
            }
        }
        store.wait_for_writes();
        assert_eq!(
            store.get_object_count(StoredObjectType::Allele).unwrap(),
            100
        );
        store.close();
    }

    #[test]
    fn backpressure_with_tiny_queue_completes() {
        let options = StoreOptions {
            batch_limit: 1,
            max_pending_batches: 1,
            ..Default::default()
        };
        let store = super::open_store(None, options).unwrap();
        store.setup().unwrap();
        {
            let _scope = BatchScope::new(&store);
            for i in 0..200i64 {
                let object = identified_allele(
                    "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
                    i,
                    i + 1,
                    "G",
                );
                store.add_objects(&[object]).unwrap();
            }
        }
        store.wait_for_writes();
        assert_eq!(
            store.get_object_count(StoredObjectType::Allele).unwrap(),
            200
        );
        store.close();
    }

    #[test]
    fn search_alleles_containment() {
        let store = open_test_store();
        let a = identified_allele(
            "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
            140753335,
            140753336,
            "T",
        );
        let b = identified_allele(
            "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
            55174010,
            55174011,
            "G",
        );
        let other_ref = identified_allele("SQ.0iKlIQk2oZLoeOG9P1riRU6hvL5Ux8TV", 55174010, 55174011, "G");
        store.add_objects(&[a.clone(), b.clone(), other_ref]).unwrap();

        let both = store
            .search_alleles("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 55174000, 140753340)
            .unwrap();
        assert_eq!(both.len(), 2);

        let only_a = store
            .search_alleles("ga4gh:SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 140753335, 140753336)
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id(), a.id());

        assert!(matches!(
            store.search_alleles("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 10, 5),
            Err(StorageError::InvalidSearchParams(_))
        ));
        store.close();
    }

    #[test]
    fn search_excludes_unbounded_range_side() {
        let store = open_test_store();
        let mut variation = Variation::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation {
                id: None,
                digest: None,
                sequence_reference: SequenceReference::new(
                    "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
                ),
                start: Some(crate::vrs::Coordinate::Range([None, Some(100)])),
                end: Some(crate::vrs::Coordinate::Value(200)),
            },
            state: AlleleState::literal("T"),
        });
        digest::recursive_identify(&mut variation);
        store.add_objects(&[variation.into()]).unwrap();

        let hits = store
            .search_alleles("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 0, 1000)
            .unwrap();
        assert_eq!(hits.len(), 0);
        store.close();
    }

    #[test]
    fn mapping_idempotence_and_rejection() {
        let store = open_test_store();
        let a = braf_v600e();
        let b = identified_allele(
            "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
            55174010,
            55174011,
            "G",
        );
        store.add_objects(&[a.clone(), b.clone()]).unwrap();

        let mapping = VariationMapping {
            source_id: a.id().unwrap().to_string(),
            dest_id: b.id().unwrap().to_string(),
            mapping_type: VariationMappingType::Liftover,
        };
        store.add_mapping(&mapping).unwrap();
        store.add_mapping(&mapping).unwrap();

        let mappings = store
            .get_mappings(a.id().unwrap(), Some(VariationMappingType::Liftover))
            .unwrap();
        assert_eq!(mappings, vec![mapping.clone()]);

        let self_mapping = VariationMapping {
            source_id: a.id().unwrap().to_string(),
            dest_id: a.id().unwrap().to_string(),
            mapping_type: VariationMappingType::Liftover,
        };
        assert!(matches!(
            store.add_mapping(&self_mapping),
            Err(StorageError::InvalidMapping(_))
        ));

        let dangling = VariationMapping {
            source_id: a.id().unwrap().to_string(),
            dest_id: "ga4gh:VA.doesnotexist".to_string(),
            mapping_type: VariationMappingType::Liftover,
        };
        assert!(matches!(
            store.add_mapping(&dangling),
            Err(StorageError::MissingReference(_))
        ));

        store.delete_mapping(&mapping).unwrap();
        assert!(store
            .get_mappings(a.id().unwrap(), None)
            .unwrap()
            .is_empty());
        store.close();
    }

    #[test]
    fn annotations_allow_duplicates_and_guard_deletes() {
        let store = open_test_store();
        let object = braf_v600e();
        store.add_objects(std::slice::from_ref(&object)).unwrap();
        let id = object.id().unwrap().to_string();

        let annotation =
            Annotation::new(id.as_str(), "note", serde_json::json!({"text": "pathogenic"}));
        store.add_annotation(&annotation).unwrap();
        store.add_annotation(&annotation).unwrap();

        let stored = store.get_annotations(&id, Some("note")).unwrap();
        assert_eq!(stored.len(), 2);

        let missing_target = Annotation::new("ga4gh:VA.missing", "note", serde_json::json!(1));
        assert!(matches!(
            store.add_annotation(&missing_target),
            Err(StorageError::MissingReference(_))
        ));

        // Deleting the annotated variation is a data-integrity error.
        assert!(matches!(
            store.delete_objects(StoredObjectType::Allele, &[id.clone()]),
            Err(StorageError::DataIntegrity(_))
        ));

        store.delete_annotation(&stored[0]).unwrap();
        store.delete_annotation(&stored[1]).unwrap();
        store
            .delete_objects(StoredObjectType::Allele, &[id.clone()])
            .unwrap();
        assert_eq!(
            store.get_object_count(StoredObjectType::Allele).unwrap(),
            0
        );
        // Deletes do not cascade: the location survives.
        assert_eq!(
            store
                .get_object_count(StoredObjectType::SequenceLocation)
                .unwrap(),
            1
        );
        store.close();
    }

    #[test]
    fn wipe_and_ids() {
        let store = open_test_store();
        store.add_objects(&[braf_v600e()]).unwrap();
        let ids: Vec<String> = store.get_all_object_ids().unwrap().collect();
        assert_eq!(ids.len(), 3);

        store.wipe_db().unwrap();
        assert_eq!(store.get_all_object_ids().unwrap().count(), 0);
        store.close();
    }

    #[test]
    fn get_objects_truncates_at_cap() {
        let store = open_test_store();
        let mut objects = Vec::new();
        for i in 0..(MAX_ROWS as i64 + 8) {
            objects.push(identified_allele(
                "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul",
                i,
                i + 1,
                "A",
            ));
        }
        store.add_objects(&objects).unwrap();
        let ids: Vec<String> = objects
            .iter()
            .map(|o| o.id().unwrap().to_string())
            .collect();
        let fetched = store.get_objects(StoredObjectType::Allele, &ids).unwrap();
        assert_eq!(fetched.len(), MAX_ROWS);
        store.close();
    }
}
