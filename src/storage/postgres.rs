//! PostgreSQL storage backend.
//!
//! Statements run on a sqlx connection pool; each backend instance owns a
//! current-thread tokio runtime and bridges into it with `block_on`, so
//! the store's thread-based write engine works unchanged.  Staged merges
//! create `ON COMMIT DROP` temporary tables and land rows with the
//! configured merge shape.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::vrs::{Annotation, StoredObjectType};

use super::batch::{
    AnnotationRow, LocationRow, MappingRow, MergeStyle, RowBatch, SequenceReferenceRow,
    VariationRow,
};
use super::sql::{SqlBackend, SqlStore};
use super::{StorageError, StoreOptions, TableNames, MAX_ROWS};

/// Rows per staged `INSERT … VALUES` statement, kept well under the
/// Postgres bind-parameter limit.
const CHUNK: usize = 1000;

fn sql_err(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StorageError::Connection(e.to_string())
        }
        other => StorageError::Backend(other.to_string()),
    }
}

/// Connect a store to a PostgreSQL database.
pub fn connect_store(
    url: &str,
    options: StoreOptions,
) -> Result<SqlStore<PgBackend>, StorageError> {
    let reader = PgBackend::connect(url, &options)?;
    let writer = PgBackend::connect(url, &options)?;
    Ok(SqlStore::new(reader, writer, &options))
}

/// PostgreSQL statement executor with its own runtime and pool.
pub struct PgBackend {
    runtime: tokio::runtime::Runtime,
    pool: PgPool,
    tables: TableNames,
    merge_style: MergeStyle,
}

impl PgBackend {
    fn connect(url: &str, options: &StoreOptions) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Connection(format!("could not build runtime: {}", e)))?;
        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(2)
                    .connect(url),
            )
            .map_err(|e| StorageError::Connection(format!("could not connect: {}", e)))?;
        Ok(Self {
            runtime,
            pool,
            tables: options.tables.clone(),
            merge_style: options.merge_style,
        })
    }

    fn merge_statement(&self, target: &str, stage: &str, key: &str, columns: &str) -> String {
        match self.merge_style {
            MergeStyle::OnConflictDoNothing => format!(
                "INSERT INTO {target} ({columns}) SELECT {columns} FROM {stage} \
                 ON CONFLICT ({key}) DO NOTHING"
            ),
            MergeStyle::MergeWhenNotMatched => {
                let values = columns
                    .split(", ")
                    .map(|c| format!("s.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "MERGE INTO {target} t \
                     USING (SELECT DISTINCT {columns} FROM {stage}) s ON t.{key} = s.{key} \
                     WHEN NOT MATCHED THEN INSERT ({columns}) VALUES ({values})"
                )
            }
            MergeStyle::InsertLeftJoin => format!(
                "INSERT INTO {target} ({columns}) \
                 SELECT DISTINCT {sel} FROM {stage} s \
                 LEFT OUTER JOIN {target} t ON t.{key} = s.{key} WHERE t.{key} IS NULL",
                sel = columns
                    .split(", ")
                    .map(|c| format!("s.{c}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        }
    }
}

const LOCATION_COLUMNS: &str =
    "id, digest, sequence_reference_id, start, \"end\", start_outer, start_inner, end_outer, end_inner";

impl SqlBackend for PgBackend {
    fn create_schema(&mut self) -> Result<(), StorageError> {
        let t = self.tables.clone();
        let statements = vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, molecule_type TEXT)",
                t.sequence_references
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {locs} (\
                 id TEXT PRIMARY KEY, \
                 digest TEXT NOT NULL, \
                 sequence_reference_id TEXT NOT NULL REFERENCES {refs} (id), \
                 start BIGINT, \"end\" BIGINT, \
                 start_outer BIGINT, start_inner BIGINT, \
                 end_outer BIGINT, end_inner BIGINT)",
                locs = t.locations,
                refs = t.sequence_references
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{locs}_search \
                 ON {locs} (sequence_reference_id, start, \"end\")",
                locs = t.locations
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {vars} (\
                 id TEXT PRIMARY KEY, \
                 digest TEXT NOT NULL, \
                 type TEXT NOT NULL, \
                 location_id TEXT NOT NULL REFERENCES {locs} (id), \
                 state JSONB NOT NULL)",
                vars = t.alleles,
                locs = t.locations
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {anns} (\
                 id BIGSERIAL PRIMARY KEY, \
                 object_id TEXT NOT NULL, \
                 annotation_type TEXT NOT NULL, \
                 annotation_value JSONB NOT NULL)",
                anns = t.annotations
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{anns}_object_id_annotation_type \
                 ON {anns} (object_id, annotation_type)",
                anns = t.annotations
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {maps} (\
                 source_id TEXT NOT NULL, \
                 dest_id TEXT NOT NULL, \
                 mapping_type TEXT NOT NULL, \
                 PRIMARY KEY (source_id, dest_id, mapping_type))",
                maps = t.variation_mappings
            ),
        ];
        self.runtime.block_on(async {
            for statement in statements {
                sqlx::query(&statement)
                    .execute(&self.pool)
                    .await
                    .map_err(sql_err)?;
            }
            Ok(())
        })
    }

    fn wipe(&mut self) -> Result<(), StorageError> {
        let t = self.tables.clone();
        self.runtime.block_on(async {
            for table in [
                &t.annotations,
                &t.variation_mappings,
                &t.alleles,
                &t.locations,
                &t.sequence_references,
            ] {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&self.pool)
                    .await
                    .map_err(sql_err)?;
            }
            Ok(())
        })
    }

    fn merge_batch(&mut self, batch: &RowBatch) -> Result<(), StorageError> {
        let t = self.tables.clone();
        let merge_refs = self.merge_statement(
            &t.sequence_references,
            "stage_refs",
            "id",
            "id, molecule_type",
        );
        let merge_locs = self.merge_statement(&t.locations, "stage_locs", "id", LOCATION_COLUMNS);
        let merge_vars = self.merge_statement(
            &t.alleles,
            "stage_vars",
            "id",
            "id, digest, type, location_id, state",
        );
        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await.map_err(sql_err)?;

            for (stage, target) in [
                ("stage_refs", &t.sequence_references),
                ("stage_locs", &t.locations),
                ("stage_vars", &t.alleles),
            ] {
                sqlx::query(&format!(
                    "CREATE TEMP TABLE {stage} (LIKE {target} INCLUDING DEFAULTS) ON COMMIT DROP"
                ))
                .execute(&mut tx)
                .await
                .map_err(sql_err)?;
            }

            for chunk in batch.sequence_references.chunks(CHUNK) {
                let mut qb: QueryBuilder<Postgres> =
                    QueryBuilder::new("INSERT INTO stage_refs (id, molecule_type) ");
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(&row.id);
                    b.push_bind(&row.molecule_type);
                });
                qb.build().execute(&mut tx).await.map_err(sql_err)?;
            }
            for chunk in batch.locations.chunks(CHUNK) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO stage_locs ({LOCATION_COLUMNS}) "
                ));
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(&row.id);
                    b.push_bind(&row.digest);
                    b.push_bind(&row.sequence_reference_id);
                    b.push_bind(row.start);
                    b.push_bind(row.end);
                    b.push_bind(row.start_outer);
                    b.push_bind(row.start_inner);
                    b.push_bind(row.end_outer);
                    b.push_bind(row.end_inner);
                });
                qb.build().execute(&mut tx).await.map_err(sql_err)?;
            }
            for chunk in batch.variations.chunks(CHUNK) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO stage_vars (id, digest, type, location_id, state) ",
                );
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(&row.id);
                    b.push_bind(&row.digest);
                    b.push_bind(&row.type_tag);
                    b.push_bind(&row.location_id);
                    b.push_bind(&row.state);
                });
                qb.build().execute(&mut tx).await.map_err(sql_err)?;
            }

            // Merge staged rows in dependency order.
            for statement in [&merge_refs, &merge_locs, &merge_vars] {
                sqlx::query(statement)
                    .execute(&mut tx)
                    .await
                    .map_err(sql_err)?;
            }

            // Annotations allow duplicates; mappings dedupe on their
            // primary key.
            for chunk in batch.annotations.chunks(CHUNK) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO {} (object_id, annotation_type, annotation_value) ",
                    t.annotations
                ));
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(&row.object_id);
                    b.push_bind(&row.annotation_type);
                    b.push_bind(&row.annotation_value);
                });
                qb.build().execute(&mut tx).await.map_err(sql_err)?;
            }
            for chunk in batch.mappings.chunks(CHUNK) {
                let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO {} (source_id, dest_id, mapping_type) ",
                    t.variation_mappings
                ));
                qb.push_values(chunk, |mut b, row| {
                    b.push_bind(&row.source_id);
                    b.push_bind(&row.dest_id);
                    b.push_bind(&row.mapping_type);
                });
                qb.push(" ON CONFLICT (source_id, dest_id, mapping_type) DO NOTHING");
                qb.build().execute(&mut tx).await.map_err(sql_err)?;
            }

            tx.commit().await.map_err(sql_err)
        })
    }

    fn fetch_sequence_references(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<SequenceReferenceRow>, StorageError> {
        let sql = format!(
            "SELECT id, molecule_type FROM {} WHERE id = ANY($1)",
            self.tables.sequence_references
        );
        self.runtime.block_on(async {
            let rows = sqlx::query(&sql)
                .bind(ids.to_vec())
                .fetch_all(&self.pool)
                .await
                .map_err(sql_err)?;
            rows.iter()
                .map(|row| {
                    Ok(SequenceReferenceRow {
                        id: row.try_get("id").map_err(sql_err)?,
                        molecule_type: row.try_get("molecule_type").map_err(sql_err)?,
                    })
                })
                .collect()
        })
    }

    fn fetch_locations(&mut self, ids: &[String]) -> Result<Vec<LocationRow>, StorageError> {
        let sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM {} WHERE id = ANY($1)",
            self.tables.locations
        );
        self.runtime.block_on(async {
            let rows = sqlx::query(&sql)
                .bind(ids.to_vec())
                .fetch_all(&self.pool)
                .await
                .map_err(sql_err)?;
            rows.iter()
                .map(|row| {
                    Ok(LocationRow {
                        id: row.try_get("id").map_err(sql_err)?,
                        digest: row.try_get("digest").map_err(sql_err)?,
                        sequence_reference_id: row
                            .try_get("sequence_reference_id")
                            .map_err(sql_err)?,
                        start: row.try_get("start").map_err(sql_err)?,
                        end: row.try_get("end").map_err(sql_err)?,
                        start_outer: row.try_get("start_outer").map_err(sql_err)?,
                        start_inner: row.try_get("start_inner").map_err(sql_err)?,
                        end_outer: row.try_get("end_outer").map_err(sql_err)?,
                        end_inner: row.try_get("end_inner").map_err(sql_err)?,
                    })
                })
                .collect()
        })
    }

    fn fetch_variations(
        &mut self,
        type_tag: Option<&str>,
        ids: &[String],
    ) -> Result<Vec<VariationRow>, StorageError> {
        let sql = match type_tag {
            Some(_) => format!(
                "SELECT id, digest, type, location_id, state FROM {} \
                 WHERE type = $1 AND id = ANY($2)",
                self.tables.alleles
            ),
            None => format!(
                "SELECT id, digest, type, location_id, state FROM {} WHERE id = ANY($1)",
                self.tables.alleles
            ),
        };
        self.runtime.block_on(async {
            let query = match type_tag {
                Some(tag) => sqlx::query(&sql).bind(tag.to_string()).bind(ids.to_vec()),
                None => sqlx::query(&sql).bind(ids.to_vec()),
            };
            let rows = query.fetch_all(&self.pool).await.map_err(sql_err)?;
            rows.iter().map(map_variation_row).collect()
        })
    }

    fn fetch_all_ids(&mut self) -> Result<Vec<String>, StorageError> {
        let t = &self.tables;
        let sql = format!(
            "SELECT id FROM {} UNION ALL SELECT id FROM {} UNION ALL SELECT id FROM {}",
            t.alleles, t.locations, t.sequence_references
        );
        self.runtime.block_on(async {
            let rows = sqlx::query(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(sql_err)?;
            rows.iter()
                .map(|row| row.try_get::<String, _>("id").map_err(sql_err))
                .collect()
        })
    }

    fn count_objects(&mut self, object_type: StoredObjectType) -> Result<u64, StorageError> {
        let (sql, tag) = if object_type.is_variation() {
            (
                format!("SELECT COUNT(*) AS n FROM {} WHERE type = $1", self.tables.alleles),
                Some(object_type.to_string()),
            )
        } else {
            let table = match object_type {
                StoredObjectType::SequenceLocation => &self.tables.locations,
                _ => &self.tables.sequence_references,
            };
            (format!("SELECT COUNT(*) AS n FROM {}", table), None)
        };
        self.runtime.block_on(async {
            let query = match &tag {
                Some(tag) => sqlx::query(&sql).bind(tag),
                None => sqlx::query(&sql),
            };
            let row = query.fetch_one(&self.pool).await.map_err(sql_err)?;
            let count: i64 = row.try_get("n").map_err(sql_err)?;
            Ok(count as u64)
        })
    }

    fn delete_object_rows(
        &mut self,
        object_type: StoredObjectType,
        ids: &[String],
    ) -> Result<(), StorageError> {
        let (sql, tag) = if object_type.is_variation() {
            (
                format!(
                    "DELETE FROM {} WHERE type = $1 AND id = ANY($2)",
                    self.tables.alleles
                ),
                Some(object_type.to_string()),
            )
        } else {
            let table = match object_type {
                StoredObjectType::SequenceLocation => &self.tables.locations,
                _ => &self.tables.sequence_references,
            };
            (format!("DELETE FROM {} WHERE id = ANY($1)", table), None)
        };
        self.runtime.block_on(async {
            let query = match &tag {
                Some(tag) => sqlx::query(&sql).bind(tag).bind(ids.to_vec()),
                None => sqlx::query(&sql).bind(ids.to_vec()),
            };
            query.execute(&self.pool).await.map_err(sql_err)?;
            Ok(())
        })
    }

    fn any_variation_exists(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        self.exists_any(&self.tables.alleles.clone(), &["id"], ids)
    }

    fn any_annotation_refs(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        self.exists_any(&self.tables.annotations.clone(), &["object_id"], ids)
    }

    fn any_mapping_refs(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        self.exists_any(
            &self.tables.variation_mappings.clone(),
            &["source_id", "dest_id"],
            ids,
        )
    }

    fn any_location_refs(&mut self, location_ids: &[String]) -> Result<bool, StorageError> {
        self.exists_any(&self.tables.alleles.clone(), &["location_id"], location_ids)
    }

    fn any_sequence_reference_refs(&mut self, ids: &[String]) -> Result<bool, StorageError> {
        self.exists_any(
            &self.tables.locations.clone(),
            &["sequence_reference_id"],
            ids,
        )
    }

    fn insert_mapping(&mut self, row: &MappingRow) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO {} (source_id, dest_id, mapping_type) VALUES ($1, $2, $3) \
             ON CONFLICT (source_id, dest_id, mapping_type) DO NOTHING",
            self.tables.variation_mappings
        );
        self.runtime.block_on(async {
            sqlx::query(&sql)
                .bind(&row.source_id)
                .bind(&row.dest_id)
                .bind(&row.mapping_type)
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;
            Ok(())
        })
    }

    fn delete_mapping_row(&mut self, row: &MappingRow) -> Result<(), StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE source_id = $1 AND dest_id = $2 AND mapping_type = $3",
            self.tables.variation_mappings
        );
        self.runtime.block_on(async {
            sqlx::query(&sql)
                .bind(&row.source_id)
                .bind(&row.dest_id)
                .bind(&row.mapping_type)
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;
            Ok(())
        })
    }

    fn fetch_mappings(
        &mut self,
        source_id: &str,
        mapping_type: Option<&str>,
    ) -> Result<Vec<MappingRow>, StorageError> {
        let sql = match mapping_type {
            Some(_) => format!(
                "SELECT source_id, dest_id, mapping_type FROM {} \
                 WHERE source_id = $1 AND mapping_type = $2 LIMIT {}",
                self.tables.variation_mappings, MAX_ROWS
            ),
            None => format!(
                "SELECT source_id, dest_id, mapping_type FROM {} \
                 WHERE source_id = $1 LIMIT {}",
                self.tables.variation_mappings, MAX_ROWS
            ),
        };
        self.runtime.block_on(async {
            let query = match mapping_type {
                Some(mapping_type) => sqlx::query(&sql)
                    .bind(source_id.to_string())
                    .bind(mapping_type.to_string()),
                None => sqlx::query(&sql).bind(source_id.to_string()),
            };
            let rows = query.fetch_all(&self.pool).await.map_err(sql_err)?;
            rows.iter()
                .map(|row| {
                    Ok(MappingRow {
                        source_id: row.try_get("source_id").map_err(sql_err)?,
                        dest_id: row.try_get("dest_id").map_err(sql_err)?,
                        mapping_type: row.try_get("mapping_type").map_err(sql_err)?,
                    })
                })
                .collect()
        })
    }

    fn insert_annotation(&mut self, row: &AnnotationRow) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO {} (object_id, annotation_type, annotation_value) VALUES ($1, $2, $3)",
            self.tables.annotations
        );
        self.runtime.block_on(async {
            sqlx::query(&sql)
                .bind(&row.object_id)
                .bind(&row.annotation_type)
                .bind(&row.annotation_value)
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;
            Ok(())
        })
    }

    fn delete_annotation_row(&mut self, annotation: &Annotation) -> Result<(), StorageError> {
        if let Some(id) = annotation.id {
            let sql = format!("DELETE FROM {} WHERE id = $1", self.tables.annotations);
            self.runtime.block_on(async {
                sqlx::query(&sql)
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(sql_err)?;
                Ok(())
            })
        } else {
            let sql = format!(
                "DELETE FROM {anns} WHERE id IN (\
                 SELECT id FROM {anns} WHERE object_id = $1 \
                 AND annotation_type = $2 AND annotation_value = $3 LIMIT 1)",
                anns = self.tables.annotations
            );
            self.runtime.block_on(async {
                sqlx::query(&sql)
                    .bind(&annotation.object_id)
                    .bind(&annotation.annotation_type)
                    .bind(&annotation.annotation_value)
                    .execute(&self.pool)
                    .await
                    .map_err(sql_err)?;
                Ok(())
            })
        }
    }

    fn fetch_annotations(
        &mut self,
        object_id: &str,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, StorageError> {
        let sql = match annotation_type {
            Some(_) => format!(
                "SELECT id, object_id, annotation_type, annotation_value FROM {} \
                 WHERE object_id = $1 AND annotation_type = $2 LIMIT {}",
                self.tables.annotations, MAX_ROWS
            ),
            None => format!(
                "SELECT id, object_id, annotation_type, annotation_value FROM {} \
                 WHERE object_id = $1 LIMIT {}",
                self.tables.annotations, MAX_ROWS
            ),
        };
        self.runtime.block_on(async {
            let query = match annotation_type {
                Some(annotation_type) => sqlx::query(&sql)
                    .bind(object_id.to_string())
                    .bind(annotation_type.to_string()),
                None => sqlx::query(&sql).bind(object_id.to_string()),
            };
            let rows = query.fetch_all(&self.pool).await.map_err(sql_err)?;
            rows.iter()
                .map(|row| {
                    Ok(Annotation {
                        id: Some(row.try_get::<i64, _>("id").map_err(sql_err)?),
                        object_id: row.try_get("object_id").map_err(sql_err)?,
                        annotation_type: row.try_get("annotation_type").map_err(sql_err)?,
                        annotation_value: row.try_get("annotation_value").map_err(sql_err)?,
                    })
                })
                .collect()
        })
    }

    fn search_allele_rows(
        &mut self,
        refget_accession: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<VariationRow>, StorageError> {
        // Range coordinates compare by their loosest bound; a missing
        // bound on the queried side excludes the row.
        let sql = format!(
            "SELECT v.id, v.digest, v.type, v.location_id, v.state \
             FROM {vars} v JOIN {locs} l ON v.location_id = l.id \
             WHERE v.type = 'Allele' \
               AND l.sequence_reference_id = $1 \
               AND COALESCE(l.start, l.start_outer) IS NOT NULL \
               AND COALESCE(l.\"end\", l.end_inner) IS NOT NULL \
               AND COALESCE(l.start, l.start_outer) >= $2 \
               AND COALESCE(l.\"end\", l.end_inner) <= $3 \
             LIMIT {max_rows}",
            vars = self.tables.alleles,
            locs = self.tables.locations,
            max_rows = MAX_ROWS,
        );
        self.runtime.block_on(async {
            let rows = sqlx::query(&sql)
                .bind(refget_accession.to_string())
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await
                .map_err(sql_err)?;
            rows.iter().map(map_variation_row).collect()
        })
    }
}

impl PgBackend {
    fn exists_any(
        &self,
        table: &str,
        columns: &[&str],
        values: &[String],
    ) -> Result<bool, StorageError> {
        for column in columns {
            let sql = format!(
                "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = ANY($1)) AS found",
                table, column
            );
            let found = self.runtime.block_on(async {
                let row = sqlx::query(&sql)
                    .bind(values.to_vec())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(sql_err)?;
                row.try_get::<bool, _>("found").map_err(sql_err)
            })?;
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn map_variation_row(row: &sqlx::postgres::PgRow) -> Result<VariationRow, StorageError> {
    Ok(VariationRow {
        id: row.try_get("id").map_err(sql_err)?,
        digest: row.try_get("digest").map_err(sql_err)?,
        type_tag: row.try_get("type").map_err(sql_err)?,
        location_id: row.try_get("location_id").map_err(sql_err)?,
        state: row.try_get("state").map_err(sql_err)?,
    })
}
