//! Shared relational store built on a backend-specific SQL connection.
//!
//! `SqlStore` owns the producer side of the batch write engine (buffer,
//! batch limit, scope flag) and delegates statements to a [`SqlBackend`].
//! Direct-mode writes run a short merge transaction on the calling
//! thread; batch-mode writes accumulate and flow through the background
//! writer.

use std::sync::Mutex;

use crate::vrs::{
    decompose, Annotation, SequenceLocation, SequenceReference, StoredObjectType, Variation,
    VariationMapping, VariationMappingType, VrsObject,
};

use super::batch::{
    variation_from_row, AnnotationRow, BatchWriter, LocationRow, MappingRow, RowBatch,
    SequenceReferenceRow, VariationRow,
};
use super::{
    check_search_params, normalize_accession, Storage, StorageError, StoreOptions, MAX_ROWS,
};

/// Backend-specific statement execution.
///
/// One instance serves the read/direct path; a second, independent
/// instance is handed to the background writer thread.
pub trait SqlBackend: Send + 'static {
    /// Create tables and indexes if absent.
    fn create_schema(&mut self) -> Result<(), StorageError>;

    /// Delete all rows from all managed tables.
    fn wipe(&mut self) -> Result<(), StorageError>;

    /// Merge a batch of rows inside one transaction: stage into temporary
    /// tables, then insert-if-absent into the targets in dependency
    /// order.
    fn merge_batch(&mut self, batch: &RowBatch) -> Result<(), StorageError>;

    fn fetch_sequence_references(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<SequenceReferenceRow>, StorageError>;

    fn fetch_locations(&mut self, ids: &[String]) -> Result<Vec<LocationRow>, StorageError>;

    fn fetch_variations(
        &mut self,
        type_tag: Option<&str>,
        ids: &[String],
    ) -> Result<Vec<VariationRow>, StorageError>;

    fn fetch_all_ids(&mut self) -> Result<Vec<String>, StorageError>;

    fn count_objects(&mut self, object_type: StoredObjectType) -> Result<u64, StorageError>;

    fn delete_object_rows(
        &mut self,
        object_type: StoredObjectType,
        ids: &[String],
    ) -> Result<(), StorageError>;

    /// Whether any variation row with one of the given ids exists.
    fn any_variation_exists(&mut self, ids: &[String]) -> Result<bool, StorageError>;

    /// Whether any annotation references one of the given object ids.
    fn any_annotation_refs(&mut self, ids: &[String]) -> Result<bool, StorageError>;

    /// Whether any mapping references one of the given object ids.
    fn any_mapping_refs(&mut self, ids: &[String]) -> Result<bool, StorageError>;

    /// Whether any variation references one of the given location ids.
    fn any_location_refs(&mut self, location_ids: &[String]) -> Result<bool, StorageError>;

    /// Whether any location references one of the given sequence
    /// reference ids.
    fn any_sequence_reference_refs(&mut self, ids: &[String]) -> Result<bool, StorageError>;

    fn insert_mapping(&mut self, row: &MappingRow) -> Result<(), StorageError>;

    fn delete_mapping_row(&mut self, row: &MappingRow) -> Result<(), StorageError>;

    fn fetch_mappings(
        &mut self,
        source_id: &str,
        mapping_type: Option<&str>,
    ) -> Result<Vec<MappingRow>, StorageError>;

    fn insert_annotation(&mut self, row: &AnnotationRow) -> Result<(), StorageError>;

    fn delete_annotation_row(&mut self, annotation: &Annotation) -> Result<(), StorageError>;

    fn fetch_annotations(
        &mut self,
        object_id: &str,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, StorageError>;

    /// Variation rows of Alleles whose effective location interval is
    /// contained in `[start, end]` on the given reference.
    fn search_allele_rows(
        &mut self,
        refget_accession: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<VariationRow>, StorageError>;
}

struct BatchState {
    active: bool,
    buffer: RowBatch,
}

/// Relational store over any [`SqlBackend`].
pub struct SqlStore<B: SqlBackend> {
    backend: Mutex<B>,
    writer: BatchWriter,
    batch: Mutex<BatchState>,
    batch_limit: usize,
    flush_on_batch_exit: bool,
}

impl<B: SqlBackend> SqlStore<B> {
    /// Build a store from a reader/direct connection and a second
    /// connection that is moved into the background writer thread.
    pub fn new(reader: B, mut writer_backend: B, options: &StoreOptions) -> Self {
        let writer = BatchWriter::start(options.max_pending_batches, move |batch| {
            writer_backend.merge_batch(batch)
        });
        Self {
            backend: Mutex::new(reader),
            writer,
            batch: Mutex::new(BatchState {
                active: false,
                buffer: RowBatch::default(),
            }),
            batch_limit: options.batch_limit.max(1),
            flush_on_batch_exit: options.flush_on_batch_exit,
        }
    }

    fn backend(&self) -> std::sync::MutexGuard<'_, B> {
        self.backend.lock().expect("backend lock poisoned")
    }

    /// Number of batches the writer has dropped after merge failures.
    pub fn dropped_batches(&self) -> u64 {
        self.writer.dropped_batches()
    }

    fn compose_variations(
        &self,
        rows: Vec<VariationRow>,
    ) -> Result<Vec<Variation>, StorageError> {
        let location_ids = rows
            .iter()
            .map(|row| row.location_id.clone())
            .collect::<Vec<_>>();
        let locations = self.compose_locations(&location_ids)?;
        rows.iter()
            .map(|row| {
                let location = locations
                    .iter()
                    .find(|l| l.id.as_deref() == Some(row.location_id.as_str()))
                    .cloned()
                    .ok_or_else(|| {
                        StorageError::Backend(format!(
                            "variation {} references missing location {}",
                            row.id, row.location_id
                        ))
                    })?;
                variation_from_row(row, location)
            })
            .collect()
    }

    fn compose_locations(&self, ids: &[String]) -> Result<Vec<SequenceLocation>, StorageError> {
        let mut backend = self.backend();
        let rows = backend.fetch_locations(ids)?;
        let seqref_ids = rows
            .iter()
            .map(|row| row.sequence_reference_id.clone())
            .collect::<Vec<_>>();
        let seqrefs = backend.fetch_sequence_references(&seqref_ids)?;
        drop(backend);

        rows.into_iter()
            .map(|row| {
                let seqref = seqrefs
                    .iter()
                    .find(|sr| sr.id == row.sequence_reference_id)
                    .ok_or_else(|| {
                        StorageError::Backend(format!(
                            "location {} references missing sequence reference {}",
                            row.id, row.sequence_reference_id
                        ))
                    })?;
                Ok(SequenceLocation {
                    id: Some(row.id.clone()),
                    digest: Some(row.digest.clone()),
                    sequence_reference: SequenceReference {
                        refget_accession: seqref.id.clone(),
                        molecule_type: seqref.molecule_type.clone(),
                    },
                    start: decompose::resolve_coordinate(row.start, row.start_outer, row.start_inner),
                    end: decompose::resolve_coordinate(row.end, row.end_outer, row.end_inner),
                })
            })
            .collect()
    }

    /// Check both endpoints of a mapping, also honoring ids still pending
    /// in the current batch buffer.
    fn endpoint_exists(&self, id: &str) -> Result<bool, StorageError> {
        {
            let batch = self.batch.lock().expect("batch lock poisoned");
            if batch.active && batch.buffer.contains_object(id) {
                return Ok(true);
            }
        }
        self.backend().any_variation_exists(&[id.to_string()])
    }

    /// Append rows to the active batch buffer, handing a full buffer to
    /// the writer.  Returns false when the store is not in batch mode.
    fn buffer_rows(&self, append: impl FnOnce(&mut RowBatch)) -> bool {
        let mut batch = self.batch.lock().expect("batch lock poisoned");
        if !batch.active {
            return false;
        }
        append(&mut batch.buffer);
        if batch.buffer.len() >= self.batch_limit {
            let full = std::mem::take(&mut batch.buffer);
            drop(batch);
            tracing::debug!("batch limit reached, queueing {} rows", full.len());
            self.writer.queue_batch(full);
        }
        true
    }
}

impl<B: SqlBackend> Storage for SqlStore<B> {
    fn setup(&self) -> Result<(), StorageError> {
        self.backend().create_schema()
    }

    fn close(&self) {
        self.wait_for_writes();
        self.writer.stop();
    }

    fn wait_for_writes(&self) {
        // Hand any partial buffer to the writer first so that everything
        // accepted before the barrier is covered by it.
        let pending = {
            let mut batch = self.batch.lock().expect("batch lock poisoned");
            if batch.active && !batch.buffer.is_empty() {
                Some(std::mem::take(&mut batch.buffer))
            } else {
                None
            }
        };
        if let Some(rows) = pending {
            self.writer.queue_batch(rows);
        }
        self.writer.wait_for_writes();
    }

    fn wipe_db(&self) -> Result<(), StorageError> {
        self.backend().wipe()
    }

    fn add_objects(&self, objects: &[VrsObject]) -> Result<(), StorageError> {
        let mut rows = RowBatch::default();
        for object in objects {
            rows.push_object(object)?;
        }
        if rows.is_empty() {
            return Ok(());
        }

        let buffered = self.buffer_rows(|buffer| {
            buffer
                .sequence_references
                .append(&mut rows.sequence_references);
            buffer.locations.append(&mut rows.locations);
            buffer.variations.append(&mut rows.variations);
            buffer.annotations.append(&mut rows.annotations);
            buffer.mappings.append(&mut rows.mappings);
        });
        if buffered {
            Ok(())
        } else {
            self.backend().merge_batch(&rows)
        }
    }

    fn get_objects(
        &self,
        object_type: StoredObjectType,
        object_ids: &[String],
    ) -> Result<Vec<VrsObject>, StorageError> {
        let ids = object_ids.iter().take(MAX_ROWS).cloned().collect::<Vec<_>>();
        match object_type {
            StoredObjectType::SequenceReference => Ok(self
                .backend()
                .fetch_sequence_references(&ids)?
                .into_iter()
                .take(MAX_ROWS)
                .map(|row| {
                    VrsObject::SequenceReference(SequenceReference {
                        refget_accession: row.id,
                        molecule_type: row.molecule_type,
                    })
                })
                .collect()),
            StoredObjectType::SequenceLocation => Ok(self
                .compose_locations(&ids)?
                .into_iter()
                .take(MAX_ROWS)
                .map(VrsObject::SequenceLocation)
                .collect()),
            variation_type => {
                let rows = self
                    .backend()
                    .fetch_variations(Some(&variation_type.to_string()), &ids)?;
                Ok(self
                    .compose_variations(rows)?
                    .into_iter()
                    .take(MAX_ROWS)
                    .map(VrsObject::from)
                    .collect())
            }
        }
    }

    fn get_all_object_ids(&self) -> Result<Box<dyn Iterator<Item = String> + Send>, StorageError> {
        let ids = self.backend().fetch_all_ids()?;
        Ok(Box::new(ids.into_iter()))
    }

    fn get_object_count(&self, object_type: StoredObjectType) -> Result<u64, StorageError> {
        self.backend().count_objects(object_type)
    }

    fn delete_objects(
        &self,
        object_type: StoredObjectType,
        object_ids: &[String],
    ) -> Result<(), StorageError> {
        if object_ids.is_empty() {
            return Ok(());
        }
        let mut backend = self.backend();
        if object_type.is_variation() {
            if backend.any_annotation_refs(object_ids)? {
                return Err(StorageError::DataIntegrity(
                    "annotations still reference objects being deleted".to_string(),
                ));
            }
            if backend.any_mapping_refs(object_ids)? {
                return Err(StorageError::DataIntegrity(
                    "mappings still reference objects being deleted".to_string(),
                ));
            }
        } else if object_type == StoredObjectType::SequenceLocation
            && backend.any_location_refs(object_ids)?
        {
            return Err(StorageError::DataIntegrity(
                "variations still reference locations being deleted".to_string(),
            ));
        } else if object_type == StoredObjectType::SequenceReference
            && backend.any_sequence_reference_refs(object_ids)?
        {
            return Err(StorageError::DataIntegrity(
                "locations still reference sequence references being deleted".to_string(),
            ));
        }
        backend.delete_object_rows(object_type, object_ids)
    }

    fn add_mapping(&self, mapping: &VariationMapping) -> Result<(), StorageError> {
        if mapping.source_id == mapping.dest_id {
            return Err(StorageError::InvalidMapping(format!(
                "mapping source and destination are both {}",
                mapping.source_id
            )));
        }
        for id in [&mapping.source_id, &mapping.dest_id] {
            if !self.endpoint_exists(id)? {
                return Err(StorageError::MissingReference(format!(
                    "mapping endpoint {} is not stored",
                    id
                )));
            }
        }
        let row = MappingRow::from(mapping);
        if self.buffer_rows(|buffer| buffer.mappings.push(row.clone())) {
            return Ok(());
        }
        self.backend().insert_mapping(&row)
    }

    fn delete_mapping(&self, mapping: &VariationMapping) -> Result<(), StorageError> {
        self.backend().delete_mapping_row(&MappingRow::from(mapping))
    }

    fn get_mappings(
        &self,
        source_object_id: &str,
        mapping_type: Option<VariationMappingType>,
    ) -> Result<Vec<VariationMapping>, StorageError> {
        let type_filter = mapping_type.map(|t| t.to_string());
        let rows = self
            .backend()
            .fetch_mappings(source_object_id, type_filter.as_deref())?;
        rows.into_iter()
            .take(MAX_ROWS)
            .map(|row| {
                Ok(VariationMapping {
                    source_id: row.source_id,
                    dest_id: row.dest_id,
                    mapping_type: row.mapping_type.parse().map_err(|_| {
                        StorageError::Backend(format!(
                            "unknown mapping type {:?} in database",
                            row.mapping_type
                        ))
                    })?,
                })
            })
            .collect()
    }

    fn add_annotation(&self, annotation: &Annotation) -> Result<(), StorageError> {
        if !self.endpoint_exists(&annotation.object_id)? {
            return Err(StorageError::MissingReference(format!(
                "annotation target {} is not stored",
                annotation.object_id
            )));
        }
        let row = AnnotationRow::from(annotation);
        if self.buffer_rows(|buffer| buffer.annotations.push(row.clone())) {
            return Ok(());
        }
        self.backend().insert_annotation(&row)
    }

    fn delete_annotation(&self, annotation: &Annotation) -> Result<(), StorageError> {
        self.backend().delete_annotation_row(annotation)
    }

    fn get_annotations(
        &self,
        object_id: &str,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, StorageError> {
        let mut annotations = self
            .backend()
            .fetch_annotations(object_id, annotation_type)?;
        annotations.truncate(MAX_ROWS);
        Ok(annotations)
    }

    fn search_alleles(
        &self,
        refget_accession: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Variation>, StorageError> {
        check_search_params(start, end)?;
        let accession = normalize_accession(refget_accession);
        let rows = self.backend().search_allele_rows(accession, start, end)?;
        let mut variations = self.compose_variations(rows)?;
        variations.truncate(MAX_ROWS);
        Ok(variations)
    }

    fn batch_enabled(&self) -> bool {
        true
    }

    fn batch_enter(&self) {
        let mut batch = self.batch.lock().expect("batch lock poisoned");
        batch.active = true;
        batch.buffer = RowBatch::default();
    }

    fn batch_exit(&self) {
        let remainder = {
            let mut batch = self.batch.lock().expect("batch lock poisoned");
            batch.active = false;
            std::mem::take(&mut batch.buffer)
        };
        if !remainder.is_empty() {
            self.writer.queue_batch(remainder);
        }
        if self.flush_on_batch_exit {
            self.writer.wait_for_writes();
        }
    }
}
