//! Stateless storage backend (no persistence).
//!
//! Used when the service runs as a translation-only endpoint: writes are
//! discarded and reads always miss.

use crate::vrs::{
    Annotation, StoredObjectType, Variation, VariationMapping, VariationMappingType, VrsObject,
};

use super::{check_search_params, Storage, StorageError};

/// Storage backend that does not persistently store any data.
#[derive(Debug, Default)]
pub struct NoOpStore;

impl Storage for NoOpStore {
    fn setup(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) {}

    fn wait_for_writes(&self) {}

    fn wipe_db(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn add_objects(&self, _objects: &[VrsObject]) -> Result<(), StorageError> {
        Ok(())
    }

    fn get_objects(
        &self,
        _object_type: StoredObjectType,
        _object_ids: &[String],
    ) -> Result<Vec<VrsObject>, StorageError> {
        Ok(vec![])
    }

    fn get_all_object_ids(&self) -> Result<Box<dyn Iterator<Item = String> + Send>, StorageError> {
        Ok(Box::new(std::iter::empty()))
    }

    fn get_object_count(&self, _object_type: StoredObjectType) -> Result<u64, StorageError> {
        Ok(0)
    }

    fn delete_objects(
        &self,
        _object_type: StoredObjectType,
        _object_ids: &[String],
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn add_mapping(&self, _mapping: &VariationMapping) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete_mapping(&self, _mapping: &VariationMapping) -> Result<(), StorageError> {
        Ok(())
    }

    fn get_mappings(
        &self,
        _source_object_id: &str,
        _mapping_type: Option<VariationMappingType>,
    ) -> Result<Vec<VariationMapping>, StorageError> {
        Ok(vec![])
    }

    fn add_annotation(&self, _annotation: &Annotation) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete_annotation(&self, _annotation: &Annotation) -> Result<(), StorageError> {
        Ok(())
    }

    fn get_annotations(
        &self,
        _object_id: &str,
        _annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, StorageError> {
        Ok(vec![])
    }

    fn search_alleles(
        &self,
        _refget_accession: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Variation>, StorageError> {
        check_search_params(start, end)?;
        Ok(vec![])
    }
}
