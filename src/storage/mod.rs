//! Storage backends for VRS objects, annotations, and mappings.
//!
//! All backends implement the [`Storage`] contract; behavioural
//! differences between them are limited to performance.  SQL backends
//! embed the batched background write engine from [`batch`].

pub mod batch;
pub mod memory;
pub mod noop;
pub mod postgres;
pub mod sql;
pub mod sqlite;

use std::sync::Arc;

use crate::vrs::{
    Annotation, StoredObjectType, Variation, VariationMapping, VariationMappingType, VrsObject,
};

/// Maximum number of rows returned by bounded read operations.  Larger
/// result sets are truncated silently.
pub const MAX_ROWS: usize = 1024;

/// Errors raised by storage backends.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// An input object lacks required identifiers or nested references.
    #[error("incomplete object: {0}")]
    IncompleteObject(String),
    /// An annotation or mapping targets an unknown object.
    #[error("missing reference: {0}")]
    MissingReference(String),
    /// A delete would orphan dependent rows.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    /// Range-search parameters are out of order or negative.
    #[error("invalid search parameters: {0}")]
    InvalidSearchParams(String),
    /// A mapping is self-referential or malformed.
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
    /// The database connection failed.
    #[error("storage connection error: {0}")]
    Connection(String),
    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Uniform storage contract.
///
/// Implementations must be shareable across worker threads; all methods
/// take `&self` and synchronize internally.
pub trait Storage: Send + Sync {
    /// Prepare the backend for use, creating schema objects if absent.
    fn setup(&self) -> Result<(), StorageError>;

    /// Flush pending writes and release resources.  The store must not be
    /// used afterwards.
    fn close(&self);

    /// Return only after every previously accepted write is durable.
    fn wait_for_writes(&self);

    /// Remove all rows from all managed tables.
    fn wipe_db(&self) -> Result<(), StorageError>;

    /// Insert objects under insert-if-absent semantics; duplicates are
    /// silently skipped.
    fn add_objects(&self, objects: &[VrsObject]) -> Result<(), StorageError>;

    /// Fetch objects of one type by their IDs (bounded by [`MAX_ROWS`]).
    fn get_objects(
        &self,
        object_type: StoredObjectType,
        object_ids: &[String],
    ) -> Result<Vec<VrsObject>, StorageError>;

    /// Iterate over all known object IDs.
    fn get_all_object_ids(&self) -> Result<Box<dyn Iterator<Item = String> + Send>, StorageError>;

    /// Count stored objects of one type.
    fn get_object_count(&self, object_type: StoredObjectType) -> Result<u64, StorageError>;

    /// Delete objects of one type by ID.  Deletes do not cascade.
    fn delete_objects(
        &self,
        object_type: StoredObjectType,
        object_ids: &[String],
    ) -> Result<(), StorageError>;

    /// Insert a mapping; inserting an identical tuple twice is a no-op.
    fn add_mapping(&self, mapping: &VariationMapping) -> Result<(), StorageError>;

    /// Delete a mapping; no-op if absent.
    fn delete_mapping(&self, mapping: &VariationMapping) -> Result<(), StorageError>;

    /// List mappings from a source object, optionally filtered by type.
    fn get_mappings(
        &self,
        source_object_id: &str,
        mapping_type: Option<VariationMappingType>,
    ) -> Result<Vec<VariationMapping>, StorageError>;

    /// Insert an annotation; duplicate rows are permitted.
    fn add_annotation(&self, annotation: &Annotation) -> Result<(), StorageError>;

    /// Delete an annotation row; no-op if absent.
    fn delete_annotation(&self, annotation: &Annotation) -> Result<(), StorageError>;

    /// List annotations for an object (bounded by [`MAX_ROWS`]).
    fn get_annotations(
        &self,
        object_id: &str,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, StorageError>;

    /// Find Alleles whose location interval is contained in
    /// `[start, end]` on the given reference.
    fn search_alleles(
        &self,
        refget_accession: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Variation>, StorageError>;

    /// Whether this backend buffers writes under a batch scope.
    fn batch_enabled(&self) -> bool {
        false
    }

    /// Switch the store into batch mode.  Use [`BatchScope`] rather than
    /// calling this directly.
    fn batch_enter(&self) {}

    /// Leave batch mode, enqueue the remaining buffer, and (if configured)
    /// wait for the flush barrier.
    fn batch_exit(&self) {}
}

/// RAII guard for batch mode: entering switches the store into batch
/// accumulation, leaving on any exit path enqueues the remainder and, if
/// the store is configured to, waits for the flush barrier.
pub struct BatchScope<'a> {
    storage: &'a dyn Storage,
}

impl<'a> BatchScope<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        storage.batch_enter();
        Self { storage }
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        self.storage.batch_exit();
    }
}

/// Validate query bounds for `search_alleles`.
pub(crate) fn check_search_params(start: i64, end: i64) -> Result<(), StorageError> {
    if start < 0 {
        return Err(StorageError::InvalidSearchParams(format!(
            "start must be non-negative, got {}",
            start
        )));
    }
    if start > end {
        return Err(StorageError::InvalidSearchParams(format!(
            "start {} is greater than end {}",
            start, end
        )));
    }
    Ok(())
}

/// Strip an optional `ga4gh:` prefix from a refget accession.
pub(crate) fn normalize_accession(accession: &str) -> &str {
    accession.strip_prefix("ga4gh:").unwrap_or(accession)
}

/// Names of the managed tables, overridable one by one through
/// `ANYVAR_<PLURAL_NAME>_TABLE_NAME` environment variables.
#[derive(Debug, Clone)]
pub struct TableNames {
    pub alleles: String,
    pub locations: String,
    pub sequence_references: String,
    pub annotations: String,
    pub variation_mappings: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            alleles: "alleles".to_string(),
            locations: "locations".to_string(),
            sequence_references: "sequence_references".to_string(),
            annotations: "annotations".to_string(),
            variation_mappings: "variation_mappings".to_string(),
        }
    }
}

impl TableNames {
    /// Read table-name overrides from the environment.
    pub fn from_env() -> Result<Self, StorageError> {
        let defaults = Self::default();
        Ok(Self {
            alleles: Self::name_from_env("ANYVAR_ALLELES_TABLE_NAME", &defaults.alleles)?,
            locations: Self::name_from_env("ANYVAR_LOCATIONS_TABLE_NAME", &defaults.locations)?,
            sequence_references: Self::name_from_env(
                "ANYVAR_SEQUENCE_REFERENCES_TABLE_NAME",
                &defaults.sequence_references,
            )?,
            annotations: Self::name_from_env(
                "ANYVAR_ANNOTATIONS_TABLE_NAME",
                &defaults.annotations,
            )?,
            variation_mappings: Self::name_from_env(
                "ANYVAR_VARIATION_MAPPINGS_TABLE_NAME",
                &defaults.variation_mappings,
            )?,
        })
    }

    fn name_from_env(var: &str, default: &str) -> Result<String, StorageError> {
        let name = std::env::var(var).unwrap_or_else(|_| default.to_string());
        // Table names are interpolated into SQL; restrict to identifiers.
        if !name
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
            || name.is_empty()
        {
            return Err(StorageError::Backend(format!(
                "invalid table name {:?} from {}",
                name, var
            )));
        }
        Ok(name)
    }
}

/// Options shared by the SQL backends.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Rows accumulated in-process before a batch is handed to the writer.
    pub batch_limit: usize,
    /// Back-pressure depth of the background writer queue.
    pub max_pending_batches: usize,
    /// Whether leaving a batch scope implies a flush barrier.
    pub flush_on_batch_exit: bool,
    /// Merge statement shape used by the background writer.
    pub merge_style: batch::MergeStyle,
    /// Table names.
    pub tables: TableNames,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            batch_limit: 65536,
            max_pending_batches: 50,
            flush_on_batch_exit: true,
            merge_style: batch::MergeStyle::OnConflictDoNothing,
            tables: TableNames::default(),
        }
    }
}

/// Create a storage backend from a URI.
///
/// Supported schemes: `postgresql://…`, `sqlite://<path>`, `memory:`,
/// and the empty string (or `null:`) for the no-op store.
pub fn create_storage(uri: &str, options: StoreOptions) -> Result<Arc<dyn Storage>, StorageError> {
    let storage: Arc<dyn Storage> = if uri.is_empty() || uri == "null:" {
        Arc::new(noop::NoOpStore::default())
    } else if uri == "memory:" {
        Arc::new(memory::InMemoryStore::default())
    } else if let Some(path) = uri.strip_prefix("sqlite://") {
        Arc::new(sqlite::open_store(Some(path), options)?)
    } else if uri.starts_with("postgresql://") || uri.starts_with("postgres://") {
        Arc::new(postgres::connect_store(uri, options)?)
    } else {
        return Err(StorageError::Backend(format!(
            "URI scheme of {:?} is not implemented",
            uri
        )));
    };
    storage.setup()?;
    Ok(storage)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Storage as _;

    #[test]
    fn check_search_params() {
        assert!(super::check_search_params(0, 0).is_ok());
        assert!(super::check_search_params(5, 10).is_ok());
        assert!(super::check_search_params(-1, 10).is_err());
        assert!(super::check_search_params(11, 10).is_err());
    }

    #[test]
    fn normalize_accession() {
        assert_eq!(
            super::normalize_accession("ga4gh:SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"),
            "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"
        );
        assert_eq!(
            super::normalize_accession("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"),
            "SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"
        );
    }

    #[test]
    fn table_names_default() {
        let names = super::TableNames::default();
        assert_eq!(names.alleles, "alleles");
        assert_eq!(names.variation_mappings, "variation_mappings");
    }

    #[test]
    fn create_storage_dispatch() -> Result<(), super::StorageError> {
        let noop = super::create_storage("", super::StoreOptions::default())?;
        assert!(!noop.batch_enabled());

        let memory = super::create_storage("memory:", super::StoreOptions::default())?;
        assert!(memory.get_all_object_ids()?.next().is_none());

        assert!(super::create_storage("redis://x", super::StoreOptions::default()).is_err());

        Ok(())
    }
}
