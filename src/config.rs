//! Environment-driven configuration.
//!
//! Every knob carries a default and can be overridden through an
//! `ANYVAR_*` environment variable; CLI flags override per invocation.

use crate::storage::batch::MergeStyle;
use crate::storage::{StorageError, StoreOptions, TableNames};

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend selection URI (`ANYVAR_STORAGE_URI`).
    pub uri: String,
    pub options: StoreOptions,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, StorageError> {
        let defaults = StoreOptions::default();
        let options = StoreOptions {
            batch_limit: env_parse("ANYVAR_SQL_STORE_BATCH_LIMIT", defaults.batch_limit)?,
            max_pending_batches: env_parse(
                "ANYVAR_SQL_STORE_MAX_PENDING_BATCHES",
                defaults.max_pending_batches,
            )?,
            flush_on_batch_exit: env_bool(
                "ANYVAR_SQL_STORE_FLUSH_ON_BATCHCTX_EXIT",
                defaults.flush_on_batch_exit,
            ),
            merge_style: merge_style_from_env()?,
            tables: TableNames::from_env()?,
        };
        Ok(Self {
            uri: std::env::var("ANYVAR_STORAGE_URI").unwrap_or_default(),
            options,
        })
    }
}

fn merge_style_from_env() -> Result<MergeStyle, StorageError> {
    match std::env::var("ANYVAR_SQL_STORE_MERGE_STYLE") {
        Err(_) => Ok(MergeStyle::default()),
        Ok(value) => match value.as_str() {
            "on_conflict" => Ok(MergeStyle::OnConflictDoNothing),
            "merge" => Ok(MergeStyle::MergeWhenNotMatched),
            "left_join" => Ok(MergeStyle::InsertLeftJoin),
            other => Err(StorageError::Backend(format!(
                "unknown merge style {:?} (expected on_conflict, merge, or left_join)",
                other
            ))),
        },
    }
}

/// Asynchronous job queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory for async working files (`ANYVAR_VCF_ASYNC_WORK_DIR`);
    /// async mode is disabled when unset.
    pub work_dir: Option<std::path::PathBuf>,
    /// Throughput estimate used for `Retry-After`
    /// (`ANYVAR_EXPECTED_VRS_IDS_PER_SECOND`, default 500).
    pub expected_vrs_ids_per_second: u64,
    /// Status code reported for terminal failures
    /// (`ANYVAR_VCF_ASYNC_FAILURE_STATUS_CODE`, default 500).
    pub failure_status_code: u16,
    /// Hard per-job time limit in seconds (default 3900).
    pub task_time_limit_secs: u64,
    /// Soft per-job time limit in seconds (default 3600).
    pub soft_time_limit_secs: u64,
    /// Number of worker threads.
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            expected_vrs_ids_per_second: 500,
            failure_status_code: 500,
            task_time_limit_secs: 3900,
            soft_time_limit_secs: 3600,
            workers: 1,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, StorageError> {
        let defaults = Self::default();
        Ok(Self {
            work_dir: std::env::var("ANYVAR_VCF_ASYNC_WORK_DIR")
                .ok()
                .map(std::path::PathBuf::from),
            expected_vrs_ids_per_second: env_parse(
                "ANYVAR_EXPECTED_VRS_IDS_PER_SECOND",
                defaults.expected_vrs_ids_per_second,
            )?,
            failure_status_code: env_parse(
                "ANYVAR_VCF_ASYNC_FAILURE_STATUS_CODE",
                defaults.failure_status_code,
            )?,
            task_time_limit_secs: env_parse(
                "ANYVAR_TASK_TIME_LIMIT",
                defaults.task_time_limit_secs,
            )?,
            soft_time_limit_secs: env_parse(
                "ANYVAR_SOFT_TIME_LIMIT",
                defaults.soft_time_limit_secs,
            )?,
            workers: env_parse("ANYVAR_QUEUE_WORKER_COUNT", defaults.workers)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> Result<T, StorageError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| {
            StorageError::Backend(format!("could not parse {} value {:?}", var, value))
        }),
    }
}

fn env_bool(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Err(_) => default,
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn queue_defaults() {
        let config = super::QueueConfig::default();
        assert_eq!(config.expected_vrs_ids_per_second, 500);
        assert_eq!(config.failure_status_code, 500);
        assert_eq!(config.task_time_limit_secs, 3900);
        assert_eq!(config.soft_time_limit_secs, 3600);
    }

    #[test]
    fn storage_defaults() {
        let options = crate::storage::StoreOptions::default();
        assert_eq!(options.batch_limit, 65536);
        assert_eq!(options.max_pending_batches, 50);
        assert!(options.flush_on_batch_exit);
    }
}
