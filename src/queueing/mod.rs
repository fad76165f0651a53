//! Asynchronous job queue for VCF pipeline runs.
//!
//! Jobs are named (caller-supplied or generated run ids), idempotent at
//! submission, and processed by a small pool of worker threads.  A `SENT`
//! mark is published at submit time so `PENDING` unambiguously means
//! "never seen".  Workers initialize exactly one shared runtime on the
//! first job, guarded by a mutex, and tear it down at queue shutdown.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::anyvar::AnyVar;
use crate::config::QueueConfig;
use crate::storage::Storage as _;
use crate::vcf::annotate::{annotate_vcf, AnnotateOptions};
use crate::vcf::ingest::{ingest_annotated_vcf, report_artifact, IngestOptions};
use crate::vcf::VcfError;

/// The pipeline entry point a job runs.
#[derive(Debug, Clone)]
pub enum JobKind {
    AnnotateVcf(AnnotateOptions),
    IngestAnnotatedVcf(IngestOptions),
}

/// Errors raised by queue operations.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    /// A run with this id already exists and is not forgotten yet.
    #[error(
        "an existing run with id {run_id} is {state}; fetch the completed run result before \
         submitting with the same run_id"
    )]
    Conflict { run_id: String, state: JobState },
    /// The queue is shutting down.
    #[error("job queue is stopped")]
    Stopped,
}

/// Externally visible job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Unknown run id.
    Pending,
    /// Accepted but not finished.
    Sent,
    Success,
    Failure,
}

/// Failure classification for terminal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    TimeLimitExceeded,
    WorkerLostError,
    RunFailure,
}

/// Snapshot returned by [`JobQueue::status`].
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub run_id: String,
    pub state: JobState,
    /// Result artifact (annotated VCF or validation CSV) on success.
    pub result_path: Option<PathBuf>,
    pub error: Option<(FailureCode, String)>,
}

/// Receipt returned by [`JobQueue::submit`].
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub run_id: String,
    /// Polling hint derived from the site count and the configured
    /// expected translation rate; at least one second.
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Sent,
    Started,
    Success,
    Failure,
}

struct JobRecord {
    kind: JobKind,
    input_file_path: PathBuf,
    state: RecordState,
    started_at: Option<Instant>,
    result_path: Option<PathBuf>,
    error: Option<(FailureCode, String)>,
}

struct QueueState {
    queue: VecDeque<String>,
    records: HashMap<String, JobRecord>,
    stop: bool,
}

type RuntimeFactory = dyn Fn() -> Result<AnyVar, String> + Send + Sync;

struct QueueShared {
    state: Mutex<QueueState>,
    cond: Condvar,
    runtime: Mutex<Option<Arc<AnyVar>>>,
    runtime_factory: Box<RuntimeFactory>,
    config: QueueConfig,
}

/// Worker pool with named, idempotent jobs.
pub struct JobQueue {
    shared: Arc<QueueShared>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl JobQueue {
    /// Start the worker pool.  `runtime_factory` builds the shared
    /// runtime lazily on the first job.
    pub fn start<F>(config: QueueConfig, runtime_factory: F) -> Self
    where
        F: Fn() -> Result<AnyVar, String> + Send + Sync + 'static,
    {
        let worker_count = config.workers.max(1);
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                records: HashMap::new(),
                stop: false,
            }),
            cond: Condvar::new(),
            runtime: Mutex::new(None),
            runtime_factory: Box::new(runtime_factory),
            config,
        });

        let workers = (0..worker_count)
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("anyvar-job-worker-{}", i))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn job worker thread")
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submit a job.  A caller-supplied `run_id` is rejected with a
    /// conflict error while a run under that id is still known.
    pub fn submit(
        &self,
        kind: JobKind,
        input_file_path: &Path,
        site_count: u64,
        run_id: Option<String>,
    ) -> Result<SubmitReceipt, JobError> {
        let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut state = self.shared.state.lock().expect("queue lock poisoned");
        if state.stop {
            return Err(JobError::Stopped);
        }
        if let Some(record) = state.records.get(&run_id) {
            return Err(JobError::Conflict {
                run_id,
                state: public_state(record),
            });
        }

        let factor = match &kind {
            JobKind::AnnotateVcf(options) if options.compute_for_ref => 2,
            _ => 1,
        };
        let rate = self.shared.config.expected_vrs_ids_per_second.max(1);
        let retry_after_secs = ((site_count * factor).div_ceil(rate)).max(1);

        state.records.insert(
            run_id.clone(),
            JobRecord {
                kind,
                input_file_path: input_file_path.to_path_buf(),
                state: RecordState::Sent,
                started_at: None,
                result_path: None,
                error: None,
            },
        );
        state.queue.push_back(run_id.clone());
        self.shared.cond.notify_all();
        tracing::info!(
            "{} - run submitted, retry after {}s",
            run_id,
            retry_after_secs
        );

        Ok(SubmitReceipt {
            run_id,
            retry_after_secs,
        })
    }

    /// Report the state of a run.  Unknown ids report `PENDING`.  A run
    /// started longer ago than the hard time limit is marked failed with
    /// `TIME_LIMIT_EXCEEDED`; a late worker result for it is discarded.
    pub fn status(&self, run_id: &str) -> JobStatus {
        let mut state = self.shared.state.lock().expect("queue lock poisoned");
        let hard_limit = Duration::from_secs(self.shared.config.task_time_limit_secs);
        let Some(record) = state.records.get_mut(run_id) else {
            return JobStatus {
                run_id: run_id.to_string(),
                state: JobState::Pending,
                result_path: None,
                error: None,
            };
        };

        if record.state == RecordState::Started
            && record
                .started_at
                .map(|started_at| started_at.elapsed() > hard_limit)
                .unwrap_or(false)
        {
            record.state = RecordState::Failure;
            record.error = Some((
                FailureCode::TimeLimitExceeded,
                "hard task time limit exceeded".to_string(),
            ));
        }

        JobStatus {
            run_id: run_id.to_string(),
            state: public_state(record),
            result_path: record.result_path.clone(),
            error: record.error.clone(),
        }
    }

    /// Release a run's record after the client has retrieved the result.
    /// Working and result files are removed best-effort.
    pub fn forget(&self, run_id: &str) {
        let record = {
            let mut state = self.shared.state.lock().expect("queue lock poisoned");
            state.queue.retain(|queued| queued != run_id);
            state.records.remove(run_id)
        };
        if let Some(record) = record {
            working_file_cleanup(&record.input_file_path);
            if let Some(result_path) = &record.result_path {
                working_file_cleanup(result_path);
            }
        }
    }

    /// Stop accepting jobs, join the workers, and tear down the shared
    /// runtime.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().expect("queue lock poisoned");
            state.stop = true;
            self.shared.cond.notify_all();
        }
        let workers = std::mem::take(&mut *self.workers.lock().expect("worker lock poisoned"));
        for worker in workers {
            let _ = worker.join();
        }
        if let Some(runtime) = self
            .shared
            .runtime
            .lock()
            .expect("runtime lock poisoned")
            .take()
        {
            tracing::info!("closing shared runtime at queue shutdown");
            runtime.storage.close();
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn public_state(record: &JobRecord) -> JobState {
    match record.state {
        RecordState::Sent | RecordState::Started => JobState::Sent,
        RecordState::Success => JobState::Success,
        RecordState::Failure => JobState::Failure,
    }
}

fn working_file_cleanup(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("unable to remove working file {}: {}", path.display(), e);
        }
    }
}

fn worker_loop(shared: &QueueShared) {
    loop {
        let run_id = {
            let mut state = shared.state.lock().expect("queue lock poisoned");
            loop {
                if let Some(run_id) = state.queue.pop_front() {
                    break run_id;
                }
                if state.stop {
                    return;
                }
                state = shared.cond.wait(state).expect("queue lock poisoned");
            }
        };

        let (kind, input_file_path) = {
            let mut state = shared.state.lock().expect("queue lock poisoned");
            let Some(record) = state.records.get_mut(&run_id) else {
                // Forgotten while queued.
                continue;
            };
            record.state = RecordState::Started;
            record.started_at = Some(Instant::now());
            (record.kind.clone(), record.input_file_path.clone())
        };

        let runtime = match runtime_for_worker(shared) {
            Ok(runtime) => runtime,
            Err(message) => {
                tracing::error!("{} - could not initialize runtime: {}", run_id, message);
                finish_job(
                    shared,
                    &run_id,
                    Err((FailureCode::RunFailure, message)),
                );
                continue;
            }
        };

        let deadline = Instant::now() + Duration::from_secs(shared.config.soft_time_limit_secs);
        tracing::info!("{} - starting {}", run_id, job_name(&kind));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_job(&runtime, &kind, &input_file_path, deadline)
        }));

        let result = match outcome {
            Ok(Ok(result_path)) => {
                // The input file is no longer needed after a successful
                // run.
                working_file_cleanup(&input_file_path);
                Ok(result_path)
            }
            Ok(Err(VcfError::TimeLimitExceeded)) => Err((
                FailureCode::TimeLimitExceeded,
                "soft task time limit exceeded".to_string(),
            )),
            Ok(Err(e)) => Err((FailureCode::RunFailure, e.to_string())),
            Err(_) => Err((
                FailureCode::WorkerLostError,
                "worker lost while executing run".to_string(),
            )),
        };
        finish_job(shared, &run_id, result);
    }
}

fn job_name(kind: &JobKind) -> &'static str {
    match kind {
        JobKind::AnnotateVcf(_) => "annotate_vcf",
        JobKind::IngestAnnotatedVcf(_) => "ingest_annotated_vcf",
    }
}

/// Initialize the shared runtime exactly once, behind the mutex.
fn runtime_for_worker(shared: &QueueShared) -> Result<Arc<AnyVar>, String> {
    let mut runtime = shared.runtime.lock().expect("runtime lock poisoned");
    if let Some(runtime) = runtime.as_ref() {
        return Ok(runtime.clone());
    }
    tracing::info!("creating shared runtime for job workers");
    let created = Arc::new((shared.runtime_factory)()?);
    *runtime = Some(created.clone());
    Ok(created)
}

fn run_job(
    runtime: &AnyVar,
    kind: &JobKind,
    input_file_path: &Path,
    deadline: Instant,
) -> Result<Option<PathBuf>, VcfError> {
    match kind {
        JobKind::AnnotateVcf(options) => {
            let output_file_path =
                PathBuf::from(format!("{}_outputvcf", input_file_path.display()));
            annotate_vcf(
                runtime,
                input_file_path,
                &output_file_path,
                options,
                Some(deadline),
            )?;
            Ok(Some(output_file_path))
        }
        JobKind::IngestAnnotatedVcf(options) => {
            let report_path =
                PathBuf::from(format!("{}_conflicts.csv", input_file_path.display()));
            let summary = ingest_annotated_vcf(
                runtime,
                input_file_path,
                options.require_validation.then_some(report_path.as_path()),
                options,
                Some(deadline),
            )?;
            Ok(report_artifact(&report_path, &summary))
        }
    }
}

fn finish_job(
    shared: &QueueShared,
    run_id: &str,
    result: Result<Option<PathBuf>, (FailureCode, String)>,
) {
    let mut state = shared.state.lock().expect("queue lock poisoned");
    let Some(record) = state.records.get_mut(run_id) else {
        return;
    };
    if record.state == RecordState::Failure {
        // Already reported as timed out at poll time; discard the late
        // result.
        if let Ok(Some(result_path)) = &result {
            working_file_cleanup(result_path);
        }
        return;
    }
    match result {
        Ok(result_path) => {
            tracing::info!("{} - run completed", run_id);
            record.state = RecordState::Success;
            record.result_path = result_path;
        }
        Err((code, message)) => {
            tracing::error!("{} - run failed with {}: {}", run_id, code, message);
            record.state = RecordState::Failure;
            record.error = Some((code, message));
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use crate::config::QueueConfig;
    use crate::vcf::annotate::test::{runtime, write_sample_vcf, SAMPLE_VCF};
    use crate::vcf::annotate::AnnotateOptions;

    use super::{FailureCode, JobError, JobKind, JobQueue, JobState};

    fn queue() -> JobQueue {
        JobQueue::start(QueueConfig::default(), || Ok(runtime()))
    }

    fn wait_for_terminal(queue: &JobQueue, run_id: &str) -> super::JobStatus {
        for _ in 0..200 {
            let status = queue.status(run_id);
            if matches!(status.state, JobState::Success | JobState::Failure) {
                return status;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("job {} did not reach a terminal state", run_id);
    }

    #[test]
    fn unknown_run_is_pending() {
        let queue = queue();
        assert_eq!(queue.status("no-such-run").state, JobState::Pending);
        queue.stop();
    }

    #[test]
    fn submit_runs_and_yields_artifact() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());
        let sites = SAMPLE_VCF.lines().count() as u64;

        let queue = queue();
        let receipt = queue
            .submit(
                JobKind::AnnotateVcf(AnnotateOptions::default()),
                &path_in,
                sites,
                Some("run-1".to_string()),
            )
            .unwrap();
        assert_eq!(receipt.run_id, "run-1");
        assert!(receipt.retry_after_secs >= 1);

        let status = wait_for_terminal(&queue, "run-1");
        assert_eq!(status.state, JobState::Success);
        let result_path = status.result_path.unwrap();
        let output = std::fs::read_to_string(&result_path).unwrap();
        assert!(output.contains("VRS_Allele_IDs="));
        // The input working file is removed after a successful run.
        assert!(!path_in.exists());

        queue.forget("run-1");
        assert!(!result_path.exists());
        assert_eq!(queue.status("run-1").state, JobState::Pending);
        queue.stop();
    }

    #[test]
    fn duplicate_submit_conflicts_until_forgotten() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());

        let queue = queue();
        queue
            .submit(
                JobKind::AnnotateVcf(AnnotateOptions::default()),
                &path_in,
                4,
                Some("run-dup".to_string()),
            )
            .unwrap();
        let second = queue.submit(
            JobKind::AnnotateVcf(AnnotateOptions::default()),
            &path_in,
            4,
            Some("run-dup".to_string()),
        );
        assert!(matches!(second, Err(JobError::Conflict { .. })));

        wait_for_terminal(&queue, "run-dup");
        // Still known (and thus still conflicting) until forgotten.
        assert!(queue
            .submit(
                JobKind::AnnotateVcf(AnnotateOptions::default()),
                &path_in,
                4,
                Some("run-dup".to_string()),
            )
            .is_err());
        queue.forget("run-dup");
        queue.stop();
    }

    #[test]
    fn failure_carries_run_failure_code() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let missing = tmp_dir.path().join("does-not-exist.vcf");

        let queue = queue();
        let receipt = queue
            .submit(
                JobKind::AnnotateVcf(AnnotateOptions::default()),
                &missing,
                1,
                None,
            )
            .unwrap();
        let status = wait_for_terminal(&queue, &receipt.run_id);
        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.error.unwrap().0, FailureCode::RunFailure);
        queue.stop();
    }

    #[test]
    fn soft_time_limit_reports_time_limit_exceeded() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());

        let config = QueueConfig {
            soft_time_limit_secs: 0,
            ..Default::default()
        };
        let queue = JobQueue::start(config, || Ok(runtime()));
        let receipt = queue
            .submit(
                JobKind::AnnotateVcf(AnnotateOptions::default()),
                &path_in,
                4,
                None,
            )
            .unwrap();
        let status = wait_for_terminal(&queue, &receipt.run_id);
        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.error.unwrap().0, FailureCode::TimeLimitExceeded);
        queue.stop();
    }

    #[test]
    fn retry_after_scales_with_site_count() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());

        let config = QueueConfig {
            expected_vrs_ids_per_second: 100,
            ..Default::default()
        };
        let queue = JobQueue::start(config, || Ok(runtime()));
        let receipt = queue
            .submit(
                JobKind::AnnotateVcf(AnnotateOptions {
                    compute_for_ref: true,
                    ..Default::default()
                }),
                &path_in,
                1000,
                None,
            )
            .unwrap();
        // 1000 sites, factor 2, 100 ids/s.
        assert_eq!(receipt.retry_after_secs, 20);
        queue.forget(&receipt.run_id);
        queue.stop();
    }
}
