use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    current_unix_timestamp_ms, Job, JobPatch, JobProgress, JobStatus, JobStep, JobStoreError,
};

const JOB_ID_PREFIX: &str = "job";

static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[async_trait]
/// Read side of the durable job record store consumed by observers.
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: &str) -> Result<Job, JobStoreError>;
}

/// In-process record store enforcing the job lifecycle invariants.
///
/// Executors (or tests standing in for them) drive records through
/// `create`/`update`; observers read them through `JobStore::get_job`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<String, Job>>,
    get_calls: AtomicUsize,
    failing_gets: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists a new queued job with an executor-assigned id.
    pub fn create(&self, total: u32, steps: Vec<JobStep>) -> Job {
        let mut job = Job::queued(next_job_id());
        job.progress = JobProgress::new(0, total);
        job.steps = steps;
        lock_unpoisoned(&self.jobs).insert(job.id.clone(), job.clone());
        job
    }

    /// Applies `patch` to the stored record and returns the updated copy.
    pub fn update(&self, job_id: &str, patch: JobPatch) -> Result<Job, JobStoreError> {
        let mut jobs = lock_unpoisoned(&self.jobs);
        let job = jobs.get_mut(job_id).ok_or_else(|| JobStoreError::NotFound {
            job_id: job_id.to_string(),
        })?;
        let next = apply_patch(job, patch)?;
        *job = next.clone();
        Ok(next)
    }

    /// Makes the next `count` reads fail with `JobStoreError::Unavailable`.
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Returns how many reads were served or rejected so far.
    pub fn get_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get_job(&self, job_id: &str) -> Result<Job, JobStoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(JobStoreError::Unavailable(format!(
                "injected read failure for job '{job_id}'"
            )));
        }
        lock_unpoisoned(&self.jobs)
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobStoreError::NotFound {
                job_id: job_id.to_string(),
            })
    }
}

fn apply_patch(current: &Job, patch: JobPatch) -> Result<Job, JobStoreError> {
    let job_id = current.id.clone();
    let next_status = patch.status.unwrap_or(current.status);
    if current.status.is_terminal() && !patch.is_empty() {
        return Err(JobStoreError::InvalidTransition {
            job_id,
            from: current.status,
            to: next_status,
        });
    }
    if !current.status.can_transition_to(next_status) {
        return Err(JobStoreError::InvalidTransition {
            job_id,
            from: current.status,
            to: next_status,
        });
    }
    if patch.result.is_some() && !next_status.is_terminal() {
        return Err(JobStoreError::InvalidPatch {
            job_id,
            reason: "result is only allowed on a terminal status".to_string(),
        });
    }
    if patch.error.is_some() && next_status != JobStatus::Failed {
        return Err(JobStoreError::InvalidPatch {
            job_id,
            reason: "error is only allowed on the failed status".to_string(),
        });
    }

    let mut next = current.clone();
    if let Some(progress) = patch.progress {
        if next_status == JobStatus::Running && progress.current < current.progress.current {
            return Err(JobStoreError::InvalidPatch {
                job_id,
                reason: format!(
                    "progress regressed from {} to {} while running",
                    current.progress.current, progress.current
                ),
            });
        }
        next.progress = progress;
    }
    next.status = next_status;
    if let Some(current_step) = patch.current_step {
        next.current_step = Some(current_step);
    }
    if let Some(steps) = patch.steps {
        next.steps = steps;
    }
    if patch.result.is_some() {
        next.result = patch.result;
    }
    if patch.error.is_some() {
        next.error = patch.error;
    }
    Ok(next)
}

fn next_job_id() -> String {
    let now = current_unix_timestamp_ms();
    let suffix = JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{JOB_ID_PREFIX}-{now}-{suffix:04}")
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
