use std::fmt;

use jobwatch_core::{Job, JobProgress, JobStatus, JobStep};
use serde::Serialize;
use serde_json::Value;

/// Enumerates the independent sources that may report job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Push,
    Poller,
    OutputWatcher,
    Deadline,
}

impl SignalSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poller => "poller",
            Self::OutputWatcher => "output_watcher",
            Self::Deadline => "deadline",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the result handed to `on_complete` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    /// Read from a completed authoritative job record.
    Authoritative,
    /// Carried by the winning signal (e.g. the push `complete` body).
    SignalPayload,
    /// Caller-supplied `AttachOptions::default_result`.
    CallerDefault,
    /// Nothing was available; the result is `null`.
    Unavailable,
}

/// Terminal success delivered to `on_complete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletion {
    pub job_id: String,
    pub result: Value,
    pub origin: ResultOrigin,
    pub source: SignalSource,
    /// Last authoritative record seen during reconciliation, if any.
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates terminal failure kinds.
pub enum FailureKind {
    ExecutorReported,
    OutputPattern,
    TimedOut,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecutorReported => "executor_reported",
            Self::OutputPattern => "output_pattern",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure delivered to `on_error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub job_id: String,
    pub kind: FailureKind,
    pub message: String,
    pub source: SignalSource,
    pub job: Option<Job>,
}

/// Snapshot of the merged job view passed to `on_progress`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub job_id: String,
    pub source: SignalSource,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub current_step: Option<String>,
    pub steps: Vec<JobStep>,
}

impl ProgressUpdate {
    pub(crate) fn from_job(job: &Job, source: SignalSource) -> Self {
        Self {
            job_id: job.id.clone(),
            source,
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            steps: job.steps.clone(),
        }
    }
}

/// Terminal notification fed into the session latch by any source.
#[derive(Debug, Clone)]
pub(crate) enum TerminalSignal {
    Success {
        source: SignalSource,
        payload: Option<Value>,
        record: Option<Job>,
    },
    Failure {
        source: SignalSource,
        kind: FailureKind,
        message: String,
        record: Option<Job>,
    },
}

impl TerminalSignal {
    pub(crate) fn source(&self) -> SignalSource {
        match self {
            Self::Success { source, .. } | Self::Failure { source, .. } => *source,
        }
    }

    /// Maps a terminal authoritative record onto a signal.
    pub(crate) fn from_record(source: SignalSource, job: Job) -> Option<Self> {
        match job.status {
            JobStatus::Completed => Some(Self::Success {
                source,
                payload: job.result.clone(),
                record: Some(job),
            }),
            JobStatus::Failed => Some(Self::Failure {
                source,
                kind: FailureKind::ExecutorReported,
                message: executor_error_message(&job),
                record: Some(job),
            }),
            JobStatus::Queued | JobStatus::Running => None,
        }
    }
}

/// Final decision handed to the callback gate after reconciliation.
#[derive(Debug, Clone)]
pub(crate) enum TerminalOutcome {
    Completed(JobCompletion),
    Failed(JobFailure),
}

pub(crate) fn executor_error_message(job: &Job) -> String {
    job.error
        .as_deref()
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("job '{}' failed without an error message", job.id))
}

#[cfg(test)]
mod tests {
    use jobwatch_core::{Job, JobStatus};
    use serde_json::json;

    use super::{FailureKind, SignalSource, TerminalSignal};

    #[test]
    fn unit_from_record_maps_terminal_statuses_only() {
        let mut job = Job::queued("job-1");
        assert!(TerminalSignal::from_record(SignalSource::Poller, job.clone()).is_none());

        job.status = JobStatus::Completed;
        job.result = Some(json!({"ok": true}));
        let Some(TerminalSignal::Success { payload, record, .. }) =
            TerminalSignal::from_record(SignalSource::Poller, job.clone())
        else {
            panic!("expected success");
        };
        assert_eq!(payload, Some(json!({"ok": true})));
        assert!(record.is_some());

        job.status = JobStatus::Failed;
        job.result = None;
        job.error = Some("  ".to_string());
        let Some(TerminalSignal::Failure { kind, message, .. }) =
            TerminalSignal::from_record(SignalSource::Deadline, job)
        else {
            panic!("expected failure");
        };
        assert_eq!(kind, FailureKind::ExecutorReported);
        assert_eq!(message, "job 'job-1' failed without an error message");
    }
}
