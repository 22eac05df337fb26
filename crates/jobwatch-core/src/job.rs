use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Enumerates the lifecycle states of a tracked job record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job was created and is waiting for the executor.
    #[default]
    Queued,
    /// Executor is actively working on the job.
    Running,
    /// Job finished and its result payload is available.
    Completed,
    /// Job finished with an executor-reported error.
    Failed,
}

impl JobStatus {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true when the job cannot transition any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Evaluates whether `next` is a legal successor of this status.
    ///
    /// Statuses only move forward; `running -> running` repeats are allowed and
    /// terminal statuses accept no transition at all.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }

    /// Returns whichever of the two statuses is further along the lifecycle.
    pub fn furthest(self, other: JobStatus) -> JobStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates per-step states reported by the executor.
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "JobProgressWire")]
/// Item-level progress counters for a job.
///
/// A missing `percentage` on the wire is derived from the counters.
pub struct JobProgress {
    pub current: u32,
    pub total: u32,
    pub percentage: u8,
}

#[derive(Deserialize)]
struct JobProgressWire {
    current: u32,
    total: u32,
    #[serde(default)]
    percentage: Option<u8>,
}

impl From<JobProgressWire> for JobProgress {
    fn from(wire: JobProgressWire) -> Self {
        Self {
            current: wire.current,
            total: wire.total,
            percentage: wire
                .percentage
                .unwrap_or_else(|| percentage_of(wire.current, wire.total)),
        }
    }
}

impl JobProgress {
    /// Builds a progress value with the percentage derived from the counters.
    pub fn new(current: u32, total: u32) -> Self {
        Self {
            current,
            total,
            percentage: percentage_of(current, total),
        }
    }
}

fn percentage_of(current: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = u64::from(current.min(total)).saturating_mul(100) / u64::from(total);
    u8::try_from(ratio).unwrap_or(100)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// One named phase of a job, progressing independently of its siblings.
pub struct JobStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobStep {
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: StepStatus::Pending,
            message: None,
        }
    }
}

/// Durable job record as exposed by the record store and carried (in part) by push events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: JobProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub steps: Vec<JobStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Returns a fresh queued record with no progress.
    pub fn queued(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            current_step: None,
            steps: Vec::new(),
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Inserts `step` or replaces the existing step carrying the same id.
    pub fn upsert_step(&mut self, step: JobStep) {
        match self.steps.iter_mut().find(|existing| existing.id == step.id) {
            Some(existing) => *existing = step,
            None => self.steps.push(step),
        }
    }
}

/// Partial update applied by the executor through `MemoryJobStore::update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<JobProgress>,
    pub current_step: Option<String>,
    pub steps: Option<Vec<JobStep>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(current: u32, total: u32) -> Self {
        Self {
            status: Some(JobStatus::Running),
            progress: Some(JobProgress::new(current, total)),
            ..Self::default()
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_current_step(mut self, current_step: impl Into<String>) -> Self {
        self.current_step = Some(current_step.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
