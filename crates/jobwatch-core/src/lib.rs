//! Foundational job tracking types shared across jobwatch crates.
//!
//! Provides the job record model, push event wire types, the record-store and
//! push-channel seams consumed by the observer, and retry/time helpers.

pub mod error;
pub mod event;
pub mod job;
pub mod push;
pub mod retry;
pub mod store;
pub mod time_utils;

pub use error::JobStoreError;
pub use event::{ConnectionState, PushEvent};
pub use job::{Job, JobPatch, JobProgress, JobStatus, JobStep, StepStatus};
pub use push::{DisabledPushChannel, PushChannel, PushSubscription};
pub use retry::{
    linear_backoff_delay, new_request_id, next_backoff_ms, next_backoff_ms_with_jitter,
};
pub use store::{JobStore, MemoryJobStore};
pub use time_utils::current_unix_timestamp_ms;
