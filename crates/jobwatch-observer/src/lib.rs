//! Client-side observer for long-running server jobs.
//!
//! A session merges four racing signal sources (push channel, status poller,
//! output pattern watcher, deadline guard) into one state machine and delivers
//! the terminal outcome to the caller exactly once.

mod callbacks;
mod config;
mod deadline;
mod latch;
mod output_watcher;
mod poller;
mod push_listener;
mod reconcile;
mod session;
mod signal;

pub use callbacks::ObserverCallbacks;
pub use config::{AttachOptions, ObserverConfig};
pub use latch::CompletionLatch;
pub use output_watcher::{OutputPatternSet, PatternKind, PatternMatch};
pub use session::{JobObserver, ObserverError, ObserverHandle, ObserverPhase, SessionOutcome};
pub use signal::{
    FailureKind, JobCompletion, JobFailure, ProgressUpdate, ResultOrigin, SignalSource,
};
