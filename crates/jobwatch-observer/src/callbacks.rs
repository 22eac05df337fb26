use std::fmt;

use crate::{JobCompletion, JobFailure, ProgressUpdate};

pub(crate) type ProgressCallback = Box<dyn Fn(&ProgressUpdate) + Send>;
pub(crate) type CompleteCallback = Box<dyn FnOnce(JobCompletion) + Send>;
pub(crate) type ErrorCallback = Box<dyn FnOnce(JobFailure) + Send>;

/// Caller hooks for one observer session.
///
/// `on_complete` and `on_error` are required and consumed on first use, so the
/// terminal hook can run at most once. `on_progress` may run any number of
/// times before the terminal hook.
pub struct ObserverCallbacks {
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) on_complete: CompleteCallback,
    pub(crate) on_error: ErrorCallback,
}

impl ObserverCallbacks {
    pub fn new<C, E>(on_complete: C, on_error: E) -> Self
    where
        C: FnOnce(JobCompletion) + Send + 'static,
        E: FnOnce(JobFailure) + Send + 'static,
    {
        Self {
            on_progress: None,
            on_complete: Box::new(on_complete),
            on_error: Box::new(on_error),
        }
    }

    pub fn with_progress<P>(mut self, on_progress: P) -> Self
    where
        P: Fn(&ProgressUpdate) + Send + 'static,
    {
        self.on_progress = Some(Box::new(on_progress));
        self
    }
}

impl fmt::Debug for ObserverCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .finish_non_exhaustive()
    }
}
