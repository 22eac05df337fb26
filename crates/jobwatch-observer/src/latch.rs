use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot gate shared by every terminal signal source of a session.
///
/// `try_trigger` is a single compare-and-set: exactly one caller observes
/// `true` for the lifetime of the latch.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    triggered: AtomicBool,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the first caller.
    pub fn try_trigger(&self) -> bool {
        self.triggered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}
