use std::time::Duration;

use serde_json::Value;

use crate::OutputPatternSet;

const DEFAULT_POLL_GRACE_MS: u64 = 3_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_RECHECK_INTERVAL_MS: u64 = 30_000;
const DEFAULT_HARD_CEILING_MS: u64 = 15 * 60 * 1_000;
const DEFAULT_RECONCILE_MAX_ATTEMPTS: usize = 3;
const DEFAULT_RECONCILE_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_RECENT_OUTPUT_CAP: usize = 200;

#[derive(Debug, Clone)]
/// Timing and matching knobs shared by every session of a `JobObserver`.
pub struct ObserverConfig {
    /// Delay before the first poll, giving the push channel time to connect.
    pub poll_grace: Duration,
    pub poll_interval: Duration,
    /// Period of the deadline guard's authoritative re-check.
    pub recheck_interval: Duration,
    /// Maximum wait before a still-running job is reported as timed out.
    pub hard_ceiling: Duration,
    pub reconcile_max_attempts: usize,
    pub reconcile_base_delay: Duration,
    pub recent_output_cap: usize,
    pub patterns: OutputPatternSet,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_grace: Duration::from_millis(DEFAULT_POLL_GRACE_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            recheck_interval: Duration::from_millis(DEFAULT_RECHECK_INTERVAL_MS),
            hard_ceiling: Duration::from_millis(DEFAULT_HARD_CEILING_MS),
            reconcile_max_attempts: DEFAULT_RECONCILE_MAX_ATTEMPTS,
            reconcile_base_delay: Duration::from_millis(DEFAULT_RECONCILE_BASE_DELAY_MS),
            recent_output_cap: DEFAULT_RECENT_OUTPUT_CAP,
            patterns: OutputPatternSet::standard(),
        }
    }
}

impl ObserverConfig {
    /// Clamps zero durations so interval timers never spin.
    pub(crate) fn normalized(mut self) -> Self {
        let floor = Duration::from_millis(1);
        self.poll_interval = self.poll_interval.max(floor);
        self.recheck_interval = self.recheck_interval.max(floor);
        self.reconcile_max_attempts = self.reconcile_max_attempts.max(1);
        self
    }
}

#[derive(Debug, Clone, Default)]
/// Per-attach options.
pub struct AttachOptions {
    /// Result handed to `on_complete` when neither the authoritative record nor
    /// the winning signal carried a payload.
    pub default_result: Option<Value>,
}
