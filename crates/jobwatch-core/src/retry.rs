use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::current_unix_timestamp_ms;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns `base * attempt`, the delay used between reconciliation fetches.
pub fn linear_backoff_delay(base: Duration, attempt: usize) -> Duration {
    let factor = u32::try_from(attempt.max(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Exponential backoff in milliseconds, doubling per attempt up to 64x the base.
pub fn next_backoff_ms(base_ms: u64, attempt: usize) -> u64 {
    let shift = attempt.min(6);
    base_ms.saturating_mul(1_u64 << shift)
}

pub fn next_backoff_ms_with_jitter(base_ms: u64, attempt: usize, jitter_enabled: bool) -> u64 {
    let base = next_backoff_ms(base_ms, attempt);
    if !jitter_enabled || base <= 1 {
        return base;
    }

    // Bounded jitter in [50%, 100%] of the deterministic backoff.
    let low = base / 2;
    let width = base.saturating_sub(low);
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ 0xA24B_AED4_963E_E407;
    let jitter = if width == 0 {
        0
    } else {
        mixed % width.saturating_add(1)
    };
    low.saturating_add(jitter)
}

pub fn new_request_id() -> String {
    let millis = current_unix_timestamp_ms();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("jobwatch-{millis}-{count}")
}
