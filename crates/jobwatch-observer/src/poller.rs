use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::session::SessionCore;
use crate::SignalSource;

/// Fetches the authoritative record on a fixed interval after a grace delay.
///
/// Fetch errors are logged and retried on the next tick; the poller stops once
/// it sees a terminal record or its token is cancelled.
pub(crate) async fn run_status_poller(core: Arc<SessionCore>, cancel: CancellationToken) {
    let config = core.config();
    let mut ticker = interval_at(Instant::now() + config.poll_grace, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = core.store().get_job(core.job_id()) => fetched,
        };
        match fetched {
            Ok(job) => {
                let terminal = job.is_terminal();
                core.observe_record(SignalSource::Poller, job);
                if terminal {
                    return;
                }
            }
            Err(error) => {
                tracing::warn!(
                    job_id = core.job_id(),
                    error = %error,
                    "status poll failed; retrying on next tick"
                );
            }
        }
    }
}
