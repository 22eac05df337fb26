use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::session::SessionCore;
use crate::signal::TerminalSignal;
use crate::{FailureKind, SignalSource};

pub(crate) async fn run_deadline_guard(core: Arc<SessionCore>, cancel: CancellationToken) {
    let config = core.config();
    let hard_ceiling = tokio::time::sleep(config.hard_ceiling);
    tokio::pin!(hard_ceiling);
    let mut recheck = interval_at(
        Instant::now() + config.recheck_interval,
        config.recheck_interval,
    );
    recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = &mut hard_ceiling => {
                enforce_hard_ceiling(&core, &cancel).await;
                return;
            }
            _ = recheck.tick() => {}
        }
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = core.store().get_job(core.job_id()) => fetched,
        };
        match fetched {
            Ok(job) if job.is_terminal() => {
                tracing::info!(
                    job_id = core.job_id(),
                    status = job.status.as_str(),
                    "deadline re-check found terminal record"
                );
                core.observe_record(SignalSource::Deadline, job);
                return;
            }
            Ok(job) => {
                tracing::debug!(
                    job_id = core.job_id(),
                    status = job.status.as_str(),
                    "deadline re-check"
                );
            }
            Err(error) => {
                tracing::warn!(job_id = core.job_id(), error = %error, "deadline re-check failed");
            }
        }
    }
}

/// One last authoritative look before declaring a timeout.
async fn enforce_hard_ceiling(core: &Arc<SessionCore>, cancel: &CancellationToken) {
    let fetched = tokio::select! {
        _ = cancel.cancelled() => return,
        fetched = core.store().get_job(core.job_id()) => fetched,
    };
    let (record, detail) = match fetched {
        Ok(job) if job.is_terminal() => {
            core.observe_record(SignalSource::Deadline, job);
            return;
        }
        Ok(job) => {
            let detail = format!("last status: {}", job.status);
            (Some(job), detail)
        }
        Err(error) => (None, format!("final status check failed: {error}")),
    };
    let message = format!(
        "job '{}' exceeded maximum wait of {}s ({detail})",
        core.job_id(),
        core.config().hard_ceiling.as_secs()
    );
    tracing::warn!(job_id = core.job_id(), "{message}");
    core.on_terminal_signal(TerminalSignal::Failure {
        source: SignalSource::Deadline,
        kind: FailureKind::TimedOut,
        message,
        record,
    });
}
