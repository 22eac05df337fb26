use jobwatch_core::{linear_backoff_delay, Job, JobStatus};
use serde_json::Value;

use crate::session::SessionCore;
use crate::signal::{executor_error_message, TerminalOutcome};
use crate::{FailureKind, JobCompletion, JobFailure, ResultOrigin, SignalSource};

/// Confirms a success signal against the authoritative record.
///
/// Fetches are retried with linear backoff. An authoritative `failed` record
/// overrides the success signal. When every attempt misses, the outcome falls
/// back to the signal payload, then the caller default, then `null`.
pub(crate) async fn reconcile_success(
    core: &SessionCore,
    source: SignalSource,
    payload: Option<Value>,
    record: Option<Job>,
) -> TerminalOutcome {
    if let Some(job) = record
        .as_ref()
        .filter(|job| job.status == JobStatus::Completed && job.result.is_some())
    {
        return authoritative(core, source, job.clone());
    }

    let config = core.config();
    let max_attempts = config.reconcile_max_attempts.max(1);
    let mut last_record = record;
    for attempt in 1..=max_attempts {
        match core.store().get_job(core.job_id()).await {
            Ok(job) if job.status == JobStatus::Completed && job.result.is_some() => {
                return authoritative(core, source, job);
            }
            Ok(job) if job.status == JobStatus::Failed => {
                tracing::warn!(
                    job_id = core.job_id(),
                    source = source.as_str(),
                    "authoritative record reports failure; overriding success signal"
                );
                return TerminalOutcome::Failed(JobFailure {
                    job_id: core.job_id().to_string(),
                    kind: FailureKind::ExecutorReported,
                    message: executor_error_message(&job),
                    source,
                    job: Some(job),
                });
            }
            Ok(job) => {
                tracing::debug!(
                    job_id = core.job_id(),
                    attempt,
                    status = job.status.as_str(),
                    "authoritative result not available yet"
                );
                last_record = Some(job);
            }
            Err(error) => {
                tracing::warn!(
                    job_id = core.job_id(),
                    attempt,
                    max_attempts,
                    error = %error,
                    "result reconciliation fetch failed"
                );
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(linear_backoff_delay(config.reconcile_base_delay, attempt)).await;
        }
    }

    let (result, origin) = match (payload, core.default_result()) {
        (Some(payload), _) => (payload, ResultOrigin::SignalPayload),
        (None, Some(default)) => (default, ResultOrigin::CallerDefault),
        (None, None) => (Value::Null, ResultOrigin::Unavailable),
    };
    tracing::warn!(
        job_id = core.job_id(),
        source = source.as_str(),
        origin = ?origin,
        "reconciliation exhausted; completing with best available result"
    );
    TerminalOutcome::Completed(JobCompletion {
        job_id: core.job_id().to_string(),
        result,
        origin,
        source,
        job: last_record,
    })
}

fn authoritative(core: &SessionCore, source: SignalSource, job: Job) -> TerminalOutcome {
    TerminalOutcome::Completed(JobCompletion {
        job_id: core.job_id().to_string(),
        result: job.result.clone().unwrap_or(Value::Null),
        origin: ResultOrigin::Authoritative,
        source,
        job: Some(job),
    })
}
