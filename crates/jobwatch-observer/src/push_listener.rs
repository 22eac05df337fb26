use std::sync::Arc;

use jobwatch_core::{ConnectionState, JobStatus, PushEvent, PushSubscription, StepStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::SessionCore;
use crate::signal::TerminalSignal;
use crate::{FailureKind, SignalSource};

/// Drains the push subscription until it closes or the session stops.
///
/// A closed channel only ends this source; polling and the deadline guard keep
/// running.
pub(crate) async fn run_push_listener(
    core: Arc<SessionCore>,
    subscription: PushSubscription,
    lines: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) {
    let PushSubscription {
        mut events,
        mut connection,
    } = subscription;
    core.record_connection(*connection.borrow_and_update());
    let mut connection_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = connection.changed(), if connection_open => {
                match changed {
                    Ok(()) => core.record_connection(*connection.borrow_and_update()),
                    Err(_) => connection_open = false,
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!(
                        job_id = core.job_id(),
                        "push channel closed; polling continues"
                    );
                    core.record_connection(ConnectionState::Disconnected);
                    return;
                };
                handle_push_event(&core, event, &lines);
            }
        }
    }
}

fn handle_push_event(
    core: &Arc<SessionCore>,
    event: PushEvent,
    lines: &mpsc::UnboundedSender<String>,
) {
    tracing::trace!(job_id = core.job_id(), kind = event.kind(), "push event");
    match event {
        PushEvent::Progress {
            progress,
            current_step,
        } => core.apply_progress(SignalSource::Push, |job| {
            job.status = job.status.furthest(JobStatus::Running);
            job.progress = progress;
            if current_step.is_some() {
                job.current_step = current_step;
            }
        }),
        PushEvent::Step { step } => core.apply_progress(SignalSource::Push, |job| {
            job.status = job.status.furthest(JobStatus::Running);
            if step.status == StepStatus::Running {
                job.current_step = Some(step.name.clone());
            }
            job.upsert_step(step);
        }),
        PushEvent::OutputLine { line } => {
            core.record_output(&line);
            let _ = lines.send(line);
        }
        PushEvent::Complete { result } => core.on_terminal_signal(TerminalSignal::Success {
            source: SignalSource::Push,
            payload: result,
            record: None,
        }),
        PushEvent::Error { message } => core.on_terminal_signal(TerminalSignal::Failure {
            source: SignalSource::Push,
            kind: FailureKind::ExecutorReported,
            message,
            record: None,
        }),
    }
}
