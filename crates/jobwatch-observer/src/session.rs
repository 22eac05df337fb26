use std::{
    cell::Cell,
    collections::{BTreeMap, VecDeque},
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use jobwatch_core::{ConnectionState, Job, JobStatus, JobStore, PushChannel};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::callbacks::{CompleteCallback, ErrorCallback, ProgressCallback};
use crate::deadline::run_deadline_guard;
use crate::output_watcher::run_output_watcher;
use crate::poller::run_status_poller;
use crate::push_listener::run_push_listener;
use crate::reconcile::reconcile_success;
use crate::signal::{TerminalOutcome, TerminalSignal};
use crate::{
    AttachOptions, CompletionLatch, FailureKind, JobFailure, ObserverCallbacks, ObserverConfig,
    ProgressUpdate, SignalSource,
};

thread_local! {
    // Id of the session whose callback this thread is running; 0 when idle.
    static DISPATCHING: Cell<u64> = const { Cell::new(0) };
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors returned by `JobObserver::attach`.
pub enum ObserverError {
    #[error("job id must be non-empty")]
    EmptyJobId,
    #[error("observer sessions must be attached from within a tokio runtime")]
    NoRuntime,
}

/// Enumerates the session state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverPhase {
    Idle,
    Attached,
    Completing,
    Done,
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed { source: SignalSource },
    Failed { source: SignalSource, kind: FailureKind },
    Detached,
}

struct CallbackGate {
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

struct SessionView {
    phase: ObserverPhase,
    job: Job,
    connection: ConnectionState,
    recent_output: VecDeque<String>,
    outcome: Option<SessionOutcome>,
}

/// Shared state of one observer session, referenced by every source task.
pub(crate) struct SessionCore {
    session_id: u64,
    job_id: String,
    config: ObserverConfig,
    store: Arc<dyn JobStore>,
    default_result: Option<Value>,
    latch: CompletionLatch,
    detached: AtomicBool,
    session_cancel: CancellationToken,
    sources_cancel: CancellationToken,
    gate: Mutex<CallbackGate>,
    view: Mutex<SessionView>,
    channels: Mutex<BTreeMap<SignalSource, JoinHandle<()>>>,
    completion: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl SessionCore {
    pub(crate) fn new(
        job_id: &str,
        config: ObserverConfig,
        store: Arc<dyn JobStore>,
        options: AttachOptions,
        callbacks: ObserverCallbacks,
        runtime: Handle,
    ) -> Self {
        let session_cancel = CancellationToken::new();
        let sources_cancel = session_cancel.child_token();
        Self {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            job_id: job_id.to_string(),
            config,
            store,
            default_result: options.default_result,
            latch: CompletionLatch::new(),
            detached: AtomicBool::new(false),
            session_cancel,
            sources_cancel,
            gate: Mutex::new(CallbackGate {
                on_progress: callbacks.on_progress,
                on_complete: Some(callbacks.on_complete),
                on_error: Some(callbacks.on_error),
            }),
            view: Mutex::new(SessionView {
                phase: ObserverPhase::Idle,
                job: Job::queued(job_id),
                connection: ConnectionState::Disconnected,
                recent_output: VecDeque::new(),
                outcome: None,
            }),
            channels: Mutex::new(BTreeMap::new()),
            completion: Mutex::new(None),
            runtime,
        }
    }

    pub(crate) fn job_id(&self) -> &str {
        &self.job_id
    }

    pub(crate) fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub(crate) fn default_result(&self) -> Option<Value> {
        self.default_result.clone()
    }

    /// Starts all four signal sources; each gets its own child cancellation token.
    pub(crate) fn start(self: &Arc<Self>, push: &dyn PushChannel) {
        self.advance_phase(ObserverPhase::Attached);

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let push_cancel = self.sources_cancel.child_token();
        let subscription = push.subscribe(&self.job_id, push_cancel.clone());
        self.spawn_source(
            SignalSource::Push,
            run_push_listener(Arc::clone(self), subscription, line_tx, push_cancel),
        );
        self.spawn_source(
            SignalSource::OutputWatcher,
            run_output_watcher(Arc::clone(self), line_rx, self.sources_cancel.child_token()),
        );
        self.spawn_source(
            SignalSource::Poller,
            run_status_poller(Arc::clone(self), self.sources_cancel.child_token()),
        );
        self.spawn_source(
            SignalSource::Deadline,
            run_deadline_guard(Arc::clone(self), self.sources_cancel.child_token()),
        );
        tracing::info!(job_id = %self.job_id, "observer attached");
    }

    fn spawn_source<F>(&self, source: SignalSource, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.spawn(future);
        lock_unpoisoned(&self.channels).insert(source, handle);
    }

    fn is_closed(&self) -> bool {
        self.detached.load(Ordering::Acquire) || self.latch.is_triggered()
    }

    fn advance_phase(&self, next: ObserverPhase) {
        let mut view = lock_unpoisoned(&self.view);
        if next > view.phase {
            view.phase = next;
        }
    }

    /// Applies a non-terminal update to the merged view and notifies `on_progress`.
    ///
    /// Updates are applied in arrival order under the callback gate, so the
    /// latest received value always wins regardless of source.
    pub(crate) fn apply_progress<F>(&self, source: SignalSource, mutate: F)
    where
        F: FnOnce(&mut Job),
    {
        if self.is_closed() {
            return;
        }
        let gate = lock_unpoisoned(&self.gate);
        if self.is_closed() {
            return;
        }
        let update = {
            let mut view = lock_unpoisoned(&self.view);
            if view.phase != ObserverPhase::Attached {
                return;
            }
            let before = view.job.clone();
            mutate(&mut view.job);
            if view.job == before {
                return;
            }
            ProgressUpdate::from_job(&view.job, source)
        };
        tracing::debug!(
            job_id = %self.job_id,
            source = source.as_str(),
            percentage = update.progress.percentage,
            "progress merged"
        );
        if let Some(on_progress) = gate.on_progress.as_ref() {
            self.dispatch(|| on_progress(&update));
        }
    }

    /// Merges an authoritative record and raises a terminal signal when it is final.
    pub(crate) fn observe_record(self: &Arc<Self>, source: SignalSource, job: Job) {
        self.apply_progress(source, |view| {
            view.status = view.status.furthest(job.status);
            view.progress = job.progress;
            view.current_step = job.current_step.clone();
            view.steps = job.steps.clone();
        });
        if let Some(signal) = TerminalSignal::from_record(source, job) {
            self.on_terminal_signal(signal);
        }
    }

    pub(crate) fn record_output(&self, line: &str) {
        let cap = self.config.recent_output_cap;
        if cap == 0 {
            return;
        }
        let mut view = lock_unpoisoned(&self.view);
        view.recent_output.push_back(line.to_string());
        while view.recent_output.len() > cap {
            view.recent_output.pop_front();
        }
    }

    pub(crate) fn record_connection(&self, state: ConnectionState) {
        let mut view = lock_unpoisoned(&self.view);
        if view.connection != state {
            tracing::debug!(
                job_id = %self.job_id,
                state = state.as_str(),
                "push connection state changed"
            );
            view.connection = state;
        }
    }

    /// Entry point shared by every source. The first caller wins the latch;
    /// later calls are no-ops.
    pub(crate) fn on_terminal_signal(self: &Arc<Self>, signal: TerminalSignal) {
        let source = signal.source();
        if self.detached.load(Ordering::Acquire) {
            tracing::debug!(
                job_id = %self.job_id,
                source = source.as_str(),
                "terminal signal ignored after detach"
            );
            return;
        }
        if !self.latch.try_trigger() {
            tracing::debug!(
                job_id = %self.job_id,
                source = source.as_str(),
                "terminal signal ignored; completion already triggered"
            );
            return;
        }
        tracing::info!(job_id = %self.job_id, source = source.as_str(), "terminal signal accepted");
        self.advance_phase(ObserverPhase::Completing);
        self.sources_cancel.cancel();

        let core = Arc::clone(self);
        let handle = self.runtime.spawn(async move { core.finish(signal).await });
        *lock_unpoisoned(&self.completion) = Some(handle);
    }

    async fn finish(self: Arc<Self>, signal: TerminalSignal) {
        let outcome = match signal {
            TerminalSignal::Success {
                source,
                payload,
                record,
            } => {
                tokio::select! {
                    biased;
                    _ = self.session_cancel.cancelled() => return,
                    outcome = reconcile_success(&self, source, payload, record) => outcome,
                }
            }
            TerminalSignal::Failure {
                source,
                kind,
                message,
                record,
            } => TerminalOutcome::Failed(JobFailure {
                job_id: self.job_id.clone(),
                kind,
                message,
                source,
                job: record,
            }),
        };
        self.dispatch_terminal(outcome);
    }

    fn dispatch_terminal(&self, outcome: TerminalOutcome) {
        let mut gate = lock_unpoisoned(&self.gate);
        if self.detached.load(Ordering::Acquire) {
            tracing::debug!(job_id = %self.job_id, "terminal outcome dropped after detach");
            return;
        }
        {
            let mut view = lock_unpoisoned(&self.view);
            view.phase = ObserverPhase::Done;
            match &outcome {
                TerminalOutcome::Completed(completion) => {
                    view.outcome = Some(SessionOutcome::Completed {
                        source: completion.source,
                    });
                    match &completion.job {
                        Some(job) if job.status == JobStatus::Completed => view.job = job.clone(),
                        _ => {
                            view.job.status = JobStatus::Completed;
                            view.job.result = Some(completion.result.clone());
                        }
                    }
                }
                TerminalOutcome::Failed(failure) => {
                    view.outcome = Some(SessionOutcome::Failed {
                        source: failure.source,
                        kind: failure.kind,
                    });
                    match &failure.job {
                        Some(job) => view.job = job.clone(),
                        None => {
                            view.job.status = JobStatus::Failed;
                            view.job.error = Some(failure.message.clone());
                        }
                    }
                }
            }
        }

        match outcome {
            TerminalOutcome::Completed(completion) => {
                gate.on_error = None;
                if let Some(on_complete) = gate.on_complete.take() {
                    tracing::info!(
                        job_id = %self.job_id,
                        source = completion.source.as_str(),
                        origin = ?completion.origin,
                        "job completed"
                    );
                    self.dispatch(move || on_complete(completion));
                }
            }
            TerminalOutcome::Failed(failure) => {
                gate.on_complete = None;
                if let Some(on_error) = gate.on_error.take() {
                    tracing::warn!(
                        job_id = %self.job_id,
                        source = failure.source.as_str(),
                        kind = failure.kind.as_str(),
                        message = %failure.message,
                        "job failed"
                    );
                    self.dispatch(move || on_error(failure));
                }
            }
        }
    }

    /// Cancels every source and the pending completion. Never touches the
    /// server-side job.
    pub(crate) fn detach(&self) {
        let first = !self.detached.swap(true, Ordering::AcqRel);
        self.session_cancel.cancel();
        for handle in lock_unpoisoned(&self.channels).values() {
            handle.abort();
        }
        if let Some(handle) = lock_unpoisoned(&self.completion).as_ref() {
            handle.abort();
        }
        // Wait out a callback running on another thread, then release the
        // caller's hooks. A callback that detaches its own session already
        // holds the gate.
        if DISPATCHING.with(Cell::get) != self.session_id {
            let mut gate = lock_unpoisoned(&self.gate);
            gate.on_progress = None;
            gate.on_complete = None;
            gate.on_error = None;
        }
        {
            let mut view = lock_unpoisoned(&self.view);
            if view.phase != ObserverPhase::Done {
                view.phase = ObserverPhase::Done;
                view.outcome = Some(SessionOutcome::Detached);
            }
            view.connection = ConnectionState::Disconnected;
        }
        if first {
            tracing::info!(
                job_id = %self.job_id,
                "observer detached; job processing continues in the background"
            );
        }
    }

    /// Runs a caller hook with this session marked as dispatching on the
    /// current thread.
    fn dispatch<F: FnOnce()>(&self, callback: F) {
        struct Reset(u64);
        impl Drop for Reset {
            fn drop(&mut self) {
                DISPATCHING.with(|current| current.set(self.0));
            }
        }
        let _reset = Reset(DISPATCHING.with(|current| current.replace(self.session_id)));
        callback();
    }

    fn active_channels(&self) -> Vec<SignalSource> {
        lock_unpoisoned(&self.channels)
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(source, _)| *source)
            .collect()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Creates observer sessions that share a record store, push transport and config.
#[derive(Clone)]
pub struct JobObserver {
    store: Arc<dyn JobStore>,
    push: Arc<dyn PushChannel>,
    config: ObserverConfig,
}

impl JobObserver {
    pub fn new(
        store: Arc<dyn JobStore>,
        push: Arc<dyn PushChannel>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            store,
            push,
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Begins observing `job_id`, starting the push listener, output watcher,
    /// status poller and deadline guard concurrently.
    pub fn attach(
        &self,
        job_id: &str,
        callbacks: ObserverCallbacks,
    ) -> Result<ObserverHandle, ObserverError> {
        self.attach_with_options(job_id, callbacks, AttachOptions::default())
    }

    pub fn attach_with_options(
        &self,
        job_id: &str,
        callbacks: ObserverCallbacks,
        options: AttachOptions,
    ) -> Result<ObserverHandle, ObserverError> {
        if job_id.trim().is_empty() {
            return Err(ObserverError::EmptyJobId);
        }
        let runtime = Handle::try_current().map_err(|_| ObserverError::NoRuntime)?;
        let core = Arc::new(SessionCore::new(
            job_id,
            self.config.clone(),
            Arc::clone(&self.store),
            options,
            callbacks,
            runtime,
        ));
        core.start(self.push.as_ref());
        Ok(ObserverHandle { core })
    }
}

impl fmt::Debug for JobObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobObserver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Caller-side handle of one observer session.
///
/// Dropping the handle does not detach; call `detach` to stop observing.
#[derive(Clone)]
pub struct ObserverHandle {
    core: Arc<SessionCore>,
}

impl ObserverHandle {
    pub fn job_id(&self) -> &str {
        self.core.job_id()
    }

    /// Last-known merged view of the job.
    pub fn current_job(&self) -> Job {
        lock_unpoisoned(&self.core.view).job.clone()
    }

    /// True while the session is attached or completing.
    pub fn is_active(&self) -> bool {
        matches!(
            self.phase(),
            ObserverPhase::Attached | ObserverPhase::Completing
        )
    }

    pub fn phase(&self) -> ObserverPhase {
        lock_unpoisoned(&self.core.view).phase
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        lock_unpoisoned(&self.core.view).outcome
    }

    pub fn push_connection(&self) -> ConnectionState {
        lock_unpoisoned(&self.core.view).connection
    }

    /// Most recent output lines delivered by the push channel, oldest first.
    pub fn recent_output(&self) -> Vec<String> {
        lock_unpoisoned(&self.core.view)
            .recent_output
            .iter()
            .cloned()
            .collect()
    }

    /// Signal sources whose tasks are still running.
    pub fn active_channels(&self) -> Vec<SignalSource> {
        self.core.active_channels()
    }

    /// Stops client-side observation. Idempotent; fires no callback and does
    /// not cancel the server-side job.
    pub fn detach(&self) {
        self.core.detach();
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("job_id", &self.core.job_id)
            .field("phase", &self.phase())
            .finish()
    }
}
