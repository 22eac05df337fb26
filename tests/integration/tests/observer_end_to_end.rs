use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use httpmock::prelude::*;
use jobwatch_client::{HttpJobStore, HttpJobStoreConfig, PushChannelConfig, WebSocketPushChannel};
use jobwatch_core::{DisabledPushChannel, Job, JobStatus, JobStore, JobStoreError, PushChannel};
use jobwatch_observer::{
    FailureKind, JobCompletion, JobFailure, JobObserver, ObserverCallbacks, ObserverConfig,
    ObserverHandle, ResultOrigin, SignalSource,
};
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex as AsyncMutex},
};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Outcome {
    Completed(JobCompletion),
    Failed(JobFailure),
}

struct ScriptedStore {
    responses: AsyncMutex<VecDeque<Result<Job, JobStoreError>>>,
    requests: AsyncMutex<usize>,
}

impl ScriptedStore {
    fn new(responses: Vec<Result<Job, JobStoreError>>) -> Self {
        Self {
            responses: AsyncMutex::new(VecDeque::from(responses)),
            requests: AsyncMutex::new(0),
        }
    }

    async fn request_count(&self) -> usize {
        *self.requests.lock().await
    }
}

#[async_trait]
impl JobStore for ScriptedStore {
    async fn get_job(&self, job_id: &str) -> Result<Job, JobStoreError> {
        *self.requests.lock().await += 1;
        let mut responses = self.responses.lock().await;
        // The last scripted response repeats.
        if responses.len() > 1 {
            return responses
                .pop_front()
                .unwrap_or_else(|| Err(JobStoreError::Unavailable(job_id.to_string())));
        }
        responses
            .front()
            .cloned()
            .unwrap_or_else(|| Err(JobStoreError::Unavailable(job_id.to_string())))
    }
}

fn job(id: &str, status: JobStatus, result: Option<Value>) -> Job {
    let mut job = Job::queued(id);
    job.status = status;
    job.result = result;
    job
}

/// Accepts one websocket client and replays `frames`, then waits for the client to leave.
async fn push_server(frames: Vec<Value>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let address = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut socket) = accept_async(stream).await else {
            return;
        };
        for frame in frames {
            if socket
                .send(WsMessage::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
        while let Some(Ok(_)) = socket.next().await {}
    });
    format!("ws://{address}/api")
}

fn websocket_channel(ws_base: String) -> Arc<dyn PushChannel> {
    Arc::new(WebSocketPushChannel::new(PushChannelConfig {
        ws_base,
        reconnect_max_attempts: 1,
        reconnect_base_delay_ms: 10,
        ..PushChannelConfig::default()
    }))
}

fn http_store(server: &MockServer) -> Arc<dyn JobStore> {
    Arc::new(
        HttpJobStore::new(HttpJobStoreConfig {
            api_base: server.url("/api"),
            auth_token: None,
            request_timeout_ms: 2_000,
        })
        .expect("http store"),
    )
}

fn fast_config() -> ObserverConfig {
    ObserverConfig {
        poll_grace: Duration::from_millis(400),
        poll_interval: Duration::from_millis(100),
        recheck_interval: Duration::from_millis(500),
        hard_ceiling: Duration::from_secs(5),
        reconcile_base_delay: Duration::from_millis(20),
        ..ObserverConfig::default()
    }
}

fn watch(
    observer: &JobObserver,
    job_id: &str,
) -> (ObserverHandle, mpsc::UnboundedReceiver<Outcome>) {
    let (outcome_tx, outcomes) = mpsc::unbounded_channel();
    let failure_tx = outcome_tx.clone();
    let handle = observer
        .attach(
            job_id,
            ObserverCallbacks::new(
                move |completion| {
                    let _ = outcome_tx.send(Outcome::Completed(completion));
                },
                move |failure| {
                    let _ = failure_tx.send(Outcome::Failed(failure));
                },
            ),
        )
        .expect("attach");
    (handle, outcomes)
}

async fn single_outcome(outcomes: &mut mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    let outcome = tokio::time::timeout(WAIT, outcomes.recv())
        .await
        .expect("terminal callback in time")
        .expect("observer delivered an outcome");
    // Both terminal senders are consumed after the first callback.
    assert!(outcomes.recv().await.is_none());
    outcome
}

#[tokio::test]
async fn integration_push_complete_is_reconciled_against_http_record() {
    let server = MockServer::start();
    let record = server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-42");
        then.status(200).json_body(json!({
            "id": "job-42",
            "status": "completed",
            "progress": {"current": 4, "total": 4, "percentage": 100},
            "result": {"siteUrl": "https://blog.example.com", "adminPassword": "from-record"}
        }));
    });
    let ws_base = push_server(vec![
        json!({"type": "progress", "progress": {"current": 2, "total": 4, "percentage": 50}}),
        json!({"type": "output-line", "line": "Installing plugins"}),
        json!({
            "type": "complete",
            "result": {"siteUrl": "https://blog.example.com", "adminPassword": "from-push"}
        }),
    ])
    .await;

    let observer = JobObserver::new(http_store(&server), websocket_channel(ws_base), fast_config());
    let (handle, mut outcomes) = watch(&observer, "job-42");

    let Outcome::Completed(completion) = single_outcome(&mut outcomes).await else {
        panic!("expected completion");
    };
    assert_eq!(completion.source, SignalSource::Push);
    assert_eq!(completion.origin, ResultOrigin::Authoritative);
    assert_eq!(completion.result["adminPassword"], "from-record");
    assert_eq!(record.calls(), 1);
    assert_eq!(handle.recent_output(), vec!["Installing plugins"]);
    assert!(!handle.is_active());
}

#[tokio::test]
async fn integration_poller_completes_job_when_push_endpoint_is_down() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-43");
        then.status(200).json_body(json!({
            "id": "job-43",
            "status": "completed",
            "result": {"reviews": 25}
        }));
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let address = listener.local_addr().expect("local address");
    drop(listener);

    let observer = JobObserver::new(
        http_store(&server),
        websocket_channel(format!("ws://{address}/api")),
        fast_config(),
    );
    let (_handle, mut outcomes) = watch(&observer, "job-43");

    let Outcome::Completed(completion) = single_outcome(&mut outcomes).await else {
        panic!("expected completion");
    };
    assert_eq!(completion.source, SignalSource::Poller);
    assert_eq!(completion.result, json!({"reviews": 25}));
}

#[tokio::test]
async fn integration_output_failure_phrase_reports_error_without_fetch() {
    let server = MockServer::start();
    let record = server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-44");
        then.status(200)
            .json_body(json!({"id": "job-44", "status": "running"}));
    });
    let ws_base = push_server(vec![
        json!({"type": "output-line", "line": "Connecting to 198.51.100.20"}),
        json!({
            "type": "output-line",
            "line": "WordPress installation failed: database unreachable"
        }),
    ])
    .await;

    let observer = JobObserver::new(http_store(&server), websocket_channel(ws_base), fast_config());
    let (_handle, mut outcomes) = watch(&observer, "job-44");

    let Outcome::Failed(failure) = single_outcome(&mut outcomes).await else {
        panic!("expected failure");
    };
    assert_eq!(failure.kind, FailureKind::OutputPattern);
    assert_eq!(failure.source, SignalSource::OutputWatcher);
    assert!(failure.message.contains("database unreachable"));
    assert_eq!(record.calls(), 0);
}

#[tokio::test]
async fn integration_hard_ceiling_times_out_running_http_job() {
    let server = MockServer::start();
    let record = server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-45");
        then.status(200).json_body(json!({
            "id": "job-45",
            "status": "running",
            "progress": {"current": 1, "total": 3, "percentage": 33}
        }));
    });
    let config = ObserverConfig {
        hard_ceiling: Duration::from_millis(800),
        ..fast_config()
    };

    let observer = JobObserver::new(http_store(&server), Arc::new(DisabledPushChannel), config);
    let (handle, mut outcomes) = watch(&observer, "job-45");

    let Outcome::Failed(failure) = single_outcome(&mut outcomes).await else {
        panic!("expected timeout");
    };
    assert_eq!(failure.kind, FailureKind::TimedOut);
    assert!(failure.message.contains("last status: running"));
    assert!(record.calls() >= 2);
    assert_eq!(handle.current_job().progress.percentage, 33);
}

#[tokio::test]
async fn integration_reconciliation_waits_for_record_to_catch_up() {
    let store = Arc::new(ScriptedStore::new(vec![
        Ok(job("job-46", JobStatus::Running, None)),
        Err(JobStoreError::Transport("connection reset".to_string())),
        Ok(job("job-46", JobStatus::Completed, Some(json!({"items": 9})))),
    ]));
    let ws_base = push_server(vec![json!({"type": "complete"})]).await;

    let scripted: Arc<dyn JobStore> = store.clone();
    let observer = JobObserver::new(scripted, websocket_channel(ws_base), fast_config());
    let (_handle, mut outcomes) = watch(&observer, "job-46");

    let Outcome::Completed(completion) = single_outcome(&mut outcomes).await else {
        panic!("expected completion");
    };
    assert_eq!(completion.origin, ResultOrigin::Authoritative);
    assert_eq!(completion.result, json!({"items": 9}));
    assert_eq!(store.request_count().await, 3);
}

#[tokio::test]
async fn integration_detach_leaves_server_job_untouched() {
    let server = MockServer::start();
    let record = server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-47");
        then.status(200)
            .json_body(json!({"id": "job-47", "status": "running"}));
    });
    let observer = JobObserver::new(
        http_store(&server),
        Arc::new(DisabledPushChannel),
        fast_config(),
    );
    let (handle, mut outcomes) = watch(&observer, "job-47");

    tokio::time::sleep(Duration::from_millis(600)).await;
    handle.detach();
    handle.detach();
    let calls_at_detach = record.calls();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(outcomes.recv().await.is_none());
    assert_eq!(record.calls(), calls_at_detach);
    assert!(handle.active_channels().is_empty());
}
