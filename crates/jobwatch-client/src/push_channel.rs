use std::time::Duration;

use futures_util::StreamExt;
use jobwatch_core::{
    next_backoff_ms_with_jitter, ConnectionState, PushChannel, PushEvent, PushSubscription,
};
use reqwest::Url;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{header::AUTHORIZATION, HeaderValue},
        Message as WsMessage,
    },
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
/// Errors raised while establishing or reading a job push connection.
pub enum PushChannelError {
    #[error("invalid push channel endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("push channel connect failed: {0}")]
    Connect(String),
    #[error("push channel protocol error: {0}")]
    Protocol(String),
    #[error("failed to decode push event: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
/// Connection settings for the websocket push channel.
pub struct PushChannelConfig {
    pub ws_base: String,
    pub auth_token: Option<String>,
    pub reconnect_max_attempts: usize,
    pub reconnect_base_delay_ms: u64,
    pub event_buffer: usize,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        Self {
            ws_base: "ws://127.0.0.1:8080/api".to_string(),
            auth_token: None,
            reconnect_max_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone)]
/// `PushChannel` that streams job events from `{ws_base}/jobs/{id}/events`.
///
/// Reconnects with jittered exponential backoff; the attempt budget is reset
/// whenever a session delivered at least one event.
pub struct WebSocketPushChannel {
    config: PushChannelConfig,
}

impl WebSocketPushChannel {
    pub fn new(config: PushChannelConfig) -> Self {
        Self { config }
    }

    fn events_url(&self, job_id: &str) -> Result<Url, PushChannelError> {
        let mut url = Url::parse(self.config.ws_base.trim()).map_err(|error| {
            PushChannelError::InvalidEndpoint(format!("{}: {error}", self.config.ws_base))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(PushChannelError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        url.path_segments_mut()
            .map_err(|()| PushChannelError::InvalidEndpoint(self.config.ws_base.clone()))?
            .pop_if_empty()
            .push("jobs")
            .push(job_id)
            .push("events");
        Ok(url)
    }
}

impl PushChannel for WebSocketPushChannel {
    fn subscribe(&self, job_id: &str, cancel: CancellationToken) -> PushSubscription {
        let url = match self.events_url(job_id) {
            Ok(url) => url,
            Err(error) => {
                tracing::warn!(job_id = job_id, error = %error, "push channel disabled");
                return PushSubscription::closed();
            }
        };
        let (event_tx, events) = mpsc::channel(self.config.event_buffer.max(1));
        let (state_tx, connection) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(run_push_connection(
            self.config.clone(),
            url,
            job_id.to_string(),
            event_tx,
            state_tx,
            cancel,
        ));
        PushSubscription { events, connection }
    }
}

#[derive(Debug)]
enum PushSessionEnd {
    Cancelled,
    ReceiverClosed,
    TerminalEvent,
    Closed,
    Failed(PushChannelError),
}

#[derive(Debug)]
struct PushSessionReport {
    end: PushSessionEnd,
    delivered: usize,
}

impl PushSessionReport {
    fn new(end: PushSessionEnd, delivered: usize) -> Self {
        Self { end, delivered }
    }
}

async fn run_push_connection(
    config: PushChannelConfig,
    url: Url,
    job_id: String,
    event_tx: mpsc::Sender<PushEvent>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut failed_attempts = 0usize;
    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        let report = run_push_session(&config, &url, &job_id, &event_tx, &state_tx, &cancel).await;
        state_tx.send_replace(ConnectionState::Disconnected);

        if report.delivered > 0 {
            failed_attempts = 0;
        }
        match report.end {
            PushSessionEnd::Cancelled
            | PushSessionEnd::ReceiverClosed
            | PushSessionEnd::TerminalEvent => return,
            PushSessionEnd::Closed => {
                tracing::debug!(
                    job_id = %job_id,
                    delivered = report.delivered,
                    "push channel closed by server"
                );
            }
            PushSessionEnd::Failed(error) => {
                tracing::warn!(job_id = %job_id, error = %error, "push channel session failed");
            }
        }

        failed_attempts = failed_attempts.saturating_add(1);
        if failed_attempts > config.reconnect_max_attempts {
            tracing::warn!(
                job_id = %job_id,
                attempts = failed_attempts,
                "push channel reconnect budget exhausted; relying on polling"
            );
            return;
        }
        let delay_ms = next_backoff_ms_with_jitter(
            config.reconnect_base_delay_ms,
            failed_attempts.saturating_sub(1),
            true,
        );
        tracing::debug!(
            job_id = %job_id,
            attempt = failed_attempts,
            delay_ms,
            "push channel reconnecting"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }
}

async fn run_push_session(
    config: &PushChannelConfig,
    url: &Url,
    job_id: &str,
    event_tx: &mpsc::Sender<PushEvent>,
    state_tx: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
) -> PushSessionReport {
    let request = match build_connect_request(url, config.auth_token.as_deref()) {
        Ok(request) => request,
        Err(error) => return PushSessionReport::new(PushSessionEnd::Failed(error), 0),
    };
    let connected = tokio::select! {
        _ = cancel.cancelled() => return PushSessionReport::new(PushSessionEnd::Cancelled, 0),
        connected = connect_async(request) => connected,
    };
    let mut stream = match connected {
        Ok((stream, _response)) => stream,
        Err(error) => {
            return PushSessionReport::new(
                PushSessionEnd::Failed(PushChannelError::Connect(error.to_string())),
                0,
            )
        }
    };
    state_tx.send_replace(ConnectionState::Connected);
    tracing::info!(job_id = job_id, "push channel connected");

    let mut delivered = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = stream.close(None).await;
                return PushSessionReport::new(PushSessionEnd::Cancelled, delivered);
            }
            message = stream.next() => {
                let message = match message {
                    None => return PushSessionReport::new(PushSessionEnd::Closed, delivered),
                    Some(Err(error)) => {
                        return PushSessionReport::new(
                            PushSessionEnd::Failed(PushChannelError::Protocol(error.to_string())),
                            delivered,
                        )
                    }
                    Some(Ok(message)) => message,
                };
                let event = match parse_push_message(message) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(error) => {
                        tracing::warn!(
                            job_id = job_id,
                            error = %error,
                            "ignoring undecodable push frame"
                        );
                        continue;
                    }
                };
                let terminal = event.is_terminal();
                if event_tx.send(event).await.is_err() {
                    return PushSessionReport::new(PushSessionEnd::ReceiverClosed, delivered);
                }
                delivered = delivered.saturating_add(1);
                if terminal {
                    let _ = stream.close(None).await;
                    return PushSessionReport::new(PushSessionEnd::TerminalEvent, delivered);
                }
            }
        }
    }
}

fn build_connect_request(url: &Url, auth_token: Option<&str>) -> Result<Request, PushChannelError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|error| PushChannelError::InvalidEndpoint(error.to_string()))?;
    if let Some(token) = auth_token.map(str::trim).filter(|token| !token.is_empty()) {
        let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|error| {
            PushChannelError::InvalidEndpoint(format!("invalid auth token header: {error}"))
        })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
    }
    Ok(request)
}

/// Decodes one websocket frame into a push event; control frames yield `None`.
pub fn parse_push_message(message: WsMessage) -> Result<Option<PushEvent>, PushChannelError> {
    match message {
        WsMessage::Text(text) => serde_json::from_str::<PushEvent>(&text)
            .map(Some)
            .map_err(|error| PushChannelError::Decode(error.to_string())),
        WsMessage::Binary(bytes) => serde_json::from_slice::<PushEvent>(&bytes)
            .map(Some)
            .map_err(|error| PushChannelError::Decode(error.to_string())),
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(None),
        WsMessage::Close(_) => Ok(None),
        WsMessage::Frame(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use jobwatch_core::{JobProgress, PushEvent};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::{
        build_connect_request, parse_push_message, PushChannelConfig, PushChannelError,
        WebSocketPushChannel,
    };

    #[test]
    fn unit_events_url_scopes_connection_to_job() {
        let channel = WebSocketPushChannel::new(PushChannelConfig {
            ws_base: "wss://jobs.example.com/api/".to_string(),
            ..PushChannelConfig::default()
        });
        let url = channel.events_url("job-42").expect("url");
        assert_eq!(url.as_str(), "wss://jobs.example.com/api/jobs/job-42/events");
    }

    #[test]
    fn regression_events_url_rejects_http_scheme() {
        let channel = WebSocketPushChannel::new(PushChannelConfig {
            ws_base: "https://jobs.example.com".to_string(),
            ..PushChannelConfig::default()
        });
        assert!(matches!(
            channel.events_url("job-42"),
            Err(PushChannelError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn unit_connect_request_carries_bearer_token() {
        let url = reqwest::Url::parse("ws://127.0.0.1:9/jobs/job-1/events").expect("url");
        let request = build_connect_request(&url, Some(" secret ")).expect("request");
        assert_eq!(
            request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok()),
            Some("Bearer secret")
        );
        let anonymous = build_connect_request(&url, Some("  ")).expect("request");
        assert!(anonymous.headers().get("authorization").is_none());
    }

    #[test]
    fn functional_parse_push_message_handles_text_binary_and_control_frames() {
        let text = WsMessage::Text(
            r#"{"type":"progress","progress":{"current":1,"total":4,"percentage":25}}"#.into(),
        );
        assert_eq!(
            parse_push_message(text).expect("text frame"),
            Some(PushEvent::Progress {
                progress: JobProgress::new(1, 4),
                current_step: None,
            })
        );

        let binary =
            WsMessage::Binary(br#"{"type":"error","message":"ssh timeout"}"#.to_vec().into());
        assert_eq!(
            parse_push_message(binary).expect("binary frame"),
            Some(PushEvent::Error {
                message: "ssh timeout".to_string()
            })
        );

        assert!(parse_push_message(WsMessage::Ping(vec![].into()))
            .expect("ping")
            .is_none());
        assert!(matches!(
            parse_push_message(WsMessage::Text("not json".into())),
            Err(PushChannelError::Decode(_))
        ));
    }
}
