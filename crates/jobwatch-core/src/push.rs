use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{ConnectionState, PushEvent};

/// Live event feed for one job.
///
/// The event receiver closes once the adapter stops delivering (cancelled or
/// reconnection budget exhausted). Closing is never a terminal signal.
#[derive(Debug)]
pub struct PushSubscription {
    pub events: mpsc::Receiver<PushEvent>,
    pub connection: watch::Receiver<ConnectionState>,
}

impl PushSubscription {
    /// Returns a subscription that never delivers events and reports `disconnected`.
    pub fn closed() -> Self {
        let (_event_tx, events) = mpsc::channel(1);
        let (_state_tx, connection) = watch::channel(ConnectionState::Disconnected);
        Self { events, connection }
    }
}

/// Trait contract for push transports scoped to a job id.
///
/// Implementations spawn their own connection task and must stop delivering
/// once `cancel` fires.
pub trait PushChannel: Send + Sync {
    fn subscribe(&self, job_id: &str, cancel: CancellationToken) -> PushSubscription;
}

/// Push channel used when no push transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPushChannel;

impl PushChannel for DisabledPushChannel {
    fn subscribe(&self, _job_id: &str, _cancel: CancellationToken) -> PushSubscription {
        PushSubscription::closed()
    }
}
