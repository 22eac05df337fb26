use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{JobProgress, JobStep};

/// Discrete event delivered by a push channel for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        progress: JobProgress,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_step: Option<String>,
    },
    Step {
        step: JobStep,
    },
    OutputLine {
        line: String,
    },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    Error {
        message: String,
    },
}

impl PushEvent {
    /// Returns the wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Step { .. } => "step",
            Self::OutputLine { .. } => "output-line",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Push connection state, exposed for observability only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}
