use serde::{Deserialize, Serialize};

/// Sidecar process state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarState {
    Stopped,
    Starting,
    Connected,
    Error,
    Restarting,
}

/// Point-in-time snapshot of the supervised sidecar.
///
/// `uptime_seconds` is derived from the supervisor's start timestamp and is
/// only non-zero while the state is `Connected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarStatus {
    pub state: SidecarState,
    pub gateway_port: u16,
    pub uptime_seconds: u64,
    pub last_error: Option<String>,
}

/// Lifecycle events published by the supervisor.
///
/// Consumers subscribe through a broadcast channel and match exhaustively;
/// `Error` and `Restarting` are the only user-facing failure signals, so a UI
/// should render backoff cycles as "reconnecting" rather than a hard error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Ready { port: u16 },
    Error { message: String },
    Stopped,
    Restarting { backoff_ms: u64 },
}
