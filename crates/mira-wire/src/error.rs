// Bridge error taxonomy
use thiserror::Error;

/// Errors produced by the sidecar bridge.
///
/// Lifecycle errors (`PortAllocation`, `Spawn`, `HealthTimeout`,
/// `ProcessExitedEarly`) are recovered locally by the supervisor through its
/// restart/backoff loop. `Rpc` errors are surfaced to the specific caller and
/// never change supervisor state.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    #[error("Failed to spawn sidecar: {0}")]
    Spawn(String),

    #[error("Sidecar health check timed out: {0}")]
    HealthTimeout(String),

    #[error("Sidecar process exited early: {0}")]
    ProcessExitedEarly(String),

    /// Non-2xx gateway response. Carries the original status and body so the
    /// caller can decide what to do with it.
    #[error("Gateway error {status}: {body}")]
    Rpc { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Callback handler error: {0}")]
    Handler(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl serde::Serialize for BridgeError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
