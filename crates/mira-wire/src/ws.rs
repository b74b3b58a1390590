//! WebSocket chat envelopes for the gateway's `/ws/chat` endpoint.
//!
//! Inbound frames are sent by the host, outbound frames are streamed back by
//! the sidecar. Both are JSON objects tagged by `type` with the payload under
//! `data` (outbound) or inlined (inbound), matching the gateway's protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_session_id() -> String {
    "mira:chat".to_string()
}

/// Host → sidecar frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInbound {
    UserMessage {
        content: String,
        #[serde(default = "default_session_id")]
        session_id: String,
    },
}

/// A tool invocation announced mid-turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallNotice {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultNotice {
    pub tool: String,
    #[serde(default)]
    pub result: Value,
}

/// Final payload of a completed chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDone {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsError {
    pub message: String,
}

/// Sidecar → host frames, tagged by `type` so the host can route each one to
/// the correct UI surface without polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsOutbound {
    /// Streamed content token (delta text).
    Token(String),
    ToolCall(ToolCallNotice),
    ToolResult(ToolResultNotice),
    Done(TurnDone),
    Error(WsError),
}
