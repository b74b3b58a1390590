//! Shared wire types for the Mira agent sidecar bridge.
//!
//! Everything that crosses a process or task boundary lives here: the
//! supervisor's lifecycle events and status snapshot, the WebSocket chat
//! envelopes, the gateway HTTP request/response types, and the bridge
//! error taxonomy.

mod error;
mod gateway;
mod status;
mod ws;

pub use error::{BridgeError, Result};
pub use gateway::{
    AgentReply, ConnectionInfo, CronJob, CronJobRequest, GatewayHealth, GatewayStatus,
    IntegrationAction, IntegrationApp, SessionSummary, SubagentInfo,
};
pub use status::{LifecycleEvent, SidecarState, SidecarStatus};
pub use ws::{ToolCallNotice, ToolResultNotice, TurnDone, WsError, WsInbound, WsOutbound};
