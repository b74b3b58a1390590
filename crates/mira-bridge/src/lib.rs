//! Sidecar process supervisor and RPC bridge.
//!
//! The host application embeds this crate to run the Mira agent as a managed
//! child process: allocate it a loopback port, hand it the host's callback
//! port through its environment, keep it healthy (health polling, backoff
//! restarts, a memory watchdog), and talk to it over the gateway HTTP API
//! and the streaming chat WebSocket.

pub mod coordinator;
pub mod env;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod ports;
pub mod settings;
pub mod supervisor;

pub use coordinator::{GatewayHandles, RuntimeCoordinator};
pub use env::EnvironmentDescriptor;
pub use gateway::{GatewayHttpClient, GatewayWsClient};
pub use metrics::{ProcessMetrics, PsProcessMetrics};
pub use mira_wire::{BridgeError, Result};
pub use ports::PortAllocator;
pub use settings::{AgentSettings, SettingsProvider};
pub use supervisor::{ProcessSupervisor, SupervisorConfig};
