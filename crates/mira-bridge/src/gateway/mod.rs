//! Clients for the sidecar's gateway: request/response HTTP and the
//! streaming chat WebSocket. Both are bound to one sidecar incarnation and
//! rebuilt from the `Ready` port after every restart.

mod http;
mod ws;

pub use http::GatewayHttpClient;
pub use ws::GatewayWsClient;
