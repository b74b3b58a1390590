//! Loopback-only HTTP server exposing Mira host capabilities to the agent
//! sidecar.
//!
//! The sidecar calls back into the host through these REST routes (journal,
//! kanban, memory, life context, profile, recordings, app control, config).
//! The server binds `127.0.0.1:0`, never a non-loopback interface, and holds
//! no domain state of its own: every route is a stateless pass-through to a
//! collaborator behind one of the [`services`] traits.

use std::net::Ipv4Addr;

use mira_wire::{BridgeError, Result};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

mod http;
pub mod services;

pub use services::{
    AppControl, CardPatch, ConfigView, JournalService, KanbanService, LifeService, MemoryService,
    NewCard, ProfileService, RecordingSearch, RecordingsService,
};

/// Collaborators behind the callback routes. Cloning is cheap; the route
/// table built from this state is immutable after construction.
#[derive(Clone)]
pub struct CallbackState {
    pub journal: std::sync::Arc<dyn JournalService>,
    pub kanban: std::sync::Arc<dyn KanbanService>,
    pub memory: std::sync::Arc<dyn MemoryService>,
    pub life: std::sync::Arc<dyn LifeService>,
    pub profile: std::sync::Arc<dyn ProfileService>,
    pub recordings: std::sync::Arc<dyn RecordingsService>,
    pub app: std::sync::Arc<dyn AppControl>,
    pub config: std::sync::Arc<dyn ConfigView>,
}

struct Listening {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The callback HTTP server. `listen()` returns the bound port, `stop()`
/// shuts the listener down; both are idempotent.
pub struct CallbackServer {
    state: CallbackState,
    listening: Mutex<Option<Listening>>,
}

impl CallbackServer {
    pub fn new(state: CallbackState) -> Self {
        Self {
            state,
            listening: Mutex::new(None),
        }
    }

    /// Bind `127.0.0.1:0`, start accepting connections, and return the port.
    pub async fn listen(&self) -> Result<u16> {
        let mut guard = self.listening.lock().await;
        if let Some(listening) = guard.as_ref() {
            tracing::warn!("Callback server already running on port {}", listening.port);
            return Ok(listening.port);
        }

        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(BridgeError::Io)?;
        let port = listener.local_addr().map_err(BridgeError::Io)?.port();

        let app = http::router(self.state.clone());
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Callback server error: {}", e);
            }
        });

        tracing::info!("Callback server listening on 127.0.0.1:{}", port);
        *guard = Some(Listening {
            port,
            shutdown,
            task,
        });
        Ok(port)
    }

    /// Port the server is currently bound to, if running.
    pub async fn port(&self) -> Option<u16> {
        self.listening.lock().await.as_ref().map(|l| l.port)
    }

    /// Close the listener. In-flight requests get a short grace period.
    pub async fn stop(&self) {
        let Some(listening) = self.listening.lock().await.take() else {
            return;
        };
        let _ = listening.shutdown.send(());
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), listening.task).await;
        tracing::info!("Callback server stopped");
    }
}
