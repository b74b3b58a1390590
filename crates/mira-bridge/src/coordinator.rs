//! Runtime coordinator: ties the callback server, the process supervisor,
//! and the gateway client pair into one start/stop surface for the host app.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mira_callback::CallbackServer;
use mira_wire::{LifecycleEvent, Result, SidecarStatus};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::gateway::{GatewayHttpClient, GatewayWsClient};
use crate::supervisor::ProcessSupervisor;

/// Client pair bound to one sidecar incarnation. Replaced wholesale on every
/// `Ready`, never mutated in place.
#[derive(Clone)]
pub struct GatewayHandles {
    pub http: Arc<GatewayHttpClient>,
    pub ws: Arc<GatewayWsClient>,
}

pub struct RuntimeCoordinator {
    supervisor: Arc<ProcessSupervisor>,
    callback: Arc<CallbackServer>,
    gateway: RwLock<Option<GatewayHandles>>,
    listener_bound: AtomicBool,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeCoordinator {
    pub fn new(supervisor: Arc<ProcessSupervisor>, callback: Arc<CallbackServer>) -> Self {
        Self {
            supervisor,
            callback,
            gateway: RwLock::new(None),
            listener_bound: AtomicBool::new(false),
            listener_task: Mutex::new(None),
        }
    }

    /// Current gateway client pair, present only while the sidecar is up.
    pub async fn gateway(&self) -> Option<GatewayHandles> {
        self.gateway.read().await.clone()
    }

    pub async fn status(&self) -> SidecarStatus {
        self.supervisor.status().await
    }

    /// Bring the whole runtime up: callback server first so its port can go
    /// into the sidecar environment, then the supervised process.
    pub async fn start_runtime(self: &Arc<Self>) -> Result<SidecarStatus> {
        self.bind_listener().await;
        let callback_port = self.callback.listen().await?;
        self.supervisor.start(callback_port).await?;
        Ok(self.supervisor.status().await)
    }

    /// Tear down in reverse order of startup: client pair, supervised
    /// process, callback server.
    pub async fn stop_runtime(&self) -> Result<SidecarStatus> {
        if let Some(handles) = self.gateway.write().await.take() {
            handles.ws.disconnect().await;
        }
        self.supervisor.stop().await;
        self.callback.stop().await;
        Ok(self.supervisor.status().await)
    }

    pub async fn restart_runtime(self: &Arc<Self>) -> Result<SidecarStatus> {
        self.stop_runtime().await?;
        self.start_runtime().await
    }

    /// Subscribe to supervisor lifecycle events once; subsequent calls are
    /// no-ops. `Ready` builds a fresh client pair, `Stopped` and `Error`
    /// drop it.
    pub(crate) async fn bind_listener(self: &Arc<Self>) {
        if self.listener_bound.swap(true, Ordering::SeqCst) {
            return;
        }
        let coordinator = Arc::clone(self);
        let mut events = self.supervisor.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Ready { port }) => {
                        let handles = GatewayHandles {
                            http: Arc::new(GatewayHttpClient::new(port)),
                            ws: Arc::new(GatewayWsClient::new(port)),
                        };
                        if let Err(e) = handles.ws.connect().await {
                            tracing::warn!("Chat socket connect failed: {e}");
                        }
                        *coordinator.gateway.write().await = Some(handles);
                    }
                    Ok(LifecycleEvent::Stopped) | Ok(LifecycleEvent::Error { .. }) => {
                        if let Some(handles) = coordinator.gateway.write().await.take() {
                            handles.ws.disconnect().await;
                        }
                    }
                    Ok(LifecycleEvent::Restarting { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Lifecycle listener lagged by {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.listener_task.lock().await = Some(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ProcessMetrics;
    use crate::settings::{AgentSettings, SettingsProvider};
    use crate::supervisor::SupervisorConfig;
    use async_trait::async_trait;
    use axum::extract::ws::WebSocketUpgrade;
    use axum::routing::get;
    use axum::Router;
    use mira_callback::CallbackState;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct NullHost;

    #[async_trait]
    impl mira_callback::JournalService for NullHost {
        async fn list_entries(
            &self,
            _limit: usize,
            _from: Option<String>,
            _to: Option<String>,
        ) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn trigger_run(&self, _window_minutes: Option<u64>) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn scheduler_status(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn delete_entry(&self, _id: &str) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl mira_callback::KanbanService for NullHost {
        async fn board(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn create_card(
            &self,
            _column_id: &str,
            _card: mira_callback::NewCard,
        ) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn update_card(
            &self,
            _id: &str,
            _patch: mira_callback::CardPatch,
        ) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
        async fn delete_card(&self, _id: &str) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
        async fn move_card(
            &self,
            _id: &str,
            _to_column_id: &str,
            _position: Option<usize>,
        ) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl mira_callback::MemoryService for NullHost {
        async fn search(&self, _query: &str, _limit: usize) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn write(
            &self,
            _content: &str,
            _persistent: bool,
            _section: Option<String>,
        ) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
    }

    #[async_trait]
    impl mira_callback::LifeService for NullHost {
        async fn context(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn update_context(&self, _patch: Value) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn analysis(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn refresh_analysis(&self, _window_days: u64) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
    }

    #[async_trait]
    impl mira_callback::ProfileService for NullHost {
        async fn board(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn refresh(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
    }

    #[async_trait]
    impl mira_callback::RecordingsService for NullHost {
        async fn list(
            &self,
            _limit: usize,
            _from: Option<String>,
            _to: Option<String>,
        ) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn search(&self, _query: mira_callback::RecordingSearch) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn update(&self, _id: &str, _patch: Value) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
        async fn delete(&self, _id: &str) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl mira_callback::AppControl for NullHost {
        async fn navigate(&self, _route: &str) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn notify(&self, _title: &str, _message: &str) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
    }

    #[async_trait]
    impl mira_callback::ConfigView for NullHost {
        async fn safe_config(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
        async fn app_status(&self) -> anyhow::Result<Value> {
            Ok(json!({}))
        }
    }

    struct FixedSettings;

    #[async_trait]
    impl SettingsProvider for FixedSettings {
        async fn snapshot(&self) -> Result<AgentSettings> {
            Ok(AgentSettings::default())
        }
    }

    struct QuietMetrics;

    #[async_trait]
    impl ProcessMetrics for QuietMetrics {
        async fn rss_bytes(&self, _pid: u32) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    fn coordinator() -> (Arc<RuntimeCoordinator>, Arc<ProcessSupervisor>) {
        let supervisor = Arc::new(ProcessSupervisor::new(
            SupervisorConfig::new("/nonexistent/mira-sidecar"),
            Arc::new(FixedSettings),
            Arc::new(QuietMetrics),
        ));
        let host = Arc::new(NullHost);
        let callback = Arc::new(CallbackServer::new(CallbackState {
            journal: host.clone(),
            kanban: host.clone(),
            memory: host.clone(),
            life: host.clone(),
            profile: host.clone(),
            recordings: host.clone(),
            app: host.clone(),
            config: host,
        }));
        (
            Arc::new(RuntimeCoordinator::new(supervisor.clone(), callback)),
            supervisor,
        )
    }

    async fn serve_ws_stub() -> u16 {
        let app = Router::new().route(
            "/ws/chat",
            get(|ws: WebSocketUpgrade| async move {
                ws.on_upgrade(|_socket| async {})
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn ready_builds_the_client_pair_and_stop_drops_it() {
        let (coordinator, supervisor) = coordinator();
        coordinator.bind_listener().await;
        assert!(coordinator.gateway().await.is_none());

        let port = serve_ws_stub().await;
        supervisor.publish(LifecycleEvent::Ready { port });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(coordinator.gateway().await.is_some());

        supervisor.publish(LifecycleEvent::Stopped);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(coordinator.gateway().await.is_none());
    }

    #[tokio::test]
    async fn pair_is_replaced_wholesale_on_a_new_ready() {
        let (coordinator, supervisor) = coordinator();
        coordinator.bind_listener().await;

        let first = serve_ws_stub().await;
        supervisor.publish(LifecycleEvent::Ready { port: first });
        tokio::time::sleep(Duration::from_millis(200)).await;
        let old = coordinator.gateway().await.unwrap();

        let second = serve_ws_stub().await;
        supervisor.publish(LifecycleEvent::Ready { port: second });
        tokio::time::sleep(Duration::from_millis(200)).await;
        let new = coordinator.gateway().await.unwrap();
        assert!(!Arc::ptr_eq(&old.http, &new.http));
    }

    #[tokio::test]
    async fn error_event_also_drops_the_pair() {
        let (coordinator, supervisor) = coordinator();
        coordinator.bind_listener().await;

        let port = serve_ws_stub().await;
        supervisor.publish(LifecycleEvent::Ready { port });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(coordinator.gateway().await.is_some());

        supervisor.publish(LifecycleEvent::Error {
            message: "sidecar exited".into(),
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(coordinator.gateway().await.is_none());
    }

    #[tokio::test]
    async fn stop_runtime_is_clean_without_a_start() {
        let (coordinator, _supervisor) = coordinator();
        let status = coordinator.stop_runtime().await.unwrap();
        assert_eq!(status.state, mira_wire::SidecarState::Stopped);
    }

    #[tokio::test]
    async fn stop_runtime_drops_the_pair_and_reports_stopped() {
        let (coordinator, supervisor) = coordinator();
        coordinator.bind_listener().await;

        let port = serve_ws_stub().await;
        supervisor.publish(LifecycleEvent::Ready { port });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(coordinator.gateway().await.is_some());

        let status = coordinator.stop_runtime().await.unwrap();
        assert_eq!(status.state, mira_wire::SidecarState::Stopped);
        assert!(coordinator.gateway().await.is_none());
    }
}
