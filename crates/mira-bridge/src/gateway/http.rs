//! Request/response client for the gateway HTTP API.

use std::time::Duration;

use mira_wire::{
    AgentReply, BridgeError, ConnectionInfo, CronJob, CronJobRequest, GatewayHealth,
    GatewayStatus, IntegrationAction, IntegrationApp, Result, SessionSummary, SubagentInfo,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::RwLock;

// A chat turn can run tools and think for a long while; everything else is a
// quick local round trip.
const LIGHT_TIMEOUT: Duration = Duration::from_secs(5);
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct GatewayHttpClient {
    http: reqwest::Client,
    base_url: RwLock<String>,
}

impl GatewayHttpClient {
    pub fn new(gateway_port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: RwLock::new(format!("http://127.0.0.1:{gateway_port}")),
        }
    }

    /// Point the client at a different sidecar incarnation.
    pub async fn set_base_url(&self, gateway_port: u16) {
        *self.base_url.write().await = format!("http://127.0.0.1:{gateway_port}");
    }

    async fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.read().await, path)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Rpc {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.http.get(self.url(path).await).timeout(LIGHT_TIMEOUT);
        Self::decode(self.execute(request).await?).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let request = self.http.delete(self.url(path).await).timeout(LIGHT_TIMEOUT);
        self.execute(request).await?;
        Ok(())
    }

    // --- chat ---

    pub async fn send_message(&self, content: &str, session_id: &str) -> Result<AgentReply> {
        let request = self
            .http
            .post(self.url("/api/message").await)
            .timeout(CHAT_TIMEOUT)
            .json(&json!({ "content": content, "session_id": session_id }));
        Self::decode(self.execute(request).await?).await
    }

    // --- health / status ---

    pub async fn health(&self) -> Result<GatewayHealth> {
        self.get_json("/health").await
    }

    pub async fn status(&self) -> Result<GatewayStatus> {
        self.get_json("/api/status").await
    }

    // --- bootstrap file ---

    pub async fn bootstrap(&self) -> Result<Value> {
        self.get_json("/api/bootstrap").await
    }

    pub async fn update_bootstrap(&self, content: &str) -> Result<()> {
        let request = self
            .http
            .put(self.url("/api/bootstrap").await)
            .timeout(LIGHT_TIMEOUT)
            .json(&json!({ "content": content }));
        self.execute(request).await?;
        Ok(())
    }

    // --- agent memory ---

    pub async fn memory(&self) -> Result<Value> {
        self.get_json("/api/memory").await
    }

    pub async fn reset_memory(&self) -> Result<()> {
        self.delete("/api/memory").await
    }

    // --- sessions ---

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.get_json("/api/sessions").await
    }

    pub async fn session_detail(&self, id: &str) -> Result<Value> {
        self.get_json(&format!("/api/sessions/{id}")).await
    }

    // --- cron ---

    pub async fn list_cron_jobs(&self) -> Result<Vec<CronJob>> {
        self.get_json("/api/cron/jobs").await
    }

    pub async fn add_cron_job(&self, job: &CronJobRequest) -> Result<CronJob> {
        let request = self
            .http
            .post(self.url("/api/cron/jobs").await)
            .timeout(LIGHT_TIMEOUT)
            .json(job);
        Self::decode(self.execute(request).await?).await
    }

    pub async fn remove_cron_job(&self, id: &str) -> Result<()> {
        self.delete(&format!("/api/cron/jobs/{id}")).await
    }

    pub async fn toggle_cron_job(&self, id: &str, enabled: bool) -> Result<CronJob> {
        let request = self
            .http
            .post(self.url(&format!("/api/cron/jobs/{id}/toggle")).await)
            .timeout(LIGHT_TIMEOUT)
            .json(&json!({ "enabled": enabled }));
        Self::decode(self.execute(request).await?).await
    }

    // --- sub-agents ---

    pub async fn list_subagents(&self) -> Result<Vec<SubagentInfo>> {
        self.get_json("/api/subagents").await
    }

    // --- external-tool connections ---

    pub async fn list_integrations(&self) -> Result<Vec<IntegrationApp>> {
        self.get_json("/api/connect/apps").await
    }

    pub async fn list_actions(&self, app: &str) -> Result<Vec<IntegrationAction>> {
        self.get_json(&format!("/api/connect/apps/{app}/actions")).await
    }

    pub async fn initiate_connection(&self, app: &str) -> Result<ConnectionInfo> {
        let request = self
            .http
            .post(self.url("/api/connect/connections").await)
            .timeout(LIGHT_TIMEOUT)
            .json(&json!({ "app": app }));
        Self::decode(self.execute(request).await?).await
    }

    pub async fn check_connection(&self, id: &str) -> Result<ConnectionInfo> {
        self.get_json(&format!("/api/connect/connections/{id}")).await
    }

    pub async fn list_connections(&self) -> Result<Vec<ConnectionInfo>> {
        self.get_json("/api/connect/connections").await
    }

    pub async fn remove_connection(&self, id: &str) -> Result<()> {
        self.delete(&format!("/api/connect/connections/{id}")).await
    }

    pub async fn register_app_tools(
        &self,
        app: &str,
        actions: Option<Vec<String>>,
    ) -> Result<Value> {
        let request = self
            .http
            .post(self.url("/api/connect/tools").await)
            .timeout(LIGHT_TIMEOUT)
            .json(&json!({ "app": app, "actions": actions }));
        Self::decode(self.execute(request).await?).await
    }

    pub async fn unregister_app_tools(&self, app: &str) -> Result<()> {
        self.delete(&format!("/api/connect/tools/{app}")).await
    }

    pub async fn list_registered_tools(&self) -> Result<Value> {
        self.get_json("/api/connect/tools").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn stub_gateway() -> Router {
        Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(json!({ "status": "ok", "uptime": 4.2, "model": "openai/gpt-4o" }))
                }),
            )
            .route(
                "/api/message",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({
                        "content": format!("echo: {}", body["content"].as_str().unwrap_or("")),
                        "session_key": body["session_id"],
                        "tools_used": ["memory_search"],
                    }))
                }),
            )
            .route(
                "/api/broken",
                get(|| async {
                    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom")
                }),
            )
    }

    #[tokio::test]
    async fn health_round_trip() {
        let port = serve(stub_gateway()).await;
        let client = GatewayHttpClient::new(port);
        let health = client.health().await.unwrap();
        assert!(health.is_ok());
        assert_eq!(health.model, "openai/gpt-4o");
    }

    #[tokio::test]
    async fn send_message_posts_content_and_session() {
        let port = serve(stub_gateway()).await;
        let client = GatewayHttpClient::new(port);
        let reply = client.send_message("hello", "mira:chat").await.unwrap();
        assert_eq!(reply.content, "echo: hello");
        assert_eq!(reply.session_key, "mira:chat");
        assert_eq!(reply.tools_used, vec!["memory_search"]);
    }

    #[tokio::test]
    async fn non_2xx_surfaces_status_and_body() {
        let port = serve(stub_gateway()).await;
        let client = GatewayHttpClient::new(port);
        let err = client.get_json::<Value>("/api/broken").await.unwrap_err();
        match err {
            BridgeError::Rpc { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn set_base_url_switches_incarnations() {
        let old_port = serve(stub_gateway()).await;
        let new_port = serve(
            Router::new().route(
                "/health",
                get(|| async { Json(json!({ "status": "ok", "model": "ollama/llama3" })) }),
            ),
        )
        .await;

        let client = GatewayHttpClient::new(old_port);
        assert_eq!(client.health().await.unwrap().model, "openai/gpt-4o");

        client.set_base_url(new_port).await;
        assert_eq!(client.health().await.unwrap().model, "ollama/llama3");
    }
}
