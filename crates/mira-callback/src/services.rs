//! Collaborator traits behind the callback routes.
//!
//! Each trait is the seam between the HTTP surface and whatever the host
//! application uses to store journals, cards, memories and so on. Handlers
//! translate request JSON into these calls and the results back into response
//! envelopes; implementations never see HTTP types.
//!
//! Return values stay as `serde_json::Value` because the sidecar treats them
//! as opaque tool output. Methods that can miss (update a card that no longer
//! exists) return `Ok(None)` and the HTTP layer maps that to 404.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCard {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bullets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bullets: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub lane: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSearch {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub from_ts: Option<i64>,
    #[serde(default)]
    pub to_ts: Option<i64>,
}

#[async_trait]
pub trait JournalService: Send + Sync {
    async fn list_entries(
        &self,
        limit: usize,
        from: Option<String>,
        to: Option<String>,
    ) -> anyhow::Result<Value>;

    /// Kick off a journal generation run covering the last `window_minutes`.
    async fn trigger_run(&self, window_minutes: Option<u64>) -> anyhow::Result<Value>;

    async fn scheduler_status(&self) -> anyhow::Result<Value>;

    async fn delete_entry(&self, id: &str) -> anyhow::Result<Option<Value>>;
}

#[async_trait]
pub trait KanbanService: Send + Sync {
    async fn board(&self) -> anyhow::Result<Value>;

    /// Returns the full board after insertion.
    async fn create_card(&self, column_id: &str, card: NewCard) -> anyhow::Result<Value>;

    async fn update_card(&self, id: &str, patch: CardPatch) -> anyhow::Result<Option<Value>>;

    async fn delete_card(&self, id: &str) -> anyhow::Result<Option<Value>>;

    async fn move_card(
        &self,
        id: &str,
        to_column_id: &str,
        position: Option<usize>,
    ) -> anyhow::Result<Option<Value>>;
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Value>;

    async fn write(
        &self,
        content: &str,
        persistent: bool,
        section: Option<String>,
    ) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait LifeService: Send + Sync {
    async fn context(&self) -> anyhow::Result<Value>;

    async fn update_context(&self, patch: Value) -> anyhow::Result<Value>;

    async fn analysis(&self) -> anyhow::Result<Value>;

    async fn refresh_analysis(&self, window_days: u64) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn board(&self) -> anyhow::Result<Value>;

    async fn refresh(&self) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait RecordingsService: Send + Sync {
    async fn list(
        &self,
        limit: usize,
        from: Option<String>,
        to: Option<String>,
    ) -> anyhow::Result<Value>;

    async fn search(&self, query: RecordingSearch) -> anyhow::Result<Value>;

    async fn update(&self, id: &str, patch: Value) -> anyhow::Result<Option<Value>>;

    async fn delete(&self, id: &str) -> anyhow::Result<Option<Value>>;
}

/// UI-facing side effects the agent can request.
#[async_trait]
pub trait AppControl: Send + Sync {
    async fn navigate(&self, route: &str) -> anyhow::Result<Value>;

    async fn notify(&self, title: &str, message: &str) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait ConfigView: Send + Sync {
    /// Configuration with secrets already removed. Implementations must not
    /// include API keys or tokens in this view.
    async fn safe_config(&self) -> anyhow::Result<Value>;

    async fn app_status(&self) -> anyhow::Result<Value>;
}
