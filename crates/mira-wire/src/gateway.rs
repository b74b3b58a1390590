//! Request/response types for the gateway HTTP API.
//!
//! Fields the sidecar may evolve independently stay as `serde_json::Value`;
//! everything the host actually inspects is typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full reply to a synchronous chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub session_key: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

/// `GET /health` response. `status == "ok"` means the agent is ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub model: String,
}

impl GatewayHealth {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// `GET /api/status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub sessions_count: usize,
    #[serde(default)]
    pub tools_count: usize,
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub cron: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub schedule_type: String,
    #[serde(default)]
    pub interval: Option<u64>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct CronJobRequest {
    pub name: String,
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// An external integration the sidecar can connect to (calendar, mail, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationApp {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationAction {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

/// State of an initiated integration connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_ok_predicate() {
        let healthy: GatewayHealth =
            serde_json::from_str(r#"{"status":"ok","uptime":12.5,"model":"openai/gpt-4o"}"#)
                .unwrap();
        assert!(healthy.is_ok());

        let starting: GatewayHealth = serde_json::from_str(r#"{"status":"starting"}"#).unwrap();
        assert!(!starting.is_ok());
    }

    #[test]
    fn status_tolerates_missing_fields() {
        let status: GatewayStatus = serde_json::from_str(r#"{"ready":true}"#).unwrap();
        assert!(status.ready);
        assert!(status.tool_names.is_empty());
        assert!(status.cron.is_null());
    }

    #[test]
    fn cron_job_defaults_enabled() {
        let job: CronJob =
            serde_json::from_str(r#"{"id":"j1","name":"daily digest","message":"summarize"}"#)
                .unwrap();
        assert!(job.enabled);
        assert!(job.interval.is_none());
    }

    #[test]
    fn cron_request_omits_unset_schedule_fields() {
        let req = CronJobRequest {
            name: "check".into(),
            schedule_type: "interval".into(),
            interval: Some(3600),
            expression: None,
            message: "check inbox".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["interval"], 3600);
        assert!(json.get("expression").is_none());
    }
}
