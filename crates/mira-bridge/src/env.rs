//! Sidecar environment construction.
//!
//! The variable map is rebuilt from a fresh settings snapshot on every spawn.
//! `MIRA_API_KEY` is a secret: the custom `Debug` impl renders only its
//! presence, so the descriptor can be logged safely.

use std::collections::BTreeMap;
use std::fmt;

use crate::settings::{normalize_provider, qualified_model, AgentSettings};

pub const ENV_API_KEY: &str = "MIRA_API_KEY";

/// Environment for one sidecar spawn.
pub struct EnvironmentDescriptor {
    vars: BTreeMap<String, String>,
}

impl EnvironmentDescriptor {
    pub fn build(settings: &AgentSettings, callback_port: u16, gateway_port: u16) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(ENV_API_KEY.to_string(), settings.api_key.clone());
        vars.insert("MIRA_MODEL".to_string(), qualified_model(settings));
        vars.insert(
            "MIRA_PROVIDER".to_string(),
            normalize_provider(settings.provider.as_deref()),
        );
        if let Some(base) = settings.api_base.as_deref().filter(|b| !b.trim().is_empty()) {
            vars.insert("MIRA_API_BASE".to_string(), base.to_string());
        }
        vars.insert(
            "MIRA_WORKSPACE".to_string(),
            settings.workspace_dir.display().to_string(),
        );
        vars.insert(
            "MIRA_CALLBACK_PORT".to_string(),
            callback_port.to_string(),
        );
        vars.insert("MIRA_GATEWAY_PORT".to_string(), gateway_port.to_string());
        vars.insert(
            "MIRA_AGENT_REF".to_string(),
            settings.agent_ref.display().to_string(),
        );
        vars.insert(
            "MIRA_LOG_LEVEL".to_string(),
            settings.log_level.clone().unwrap_or_else(|| "info".to_string()),
        );
        if let Some(temperature) = settings.temperature {
            vars.insert("MIRA_TEMPERATURE".to_string(), temperature.to_string());
        }
        if let Some(max_tokens) = settings.max_tokens {
            vars.insert("MIRA_MAX_TOKENS".to_string(), max_tokens.to_string());
        }
        if let Some(max_iterations) = settings.max_iterations {
            vars.insert("MIRA_MAX_ITERATIONS".to_string(), max_iterations.to_string());
        }
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn apply(&self, command: &mut tokio::process::Command) {
        for (key, value) in &self.vars {
            command.env(key, value);
        }
    }
}

impl fmt::Debug for EnvironmentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.vars {
            if key == ENV_API_KEY {
                let presence = if value.is_empty() { "<unset>" } else { "<set>" };
                map.entry(key, &presence);
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}
