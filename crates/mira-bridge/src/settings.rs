//! Agent settings snapshotting and provider/model normalization.
//!
//! Settings are read through [`SettingsProvider`] at spawn time, never cached
//! across restarts, so edits made while the sidecar is down take effect on
//! the next start.

use std::path::PathBuf;

use async_trait::async_trait;
use mira_wire::Result;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const SUPPORTED_PROVIDERS: &[&str] = &["openai", "ollama", "gemini", "groq", "custom"];

/// Point-in-time view of everything the sidecar needs to run.
#[derive(Debug, Clone, Default)]
pub struct AgentSettings {
    pub api_key: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub api_base: Option<String>,
    pub workspace_dir: PathBuf,
    pub agent_ref: PathBuf,
    pub log_level: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub max_iterations: Option<u32>,
}

/// Source of the settings snapshot, resolved fresh on every spawn.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn snapshot(&self) -> Result<AgentSettings>;
}

/// Collapse aliased and unknown provider names onto a supported one.
/// `subscription` and `openrouter` both route through the OpenAI-compatible
/// path at runtime.
pub fn normalize_provider(raw: Option<&str>) -> String {
    let lowered = raw.map(|p| p.trim().to_ascii_lowercase());
    match lowered.as_deref() {
        Some("subscription") | Some("openrouter") => "openai".to_string(),
        Some(p) if SUPPORTED_PROVIDERS.contains(&p) => p.to_string(),
        _ => "openai".to_string(),
    }
}

/// Fully qualified `provider/model` string for the runtime. Unqualified model
/// names are prefixed with the normalized provider; a missing model falls
/// back to [`DEFAULT_MODEL`].
pub fn qualified_model(settings: &AgentSettings) -> String {
    let provider = normalize_provider(settings.provider.as_deref());
    match settings.model.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_MODEL.to_string(),
        Some(model) if model.contains('/') => model.to_string(),
        Some(model) => format!("{provider}/{model}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliased_providers_collapse_to_openai() {
        assert_eq!(normalize_provider(Some("subscription")), "openai");
        assert_eq!(normalize_provider(Some("openrouter")), "openai");
        assert_eq!(normalize_provider(Some("OpenAI")), "openai");
    }

    #[test]
    fn unknown_provider_falls_back_to_openai() {
        assert_eq!(normalize_provider(Some("mystery")), "openai");
        assert_eq!(normalize_provider(None), "openai");
    }

    #[test]
    fn supported_providers_pass_through() {
        assert_eq!(normalize_provider(Some("ollama")), "ollama");
        assert_eq!(normalize_provider(Some("groq")), "groq");
    }

    #[test]
    fn unqualified_model_gets_provider_prefix() {
        let settings = AgentSettings {
            model: Some("llama3".into()),
            provider: Some("ollama".into()),
            ..AgentSettings::default()
        };
        assert_eq!(qualified_model(&settings), "ollama/llama3");
    }

    #[test]
    fn qualified_model_is_untouched() {
        let settings = AgentSettings {
            model: Some("gemini/gemini-1.5-pro".into()),
            provider: Some("openai".into()),
            ..AgentSettings::default()
        };
        assert_eq!(qualified_model(&settings), "gemini/gemini-1.5-pro");
    }

    #[test]
    fn missing_model_uses_default() {
        let settings = AgentSettings::default();
        assert_eq!(qualified_model(&settings), DEFAULT_MODEL);
    }
}
