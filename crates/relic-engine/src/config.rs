use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use relic_contracts::models::{Capability, ModelSelection, ModelSelector};

use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub analysis_model: Option<String>,
    pub image_model: Option<String>,
    pub speech_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
            analysis_model: None,
            image_model: None,
            speech_model: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` passes `env::var`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let api_key = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("GOOGLE_API_KEY"))
            .or_else(|| non_empty("API_KEY"));
        let api_base = non_empty("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let timeout_s = clamped_f64(non_empty("RELIC_REQUEST_TIMEOUT"), 90.0, 15.0, 300.0);
        let retries = clamped_f64(non_empty("RELIC_RETRIES"), 2.0, 0.0, 6.0).round() as usize;
        let backoff_ms = clamped_f64(non_empty("RELIC_RETRY_BACKOFF_MS"), 1000.0, 50.0, 10_000.0);

        Self {
            api_key,
            api_base,
            request_timeout: Duration::from_secs_f64(timeout_s),
            retry: RetryPolicy::new(retries, Duration::from_millis(backoff_ms.round() as u64)),
            analysis_model: non_empty("RELIC_ANALYSIS_MODEL"),
            image_model: non_empty("RELIC_IMAGE_MODEL"),
            speech_model: non_empty("RELIC_SPEECH_MODEL"),
        }
    }

    pub fn resolve_models(&self) -> Result<ResolvedModels> {
        let selector = ModelSelector::default();
        let pick = |requested: Option<&String>, capability: Capability| {
            selector
                .select(requested.map(String::as_str), capability)
                .map_err(|message| anyhow!(message))
        };
        Ok(ResolvedModels {
            analysis: pick(self.analysis_model.as_ref(), Capability::Analysis)?,
            image: pick(self.image_model.as_ref(), Capability::Image)?,
            speech: pick(self.speech_model.as_ref(), Capability::Speech)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedModels {
    pub analysis: ModelSelection,
    pub image: ModelSelection,
    pub speech: ModelSelection,
}

impl ResolvedModels {
    pub fn fallback_reasons(&self) -> Vec<String> {
        [&self.analysis, &self.image, &self.speech]
            .into_iter()
            .filter_map(|selection| selection.fallback_reason.clone())
            .collect()
    }
}

fn clamped_f64(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{EngineConfig, DEFAULT_API_BASE};

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<String, String>>();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]);
        assert!(config.api_key.is_none());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1000));
    }

    #[test]
    fn numeric_settings_are_clamped() {
        let config = config_from(&[
            ("RELIC_REQUEST_TIMEOUT", "5"),
            ("RELIC_RETRIES", "12"),
            ("RELIC_RETRY_BACKOFF_MS", "not-a-number"),
        ]);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.retry.max_retries, 6);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1000));
    }

    #[test]
    fn key_lookup_prefers_gemini_then_google_then_generic() {
        let config = config_from(&[("API_KEY", "generic"), ("GOOGLE_API_KEY", "google")]);
        assert_eq!(config.api_key.as_deref(), Some("google"));
        let config = config_from(&[("GEMINI_API_KEY", " "), ("API_KEY", "generic")]);
        assert_eq!(config.api_key.as_deref(), Some("generic"));
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let config = config_from(&[("GEMINI_API_BASE", "http://localhost:8080/v1/")]);
        assert_eq!(config.api_base, "http://localhost:8080/v1");
    }

    #[test]
    fn unknown_models_resolve_with_fallback_reason() -> anyhow::Result<()> {
        let config = config_from(&[
            ("RELIC_IMAGE_MODEL", "gemini-2.5-flash-image"),
            ("RELIC_SPEECH_MODEL", "nonexistent-tts"),
        ]);
        let models = config.resolve_models()?;
        assert_eq!(models.analysis.model.name, "gemini-3-pro-preview");
        assert_eq!(models.image.model.name, "gemini-2.5-flash-image");
        assert_eq!(models.speech.model.name, "gemini-2.5-flash-preview-tts");
        assert_eq!(models.fallback_reasons().len(), 1);
        Ok(())
    }
}
