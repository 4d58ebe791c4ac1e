//! Pipeline configuration: JSON file plus environment overrides.
//!
//! Every field has a default, so `{}` is a valid config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::executor::ExecutorConfig;
use crate::generation::GenerationConfig;
use crate::planner::PlannerConfig;
use crate::summarize::SummarizerConfig;

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model for generation, and for planning unless `planner.model` is set.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Total generation attempts per edit, counting the first.
    #[serde(default = "default_max_edit_attempts")]
    pub max_edit_attempts: u32,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_max_edit_attempts() -> u32 {
    2
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            summarizer: SummarizerConfig::default(),
            generation: GenerationConfig::default(),
            max_edit_attempts: default_max_edit_attempts(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    /// Read `path`, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DECK_MODEL`, `DECK_PLANNER_MODEL`, `DECK_MAX_CONCURRENCY` and
    /// `DECK_QUERY_TIMEOUT_SECONDS` as looked up through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let non_blank = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_blank("DECK_MODEL") {
            self.model = model.trim().to_string();
        }
        if let Some(model) = non_blank("DECK_PLANNER_MODEL") {
            self.planner.model = Some(model.trim().to_string());
        }
        if let Some(raw) = non_blank("DECK_MAX_CONCURRENCY") {
            self.executor.max_concurrency =
                parse_env("DECK_MAX_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = non_blank("DECK_QUERY_TIMEOUT_SECONDS") {
            self.executor.query_timeout_secs = parse_env("DECK_QUERY_TIMEOUT_SECONDS", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        if self.executor.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_concurrency must be at least 1".into(),
            ));
        }
        if self.executor.query_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "executor.query_timeout_secs must be at least 1".into(),
            ));
        }
        if self.planner.max_queries == 0 {
            return Err(ConfigError::Invalid(
                "planner.max_queries must be at least 1".into(),
            ));
        }
        if self.summarizer.max_rows == 0 || self.summarizer.max_time_series_samples == 0 {
            return Err(ConfigError::Invalid(
                "summarizer row and sample limits must be at least 1".into(),
            ));
        }
        if self.max_edit_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_edit_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn planner_model(&self) -> &str {
        self.planner.model.as_deref().unwrap_or(&self.model)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_json_is_all_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.executor.max_concurrency, 5);
        assert_eq!(config.executor.query_timeout_secs, 60);
        assert_eq!(config.planner.max_queries, 6);
        assert_eq!(config.summarizer.max_rows, 20);
        assert_eq!(config.max_edit_attempts, 2);
        assert_eq!(config.planner_model(), DEFAULT_MODEL);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(lookup(&[
                ("DECK_MODEL", "openai/gpt-4.1"),
                ("DECK_PLANNER_MODEL", "openai/gpt-5-mini"),
                ("DECK_MAX_CONCURRENCY", "3"),
                ("DECK_QUERY_TIMEOUT_SECONDS", " 15 "),
            ]))
            .unwrap();
        assert_eq!(config.model, "openai/gpt-4.1");
        assert_eq!(config.planner_model(), "openai/gpt-5-mini");
        assert_eq!(config.executor.max_concurrency, 3);
        assert_eq!(config.executor.query_timeout_secs, 15);
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(lookup(&[("DECK_MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "DECK_MAX_CONCURRENCY",
                ..
            }
        ));
    }

    #[test]
    fn zero_limits_are_invalid() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"executor": {"max_concurrency": 0}}"#).unwrap();
        assert!(config.validate().is_err());
    }
}
