//! Pipeline configuration
//!
//! Stage identities and tuning are created once at start-up and never
//! mutated afterwards. Everything deserializes from TOML with defaults for
//! every omitted field.

use crate::error::ConfigError;
use crate::prompts;
use crate::types::StageKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Identity and behavioral tuning for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name (keys the prior-results map)
    pub name: String,
    /// Role label
    pub role: String,
    /// System instructions sent with every call
    pub system_prompt: String,
    /// Capabilities the stage may report as used
    pub allowed_tools: Vec<String>,
    /// Sampling temperature, [0, 2]
    pub temperature: f32,
    /// Output-length budget, [100, 8000]
    pub max_tokens: u32,
}

impl StageConfig {
    /// Default configuration for a stage
    #[must_use]
    pub fn for_stage(stage: StageKind) -> Self {
        let (tools, temperature, max_tokens): (&[&str], f32, u32) = match stage {
            StageKind::Gather => (&["web_search", "db_query"], 0.3, 3000),
            StageKind::Analyze => (&["calculator", "db_query"], 0.4, 3500),
            StageKind::AssessRisk => (&["db_query"], 0.3, 4000),
            StageKind::Decide => (&[], 0.5, 4000),
        };
        Self {
            name: stage.default_name().to_string(),
            role: stage.default_role().to_string(),
            system_prompt: prompts::system_prompt(stage).to_string(),
            allowed_tools: tools.iter().map(|t| (*t).to_string()).collect(),
            temperature,
            max_tokens,
        }
    }

    /// With temperature
    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// With output budget
    #[inline]
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Check tuning bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Temperature {
                stage: self.name.clone(),
                value: self.temperature,
            });
        }
        if !(100..=8000).contains(&self.max_tokens) {
            return Err(ConfigError::MaxTokens {
                stage: self.name.clone(),
                value: self.max_tokens,
            });
        }
        Ok(())
    }

    /// Whether the stage may report this capability
    #[inline]
    #[must_use]
    pub fn permits(&self, tool: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// Per-stage configuration, one entry per fixed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfigs {
    /// Gather stage
    pub gather: StageConfig,
    /// Analyze stage
    pub analyze: StageConfig,
    /// Risk stage
    pub assess_risk: StageConfig,
    /// Decision stage
    pub decide: StageConfig,
}

impl StageConfigs {
    /// Configuration for a stage
    #[must_use]
    pub fn get(&self, stage: StageKind) -> &StageConfig {
        match stage {
            StageKind::Gather => &self.gather,
            StageKind::Analyze => &self.analyze,
            StageKind::AssessRisk => &self.assess_risk,
            StageKind::Decide => &self.decide,
        }
    }

    /// Mutable configuration for a stage
    pub fn get_mut(&mut self, stage: StageKind) -> &mut StageConfig {
        match stage {
            StageKind::Gather => &mut self.gather,
            StageKind::Analyze => &mut self.analyze,
            StageKind::AssessRisk => &mut self.assess_risk,
            StageKind::Decide => &mut self.decide,
        }
    }
}

impl Default for StageConfigs {
    fn default() -> Self {
        Self {
            gather: StageConfig::for_stage(StageKind::Gather),
            analyze: StageConfig::for_stage(StageKind::Analyze),
            assess_risk: StageConfig::for_stage(StageKind::AssessRisk),
            decide: StageConfig::for_stage(StageKind::Decide),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stage identities and tuning
    pub stages: StageConfigs,
    /// Memory snippets fetched for the first stage
    pub memory_results: usize,
    /// Characters kept per memory snippet
    pub memory_excerpt_chars: usize,
    /// Characters kept in trace input previews
    pub input_preview_chars: usize,
    /// Deadline for each inference call
    pub inference_timeout_secs: u64,
    /// Deadline for each memory call
    pub memory_timeout_secs: u64,
    /// Risks carried into the verdict
    pub top_risks: usize,
    /// Minimum confidence for a key decision
    pub key_decision_threshold: f64,
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// With inference deadline
    #[inline]
    #[must_use]
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// With memory result count
    #[inline]
    #[must_use]
    pub fn with_memory_results(mut self, limit: usize) -> Self {
        self.memory_results = limit;
        self
    }

    /// With a replaced stage configuration
    #[inline]
    #[must_use]
    pub fn with_stage(mut self, stage: StageKind, config: StageConfig) -> Self {
        *self.stages.get_mut(stage) = config;
        self
    }

    /// Inference deadline
    #[inline]
    #[must_use]
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    /// Memory deadline
    #[inline]
    #[must_use]
    pub fn memory_timeout(&self) -> Duration {
        Duration::from_secs(self.memory_timeout_secs)
    }

    /// Check every stage and numeric bound
    pub fn validate(&self) -> Result<(), ConfigError> {
        for stage in StageKind::ALL {
            self.stages.get(stage).validate()?;
        }
        if self.inference_timeout_secs == 0 {
            return Err(ConfigError::Invalid("inference_timeout_secs must be > 0".into()));
        }
        if self.memory_timeout_secs == 0 {
            return Err(ConfigError::Invalid("memory_timeout_secs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.key_decision_threshold) {
            return Err(ConfigError::Invalid(format!(
                "key_decision_threshold {} outside [0, 1]",
                self.key_decision_threshold
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: StageConfigs::default(),
            memory_results: 3,
            memory_excerpt_chars: 200,
            input_preview_chars: 200,
            inference_timeout_secs: 120,
            memory_timeout_secs: 10,
            top_risks: 5,
            key_decision_threshold: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_results, 3);
        assert_eq!(config.stages.get(StageKind::Gather).name, "Research Agent");
        assert!(config.stages.get(StageKind::Decide).allowed_tools.is_empty());
    }

    #[test]
    fn temperature_bounds_enforced() {
        let stage = StageConfig::for_stage(StageKind::Analyze).with_temperature(2.5);
        assert!(matches!(stage.validate(), Err(ConfigError::Temperature { .. })));
    }

    #[test]
    fn max_tokens_bounds_enforced() {
        let low = StageConfig::for_stage(StageKind::Analyze).with_max_tokens(99);
        let high = StageConfig::for_stage(StageKind::Analyze).with_max_tokens(8001);
        assert!(matches!(low.validate(), Err(ConfigError::MaxTokens { .. })));
        assert!(matches!(high.validate(), Err(ConfigError::MaxTokens { .. })));
        assert!(StageConfig::for_stage(StageKind::Analyze)
            .with_max_tokens(8000)
            .validate()
            .is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            memory_results = 5

            [stages.decide]
            name = "Decision Agent"
            role = "Decision Maker"
            system_prompt = "decide"
            allowed_tools = []
            temperature = 0.2
            max_tokens = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.memory_results, 5);
        assert_eq!(config.stages.decide.temperature, 0.2);
        assert_eq!(config.stages.gather, StageConfig::for_stage(StageKind::Gather));
        assert_eq!(config.inference_timeout_secs, 120);
    }

    #[test]
    fn invalid_toml_stage_rejected() {
        let result = PipelineConfig::from_toml_str(
            r#"
            [stages.gather]
            name = "Research Agent"
            role = "Data Gatherer"
            system_prompt = "gather"
            allowed_tools = []
            temperature = 3.0
            max_tokens = 1000
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Temperature { .. })));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "top_risks = 2\n").unwrap();

        let config = PipelineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.top_risks, 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = PipelineConfig::from_toml_file("/nonexistent/aegis.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn permits_only_allowed_tools() {
        let stage = StageConfig::for_stage(StageKind::AssessRisk);
        assert!(stage.permits("db_query"));
        assert!(!stage.permits("web_search"));
    }
}
