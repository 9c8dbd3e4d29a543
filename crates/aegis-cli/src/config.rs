//! CLI configuration: `{ log, pipeline, gateway }` from TOML plus environment

use aegis_core::PipelineConfig;
use aegis_gateway::GatewayConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LogConfig {
    /// Default filter when neither `AEGIS_LOG` nor `RUST_LOG` is set
    pub(crate) level: String,
    /// Emit JSON lines
    pub(crate) json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AegisConfig {
    pub(crate) log: LogConfig,
    pub(crate) pipeline: PipelineConfig,
    pub(crate) gateway: GatewayConfig,
}

impl AegisConfig {
    /// Load from an optional file, then apply environment overrides
    pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    pub(crate) fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.pipeline.validate()?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> Self {
        self.gateway = self.gateway.with_env_overrides();
        self
    }
}
