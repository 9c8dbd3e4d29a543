//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default chat-completions endpoint root
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Connection settings for an OpenRouter-compatible endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Endpoint root, without the `/chat/completions` suffix
    pub base_url: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Bearer token
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-request HTTP timeout in seconds
    pub timeout_secs: u64,
    /// Retries after the first attempt for retryable failures
    pub max_retries: u32,
    /// Backoff before the first retry, doubled on each further retry
    pub retry_base_ms: u64,
    /// Optional `HTTP-Referer` header
    pub referer: Option<String>,
    /// Optional `X-Title` header
    pub title: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 120,
            max_retries: 2,
            retry_base_ms: 500,
            referer: None,
            title: Some("Aegis".to_string()),
        }
    }
}

impl GatewayConfig {
    /// Defaults pointed at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// With API key
    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// With model
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, base: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Apply `OPENROUTER_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("OPENROUTER_API_KEY").filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENROUTER_MODEL").filter(|m| !m.is_empty()) {
            self.model = model;
        }
        if let Some(url) = lookup("OPENROUTER_BASE_URL").filter(|u| !u.is_empty()) {
            self.base_url = url;
        }
        if let Some(secs) = lookup("OPENROUTER_TIMEOUT_SECONDS").and_then(|s| s.parse().ok()) {
            self.timeout_secs = secs;
        }
        self
    }

    /// HTTP timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry number `attempt` (0-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.retry_base_ms.saturating_mul(factor))
    }
}
