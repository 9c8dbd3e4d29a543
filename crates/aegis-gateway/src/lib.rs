//! Aegis Gateway - inference over HTTP
//!
//! An OpenRouter-compatible chat-completions client behind the core
//! [`InferenceService`](aegis_core::InferenceService) interface. Retryable
//! failures (transport errors, 408, 429, 5xx) are retried with exponential
//! backoff.

#![warn(unreachable_pub)]

pub mod config;
pub mod openrouter;

pub use config::GatewayConfig;
pub use openrouter::OpenRouterClient;
