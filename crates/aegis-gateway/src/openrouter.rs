//! OpenRouter chat-completions client

use crate::config::GatewayConfig;
use aegis_core::error::InferenceError;
use aegis_core::inference::{InferenceReply, InferenceRequest, InferenceService};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Largest accepted response body (1MB)
pub const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Chat-completions client implementing [`InferenceService`]
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl OpenRouterClient {
    /// Build a client; fails when the API key is missing or malformed
    pub fn new(config: GatewayConfig) -> Result<Self, InferenceError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| InferenceError::Config("API key not set (OPENROUTER_API_KEY)".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| InferenceError::Config("invalid API key format".into()))?;
        headers.insert(AUTHORIZATION, auth);

        if let Some(referer) = config.referer.as_deref() {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert("HTTP-Referer", value);
            }
        }
        if let Some(title) = config.title.as_deref() {
            if let Ok(value) = HeaderValue::from_str(title) {
                headers.insert("X-Title", value);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| InferenceError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_once(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
        let messages = [
            ApiMessage {
                role: "system",
                content: &request.system_prompt,
            },
            ApiMessage {
                role: "user",
                content: &request.user_prompt,
            },
        ];
        let body = ChatApiRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut response = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_transport)? {
            let len = bytes.len() + chunk.len();
            if len > MAX_RESPONSE_LEN {
                return Err(InferenceError::InvalidResponse(format!(
                    "response too large: over {MAX_RESPONSE_LEN} bytes after {len}"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&bytes);

        if !status.is_success() {
            let message = serde_json::from_str::<ChatApiResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(map_status(status, message));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&text)
            .map_err(|e| InferenceError::InvalidResponse(format!("invalid JSON: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(InferenceError::Provider {
                status: status.as_u16(),
                message: error.message.unwrap_or_default(),
                retryable: false,
            });
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| InferenceError::InvalidResponse("no choices in response".into()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(InferenceError::Refused("response blocked by content filter".into()));
        }

        let content = choice.message.and_then(|m| m.content).unwrap_or_default();
        let tokens_used = parsed.usage.map_or(0, |u| {
            u.total_tokens
                .unwrap_or_else(|| u.prompt_tokens.unwrap_or(0) + u.completion_tokens.unwrap_or(0))
        });

        Ok(InferenceReply::new(content, tokens_used))
    }
}

#[async_trait]
impl InferenceService for OpenRouterClient {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceReply, InferenceError> {
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(reply) => {
                    tracing::debug!(
                        model = %self.config.model,
                        attempt,
                        tokens = reply.tokens_used,
                        "inference succeeded"
                    );
                    return Ok(reply);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        model = %self.config.model,
                        attempt,
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying inference"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(model = %self.config.model, attempt, code = err.code(), error = %err, "inference failed");
                    return Err(err);
                }
            }
        }
    }
}

fn map_transport(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Transport(format!("request timed out: {err}"))
    } else {
        InferenceError::Transport(err.to_string())
    }
}

fn map_status(status: StatusCode, message: String) -> InferenceError {
    let code = status.as_u16();
    InferenceError::Provider {
        status: code,
        message,
        retryable: code == 429 || code == 408 || status.is_server_error(),
    }
}

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}
