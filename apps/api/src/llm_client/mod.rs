//! LLM Client: the single point of entry for all generation-service calls.
//!
//! ARCHITECTURAL RULE: No other module may call the completion API directly.
//! Callers depend on the `GenerationService` trait and go through `generate_within`,
//! which bounds every call with a timeout.
//!
//! Model: gpt-4o-mini hardcoded, not configurable
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

/// The model used for all generation calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 2048;
const MAX_RETRIES: u32 = 3;
const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Structured output of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: Value,
    pub tokens_used: u64,
}

/// The outbound generation collaborator: prompt in, JSON matching `schema` out.
///
/// Carried in `AppState` as `Arc<dyn GenerationService>`.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<Generation, LlmError>;
}

/// Runs one generation call with an upper bound on the wait. Expiry is reported as
/// `LlmError::Timeout` so callers treat it like any other upstream failure.
pub async fn generate_within(
    service: &dyn GenerationService,
    prompt: &str,
    schema: &Value,
    limit: Duration,
) -> Result<Generation, LlmError> {
    match tokio::time::timeout(limit, service.generate(prompt, schema)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(limit)),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub total_tokens: u64,
}

impl ChatResponse {
    /// Extracts the text content of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// OpenAI-compatible chat completions client with retry logic and JSON output.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Makes a raw call to the completion API, returning the full response object.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<ChatResponse, LlmError> {
        let request_body = ChatRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };
        let url = format!("{}/chat/completions", self.base_url);

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let chat_response: ChatResponse = response.json().await?;

            debug!(
                "LLM call succeeded: total_tokens={}",
                chat_response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0)
            );

            return Ok(chat_response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl GenerationService for LlmClient {
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<Generation, LlmError> {
        let system = prompts::schema_system_prompt(schema)?;
        let response = self.call(prompt, &system).await?;

        let tokens_used = response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
        let text = response.text().ok_or(LlmError::EmptyContent)?;
        let content = serde_json::from_str(strip_json_fences(text))?;

        Ok(Generation {
            content,
            tokens_used,
        })
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub(crate) fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NeverAnswers;

    #[async_trait]
    impl GenerationService for NeverAnswers {
        async fn generate(&self, _prompt: &str, _schema: &Value) -> Result<Generation, LlmError> {
            std::future::pending().await
        }
    }

    struct Answers(Value);

    #[async_trait]
    impl GenerationService for Answers {
        async fn generate(&self, _prompt: &str, _schema: &Value) -> Result<Generation, LlmError> {
            Ok(Generation {
                content: self.0.clone(),
                tokens_used: 7,
            })
        }
    }

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_chat_response_text_skips_blank_content() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "   "}}],
            "usage": {"total_tokens": 12}
        }))
        .unwrap();
        assert!(response.text().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_within_times_out() {
        let result = generate_within(
            &NeverAnswers,
            "prompt",
            &json!({}),
            Duration::from_secs(8),
        )
        .await;
        assert!(matches!(result, Err(LlmError::Timeout(d)) if d == Duration::from_secs(8)));
    }

    #[tokio::test]
    async fn test_generate_within_passes_through_answers() {
        let service = Answers(json!({"score": 70}));
        let generation = generate_within(&service, "prompt", &json!({}), Duration::from_secs(8))
            .await
            .unwrap();
        assert_eq!(generation.content["score"], 70);
        assert_eq!(generation.tokens_used, 7);
    }
}
