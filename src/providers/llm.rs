// =============================================================================
// LLM reference client — OpenAI-compatible chat completions
// =============================================================================
//
// Speaks the `/v1/chat/completions` shape that OpenAI, xAI, and most
// gateways expose. Strict-JSON mode is requested through `response_format`;
// callers still validate the payload — a malformed body is a parse error,
// never a default decision.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::{AgentError, AgentResult};
use crate::providers::{ChatMessage, Completion, CompletionRequest, LlmProvider};

/// OpenAI-compatible chat-completions client.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Client against the given provider selector from config.
    pub fn from_provider(provider: &str, api_key: impl Into<String>) -> Self {
        let base_url = match provider {
            "xai" => "https://api.x.ai/v1",
            _ => "https://api.openai.com/v1",
        };
        Self::new(base_url, api_key)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatClient {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<Completion> {
        let response_format = request
            .json_mode
            .then(|| serde_json::json!({ "type": "json_object" }));

        let wire = WireRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| AgentError::ProviderTransient {
                provider: "llm".to_string(),
                message: format!("chat completion request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::from_http(
                "llm",
                Some(status.as_u16()),
                format!("chat completion returned {status}: {body}"),
            ));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AgentError::Parse(format!("completion response not JSON: {e}")))?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Parse("completion missing choices[0].message.content".to_string()))?
            .to_string();

        let prompt_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = body["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        debug!(
            model = %request.model,
            prompt_tokens,
            completion_tokens,
            "completion received"
        );

        Ok(Completion {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }
}

impl std::fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_selector_maps_base_urls() {
        let openai = OpenAiCompatClient::from_provider("openai", "k");
        assert!(openai.base_url.contains("openai.com"));
        let xai = OpenAiCompatClient::from_provider("xai", "k");
        assert!(xai.base_url.contains("x.ai"));
        let unknown = OpenAiCompatClient::from_provider("somegateway", "k");
        assert!(unknown.base_url.contains("openai.com"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = OpenAiCompatClient::new("https://llm.internal", "sk-verysecret");
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("sk-verysecret"));
    }
}
