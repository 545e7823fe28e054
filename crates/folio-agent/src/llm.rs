use crate::config::{LlmProvider, ModelConfig};
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult, GenerationRequest, TextGenerator};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible chat completions client.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the chat completions API. Each [`GenerationRequest`]
/// becomes one system message (the worker's instruction) and one user
/// message (the assembled prompt).
pub struct LlmClient {
    config: ModelConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: ModelConfig) -> FolioResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FolioError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn build_messages(&self, request: &GenerationRequest) -> Vec<serde_json::Value> {
        let mut api_messages = Vec::with_capacity(2);
        if !request.instruction.trim().is_empty() {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": request.instruction,
            }));
        }
        api_messages.push(serde_json::json!({
            "role": "user",
            "content": request.prompt,
        }));
        api_messages
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        // OpenRouter requires extra headers
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request.header("X-Title", "Folio")
        } else {
            request
        }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> FolioResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": self.build_messages(request),
        });

        debug!(worker = %request.worker, model = %self.config.model_id, "Chat completion request");
        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| FolioError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FolioError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(FolioError::Capability(format!(
                "LLM API error {status}: {resp_body}"
            )));
        }

        parse_completion(&resp_body)
    }
}

/// Extracts the first choice's message text.
pub fn parse_completion(body: &serde_json::Value) -> FolioResult<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| FolioError::Capability(format!("LLM response had no content: {body}")))
}
