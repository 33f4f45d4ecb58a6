//! OpenAI-compatible HTTP reasoning engine
//!
//! Talks to any chat-completions endpoint (local or hosted). Connection
//! problems, timeouts, 429 and 5xx map to transient errors so the loop
//! retries with backoff; everything else is fatal.

use async_trait::async_trait;
use serde::Deserialize;

use anvil_core::engine::{EngineError, EngineReply, ReasoningEngine, TaskContext, TokenUsage};

/// Reasoning engine over an HTTP chat-completions API.
pub struct HttpEngine {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEngine {
    /// Engine against `url` using `model`.
    #[must_use]
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl ReasoningEngine for HttpEngine {
    async fn propose(&self, ctx: &TaskContext) -> Result<EngineReply, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": ctx.messages,
            "temperature": 0.2,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            // reqwest network-level failures are all retryable.
            EngineError::Transient(format!("request failed: {e}"))
        })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(EngineError::Transient(format!("endpoint returned {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Fatal(format!(
                "endpoint returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Fatal(format!("malformed response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Fatal("response carried no choices".to_string()))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt: u.prompt_tokens,
                completion: u.completion_tokens,
            })
            .unwrap_or_default();

        tracing::debug!(
            chars = content.len(),
            prompt_tokens = usage.prompt,
            completion_tokens = usage.completion,
            "engine reply received"
        );
        Ok(EngineReply { content, usage })
    }
}
