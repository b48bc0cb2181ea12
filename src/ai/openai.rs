//! OpenAI-compatible chat completions over HTTP.
//!
//! Works with any server exposing `POST {base_url}/chat/completions`
//! (Ollama, vLLM, LocalAI, hosted OpenAI-compatible APIs).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{AiEngine, AiError, ChatMessage, ChatRequest};
use crate::config::{AiSettings, SettingsError};

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatibleEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleEngine {
    /// Build from `[ai]` settings. The request timeout is enforced by the
    /// caller; the HTTP client only bounds connection setup.
    pub fn from_settings(settings: &AiSettings) -> Result<Self, SettingsError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SettingsError::InvalidConfig(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.resolved_api_key()?,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl AiEngine for OpenAiCompatibleEngine {
    #[instrument(skip(self, request), fields(model = %self.model, messages = request.messages.len()))]
    async fn complete(&self, request: &ChatRequest) -> Result<String, AiError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature.or(Some(self.temperature)),
            max_tokens: request.max_tokens.or(self.max_tokens),
            stream: false,
        };

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| {
            if e.is_connect() {
                AiError::Transport(format!("cannot connect to {}", self.base_url))
            } else {
                AiError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AiError::Transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            warn!(%status, "AI engine returned an error status");
            return Err(AiError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| AiError::InvalidResponse(format!("unreadable completion: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::InvalidResponse("completion has no content".into()))?;

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
