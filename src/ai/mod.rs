//! The AI engine seam.
//!
//! The engine is a non-deterministic collaborator: it gets a system prompt
//! carrying the schema plus the whole conversation, and its reply is only
//! trusted after [`parse_envelope`] has validated it into a
//! [`StructuredAiResponse`].

mod envelope;
mod openai;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use envelope::{parse_envelope, ProposedModel, ProposedSql, StructuredAiResponse};
pub use openai::OpenAiCompatibleEngine;

#[derive(Debug, Error)]
pub enum AiError {
    /// Could not reach the engine, or it answered with an error status.
    #[error("{0}")]
    Transport(String),

    /// The engine answered, but not with a usable completion.
    #[error("{0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait AiEngine: Send + Sync {
    /// Return the raw text of the engine's reply.
    async fn complete(&self, request: &ChatRequest) -> Result<String, AiError>;
}
