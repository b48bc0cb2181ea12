//! Prompt construction for modelling turns.

use super::{ChatMessage, ChatRequest};
use crate::config::AiSettings;
use crate::session::{Message, Role, Session};

const INSTRUCTIONS: &str = "\
You are a data modelling assistant. You help the user design a read-only SQL \
query over the databases described below.

Always answer with a single JSON object and nothing else:

{
  \"analysis\": \"<your reasoning and any question for the user>\",
  \"models\": [{\"id\": \"m1\", \"description\": \"...\", \"tables\": [\"...\"], \"columns\": [\"table.column\"],
              \"joins\": [{\"leftTable\": \"...\", \"rightTable\": \"...\", \"joinType\": \"inner\",
                          \"onColumns\": [{\"left\": \"...\", \"right\": \"...\"}]}]}],
  \"sql\": [{\"modelId\": \"m1\", \"text\": \"SELECT ...\"}]
}

Rules:
- \"analysis\" is required. Leave \"models\" and \"sql\" empty when you need more information.
- Every \"sql\" entry references a model id from the same answer, and every model has SQL.
- Only SELECT statements. Never modify data.
- Use only tables and columns listed in the schema, spelled exactly as shown.";

/// System prompt: instructions followed by the session's schema markdown.
pub fn system_prompt(schema_markdown: &str) -> String {
    format!("{}\n\n{}", INSTRUCTIONS, schema_markdown)
}

/// How a stored turn is replayed to the engine. AI turns are sent back as
/// their validated envelope so the engine sees its own structured output.
fn replay(message: &Message) -> ChatMessage {
    match message.role {
        Role::User => ChatMessage::user(&message.text),
        Role::Ai => {
            let content = message
                .payload
                .as_ref()
                .and_then(|p| serde_json::to_string(p).ok())
                .unwrap_or_else(|| message.text.clone());
            ChatMessage::assistant(content)
        }
    }
}

/// The request for the next turn: schema, the full history (which already
/// ends with the new user message), and the sampling settings.
pub fn build_request(session: &Session, settings: &AiSettings) -> ChatRequest {
    let mut messages = Vec::with_capacity(session.messages.len() + 1);
    messages.push(ChatMessage::system(system_prompt(&session.schema.markdown)));
    messages.extend(session.messages.iter().map(replay));

    ChatRequest {
        messages,
        temperature: Some(settings.temperature),
        max_tokens: settings.max_tokens,
    }
}
