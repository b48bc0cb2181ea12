//! The conversation gateway: one user turn in, one validated AI turn out.
//!
//! Turns on a key are single-flight. The user message is recorded before the
//! engine is called, so a failed or malformed reply never loses what the
//! user typed. The AI turn is only appended to the session instance the turn
//! started on; if that session was cancelled meanwhile the reply is dropped.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::ai::{parse_envelope, prompt, AiEngine, AiError, StructuredAiResponse};
use crate::config::AiSettings;
use crate::error::{EngineError, EngineResult};
use crate::session::{Message, SessionKey, SessionStore};

pub struct ConversationGateway {
    store: Arc<SessionStore>,
    engine: Arc<dyn AiEngine>,
    settings: AiSettings,
}

impl ConversationGateway {
    pub fn new(store: Arc<SessionStore>, engine: Arc<dyn AiEngine>, settings: AiSettings) -> Self {
        Self {
            store,
            engine,
            settings,
        }
    }

    #[instrument(skip(self, key, text), fields(key = %key))]
    pub async fn send_message(
        &self,
        key: &SessionKey,
        text: &str,
    ) -> EngineResult<StructuredAiResponse> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("message text is empty".into()));
        }

        let (session_id, turn) = self.store.turn_handle(key)?;
        let _turn = turn.lock().await;

        let now = self.store.clock().now();
        self.store
            .append_message(key, Some(session_id), Message::user(text, now))?;

        // Re-read under the turn lock so the request sees the full history.
        let session = self.store.get(key)?;
        if session.id != session_id {
            return Err(EngineError::no_active_session(key));
        }
        let request = prompt::build_request(&session, &self.settings);
        debug!(messages = request.messages.len(), "calling AI engine");

        let timeout = self.settings.timeout();
        let reply = match tokio::time::timeout(timeout, self.engine.complete(&request)).await {
            Err(_) => {
                warn!(seconds = timeout.as_secs(), "AI engine timed out");
                return Err(EngineError::AiEngineTimeout {
                    seconds: timeout.as_secs(),
                });
            }
            Ok(Err(AiError::Transport(reason))) | Ok(Err(AiError::InvalidResponse(reason))) => {
                warn!(%reason, "AI engine unavailable");
                return Err(EngineError::AiEngineUnavailable(reason));
            }
            Ok(Ok(reply)) => reply,
        };

        let response = parse_envelope(&reply).map_err(|reason| {
            warn!(%reason, "malformed AI reply");
            EngineError::MalformedAiResponse(reason)
        })?;

        let now = self.store.clock().now();
        let message = Message::ai(response.analysis.clone(), response.clone(), now);
        self.store
            .append_message(key, Some(session_id), message)
            .inspect_err(|_| info!("session ended during AI call, reply discarded"))?;

        Ok(response)
    }
}
