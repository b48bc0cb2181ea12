//! Saving a session: the single forward move from the ephemeral store into
//! durable storage.
//!
//! The draft is validated by execution first. The durable write happens
//! next, and the ephemeral session is removed only after it commits. A
//! failed write leaves the session active and readable.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::executor::{QueryExecutor, SourceBinding};
use crate::session::{SessionKey, SessionStore};
use crate::storage::{ConversationRecord, DataModel, DurableStore, StorageError};

pub struct PersistenceTransfer {
    store: Arc<SessionStore>,
    durable: Arc<dyn DurableStore>,
    executor: Arc<QueryExecutor>,
}

impl PersistenceTransfer {
    pub fn new(
        store: Arc<SessionStore>,
        durable: Arc<dyn DurableStore>,
        executor: Arc<QueryExecutor>,
    ) -> Self {
        Self {
            store,
            durable,
            executor,
        }
    }

    #[instrument(skip(self, key, title), fields(key = %key))]
    pub async fn transfer(&self, key: &SessionKey, title: &str) -> EngineResult<DataModel> {
        // No turn may land between the history we write and the removal.
        let (session_id, turn) = self.store.turn_handle(key)?;
        let _turn = turn.lock().await;

        let session = self.store.get(key)?;
        if session.id != session_id {
            return Err(EngineError::no_active_session(key));
        }

        let title = title.trim();
        if title.is_empty() {
            return Err(EngineError::MissingTitle);
        }

        let draft = session.draft.clone();
        if draft.sql_text.trim().is_empty() {
            return Err(EngineError::EmptyDraft);
        }

        let binding = SourceBinding::sources(&session.source_ids()).with_schema(session.schema.clone());
        self.executor
            .execute(&draft.sql_text, &binding, Some(1))
            .await
            .inspect_err(|e| info!(error = %e, "draft failed validation, not saved"))?;

        // Cancelled while validating.
        let session = self.store.get(key)?;
        if session.id != session_id {
            return Err(EngineError::no_active_session(key));
        }

        let record = ConversationRecord {
            id: session.id,
            user_id: session.key.user_id.clone(),
            source_ids: session.source_ids(),
            title: title.to_string(),
            messages: session.messages,
            draft,
            started_at: session.created_at,
            saved_at: self.store.clock().now(),
        };

        let durable = Arc::clone(&self.durable);
        let saved = tokio::task::spawn_blocking(move || durable.save_conversation(&record))
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
            .and_then(|result| result);

        let model = match saved {
            Ok(model) => model,
            Err(e) => {
                warn!(error = %e, "durable write failed, session kept active");
                return Err(EngineError::Storage(e));
            }
        };

        self.store.remove_if_id(key, session_id);
        info!(model = %model.id, "session saved");
        Ok(model)
    }
}
