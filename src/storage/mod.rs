//! Durable storage for saved conversations and data models.
//!
//! A saved session becomes one conversation record, its ordered messages,
//! and exactly one data model. The three are written together or not at
//! all.

mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{Message, ModelDraft};
use crate::sql::SqlJson;

pub use sqlite::SqliteDurableStore;

/// Current store schema version.
pub const STORE_VERSION: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The store itself is unavailable (fakes, closed handles).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Everything a save writes.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    /// The session id; reused as the conversation id.
    pub id: Uuid,
    pub user_id: String,
    pub source_ids: Vec<String>,
    pub title: String,
    pub messages: Vec<Message>,
    pub draft: ModelDraft,
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

/// The saved artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataModel {
    pub id: Uuid,
    pub title: String,
    pub sql_text: String,
    pub sql_json: Option<SqlJson>,
    pub source_ids: Vec<String>,
    pub created_from_conversation_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation + message + data model persistence.
///
/// Calls block; async callers run them on the blocking pool.
pub trait DurableStore: Send + Sync {
    /// Write the conversation, its messages and its data model in one
    /// transaction.
    fn save_conversation(&self, record: &ConversationRecord) -> StorageResult<DataModel>;

    fn get_data_model(&self, id: Uuid) -> StorageResult<DataModel>;

    /// Models saved by a user, newest first.
    fn list_data_models(&self, user_id: &str) -> StorageResult<Vec<DataModel>>;

    /// Messages of a saved conversation, in their original order.
    fn conversation_messages(&self, conversation_id: Uuid) -> StorageResult<Vec<Message>>;
}
