//! SQLite-backed durable store.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ConversationRecord, DataModel, DurableStore, StorageError, StorageResult, STORE_VERSION};
use crate::session::Message;

pub struct SqliteDurableStore {
    conn: Mutex<Connection>,
}

impl SqliteDurableStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        info!(path = %path.display(), "durable store opened");
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn init(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                source_ids TEXT NOT NULL,
                started_at TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                payload TEXT,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (conversation_id, seq)
            );

            CREATE TABLE IF NOT EXISTS data_models (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL UNIQUE REFERENCES conversations(id),
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                sql_text TEXT NOT NULL,
                sql_json TEXT,
                source_ids TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS data_models_user ON data_models (user_id, created_at);
            ",
        )?;

        let stored: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored {
            Some(v) if v == STORE_VERSION => {}
            Some(v) if v > STORE_VERSION => {
                return Err(StorageError::UnsupportedVersion {
                    found: v,
                    supported: STORE_VERSION,
                })
            }
            _ => {
                conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
                    params![STORE_VERSION.to_string()],
                )?;
            }
        }
        Ok(())
    }
}

fn timestamp(text: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp '{}': {}", text, e)))
}

fn uuid(text: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(text).map_err(|e| StorageError::Corrupt(format!("id '{}': {}", text, e)))
}

/// Raw `data_models` row, decoded outside the rusqlite callback.
struct ModelRow {
    id: String,
    conversation_id: String,
    user_id: String,
    title: String,
    sql_text: String,
    sql_json: Option<String>,
    source_ids: String,
    created_at: String,
}

const MODEL_COLUMNS: &str =
    "id, conversation_id, user_id, title, sql_text, sql_json, source_ids, created_at";

impl ModelRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            user_id: row.get(2)?,
            title: row.get(3)?,
            sql_text: row.get(4)?,
            sql_json: row.get(5)?,
            source_ids: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> StorageResult<DataModel> {
        Ok(DataModel {
            id: uuid(&self.id)?,
            title: self.title,
            sql_text: self.sql_text,
            sql_json: self
                .sql_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            source_ids: serde_json::from_str(&self.source_ids)?,
            created_from_conversation_id: uuid(&self.conversation_id)?,
            user_id: self.user_id,
            created_at: timestamp(&self.created_at)?,
        })
    }
}

impl DurableStore for SqliteDurableStore {
    fn save_conversation(&self, record: &ConversationRecord) -> StorageResult<DataModel> {
        let model = DataModel {
            id: Uuid::new_v4(),
            title: record.title.clone(),
            sql_text: record.draft.sql_text.clone(),
            sql_json: record.draft.sql_json.clone(),
            source_ids: record.source_ids.clone(),
            created_from_conversation_id: record.id,
            user_id: record.user_id.clone(),
            created_at: record.saved_at,
        };
        let source_ids = serde_json::to_string(&record.source_ids)?;
        let sql_json = model
            .sql_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO conversations (id, user_id, title, source_ids, started_at, saved_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.id.to_string(),
                record.user_id,
                record.title,
                source_ids,
                record.started_at.to_rfc3339(),
                record.saved_at.to_rfc3339(),
            ],
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO messages (conversation_id, seq, role, text, payload, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for (seq, message) in record.messages.iter().enumerate() {
                let role = serde_json::to_value(message.role)?;
                let payload = message
                    .payload
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                insert.execute(params![
                    record.id.to_string(),
                    seq as i64,
                    role.as_str().unwrap_or_default(),
                    message.text,
                    payload,
                    message.timestamp.to_rfc3339(),
                ])?;
            }
        }

        tx.execute(
            &format!(
                "INSERT INTO data_models ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                MODEL_COLUMNS
            ),
            params![
                model.id.to_string(),
                record.id.to_string(),
                model.user_id,
                model.title,
                model.sql_text,
                sql_json,
                source_ids,
                model.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        debug!(model = %model.id, messages = record.messages.len(), "conversation saved");
        Ok(model)
    }

    fn get_data_model(&self, id: Uuid) -> StorageResult<DataModel> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM data_models WHERE id = ?", MODEL_COLUMNS),
                params![id.to_string()],
                ModelRow::read,
            )
            .optional()?;
        row.ok_or_else(|| StorageError::NotFound(format!("data model {}", id)))?
            .decode()
    }

    fn list_data_models(&self, user_id: &str) -> StorageResult<Vec<DataModel>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM data_models WHERE user_id = ? ORDER BY created_at DESC, id",
            MODEL_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], ModelRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ModelRow::decode).collect()
    }

    fn conversation_messages(&self, conversation_id: Uuid) -> StorageResult<Vec<Message>> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM conversations WHERE id = ?",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StorageError::NotFound(format!(
                "conversation {}",
                conversation_id
            )));
        }

        let mut stmt = conn.prepare(
            "SELECT role, text, payload, timestamp FROM messages
             WHERE conversation_id = ? ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![conversation_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(role, text, payload, ts)| -> StorageResult<Message> {
                Ok(Message {
                    role: serde_json::from_value(serde_json::Value::String(role))?,
                    text,
                    payload: payload.as_deref().map(serde_json::from_str).transpose()?,
                    timestamp: timestamp(&ts)?,
                })
            })
            .collect()
    }
}
