//! Session state: messages, the model draft and the session itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::key::SessionKey;
use crate::ai::StructuredAiResponse;
use crate::schema::{SchemaSnapshot, SchemaWarning};
use crate::sql::{JoinType, SqlError, SqlJson};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Parsed envelope; only on `ai` turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StructuredAiResponse>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            payload: None,
            timestamp,
        }
    }

    pub fn ai(text: impl Into<String>, payload: StructuredAiResponse, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: Role::Ai,
            text: text.into(),
            payload: Some(payload),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPair {
    pub left: String,
    pub right: String,
}

/// A join as the user sees it in the draft editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    pub left_table: String,
    pub right_table: String,
    #[serde(default)]
    pub join_type: JoinType,
    pub on_columns: Vec<ColumnPair>,
}

/// The candidate model a user iterates on. Replaced whole on every update.
///
/// `sql_text` is what gets executed; `sql_json` mirrors it for editing and
/// is absent when the text is outside the structural subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDraft {
    #[serde(default)]
    pub selected_columns: Vec<String>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub sql_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_json: Option<SqlJson>,
}

impl ModelDraft {
    pub fn is_empty(&self) -> bool {
        self.sql_text.trim().is_empty()
    }

    /// Bring text and structure back in line.
    ///
    /// Missing text is rendered from the structure; missing structure is
    /// parsed from the text when the text is in the structural subset. When
    /// both are present the structure must describe the same query. Text
    /// outside the subset cannot be mirrored, so any supplied structure is
    /// dropped.
    pub fn normalized(mut self) -> Result<Self, SqlError> {
        match (&self.sql_json, self.sql_text.trim().is_empty()) {
            (Some(json), true) => {
                self.sql_text = json.to_sql();
            }
            (None, false) => {
                self.sql_json = SqlJson::parse(&self.sql_text).ok();
            }
            (Some(json), false) => match SqlJson::parse(&self.sql_text) {
                Ok(parsed) if parsed.logically_equivalent(json) => {}
                Ok(_) => {
                    return Err(SqlError::Unsupported(
                        "sqlJson does not describe the same query as sqlText".into(),
                    ))
                }
                Err(_) => self.sql_json = None,
            },
            (None, true) => {}
        }
        Ok(self)
    }
}

/// Ephemeral conversational state for one key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub key: SessionKey,
    /// Changes whenever a new session replaces an old one under the same key.
    pub id: Uuid,
    pub schema: SchemaSnapshot,
    pub messages: Vec<Message>,
    pub draft: ModelDraft,
    pub cross_source: bool,
    pub warnings: Vec<SchemaWarning>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Source ids actually present in the schema snapshot.
    pub fn source_ids(&self) -> Vec<String> {
        self.schema.source_ids()
    }
}
