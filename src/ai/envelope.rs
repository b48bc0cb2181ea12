//! The structured reply envelope and its validating parser.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "analysis": "...",
//!   "models": [{"id": "m1", "description": "...", "tables": [], "columns": [], "joins": []}],
//!   "sql": [{"modelId": "m1", "text": "SELECT ..."}]
//! }
//! ```
//!
//! Models and SQL come together or not at all, and every SQL entry must
//! point at a model in the same reply.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::session::{JoinSpec, ModelDraft};
use crate::sql::SqlJson;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedModel {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedSql {
    pub model_id: String,
    pub text: String,
}

/// A validated AI reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAiResponse {
    pub analysis: String,
    #[serde(default)]
    pub models: Vec<ProposedModel>,
    #[serde(default)]
    pub sql: Vec<ProposedSql>,
}

impl StructuredAiResponse {
    /// A complete draft for one proposed model, ready for `update_draft`.
    ///
    /// `sql_json` is filled when the SQL is within the structural subset.
    pub fn draft_for(&self, model_id: &str) -> Option<ModelDraft> {
        let model = self.models.iter().find(|m| m.id == model_id)?;
        let sql = self.sql.iter().find(|s| s.model_id == model_id)?;

        Some(ModelDraft {
            selected_columns: model.columns.clone(),
            joins: model.joins.clone(),
            filters: Vec::new(),
            sql_text: sql.text.clone(),
            sql_json: SqlJson::parse(&sql.text).ok(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    analysis: Option<String>,
    models: Option<Vec<ProposedModel>>,
    sql: Option<Vec<ProposedSql>>,
}

/// The JSON object inside a reply, tolerating markdown fences and prose
/// around it.
fn extract_json(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        if let Some(end) = rest.rfind("```") {
            return Some(rest[..end].trim());
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

/// Parse and validate a raw reply. The error string says what was wrong.
pub fn parse_envelope(reply: &str) -> Result<StructuredAiResponse, String> {
    let json = extract_json(reply).ok_or_else(|| "reply contains no JSON object".to_string())?;
    let raw: RawEnvelope =
        serde_json::from_str(json).map_err(|e| format!("reply is not a valid envelope: {}", e))?;

    let analysis = raw
        .analysis
        .ok_or_else(|| "missing 'analysis' section".to_string())?;
    let models = raw.models.unwrap_or_default();
    let sql = raw.sql.unwrap_or_default();

    match (models.is_empty(), sql.is_empty()) {
        (false, true) => return Err("'models' present without a 'sql' section".into()),
        (true, false) => return Err("'sql' present without a 'models' section".into()),
        _ => {}
    }

    let mut ids = HashSet::new();
    for model in &models {
        if model.id.trim().is_empty() {
            return Err("model with an empty id".into());
        }
        if !ids.insert(model.id.as_str()) {
            return Err(format!("duplicate model id '{}'", model.id));
        }
    }

    for entry in &sql {
        if !ids.contains(entry.model_id.as_str()) {
            return Err(format!(
                "sql entry references unknown model '{}'",
                entry.model_id
            ));
        }
        if entry.text.trim().is_empty() {
            return Err(format!("empty sql for model '{}'", entry.model_id));
        }
    }

    Ok(StructuredAiResponse {
        analysis,
        models,
        sql,
    })
}
