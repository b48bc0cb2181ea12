//! Canonical session keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// `(source set, user)`. At most one live session exists per key.
///
/// The source set is canonical: ids are sorted, deduplicated and joined with
/// `+`, so `[crm, sales]` and `[sales, crm, sales]` name the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub source_set: String,
    pub user_id: String,
}

pub const SOURCE_SEPARATOR: char = '+';

impl SessionKey {
    pub fn new<S: AsRef<str>>(source_ids: &[S], user_id: impl Into<String>) -> EngineResult<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("user id is required".into()));
        }

        let mut ids: Vec<&str> = source_ids
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .collect();
        if ids.is_empty() {
            return Err(EngineError::InvalidRequest(
                "at least one source id is required".into(),
            ));
        }
        if let Some(bad) = ids.iter().find(|id| id.contains(SOURCE_SEPARATOR)) {
            return Err(EngineError::InvalidRequest(format!(
                "source id '{}' may not contain '{}'",
                bad, SOURCE_SEPARATOR
            )));
        }
        ids.sort_unstable();
        ids.dedup();

        Ok(Self {
            source_set: ids.join("+"),
            user_id,
        })
    }

    /// Rebuild a key from its canonical source-set string.
    pub fn parse(source_set: &str, user_id: impl Into<String>) -> EngineResult<Self> {
        let ids: Vec<&str> = source_set.split(SOURCE_SEPARATOR).collect();
        Self::new(&ids, user_id)
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.source_set
            .split(SOURCE_SEPARATOR)
            .map(str::to_string)
            .collect()
    }

    pub fn is_cross_source(&self) -> bool {
        self.source_set.contains(SOURCE_SEPARATOR)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.source_set)
    }
}
