//! External pass/fail gates.
//!
//! Authentication, permissions and plan limits live outside this crate.
//! The engine asks them before initializing a session, sending a message,
//! executing a query and saving a model, and reports a refusal as
//! [`EngineError::AccessDenied`] or [`EngineError::LimitExceeded`].

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Sessions,
    Messages,
    Queries,
    Models,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitKind::Sessions => "sessions",
            LimitKind::Messages => "messages",
            LimitKind::Queries => "queries",
            LimitKind::Models => "models",
        })
    }
}

#[async_trait]
pub trait AccessGate: Send + Sync {
    /// May `user_id` read from every one of `source_ids`?
    async fn authorize(&self, user_id: &str, source_ids: &[String]) -> EngineResult<()>;

    /// Count one use of `kind` against the user's allowance.
    async fn enforce_limit(&self, user_id: &str, kind: LimitKind) -> EngineResult<()>;
}

/// Passes everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AccessGate for AllowAll {
    async fn authorize(&self, _user_id: &str, _source_ids: &[String]) -> EngineResult<()> {
        Ok(())
    }

    async fn enforce_limit(&self, _user_id: &str, _kind: LimitKind) -> EngineResult<()> {
        Ok(())
    }
}
