//! Failure taxonomy for modelling sessions.
//!
//! Every named condition the engine can report is a variant of
//! [`EngineError`]. Nothing is swallowed: subsystem errors are converted at
//! the seam where they enter the engine and returned to the immediate caller.

use serde::Serialize;
use thiserror::Error;

use crate::config::SettingsError;
use crate::gate::LimitKind;
use crate::storage::StorageError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse grouping of failures, used for HTTP status mapping and retry hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Retry later or drop the unreachable source.
    SourceReachability,
    /// Re-initialise the session.
    SessionLifecycle,
    /// Reported verbatim; never retried inside the engine.
    AiProtocol,
    /// The query is wrong or too expensive; blocks persistence.
    QuerySemantic,
    /// Rejected by an external gate or by request validation.
    Access,
    /// Configuration or durable storage failure.
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source '{source_id}' is unreachable: {reason}")]
    SourceUnreachable { source_id: String, reason: String },

    #[error("no schema available: every requested source was unreachable ({})", dropped.join(", "))]
    NoSchemaAvailable { dropped: Vec<String> },

    #[error("no active session for {key}")]
    NoActiveSession { key: String },

    #[error("AI engine unavailable: {0}")]
    AiEngineUnavailable(String),

    #[error("AI engine did not answer within {seconds}s")]
    AiEngineTimeout { seconds: u64 },

    #[error("malformed AI response: {0}")]
    MalformedAiResponse(String),

    /// Engine message, verbatim.
    #[error("{0}")]
    QueryExecution(String),

    #[error("query exceeded the {seconds}s execution timeout")]
    QueryTimeout { seconds: u64 },

    #[error("unsupported federation: {0}")]
    UnsupportedFederation(String),

    #[error("circular join: {}", cycle.join(" -> "))]
    CircularJoin { cycle: Vec<String> },

    #[error("incompatible join types: {left} ({left_type}) vs {right} ({right_type})")]
    IncompatibleJoinTypes {
        left: String,
        left_type: String,
        right: String,
        right_type: String,
    },

    #[error("a title is required to save a model")]
    MissingTitle,

    #[error("the session has no SQL to save")]
    EmptyDraft,

    #[error("only single read-only SELECT statements may be executed: {0}")]
    ReadOnlyViolation(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(LimitKind),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] SettingsError),
}

impl EngineError {
    pub fn no_active_session(key: impl ToString) -> Self {
        Self::NoActiveSession {
            key: key.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SourceUnreachable { .. } | Self::NoSchemaAvailable { .. } => {
                ErrorCategory::SourceReachability
            }
            Self::NoActiveSession { .. } | Self::MissingTitle | Self::EmptyDraft => {
                ErrorCategory::SessionLifecycle
            }
            Self::AiEngineUnavailable(_)
            | Self::AiEngineTimeout { .. }
            | Self::MalformedAiResponse(_) => ErrorCategory::AiProtocol,
            Self::QueryExecution(_)
            | Self::QueryTimeout { .. }
            | Self::UnsupportedFederation(_)
            | Self::CircularJoin { .. }
            | Self::IncompatibleJoinTypes { .. }
            | Self::ReadOnlyViolation(_) => ErrorCategory::QuerySemantic,
            Self::UnknownSource(_)
            | Self::AccessDenied(_)
            | Self::LimitExceeded(_)
            | Self::InvalidRequest(_) => ErrorCategory::Access,
            Self::Storage(_) | Self::Config(_) => ErrorCategory::Internal,
        }
    }

    /// Query-semantic failures must never produce a saved artifact.
    pub fn blocks_persistence(&self) -> bool {
        self.category() == ErrorCategory::QuerySemantic
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceUnreachable { .. } => "source_unreachable",
            Self::NoSchemaAvailable { .. } => "no_schema_available",
            Self::NoActiveSession { .. } => "no_active_session",
            Self::AiEngineUnavailable(_) => "ai_engine_unavailable",
            Self::AiEngineTimeout { .. } => "ai_engine_timeout",
            Self::MalformedAiResponse(_) => "malformed_ai_response",
            Self::QueryExecution(_) => "query_execution",
            Self::QueryTimeout { .. } => "query_timeout",
            Self::UnsupportedFederation(_) => "unsupported_federation",
            Self::CircularJoin { .. } => "circular_join",
            Self::IncompatibleJoinTypes { .. } => "incompatible_join_types",
            Self::MissingTitle => "missing_title",
            Self::EmptyDraft => "empty_draft",
            Self::ReadOnlyViolation(_) => "read_only_violation",
            Self::UnknownSource(_) => "unknown_source",
            Self::AccessDenied(_) => "access_denied",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}
