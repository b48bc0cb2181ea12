//! # modelforge
//!
//! AI-assisted data modelling sessions over one or more live database
//! schemas.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────────┐
//! │ DataSource(s)│──▶│ SchemaCollector  │──▶│ SchemaSnapshot       │
//! │ sqlite/worker│   │ + relationships  │   │ (markdown, labels)   │
//! └──────────────┘   └──────────────────┘   └──────────┬───────────┘
//!                                                      ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────────┐
//! │  AiEngine    │◀─▶│ Conversation     │◀─▶│ SessionStore         │
//! │ (HTTP)       │   │ Gateway          │   │ (TTL, single-flight) │
//! └──────────────┘   └──────────────────┘   └──────────┬───────────┘
//!                                                      ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────────┐
//! │ QueryExecutor            │──▶│ PersistenceTransfer              │
//! │ (+ federation composer)  │   │ validate, durable write, discard │
//! └──────────────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! [`engine::ModelingEngine`] exposes the operations; [`web`] serves them
//! over HTTP.

pub mod ai;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod federation;
pub mod gate;
pub mod gateway;
pub mod logging;
pub mod schema;
pub mod session;
pub mod source;
pub mod sql;
pub mod storage;
pub mod transfer;
pub mod web;
pub mod worker;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::ai::{AiEngine, AiError, ChatRequest, StructuredAiResponse};
    pub use crate::config::Settings;
    pub use crate::engine::{ModelingEngine, QueryRequest, SessionGreeting};
    pub use crate::error::{EngineError, EngineResult, ErrorCategory};
    pub use crate::executor::{QueryResult, SourceBinding};
    pub use crate::gate::{AccessGate, AllowAll, LimitKind};
    pub use crate::session::{ManualClock, ModelDraft, Session, SessionKey};
    pub use crate::source::{DataSource, SourceRegistry, SqliteSource};
    pub use crate::sql::SqlJson;
    pub use crate::storage::{DataModel, DurableStore, SqliteDurableStore};
}

pub use engine::ModelingEngine;
pub use error::{EngineError, EngineResult};
