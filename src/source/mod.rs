//! Data sources: the live databases a session reads from.
//!
//! A [`DataSource`] can describe its tables and run read-only queries.
//! SQLite sources run in-process on rusqlite; every other driver goes
//! through the database worker.

mod registry;
mod sqlite;
mod worker;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::Driver;
use crate::schema::TableSchema;
use crate::worker::WorkerError;

pub use registry::SourceRegistry;
pub use sqlite::SqliteSource;
pub use worker::WorkerSource;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not connect, or the worker is gone.
    #[error("{0}")]
    Unreachable(String),

    /// The database rejected the statement. Message is the engine's, verbatim.
    #[error("{0}")]
    Query(String),
}

impl From<WorkerError> for SourceError {
    fn from(err: WorkerError) -> Self {
        if err.is_unreachable() {
            SourceError::Unreachable(err.to_string())
        } else {
            SourceError::Query(err.to_string())
        }
    }
}

/// Rows returned by a source, JSON-typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable id used in configuration, session keys and bindings.
    fn id(&self) -> &str;

    /// Namespace label used when this source is merged with others.
    fn label(&self) -> &str;

    fn driver(&self) -> Driver;

    /// Describe every table and view, with columns, keys and row estimates.
    async fn introspect(&self) -> Result<Vec<TableSchema>, SourceError>;

    /// Run a read-only query, returning at most `max_rows` rows.
    ///
    /// Dropping the returned future abandons the query.
    async fn fetch(&self, sql: &str, max_rows: usize) -> Result<RowSet, SourceError>;
}
