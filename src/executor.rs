//! Query validation by execution.
//!
//! A query is proven correct by running it. Every statement passes the
//! read-only guard first and never reaches a source otherwise. One source
//! runs the text as written; several sources go through the federation
//! composer. The whole run is bounded by the query timeout, and results
//! are cut to the row cap with the cut always reported.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::QuerySettings;
use crate::error::{EngineError, EngineResult};
use crate::federation::{compose, execute_plan};
use crate::schema::{SchemaCollector, SchemaSnapshot};
use crate::source::{RowSet, SourceError, SourceRegistry};
use crate::sql::{ensure_read_only, SqlError, SqlJson};

/// The sources a query runs against.
#[derive(Debug, Clone, Default)]
pub struct SourceBinding {
    pub source_ids: Vec<String>,
    /// Merged schema of the session the query came from. Collected on
    /// demand for cross-source queries when absent.
    pub schema: Option<SchemaSnapshot>,
}

impl SourceBinding {
    pub fn sources<S: AsRef<str>>(ids: &[S]) -> Self {
        Self {
            source_ids: ids.iter().map(|s| s.as_ref().to_string()).collect(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: SchemaSnapshot) -> Self {
        self.schema = Some(schema);
        self
    }

    fn distinct_ids(&self) -> Vec<String> {
        self.source_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Set exactly when rows were dropped to honour the cap.
    pub row_cap_applied: bool,
    /// The cap actually enforced, after clamping to `max_row_cap`.
    pub row_cap: usize,
}

impl QueryResult {
    fn capped(mut rows: RowSet, cap: usize) -> Self {
        let row_cap_applied = rows.rows.len() > cap;
        if row_cap_applied {
            rows.rows.truncate(cap);
        }
        Self {
            columns: rows.columns,
            rows: rows.rows,
            row_cap_applied,
            row_cap: cap,
        }
    }
}

pub struct QueryExecutor {
    registry: Arc<SourceRegistry>,
    settings: QuerySettings,
}

impl QueryExecutor {
    pub fn new(registry: Arc<SourceRegistry>, settings: QuerySettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    #[instrument(skip(self, sql, binding), fields(sources = ?binding.source_ids))]
    pub async fn execute(
        &self,
        sql: &str,
        binding: &SourceBinding,
        row_cap: Option<usize>,
    ) -> EngineResult<QueryResult> {
        let ids = binding.distinct_ids();
        if ids.is_empty() {
            return Err(EngineError::InvalidRequest(
                "a query needs at least one source".into(),
            ));
        }
        let cap = self.settings.effective_row_cap(row_cap);
        if row_cap.is_some_and(|requested| requested > cap) {
            warn!(requested = row_cap, cap, "requested row cap lowered to the configured maximum");
        }
        debug!(%sql, cap, "executing query");

        let timeout = self.settings.timeout();
        let rows = match tokio::time::timeout(timeout, self.run(sql, &ids, binding, cap)).await {
            Ok(rows) => rows?,
            Err(_) => {
                warn!(seconds = timeout.as_secs(), "query timed out");
                return Err(EngineError::QueryTimeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        let result = QueryResult::capped(rows, cap);
        if result.row_cap_applied {
            warn!(cap, "result truncated to row cap");
        }
        Ok(result)
    }

    async fn run(
        &self,
        sql: &str,
        ids: &[String],
        binding: &SourceBinding,
        cap: usize,
    ) -> EngineResult<RowSet> {
        if let [id] = ids {
            let source = self.registry.get(id)?;
            ensure_read_only(sql, Some(source.driver())).map_err(guard_error)?;
            return source
                .fetch(sql, cap.saturating_add(1))
                .await
                .map_err(|e| match e {
                    SourceError::Unreachable(reason) => EngineError::SourceUnreachable {
                        source_id: id.clone(),
                        reason,
                    },
                    SourceError::Query(message) => EngineError::QueryExecution(message),
                });
        }

        ensure_read_only(sql, None).map_err(guard_error)?;
        let query = SqlJson::parse(sql).map_err(|e| {
            EngineError::UnsupportedFederation(format!(
                "cross-source queries must be plain select/join/filter queries: {}",
                e
            ))
        })?;

        let collected;
        let schema = match &binding.schema {
            Some(schema) => schema,
            None => {
                let sources = self.registry.resolve(ids)?;
                let schemas = SchemaCollector::new(self.settings.collect_timeout())
                    .collect_all(&sources)
                    .await?;
                if let Some(dropped) = schemas.dropped.first() {
                    return Err(EngineError::SourceUnreachable {
                        source_id: dropped.clone(),
                        reason: "schema could not be collected".into(),
                    });
                }
                collected = SchemaSnapshot::build(schemas.sources);
                &collected
            }
        };

        let max_rows = usize::try_from(self.settings.federation_max_rows).unwrap_or(usize::MAX);
        let plan = compose(&query, schema, max_rows)?;
        execute_plan(&plan, |id| self.registry.get(id), cap.saturating_add(1)).await
    }
}

fn guard_error(err: SqlError) -> EngineError {
    match err {
        SqlError::NotReadOnly(statement) => EngineError::ReadOnlyViolation(statement),
        // The dialect parser rejecting the text is an execution failure.
        other => EngineError::QueryExecution(other.to_string()),
    }
}
