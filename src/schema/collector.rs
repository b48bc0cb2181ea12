//! Schema collection across one or more sources.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, instrument, warn};

use super::inference::infer_relationships;
use super::types::{SchemaWarning, SourceSchema};
use crate::error::{EngineError, EngineResult};
use crate::source::DataSource;

/// Result of collecting a set of sources.
#[derive(Debug, Clone)]
pub struct CollectedSchemas {
    /// Reachable sources, in request order.
    pub sources: Vec<SourceSchema>,
    pub warnings: Vec<SchemaWarning>,
    /// Ids of sources left out of the result.
    pub dropped: Vec<String>,
}

/// Introspects sources under a per-source timeout.
#[derive(Debug, Clone)]
pub struct SchemaCollector {
    timeout: Duration,
}

impl SchemaCollector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Collect one source.
    ///
    /// An empty source is not an error: it comes back with an
    /// [`SchemaWarning::EmptySchema`] alongside.
    #[instrument(skip(self, source), fields(source = %source.id()))]
    pub async fn collect(
        &self,
        source: &dyn DataSource,
    ) -> EngineResult<(SourceSchema, Option<SchemaWarning>)> {
        let unreachable = |reason: String| EngineError::SourceUnreachable {
            source_id: source.id().to_string(),
            reason,
        };

        let mut tables = tokio::time::timeout(self.timeout, source.introspect())
            .await
            .map_err(|_| unreachable(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| unreachable(e.to_string()))?;

        infer_relationships(&mut tables);

        let warning = tables.is_empty().then(|| SchemaWarning::EmptySchema {
            source_id: source.id().to_string(),
        });

        Ok((
            SourceSchema {
                source_id: source.id().to_string(),
                source_label: source.label().to_string(),
                tables,
            },
            warning,
        ))
    }

    /// Collect every source independently.
    ///
    /// Unreachable sources are dropped with a warning; only when none is
    /// reachable does this fail, with [`EngineError::NoSchemaAvailable`].
    pub async fn collect_all(&self, sources: &[Arc<dyn DataSource>]) -> EngineResult<CollectedSchemas> {
        let results = join_all(sources.iter().map(|s| self.collect(s.as_ref()))).await;

        let mut collected = CollectedSchemas {
            sources: Vec::new(),
            warnings: Vec::new(),
            dropped: Vec::new(),
        };

        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok((schema, warning)) => {
                    collected.sources.push(schema);
                    collected.warnings.extend(warning);
                }
                Err(err) => {
                    let reason = match err {
                        EngineError::SourceUnreachable { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    warn!(source = %source.id(), %reason, "dropping unreachable source");
                    collected.warnings.push(SchemaWarning::SourceDropped {
                        source_id: source.id().to_string(),
                        reason,
                    });
                    collected.dropped.push(source.id().to_string());
                }
            }
        }

        if collected.sources.is_empty() {
            return Err(EngineError::NoSchemaAvailable {
                dropped: collected.dropped,
            });
        }

        info!(
            reachable = collected.sources.len(),
            dropped = collected.dropped.len(),
            "schemas collected"
        );
        Ok(collected)
    }
}
