//! Source id → live source lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::worker::SharedWorker;
use super::{DataSource, SqliteSource, WorkerSource};
use crate::config::{Driver, Settings, SettingsError};
use crate::error::{EngineError, EngineResult};

/// All sources this process can reach, keyed by source id.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn DataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from `[sources.*]`.
    ///
    /// SQLite files are opened immediately; a file that cannot be opened is
    /// skipped with a warning so the remaining sources stay usable. Worker
    /// sources share one worker process, spawned on first use.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let shared = Arc::new(settings.clone());
        let worker: SharedWorker = Arc::new(OnceCell::new());
        let mut registry = Self::new();

        for (id, source) in &settings.sources {
            let driver = source.driver_type()?;
            let connection_string = source.resolved_connection_string()?;
            let label = source.label.clone().unwrap_or_else(|| id.clone());

            match driver {
                Driver::Sqlite => match SqliteSource::open(id, &label, &connection_string) {
                    Ok(sqlite) => registry.register(Arc::new(sqlite)),
                    Err(e) => warn!(source = %id, error = %e, "could not open sqlite source"),
                },
                _ => registry.register(Arc::new(WorkerSource::new(
                    id,
                    label,
                    driver,
                    connection_string,
                    source.default_schema.clone(),
                    worker.clone(),
                    shared.clone(),
                ))),
            }
        }

        debug!(sources = registry.sources.len(), "source registry built");
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn DataSource>) {
        self.sources.insert(source.id().to_string(), source);
    }

    pub fn get(&self, id: &str) -> EngineResult<Arc<dyn DataSource>> {
        self.sources
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSource(id.to_string()))
    }

    /// Resolve several ids, failing on the first unknown one.
    pub fn resolve(&self, ids: &[String]) -> EngineResult<Vec<Arc<dyn DataSource>>> {
        ids.iter().map(|id| self.get(id)).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
