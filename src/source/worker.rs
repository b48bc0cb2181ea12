//! Sources backed by the out-of-process database worker.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{DataSource, RowSet, SourceError};
use crate::config::{Driver, Settings};
use crate::schema::{ColumnSchema, ForeignKey, TableSchema};
use crate::worker::protocol::{
    DescribeTable, DescribedTable, EstimateRows, ListTables, RunQuery, Target,
};
use crate::worker::WorkerClient;

/// Worker handle shared by every worker-backed source. Spawned on first use.
pub type SharedWorker = Arc<OnceCell<Arc<WorkerClient>>>;

pub struct WorkerSource {
    id: String,
    label: String,
    driver: Driver,
    target: Target,
    schema: Option<String>,
    worker: SharedWorker,
    settings: Arc<Settings>,
}

impl WorkerSource {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        driver: Driver,
        connection_string: String,
        schema: Option<String>,
        worker: SharedWorker,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            target: Target {
                driver: driver.as_str().to_string(),
                connection_string,
            },
            schema: schema
                .or_else(|| Some(driver.default_schema().to_string()))
                .filter(|s| !s.is_empty()),
            driver,
            worker,
            settings,
        }
    }

    async fn client(&self) -> Result<&Arc<WorkerClient>, SourceError> {
        let client = self
            .worker
            .get_or_try_init(|| async { WorkerClient::launch(&self.settings).await.map(Arc::new) })
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        if !client.is_alive() {
            return Err(SourceError::Unreachable("database worker has exited".into()));
        }
        Ok(client)
    }
}

fn to_table_schema(detail: DescribedTable, row_count: Option<u64>) -> TableSchema {
    let mut columns = detail.columns;
    columns.sort_by_key(|c| c.position);

    TableSchema {
        name: detail.name,
        schema: Some(detail.schema),
        columns: columns
            .into_iter()
            .map(|c| ColumnSchema {
                name: c.name,
                data_type: c.data_type,
                nullable: c.is_nullable,
            })
            .collect(),
        primary_key: detail.primary_key.map(|pk| pk.columns).unwrap_or_default(),
        foreign_keys: detail
            .foreign_keys
            .into_iter()
            .map(|fk| ForeignKey {
                columns: fk.columns,
                referenced_table: fk.referenced_table,
                referenced_columns: fk.referenced_columns,
            })
            .collect(),
        inferred_relationships: Vec::new(),
        row_count,
    }
}

#[async_trait]
impl DataSource for WorkerSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn driver(&self) -> Driver {
        self.driver
    }

    async fn introspect(&self) -> Result<Vec<TableSchema>, SourceError> {
        let client = self.client().await?;
        let listing = client
            .call(&ListTables {
                target: &self.target,
                schema: self.schema.as_deref(),
            })
            .await?;
        debug!(source = %self.id, tables = listing.tables.len(), "listed tables");

        let lookups = listing.tables.iter().map(|info| async move {
            let detail = client
                .call(&DescribeTable {
                    target: &self.target,
                    schema: &info.schema,
                    table: &info.name,
                })
                .await?;
            // No estimate leaves the row count unknown.
            let rows = client
                .call(&EstimateRows {
                    target: &self.target,
                    schema: &info.schema,
                    table: &info.name,
                    exact: false,
                })
                .await
                .ok()
                .map(|r| r.row_count.max(0) as u64);
            Ok::<_, SourceError>(to_table_schema(detail.table, rows))
        });

        let mut tables = join_all(lookups)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn fetch(&self, sql: &str, max_rows: usize) -> Result<RowSet, SourceError> {
        let client = self.client().await?;
        let response = client
            .call(&RunQuery {
                target: &self.target,
                sql,
                max_rows,
            })
            .await?;

        let mut rows = response.rows;
        rows.truncate(max_rows);
        Ok(RowSet {
            columns: response.columns.into_iter().map(|c| c.name).collect(),
            rows,
        })
    }
}
