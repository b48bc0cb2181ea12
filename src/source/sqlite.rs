//! In-process SQLite source.
//!
//! The connection is opened read-only (or switched to `query_only` after
//! seeding, for in-memory fixtures). Blocking rusqlite calls run on the
//! blocking pool; an abandoned fetch interrupts the running statement.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use tracing::debug;

use super::{DataSource, RowSet, SourceError};
use crate::config::Driver;
use crate::schema::{ColumnSchema, ForeignKey, TableSchema};

pub struct SqliteSource {
    id: String,
    label: String,
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteSource {
    /// Open a database file read-only.
    pub fn open(
        id: impl Into<String>,
        label: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, SourceError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        Ok(Self::from_connection(id, label, conn))
    }

    /// Create an in-memory database seeded with `seed_sql`, then lock it to
    /// read-only queries.
    pub fn in_memory(
        id: impl Into<String>,
        label: impl Into<String>,
        seed_sql: &str,
    ) -> Result<Self, SourceError> {
        let conn =
            Connection::open_in_memory().map_err(|e| SourceError::Unreachable(e.to_string()))?;
        conn.execute_batch(seed_sql)
            .map_err(|e| SourceError::Query(e.to_string()))?;
        conn.pragma_update(None, "query_only", true)
            .map_err(|e| SourceError::Query(e.to_string()))?;
        Ok(Self::from_connection(id, label, conn))
    }

    fn from_connection(id: impl Into<String>, label: impl Into<String>, conn: Connection) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            id: id.into(),
            label: label.into(),
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SourceError> + Send + 'static,
    {
        let conn = self.conn.clone();
        let state = Arc::new(AtomicU8::new(PENDING));
        let _guard = InterruptOnDrop {
            handle: self.interrupt.clone(),
            state: state.clone(),
        };

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| SourceError::Unreachable("sqlite connection poisoned".into()))?;
            state.store(RUNNING, Ordering::SeqCst);
            let result = f(&conn);
            state.store(DONE, Ordering::SeqCst);
            result
        })
        .await
        .map_err(|e| SourceError::Unreachable(format!("sqlite task failed: {}", e)))?
    }
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

/// Interrupts the connection if the owning future is dropped while its
/// statement is running. Statements of other callers are left alone.
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    state: Arc<AtomicU8>,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) == RUNNING {
            self.handle.interrupt();
        }
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            serde_json::Value::String(format!("x'{}'", hex))
        }
    }
}

fn describe_table(conn: &Connection, name: &str, is_view: bool) -> rusqlite::Result<TableSchema> {
    let mut table = TableSchema::new(name);

    let mut pk: Vec<(i64, String)> = Vec::new();
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(name)))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let column: String = row.get(1)?;
        let data_type: String = row.get(2)?;
        let not_null: bool = row.get(3)?;
        let pk_pos: i64 = row.get(5)?;
        if pk_pos > 0 {
            pk.push((pk_pos, column.clone()));
        }
        table.columns.push(ColumnSchema {
            name: column,
            data_type,
            nullable: !not_null && pk_pos == 0,
        });
    }
    pk.sort();
    table.primary_key = pk.into_iter().map(|(_, c)| c).collect();

    // (id, seq, table, from, to)
    let mut fks: Vec<(i64, i64, String, String, Option<String>)> = Vec::new();
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote(name)))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        fks.push((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?));
    }
    fks.sort_by_key(|fk| (fk.0, fk.1));

    let mut current: Option<(i64, ForeignKey)> = None;
    for (id, _seq, target, from, to) in fks {
        if current.as_ref().map(|(cid, _)| *cid != id).unwrap_or(true) {
            if let Some((_, fk)) = current.take() {
                table.foreign_keys.push(fk);
            }
            current = Some((
                id,
                ForeignKey {
                    columns: Vec::new(),
                    referenced_table: target.clone(),
                    referenced_columns: Vec::new(),
                },
            ));
        }
        if let Some((_, fk)) = current.as_mut() {
            fk.columns.push(from);
            // A missing target column means the referenced primary key.
            fk.referenced_columns.push(to.unwrap_or_else(|| "id".to_string()));
        }
    }
    if let Some((_, fk)) = current {
        table.foreign_keys.push(fk);
    }

    if !is_view {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(name)), [], |r| {
            r.get(0)
        })?;
        table.row_count = Some(count.max(0) as u64);
    }

    Ok(table)
}

#[async_trait]
impl DataSource for SqliteSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    async fn introspect(&self) -> Result<Vec<TableSchema>, SourceError> {
        self.with_conn(|conn| {
            let listing = (|| -> rusqlite::Result<Vec<TableSchema>> {
                let mut stmt = conn.prepare(
                    "SELECT name, type FROM sqlite_master \
                     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                     ORDER BY name",
                )?;
                let names: Vec<(String, String)> = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<_, _>>()?;

                names
                    .iter()
                    .map(|(name, kind)| describe_table(conn, name, kind == "view"))
                    .collect()
            })();
            listing.map_err(|e| SourceError::Unreachable(e.to_string()))
        })
        .await
    }

    async fn fetch(&self, sql: &str, max_rows: usize) -> Result<RowSet, SourceError> {
        debug!(source = %self.id, max_rows, "sqlite fetch");
        let sql = sql.to_string();

        self.with_conn(move |conn| {
            let run = || -> rusqlite::Result<RowSet> {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> =
                    stmt.column_names().into_iter().map(str::to_string).collect();
                let width = columns.len();

                let mut out = RowSet {
                    columns,
                    rows: Vec::new(),
                };
                let mut rows = stmt.query([])?;
                while out.rows.len() < max_rows {
                    let Some(row) = rows.next()? else { break };
                    let mut values = Vec::with_capacity(width);
                    for i in 0..width {
                        values.push(to_json(row.get_ref(i)?));
                    }
                    out.rows.push(values);
                }
                Ok(out)
            };
            run().map_err(|e| SourceError::Query(e.to_string()))
        })
        .await
    }
}
