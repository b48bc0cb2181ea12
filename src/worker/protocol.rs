//! Wire types for the database worker.
//!
//! One JSON object per line in each direction. A call is answered by a
//! reply carrying the same `id`. Each call type pairs its method name with
//! the shape of its successful result through [`Call`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A request the worker understands.
pub trait Call: Serialize {
    const METHOD: &'static str;
    type Output: DeserializeOwned;
}

#[derive(Debug, Serialize)]
pub(crate) struct Envelope<'a, P> {
    pub id: &'a str,
    pub method: &'static str,
    pub params: &'a P,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Reply {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<Fault>,
}

impl Reply {
    pub fn exited(id: String) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(Fault {
                code: fault::EXITED.into(),
                message: "worker process exited".into(),
            }),
        }
    }
}

/// Failure reported by the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Fault {
    pub code: String,
    pub message: String,
}

/// Fault codes with special meaning on this side.
pub mod fault {
    pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
    pub const DRIVER_NOT_FOUND: &str = "DRIVER_NOT_FOUND";
    pub const EXITED: &str = "WORKER_EXITED";
}

/// Database the call runs against. Flattened into every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub driver: String,
    pub connection_string: String,
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ListTables<'a> {
    #[serde(flatten)]
    pub target: &'a Target,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<&'a str>,
}

impl Call for ListTables<'_> {
    const METHOD: &'static str = "metadata.list_tables";
    type Output = TableListing;
}

#[derive(Debug, Deserialize)]
pub struct TableListing {
    pub tables: Vec<ListedTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListedTable {
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DescribeTable<'a> {
    #[serde(flatten)]
    pub target: &'a Target,
    pub schema: &'a str,
    pub table: &'a str,
}

impl Call for DescribeTable<'_> {
    const METHOD: &'static str = "metadata.get_table";
    type Output = TableDescription;
}

#[derive(Debug, Deserialize)]
pub struct TableDescription {
    pub table: DescribedTable,
}

#[derive(Debug, Deserialize)]
pub struct DescribedTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<DescribedColumn>,
    #[serde(default)]
    pub primary_key: Option<KeyColumns>,
    #[serde(default)]
    pub foreign_keys: Vec<DescribedForeignKey>,
}

#[derive(Debug, Deserialize)]
pub struct DescribedColumn {
    pub name: String,
    pub position: i32,
    pub data_type: String,
    pub is_nullable: bool,
}

#[derive(Debug, Deserialize)]
pub struct KeyColumns {
    pub columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DescribedForeignKey {
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Planner estimate; `exact` is always false so the worker never scans.
#[derive(Debug, Serialize)]
pub struct EstimateRows<'a> {
    #[serde(flatten)]
    pub target: &'a Target,
    pub schema: &'a str,
    pub table: &'a str,
    pub exact: bool,
}

impl Call for EstimateRows<'_> {
    const METHOD: &'static str = "metadata.get_row_count";
    type Output = RowEstimate;
}

#[derive(Debug, Deserialize)]
pub struct RowEstimate {
    pub row_count: i64,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct RunQuery<'a> {
    #[serde(flatten)]
    pub target: &'a Target,
    pub sql: &'a str,
    pub max_rows: usize,
}

impl Call for RunQuery<'_> {
    const METHOD: &'static str = "query.execute";
    type Output = QueryRows;
}

#[derive(Debug, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct ResultColumn {
    pub name: String,
}
