//! Cross-source join composition.
//!
//! [`compose`] turns a structural query over a merged schema into an
//! [`ExecutionPlan`]. Queries whose tables all live on one source are
//! rewritten to physical names and run there. Anything else becomes a
//! bounded federated plan: one sub-query per table reference, fetched from
//! its source and joined in-process. Tables without a row estimate, or with
//! more rows than the federation bound, are refused rather than pulled.

mod graph;
mod local_join;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument};

pub use graph::{check_cycles, check_join_types};
pub use local_join::{evaluate, LocalFilter, LocalJoin, LocalPlan, Slot};

use crate::error::{EngineError, EngineResult};
use crate::schema::{SchemaSnapshot, SourceSchema, TableSchema};
use crate::source::{DataSource, RowSet, SourceError};
use crate::sql::{ColumnRef, Filter, JoinType, SelectColumn, SqlJson, TableRef};

/// A table reference of the query, located in the snapshot.
#[derive(Debug, Clone)]
pub struct ResolvedTable<'a> {
    pub reference: &'a TableRef,
    pub source: &'a SourceSchema,
    pub table: &'a TableSchema,
    /// `label.table`, the table's identity across the merged schema.
    pub qualified: String,
}

/// Every table reference of a query, in `FROM`-then-joins order.
#[derive(Debug, Clone)]
pub struct Resolved<'a> {
    query: &'a SqlJson,
    pub tables: Vec<ResolvedTable<'a>>,
}

impl<'a> Resolved<'a> {
    pub fn new(query: &'a SqlJson, snapshot: &'a SchemaSnapshot) -> EngineResult<Self> {
        let tables = query
            .table_refs()
            .map(|reference| {
                let location = snapshot.resolve_table(&reference.name).ok_or_else(|| {
                    EngineError::QueryExecution(format!("no such table: {}", reference.name))
                })?;
                Ok(ResolvedTable {
                    reference,
                    source: location.source,
                    table: location.table,
                    qualified: format!("{}.{}", location.source.source_label, location.table.name),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(Self { query, tables })
    }

    /// Index of the table a column belongs to.
    pub fn owner(&self, column: &ColumnRef) -> EngineResult<usize> {
        if let Some(qualifier) = &column.table {
            if let Some(found) = self.query.resolve(column) {
                if let Some(i) = self
                    .tables
                    .iter()
                    .position(|t| std::ptr::eq(t.reference, found))
                {
                    return Ok(i);
                }
            }
            let by_table: Vec<usize> = self
                .tables
                .iter()
                .enumerate()
                .filter(|(_, t)| {
                    t.reference.alias.is_none() && t.table.name.eq_ignore_ascii_case(qualifier)
                })
                .map(|(i, _)| i)
                .collect();
            return match by_table.as_slice() {
                [i] => Ok(*i),
                _ => Err(EngineError::QueryExecution(format!(
                    "no such column: {}",
                    column
                ))),
            };
        }

        let candidates: Vec<usize> = self
            .tables
            .iter()
            .enumerate()
            .filter(|(_, t)| t.table.column(&column.column).is_some())
            .map(|(i, _)| i)
            .collect();
        match candidates.as_slice() {
            [i] => Ok(*i),
            [] => Err(EngineError::QueryExecution(format!(
                "no such column: {}",
                column
            ))),
            _ => Err(EngineError::QueryExecution(format!(
                "ambiguous column name: {}",
                column
            ))),
        }
    }

    /// `label.table.column` and declared type of a column.
    pub fn column_type(&self, column: &ColumnRef) -> EngineResult<(String, &'a str)> {
        let owner = &self.tables[self.owner(column)?];
        let schema = owner.table.column(&column.column).ok_or_else(|| {
            EngineError::QueryExecution(format!("no such column: {}", column))
        })?;
        Ok((
            format!("{}.{}", owner.qualified, schema.name),
            schema.data_type.as_str(),
        ))
    }

    fn source_ids(&self) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        self.tables
            .iter()
            .map(|t| t.source.source_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// A query against one table of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub source_id: String,
    /// The table reference this sub-query feeds.
    pub reference: String,
    pub sql: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FederatedPlan {
    pub subqueries: Vec<SubQuery>,
    pub local: LocalPlan,
    /// Largest row count a sub-query may return.
    pub max_rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPlan {
    /// Every table is on one source; run this SQL there.
    SingleSource { source_id: String, sql: String },
    Federated(FederatedPlan),
}

/// Rewrite a query to the physical names of its tables. Columns qualified
/// by an unaliased table name follow the rename.
fn physical_query(query: &SqlJson, resolved: &Resolved<'_>) -> EngineResult<SqlJson> {
    let rename = |column: &ColumnRef| -> EngineResult<ColumnRef> {
        if column.table.is_none() {
            return Ok(column.clone());
        }
        let owner = &resolved.tables[resolved.owner(column)?];
        Ok(match &owner.reference.alias {
            Some(alias) => ColumnRef::new(alias.clone(), column.column.clone()),
            None => ColumnRef::new(owner.table.physical_name(), column.column.clone()),
        })
    };
    let retable = |i: usize| TableRef {
        name: resolved.tables[i].table.physical_name(),
        alias: resolved.tables[i].reference.alias.clone(),
    };

    let mut out = SqlJson::from_table(retable(0));
    out.limit = query.limit;
    out.offset = query.offset;

    for item in &query.select {
        let table = match &item.table {
            Some(_) if item.is_wildcard() => {
                let owner = resolved_wildcard_owner(item, resolved)?;
                Some(
                    resolved.tables[owner]
                        .reference
                        .alias
                        .clone()
                        .unwrap_or_else(|| resolved.tables[owner].table.physical_name()),
                )
            }
            Some(_) => rename(&item.column_ref())?.table,
            None => None,
        };
        out.select.push(SelectColumn {
            table,
            column: item.column.clone(),
            alias: item.alias.clone(),
        });
    }

    for (i, join) in query.joins.iter().enumerate() {
        let mut rewritten = join.clone();
        rewritten.table = retable(i + 1);
        for cond in &mut rewritten.on {
            cond.left = rename(&cond.left)?;
            cond.right = rename(&cond.right)?;
        }
        out.joins.push(rewritten);
    }

    for filter in &query.filters {
        out.filters.push(Filter {
            column: rename(&filter.column)?,
            op: filter.op,
            value: filter.value.clone(),
        });
    }

    for key in &query.order_by {
        let mut key = key.clone();
        key.column = rename(&key.column)?;
        out.order_by.push(key);
    }

    Ok(out)
}

fn resolved_wildcard_owner(item: &SelectColumn, resolved: &Resolved<'_>) -> EngineResult<usize> {
    let qualifier = item.table.clone().unwrap_or_default();
    resolved
        .tables
        .iter()
        .position(|t| {
            t.reference.reference().eq_ignore_ascii_case(&qualifier)
                || (t.reference.alias.is_none()
                    && (t.reference.name.eq_ignore_ascii_case(&qualifier)
                        || t.table.name.eq_ignore_ascii_case(&qualifier)))
        })
        .ok_or_else(|| EngineError::QueryExecution(format!("no such table: {}", qualifier)))
}

/// Tables whose rows an outer join may replace with NULLs.
fn null_supplying(query: &SqlJson) -> Vec<bool> {
    let mut nullable = vec![false; query.joins.len() + 1];
    for (i, join) in query.joins.iter().enumerate() {
        let joined = i + 1;
        match join.join_type {
            JoinType::Inner => {}
            JoinType::Left => nullable[joined] = true,
            JoinType::Right => nullable[..joined].iter_mut().for_each(|n| *n = true),
            JoinType::Full => nullable[..=joined].iter_mut().for_each(|n| *n = true),
        }
    }
    nullable
}

/// Columns each table must supply, and where each column lands.
struct Needed {
    columns: Vec<Vec<String>>,
}

impl Needed {
    fn slot(&mut self, table: usize, column: &str) -> Slot {
        let list = &mut self.columns[table];
        let position = match list.iter().position(|c| c.eq_ignore_ascii_case(column)) {
            Some(p) => p,
            None => {
                list.push(column.to_string());
                list.len() - 1
            }
        };
        Slot {
            table,
            column: position,
        }
    }
}

fn federated_plan(
    query: &SqlJson,
    resolved: &Resolved<'_>,
    max_rows: usize,
) -> EngineResult<FederatedPlan> {
    for t in &resolved.tables {
        match t.table.row_count {
            Some(rows) if rows <= max_rows as u64 => {}
            Some(rows) => {
                return Err(EngineError::UnsupportedFederation(format!(
                    "{} has ~{} rows, more than the {} row federation bound",
                    t.qualified, rows, max_rows
                )))
            }
            None => {
                return Err(EngineError::UnsupportedFederation(format!(
                    "{} has no row estimate, so it cannot be pulled for an in-process join",
                    t.qualified
                )))
            }
        }
    }

    let mut needed = Needed {
        columns: vec![Vec::new(); resolved.tables.len()],
    };

    let mut projection = Vec::new();
    let expand = |needed: &mut Needed, projection: &mut Vec<(String, Slot)>, table: usize| {
        for column in &resolved.tables[table].table.columns {
            let slot = needed.slot(table, &column.name);
            projection.push((column.name.clone(), slot));
        }
    };
    if query.select.is_empty() {
        for i in 0..resolved.tables.len() {
            expand(&mut needed, &mut projection, i);
        }
    }
    for item in &query.select {
        if item.is_wildcard() {
            match &item.table {
                None => {
                    for i in 0..resolved.tables.len() {
                        expand(&mut needed, &mut projection, i);
                    }
                }
                Some(_) => {
                    let owner = resolved_wildcard_owner(item, resolved)?;
                    expand(&mut needed, &mut projection, owner);
                }
            }
        } else {
            let column = item.column_ref();
            let slot = needed.slot(resolved.owner(&column)?, &item.column);
            projection.push((item.output_name().to_string(), slot));
        }
    }

    let mut joins = Vec::new();
    for (i, join) in query.joins.iter().enumerate() {
        let joined = i + 1;
        let mut keys = Vec::new();
        for cond in &join.on {
            let (l, r) = (resolved.owner(&cond.left)?, resolved.owner(&cond.right)?);
            let (earlier, incoming) = match (l, r) {
                (l, r) if r == joined && l < joined => (&cond.left, &cond.right),
                (l, r) if l == joined && r < joined => (&cond.right, &cond.left),
                _ => {
                    return Err(EngineError::UnsupportedFederation(format!(
                        "join condition {} = {} must link {} to an earlier table",
                        cond.left, cond.right, resolved.tables[joined].qualified
                    )))
                }
            };
            let earlier_slot = needed.slot(resolved.owner(earlier)?, &earlier.column);
            let incoming_slot = needed.slot(joined, &incoming.column);
            keys.push((earlier_slot, incoming_slot));
        }
        if keys.is_empty() {
            return Err(EngineError::UnsupportedFederation(format!(
                "join of {} has no ON condition",
                resolved.tables[joined].qualified
            )));
        }
        joins.push(LocalJoin {
            join_type: join.join_type,
            table: joined,
            keys,
        });
    }

    let nullable = null_supplying(query);
    let mut pushed: Vec<Vec<Filter>> = vec![Vec::new(); resolved.tables.len()];
    let mut filters = Vec::new();
    for filter in &query.filters {
        let owner = resolved.owner(&filter.column)?;
        filters.push(LocalFilter {
            slot: needed.slot(owner, &filter.column.column),
            op: filter.op,
            value: filter.value.clone(),
        });
        if !nullable[owner] {
            pushed[owner].push(Filter {
                column: ColumnRef::bare(filter.column.column.clone()),
                op: filter.op,
                value: filter.value.clone(),
            });
        }
    }

    let mut order_by = Vec::new();
    for key in &query.order_by {
        let slot = match resolved.owner(&key.column) {
            Ok(owner) => needed.slot(owner, &key.column.column),
            // ORDER BY may name an output alias.
            Err(err) => projection
                .iter()
                .find(|(name, _)| key.column.table.is_none() && name == &key.column.column)
                .map(|(_, slot)| *slot)
                .ok_or(err)?,
        };
        order_by.push((slot, key.descending));
    }

    let subqueries = resolved
        .tables
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut sub = SqlJson::from_table(TableRef::new(t.table.physical_name()));
            sub.select = needed.columns[i]
                .iter()
                .map(|c| SelectColumn {
                    table: None,
                    column: c.clone(),
                    alias: None,
                })
                .collect();
            // A table nothing reads from still has to drive row counts.
            if sub.select.is_empty() {
                sub.select.push(SelectColumn {
                    table: None,
                    column: "*".into(),
                    alias: None,
                });
            }
            sub.filters = std::mem::take(&mut pushed[i]);
            SubQuery {
                source_id: t.source.source_id.clone(),
                reference: t.reference.reference().to_string(),
                sql: sub.to_sql(),
                columns: needed.columns[i].clone(),
            }
        })
        .collect();

    Ok(FederatedPlan {
        subqueries,
        local: LocalPlan {
            joins,
            filters,
            order_by,
            projection,
            limit: query.limit,
            offset: query.offset,
        },
        max_rows,
    })
}

/// Build the execution plan for a structural query.
///
/// Cycle and type checks run first, so a structurally broken query fails
/// before any source is contacted.
pub fn compose(
    query: &SqlJson,
    snapshot: &SchemaSnapshot,
    max_rows: usize,
) -> EngineResult<ExecutionPlan> {
    let resolved = Resolved::new(query, snapshot)?;
    check_cycles(query, &resolved)?;
    check_join_types(query, &resolved)?;

    let sources = resolved.source_ids();
    if let [source_id] = sources.as_slice() {
        let sql = physical_query(query, &resolved)?.to_sql();
        return Ok(ExecutionPlan::SingleSource {
            source_id: source_id.to_string(),
            sql,
        });
    }

    let plan = federated_plan(query, &resolved, max_rows)?;
    debug!(subqueries = plan.subqueries.len(), "federated plan built");
    Ok(ExecutionPlan::Federated(plan))
}

fn fetch_error(source_id: &str, err: SourceError) -> EngineError {
    match err {
        SourceError::Unreachable(reason) => EngineError::SourceUnreachable {
            source_id: source_id.to_string(),
            reason,
        },
        SourceError::Query(message) => EngineError::QueryExecution(message),
    }
}

/// Run a plan. `fetch_limit` bounds a single-source result.
#[instrument(skip_all)]
pub async fn execute_plan(
    plan: &ExecutionPlan,
    source_for: impl Fn(&str) -> EngineResult<Arc<dyn DataSource>>,
    fetch_limit: usize,
) -> EngineResult<RowSet> {
    match plan {
        ExecutionPlan::SingleSource { source_id, sql } => {
            let source = source_for(source_id)?;
            source
                .fetch(sql, fetch_limit)
                .await
                .map_err(|e| fetch_error(source_id, e))
        }
        ExecutionPlan::Federated(plan) => {
            let fetches = plan.subqueries.iter().map(|sub| {
                let source = source_for(&sub.source_id);
                async move {
                    let rows = source?
                        .fetch(&sub.sql, plan.max_rows + 1)
                        .await
                        .map_err(|e| fetch_error(&sub.source_id, e))?;
                    if rows.rows.len() > plan.max_rows {
                        return Err(EngineError::UnsupportedFederation(format!(
                            "{} returned more than {} rows",
                            sub.reference, plan.max_rows
                        )));
                    }
                    Ok(rows)
                }
            });
            let tables = try_join_all(fetches).await?;
            info!(tables = tables.len(), "joining federated results in-process");
            Ok(evaluate(&plan.local, &tables))
        }
    }
}
