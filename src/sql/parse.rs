//! SQL text → `SqlJson`, and the read-only statement guard.
//!
//! Both are built on sqlparser. Parsing into `SqlJson` accepts the
//! select-project-join-filter subset and rejects everything else with
//! [`SqlError::Unsupported`]; the guard accepts any single read-only query.

use sqlparser::ast::{
    self as ast, BinaryOperator, Expr, GroupByExpr, JoinConstraint, JoinOperator, SelectItem,
    SetExpr, Statement, TableFactor, UnaryOperator,
};
use sqlparser::dialect::{
    Dialect, DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
    SQLiteDialect,
};
use sqlparser::parser::Parser;
use thiserror::Error;

use super::model::{
    ColumnRef, Filter, FilterOp, Join, JoinCondition, JoinType, OrderBy, SelectColumn, SqlJson,
    TableRef,
};
use crate::config::Driver;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SqlError {
    #[error("SQL syntax error: {0}")]
    Syntax(String),

    #[error("unsupported query shape: {0}")]
    Unsupported(String),

    #[error("{0}")]
    NotReadOnly(String),
}

type SqlResult<T> = Result<T, SqlError>;

fn dialect_for(driver: Option<Driver>) -> Box<dyn Dialect> {
    match driver {
        Some(Driver::Sqlite) => Box::new(SQLiteDialect {}),
        Some(Driver::Postgres) => Box::new(PostgreSqlDialect {}),
        Some(Driver::MySql) => Box::new(MySqlDialect {}),
        Some(Driver::MsSql) => Box::new(MsSqlDialect {}),
        Some(Driver::DuckDb) => Box::new(DuckDbDialect {}),
        None => Box::new(GenericDialect {}),
    }
}

fn parse_statements(sql: &str, driver: Option<Driver>) -> SqlResult<Vec<Statement>> {
    let dialect = dialect_for(driver);
    Parser::parse_sql(&*dialect, sql).map_err(|e| SqlError::Syntax(e.to_string()))
}

// ============================================================================
// Read-only guard
// ============================================================================

/// Accept exactly one statement, and only if it is a read-only query.
///
/// `SELECT ... INTO`, locking clauses and anything that is not a query are
/// rejected before they can reach a source.
pub fn ensure_read_only(sql: &str, driver: Option<Driver>) -> SqlResult<()> {
    let statements = parse_statements(sql, driver)?;

    match statements.as_slice() {
        [Statement::Query(query)] if query_is_read_only(query) => Ok(()),
        [Statement::Query(_)] => Err(SqlError::NotReadOnly(
            "query writes or locks rows".to_string(),
        )),
        [other] => Err(SqlError::NotReadOnly(statement_keyword(other))),
        [] => Err(SqlError::NotReadOnly("empty statement".to_string())),
        _ => Err(SqlError::NotReadOnly(format!(
            "{} statements (expected one)",
            statements.len()
        ))),
    }
}

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

fn query_is_read_only(query: &ast::Query) -> bool {
    let ctes_ok = query
        .with
        .as_ref()
        .map(|with| with.cte_tables.iter().all(|cte| query_is_read_only(&cte.query)))
        .unwrap_or(true);

    ctes_ok && query.locks.is_empty() && set_expr_is_read_only(&query.body)
}

fn set_expr_is_read_only(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => query_is_read_only(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_read_only(left) && set_expr_is_read_only(right)
        }
        SetExpr::Values(_) => true,
        _ => false,
    }
}

// ============================================================================
// SQL text → SqlJson
// ============================================================================

impl SqlJson {
    /// Parse SQL text into its structural form.
    pub fn parse(sql: &str) -> SqlResult<SqlJson> {
        let statements = parse_statements(sql, None)?;
        let query = match statements.as_slice() {
            [Statement::Query(query)] => query,
            _ => return Err(SqlError::Unsupported("expected a single SELECT".into())),
        };

        if query.with.is_some() {
            return Err(SqlError::Unsupported("common table expressions".into()));
        }

        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            _ => return Err(SqlError::Unsupported("set operations".into())),
        };

        if select.distinct.is_some() || select.top.is_some() {
            return Err(SqlError::Unsupported("DISTINCT / TOP".into()));
        }
        if select.having.is_some() || !group_by_is_empty(&select.group_by) {
            return Err(SqlError::Unsupported("aggregation".into()));
        }

        let [from] = select.from.as_slice() else {
            return Err(SqlError::Unsupported(
                "exactly one FROM item is required (use explicit JOINs)".into(),
            ));
        };

        let mut out = SqlJson::from_table(table_ref(&from.relation)?);

        for join in &from.joins {
            out.joins.push(convert_join(join)?);
        }

        for item in &select.projection {
            out.select.push(convert_select_item(item)?);
        }

        if let Some(selection) = &select.selection {
            for conjunct in conjuncts(selection) {
                out.filters.push(convert_filter(conjunct)?);
            }
        }

        if let Some(order_by) = &query.order_by {
            for key in &order_by.exprs {
                out.order_by.push(OrderBy {
                    column: column_ref(&key.expr)?,
                    descending: key.asc == Some(false),
                });
            }
        }

        if query.fetch.is_some() || !query.limit_by.is_empty() {
            return Err(SqlError::Unsupported("FETCH / LIMIT BY".into()));
        }
        if let Some(limit) = &query.limit {
            out.limit = Some(row_count("LIMIT", limit)?);
        }
        if let Some(offset) = &query.offset {
            out.offset = Some(row_count("OFFSET", &offset.value)?);
        }

        Ok(out)
    }
}

fn row_count(clause: &str, expr: &Expr) -> SqlResult<u64> {
    match literal(expr) {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| SqlError::Unsupported(format!("{} {}", clause, expr))),
        _ => Err(SqlError::Unsupported(format!("{} {}", clause, expr))),
    }
}

fn group_by_is_empty(group_by: &GroupByExpr) -> bool {
    matches!(group_by, GroupByExpr::Expressions(exprs, _) if exprs.is_empty())
}

fn object_name(name: &ast::ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn table_ref(factor: &TableFactor) -> SqlResult<TableRef> {
    match factor {
        TableFactor::Table { name, alias, .. } => Ok(TableRef {
            name: object_name(name),
            alias: alias.as_ref().map(|a| a.name.value.clone()),
        }),
        other => Err(SqlError::Unsupported(format!("table factor {}", other))),
    }
}

fn convert_join(join: &ast::Join) -> SqlResult<Join> {
    let (join_type, constraint) = match &join.join_operator {
        JoinOperator::Inner(c) => (JoinType::Inner, c),
        JoinOperator::LeftOuter(c) => (JoinType::Left, c),
        JoinOperator::RightOuter(c) => (JoinType::Right, c),
        JoinOperator::FullOuter(c) => (JoinType::Full, c),
        other => return Err(SqlError::Unsupported(format!("join operator {:?}", other))),
    };

    let JoinConstraint::On(on) = constraint else {
        return Err(SqlError::Unsupported("joins must use ON".into()));
    };

    let mut conditions = Vec::new();
    for conjunct in conjuncts(on) {
        match conjunct {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => conditions.push(JoinCondition {
                left: column_ref(left)?,
                right: column_ref(right)?,
            }),
            other => {
                return Err(SqlError::Unsupported(format!(
                    "join condition {} (only column equality is supported)",
                    other
                )))
            }
        }
    }

    Ok(Join {
        join_type,
        table: table_ref(&join.relation)?,
        on: conditions,
    })
}

fn convert_select_item(item: &SelectItem) -> SqlResult<SelectColumn> {
    match item {
        SelectItem::UnnamedExpr(expr) => {
            let col = column_ref(expr)?;
            Ok(SelectColumn {
                table: col.table,
                column: col.column,
                alias: None,
            })
        }
        SelectItem::ExprWithAlias { expr, alias } => {
            let col = column_ref(expr)?;
            Ok(SelectColumn {
                table: col.table,
                column: col.column,
                alias: Some(alias.value.clone()),
            })
        }
        SelectItem::Wildcard(_) => Ok(SelectColumn {
            table: None,
            column: "*".into(),
            alias: None,
        }),
        SelectItem::QualifiedWildcard(name, _) => Ok(SelectColumn {
            table: Some(object_name(name)),
            column: "*".into(),
            alias: None,
        }),
    }
}

/// Flatten `a AND (b AND c)` into `[a, b, c]`.
fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        Expr::Nested(inner) => conjuncts(inner),
        other => vec![other],
    }
}

fn column_ref(expr: &Expr) -> SqlResult<ColumnRef> {
    match expr {
        Expr::Identifier(ident) => Ok(ColumnRef::bare(ident.value.clone())),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let (column, table) = parts.split_last().ok_or_else(|| {
                SqlError::Unsupported("empty compound identifier".to_string())
            })?;
            Ok(ColumnRef {
                table: Some(
                    table
                        .iter()
                        .map(|p| p.value.clone())
                        .collect::<Vec<_>>()
                        .join("."),
                ),
                column: column.value.clone(),
            })
        }
        Expr::Nested(inner) => column_ref(inner),
        other => Err(SqlError::Unsupported(format!(
            "expression {} (only plain column references are supported)",
            other
        ))),
    }
}

fn literal(expr: &Expr) -> Option<serde_json::Value> {
    match expr {
        Expr::Value(value) => match value {
            ast::Value::Number(n, _) => number(n),
            ast::Value::SingleQuotedString(s) => Some(serde_json::Value::String(s.clone())),
            ast::Value::Boolean(b) => Some(serde_json::Value::Bool(*b)),
            ast::Value::Null => Some(serde_json::Value::Null),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            Expr::Value(ast::Value::Number(n, _)) => number(&format!("-{}", n)),
            _ => None,
        },
        Expr::Nested(inner) => literal(inner),
        _ => None,
    }
}

fn number(text: &str) -> Option<serde_json::Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(serde_json::Value::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
}

fn comparison(op: &BinaryOperator) -> Option<FilterOp> {
    Some(match op {
        BinaryOperator::Eq => FilterOp::Eq,
        BinaryOperator::NotEq => FilterOp::NotEq,
        BinaryOperator::Lt => FilterOp::Lt,
        BinaryOperator::LtEq => FilterOp::LtEq,
        BinaryOperator::Gt => FilterOp::Gt,
        BinaryOperator::GtEq => FilterOp::GtEq,
        _ => return None,
    })
}

fn convert_filter(expr: &Expr) -> SqlResult<Filter> {
    let unsupported = || {
        SqlError::Unsupported(format!(
            "filter {} (only `column op literal` conditions joined by AND)",
            expr
        ))
    };

    match expr {
        Expr::BinaryOp { left, op, right } => {
            let op = comparison(op).ok_or_else(unsupported)?;
            if let (Ok(column), Some(value)) = (column_ref(left), literal(right)) {
                Ok(Filter { column, op, value })
            } else if let (Some(value), Ok(column)) = (literal(left), column_ref(right)) {
                Ok(Filter {
                    column,
                    op: op.flipped(),
                    value,
                })
            } else {
                Err(unsupported())
            }
        }
        Expr::IsNull(inner) => Ok(Filter {
            column: column_ref(inner)?,
            op: FilterOp::IsNull,
            value: serde_json::Value::Null,
        }),
        Expr::IsNotNull(inner) => Ok(Filter {
            column: column_ref(inner)?,
            op: FilterOp::IsNotNull,
            value: serde_json::Value::Null,
        }),
        Expr::Like {
            negated: false,
            expr: inner,
            pattern,
            ..
        } => Ok(Filter {
            column: column_ref(inner)?,
            op: FilterOp::Like,
            value: literal(pattern).ok_or_else(unsupported)?,
        }),
        _ => Err(unsupported()),
    }
}
