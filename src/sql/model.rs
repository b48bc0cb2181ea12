//! `SqlJson`: the structural mirror of a draft's SQL text.
//!
//! Clients edit queries through this shape and the federation composer
//! reasons over it, because it says which table every column belongs to.
//! It covers the select-project-join-filter queries modelling sessions
//! produce; anything richer stays text-only.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlJson {
    pub select: Vec<SelectColumn>,
    pub from: TableRef,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// A table as written in the query. `name` may be qualified
/// (`sales.orders` in a merged schema, `dbo.orders` for a vendor schema).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// The name other clauses use to refer to this table.
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    fn answers_to(&self, qualifier: &str) -> bool {
        self.reference().eq_ignore_ascii_case(qualifier)
            || self.name.eq_ignore_ascii_case(qualifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// A projected column. `column == "*"` selects every column (of `table`, if set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectColumn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl SelectColumn {
    pub fn is_wildcard(&self) -> bool {
        self.column == "*"
    }

    pub fn column_ref(&self) -> ColumnRef {
        ColumnRef {
            table: self.table.clone(),
            column: self.column.clone(),
        }
    }

    /// Output column name.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    #[serde(default)]
    pub join_type: JoinType,
    pub table: TableRef,
    /// Equality conditions, ANDed.
    pub on: Vec<JoinCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: ColumnRef,
    pub right: ColumnRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "is null")]
    IsNull,
    #[serde(rename = "is not null")]
    IsNotNull,
}

impl FilterOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::NotEq => "<>",
            FilterOp::Lt => "<",
            FilterOp::LtEq => "<=",
            FilterOp::Gt => ">",
            FilterOp::GtEq => ">=",
            FilterOp::Like => "LIKE",
            FilterOp::IsNull => "IS NULL",
            FilterOp::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn takes_value(&self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }

    /// The operator with its operands swapped (`5 < x` is `x > 5`).
    pub fn flipped(&self) -> Self {
        match self {
            FilterOp::Lt => FilterOp::Gt,
            FilterOp::LtEq => FilterOp::GtEq,
            FilterOp::Gt => FilterOp::Lt,
            FilterOp::GtEq => FilterOp::LtEq,
            other => *other,
        }
    }
}

/// `column op value`, ANDed with every other filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: ColumnRef,
    pub op: FilterOp,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: ColumnRef,
    #[serde(default)]
    pub descending: bool,
}

/// The logical content of a query, ignoring spelling and order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    pub tables: BTreeSet<String>,
    pub columns: BTreeSet<String>,
    pub joins: BTreeSet<String>,
    pub filters: BTreeSet<String>,
    /// Row window as `(limit, offset)`.
    pub window: (Option<u64>, Option<u64>),
}

impl SqlJson {
    /// Start a query over one table.
    pub fn from_table(table: TableRef) -> Self {
        Self {
            select: Vec::new(),
            from: table,
            joins: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Every table reference, `FROM` first, then joins in order.
    pub fn table_refs(&self) -> impl Iterator<Item = &TableRef> {
        std::iter::once(&self.from).chain(self.joins.iter().map(|j| &j.table))
    }

    /// Find the table reference a column belongs to.
    ///
    /// Unqualified columns resolve only when the query has a single table.
    pub fn resolve(&self, column: &ColumnRef) -> Option<&TableRef> {
        match &column.table {
            Some(qualifier) => self.table_refs().find(|t| t.answers_to(qualifier)),
            None if self.joins.is_empty() => Some(&self.from),
            None => None,
        }
    }

    fn canonical_column(&self, column: &ColumnRef) -> String {
        let table = self
            .resolve(column)
            .map(|t| t.name.to_lowercase())
            .or_else(|| column.table.as_ref().map(|t| t.to_lowercase()))
            .unwrap_or_default();
        format!("{}.{}", table, column.column.to_lowercase())
    }

    /// Table, column and join sets with aliases resolved to table names.
    pub fn shape(&self) -> QueryShape {
        let tables = self.table_refs().map(|t| t.name.to_lowercase()).collect();

        let columns = self
            .select
            .iter()
            .map(|c| self.canonical_column(&c.column_ref()))
            .collect();

        let joins = self
            .joins
            .iter()
            .flat_map(|join| {
                join.on.iter().map(move |cond| {
                    let mut ends = [
                        self.canonical_column(&cond.left),
                        self.canonical_column(&cond.right),
                    ];
                    ends.sort();
                    format!("{:?} {}={}", join.join_type, ends[0], ends[1])
                })
            })
            .collect();

        let filters = self
            .filters
            .iter()
            .map(|f| {
                format!(
                    "{} {} {}",
                    self.canonical_column(&f.column),
                    f.op.symbol(),
                    f.value
                )
            })
            .collect();

        QueryShape {
            tables,
            columns,
            joins,
            filters,
            window: (self.limit, self.offset.filter(|&n| n > 0)),
        }
    }

    /// Same tables, projected columns, join conditions, filters and row
    /// window.
    pub fn logically_equivalent(&self, other: &SqlJson) -> bool {
        self.shape() == other.shape()
    }
}
