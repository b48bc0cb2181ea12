//! Render `SqlJson` back to SQL text.
//!
//! Output is dialect-neutral ANSI: identifiers are left bare when they are
//! plain words and double-quoted otherwise.

use std::fmt::Write;

use super::model::{ColumnRef, Filter, SqlJson, TableRef};

const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "by", "case", "cross", "desc", "distinct", "end", "from", "full",
    "group", "having", "in", "inner", "is", "join", "left", "like", "limit", "not", "null", "on",
    "or", "order", "outer", "right", "select", "table", "then", "to", "union", "user", "when",
    "where", "with",
];

/// Quote one identifier part if it is not a plain, non-reserved word.
pub fn quote_ident(part: &str) -> String {
    let mut chars = part.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&part.to_ascii_lowercase().as_str());

    if plain {
        part.to_string()
    } else {
        format!("\"{}\"", part.replace('"', "\"\""))
    }
}

/// Quote each dot-separated part of a qualified name.
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Render a JSON scalar as a SQL literal.
pub fn render_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(true) => "TRUE".to_string(),
        serde_json::Value::Bool(false) => "FALSE".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn render_column(column: &ColumnRef) -> String {
    match &column.table {
        Some(table) => format!("{}.{}", quote_qualified(table), render_column_name(&column.column)),
        None => render_column_name(&column.column),
    }
}

fn render_column_name(name: &str) -> String {
    if name == "*" {
        "*".to_string()
    } else {
        quote_ident(name)
    }
}

fn render_table(table: &TableRef) -> String {
    match &table.alias {
        Some(alias) => format!("{} AS {}", quote_qualified(&table.name), quote_ident(alias)),
        None => quote_qualified(&table.name),
    }
}

fn render_filter(filter: &Filter) -> String {
    if filter.op.takes_value() {
        format!(
            "{} {} {}",
            render_column(&filter.column),
            filter.op.symbol(),
            render_literal(&filter.value)
        )
    } else {
        format!("{} {}", render_column(&filter.column), filter.op.symbol())
    }
}

impl SqlJson {
    /// Render as a single-line SELECT statement.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        if self.select.is_empty() {
            sql.push('*');
        } else {
            let items: Vec<String> = self
                .select
                .iter()
                .map(|item| {
                    let col = render_column(&item.column_ref());
                    match &item.alias {
                        Some(alias) => format!("{} AS {}", col, quote_ident(alias)),
                        None => col,
                    }
                })
                .collect();
            sql.push_str(&items.join(", "));
        }

        let _ = write!(sql, " FROM {}", render_table(&self.from));

        for join in &self.joins {
            let conditions: Vec<String> = join
                .on
                .iter()
                .map(|c| format!("{} = {}", render_column(&c.left), render_column(&c.right)))
                .collect();
            let _ = write!(
                sql,
                " {} {} ON {}",
                join.join_type.keyword(),
                render_table(&join.table),
                conditions.join(" AND ")
            );
        }

        if !self.filters.is_empty() {
            let filters: Vec<String> = self.filters.iter().map(render_filter).collect();
            let _ = write!(sql, " WHERE {}", filters.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    if o.descending {
                        format!("{} DESC", render_column(&o.column))
                    } else {
                        render_column(&o.column)
                    }
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", keys.join(", "));
        }

        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        if let Some(offset) = self.offset {
            let _ = write!(sql, " OFFSET {}", offset);
        }

        sql
    }
}
