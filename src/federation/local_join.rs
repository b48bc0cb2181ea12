//! In-process evaluation of a federated plan over fetched sub-query rows.
//!
//! Joins are hash joins on normalized key values; a NULL key never matches.
//! Every filter is evaluated again here, whether or not it was pushed down.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::source::RowSet;
use crate::sql::{FilterOp, JoinType};

/// A column of one fetched table: `tables[table].columns[column]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub table: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalJoin {
    pub join_type: JoinType,
    /// The table being joined in; every earlier table is already joined.
    pub table: usize,
    /// `(earlier side, joined side)` equality pairs.
    pub keys: Vec<(Slot, Slot)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalFilter {
    pub slot: Slot,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlan {
    pub joins: Vec<LocalJoin>,
    pub filters: Vec<LocalFilter>,
    pub order_by: Vec<(Slot, bool)>,
    pub projection: Vec<(String, Slot)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One output row before projection: a row index per table, `None` where
/// an outer join supplied NULLs.
type Tuple = Vec<Option<usize>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Int(i64),
    Float(u64),
    Text(String),
    Bool(bool),
}

fn key_of(value: &Value) -> Option<Key> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Key::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Key::Int(i))
            } else {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(Key::Int(f as i64))
                } else {
                    Some(Key::Float(f.to_bits()))
                }
            }
        }
        Value::String(s) => Some(Key::Text(s.clone())),
        other => Some(Key::Text(other.to_string())),
    }
}

static NULL: Value = Value::Null;

fn value_at<'a>(tables: &'a [RowSet], tuple: &Tuple, slot: Slot) -> &'a Value {
    tuple[slot.table]
        .and_then(|row| tables[slot.table].rows.get(row))
        .and_then(|row| row.get(slot.column))
        .unwrap_or(&NULL)
}

fn composite_key<'a>(values: impl Iterator<Item = &'a Value>) -> Option<Vec<Key>> {
    values.map(key_of).collect()
}

fn hash_join(tables: &[RowSet], tuples: Vec<Tuple>, join: &LocalJoin) -> Vec<Tuple> {
    let incoming = &tables[join.table];

    let mut index: HashMap<Vec<Key>, Vec<usize>> = HashMap::new();
    for (i, row) in incoming.rows.iter().enumerate() {
        let key = composite_key(
            join.keys
                .iter()
                .map(|(_, right)| row.get(right.column).unwrap_or(&NULL)),
        );
        if let Some(key) = key {
            index.entry(key).or_default().push(i);
        }
    }

    let keep_left = matches!(join.join_type, JoinType::Left | JoinType::Full);
    let keep_right = matches!(join.join_type, JoinType::Right | JoinType::Full);
    let mut matched_right = vec![false; incoming.rows.len()];
    let mut out = Vec::new();

    for tuple in tuples {
        let key = composite_key(join.keys.iter().map(|(left, _)| value_at(tables, &tuple, *left)));
        let matches = key.as_ref().and_then(|k| index.get(k));

        match matches {
            Some(rows) => {
                for &row in rows {
                    matched_right[row] = true;
                    let mut joined = tuple.clone();
                    joined[join.table] = Some(row);
                    out.push(joined);
                }
            }
            None if keep_left => out.push(tuple),
            None => {}
        }
    }

    if keep_right {
        let width = tables.len();
        for (row, matched) in matched_right.into_iter().enumerate() {
            if !matched {
                let mut tuple = vec![None; width];
                tuple[join.table] = Some(row);
                out.push(tuple);
            }
        }
    }

    out
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// SQL comparison. `None` when either side is NULL or the values are not
/// comparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => as_f64(a)?.partial_cmp(&as_f64(b)?),
    }
}

/// Translate a LIKE pattern. Matching is ASCII case-insensitive.
fn like_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

struct CompiledFilter<'a> {
    filter: &'a LocalFilter,
    like: Option<Regex>,
}

impl CompiledFilter<'_> {
    fn matches(&self, value: &Value) -> bool {
        let target = &self.filter.value;
        match self.filter.op {
            FilterOp::IsNull => value.is_null(),
            FilterOp::IsNotNull => !value.is_null(),
            FilterOp::Eq => compare(value, target) == Some(Ordering::Equal),
            FilterOp::NotEq => matches!(compare(value, target), Some(o) if o != Ordering::Equal),
            FilterOp::Lt => compare(value, target) == Some(Ordering::Less),
            FilterOp::LtEq => matches!(compare(value, target), Some(o) if o != Ordering::Greater),
            FilterOp::Gt => compare(value, target) == Some(Ordering::Greater),
            FilterOp::GtEq => matches!(compare(value, target), Some(o) if o != Ordering::Less),
            FilterOp::Like => match (&self.like, text_of(value)) {
                (Some(re), Some(text)) => re.is_match(&text),
                _ => false,
            },
        }
    }
}

/// Join, filter, sort, window and project the fetched tables.
pub fn evaluate(plan: &LocalPlan, tables: &[RowSet]) -> RowSet {
    let width = tables.len();

    let mut tuples: Vec<Tuple> = match tables.first() {
        Some(first) => (0..first.rows.len())
            .map(|row| {
                let mut tuple = vec![None; width];
                tuple[0] = Some(row);
                tuple
            })
            .collect(),
        None => Vec::new(),
    };

    for join in &plan.joins {
        tuples = hash_join(tables, tuples, join);
    }

    let filters: Vec<CompiledFilter<'_>> = plan
        .filters
        .iter()
        .map(|filter| CompiledFilter {
            like: match (&filter.op, &filter.value) {
                (FilterOp::Like, Value::String(p)) => like_regex(p),
                _ => None,
            },
            filter,
        })
        .collect();
    tuples.retain(|tuple| {
        filters
            .iter()
            .all(|f| f.matches(value_at(tables, tuple, f.filter.slot)))
    });

    if !plan.order_by.is_empty() {
        tuples.sort_by(|a, b| {
            for (slot, descending) in &plan.order_by {
                let (x, y) = (value_at(tables, a, *slot), value_at(tables, b, *slot));
                // NULLs sort first ascending.
                let ord = match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => compare(x, y).unwrap_or(Ordering::Equal),
                };
                let ord = if *descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    if let Some(offset) = plan.offset {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX).min(tuples.len());
        tuples.drain(..skip);
    }
    if let Some(limit) = plan.limit {
        tuples.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    RowSet {
        columns: plan.projection.iter().map(|(name, _)| name.clone()).collect(),
        rows: tuples
            .iter()
            .map(|tuple| {
                plan.projection
                    .iter()
                    .map(|(_, slot)| value_at(tables, tuple, *slot).clone())
                    .collect()
            })
            .collect(),
    }
}
