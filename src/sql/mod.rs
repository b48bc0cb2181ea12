//! SQL handling: the structural `SqlJson` model, rendering, parsing, the
//! read-only guard and column type families.

pub mod model;
mod parse;
mod render;
pub mod types;

pub use model::{
    ColumnRef, Filter, FilterOp, Join, JoinCondition, JoinType, OrderBy, QueryShape, SelectColumn,
    SqlJson, TableRef,
};
pub use parse::{ensure_read_only, SqlError};
pub use render::{quote_ident, quote_qualified, render_literal};
pub use types::{types_joinable, TypeFamily};
