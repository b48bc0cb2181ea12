//! Schema collection, formatting and relationship inference.
//!
//! Sources are introspected by the [`SchemaCollector`], annotated with
//! declared and inferred relationships, and merged into an immutable
//! [`SchemaSnapshot`] whose markdown rendering is the AI engine's schema
//! context.

mod collector;
mod formatter;
pub mod inference;
mod types;

pub use collector::{CollectedSchemas, SchemaCollector};
pub use formatter::format_schema;
pub use inference::{infer_relationships, suggest_joins, JoinSuggestion};
pub use types::{
    fingerprint, ColumnSchema, ForeignKey, InferredRelationship, RelationshipOrigin,
    SchemaSnapshot, SchemaWarning, SourceSchema, TableLocation, TableSchema,
};
