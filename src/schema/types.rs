//! Collected schema types and the merged session snapshot.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::formatter::format_schema;

/// A column as reported by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    /// Declared type, vendor spelling.
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

/// A foreign key constraint declared in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Where a relationship came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "rule")]
pub enum RelationshipOrigin {
    /// Declared foreign key.
    ForeignKey,
    /// Naming-convention rule (`suffix_id`, `fk_prefix`, ...).
    Inferred(String),
}

/// A join path from one of this table's columns to another table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredRelationship {
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub origin: RelationshipOrigin,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    /// Vendor schema (e.g. `public`, `dbo`); `None` for SQLite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub inferred_relationships: Vec<InferredRelationship>,
    /// Row estimate, when the source can provide one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            inferred_relationships: Vec::new(),
            row_count: None,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Name to use when querying the table on its own source.
    pub fn physical_name(&self) -> String {
        match &self.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, self.name),
            _ => self.name.clone(),
        }
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// One collected source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSchema {
    pub source_id: String,
    pub source_label: String,
    pub tables: Vec<TableSchema>,
}

impl SourceSchema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| {
            t.name.eq_ignore_ascii_case(name) || t.physical_name().eq_ignore_ascii_case(name)
        })
    }
}

/// Non-fatal findings from schema collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SchemaWarning {
    /// The source was reachable but has no tables.
    EmptySchema { source_id: String },
    /// The source could not be collected and was left out of the session.
    SourceDropped { source_id: String, reason: String },
}

/// A table located inside a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct TableLocation<'a> {
    pub source: &'a SourceSchema,
    pub table: &'a TableSchema,
}

/// The merged schema a session works against. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub sources: Vec<SourceSchema>,
    /// More than one source; table names are namespaced by source label.
    pub cross_source: bool,
    /// Prompt artifact rendered from `sources`.
    pub markdown: String,
    /// SHA-256 of `markdown`, lowercase hex.
    pub fingerprint: String,
}

impl SchemaSnapshot {
    /// Build a snapshot. Sources are ordered by id so the rendered
    /// markdown does not depend on collection order.
    pub fn build(mut sources: Vec<SourceSchema>) -> Self {
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        let markdown = format_schema(&sources);
        let fingerprint = fingerprint(&markdown);

        Self {
            cross_source: sources.len() > 1,
            sources,
            markdown,
            fingerprint,
        }
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceSchema> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.source_id.clone()).collect()
    }

    pub fn table_count(&self) -> usize {
        self.sources.iter().map(|s| s.tables.len()).sum()
    }

    /// Name of a table as it appears in prompts and SQL.
    pub fn qualified_name(&self, source: &SourceSchema, table: &TableSchema) -> String {
        if self.cross_source {
            format!("{}.{}", source.source_label, table.name)
        } else {
            table.name.clone()
        }
    }

    /// Every table, as referenced in prompts and SQL.
    pub fn table_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| self.qualified_name(s, t)))
            .collect()
    }

    /// Resolve `label.table`, `schema.table` or a bare table name.
    ///
    /// A bare name resolves only if exactly one source has that table.
    pub fn resolve_table(&self, name: &str) -> Option<TableLocation<'_>> {
        if let Some((label, rest)) = name.split_once('.') {
            let labelled = self
                .sources
                .iter()
                .find(|s| s.source_label.eq_ignore_ascii_case(label))
                .and_then(|source| source.table(rest).map(|table| TableLocation { source, table }));
            if labelled.is_some() {
                return labelled;
            }
        }

        let mut matches = self.sources.iter().filter_map(|source| {
            source.table(name).map(|table| TableLocation { source, table })
        });
        let first = matches.next()?;
        match matches.next() {
            Some(_) => None,
            None => Some(first),
        }
    }
}

/// SHA-256 of a rendered schema, lowercase hex.
pub fn fingerprint(markdown: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(markdown.as_bytes());
    format!("{:x}", hasher.finalize())
}
