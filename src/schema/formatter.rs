//! Render collected schemas as the markdown prompt artifact.
//!
//! Output is a pure function of the input: no clocks, no map iteration
//! order, no locale. A restored session's cached prompt stays valid as long
//! as the schema is unchanged.

use std::fmt::Write;

use super::types::{RelationshipOrigin, SourceSchema, TableSchema};

/// Render one or more sources. With more than one source every table
/// reference is written `label.table`.
pub fn format_schema(sources: &[SourceSchema]) -> String {
    let namespaced = sources.len() > 1;
    let mut out = String::new();

    let labels: Vec<&str> = sources.iter().map(|s| s.source_label.as_str()).collect();
    let _ = writeln!(out, "# Schema: {}", labels.join(" + "));

    if namespaced {
        out.push_str(
            "\nTables come from several databases and are namespaced by source label. \
             Always write table references as `label.table`.\n",
        );
    }

    for source in sources {
        let table_heading = if namespaced {
            let _ = writeln!(out, "\n## Source: {}", source.source_label);
            "###"
        } else {
            "##"
        };

        if source.tables.is_empty() {
            out.push_str("\n_(no tables)_\n");
            continue;
        }

        for table in &source.tables {
            let qualify = |name: &str| -> String {
                if namespaced {
                    format!("{}.{}", source.source_label, name)
                } else {
                    name.to_string()
                }
            };
            write_table(&mut out, table_heading, table, &qualify);
        }
    }

    out
}

fn write_table(out: &mut String, heading: &str, table: &TableSchema, qualify: &dyn Fn(&str) -> String) {
    let table_name = qualify(&table.name);
    match table.row_count {
        Some(rows) => {
            let _ = writeln!(out, "\n{} {} (~{} rows)\n", heading, table_name, rows);
        }
        None => {
            let _ = writeln!(out, "\n{} {}\n", heading, table_name);
        }
    }

    out.push_str("| Column | Type | Nullable | Key |\n");
    out.push_str("|--------|------|----------|-----|\n");

    for column in &table.columns {
        let mut keys = Vec::new();
        if table.is_primary_key(&column.name) {
            keys.push("PK".to_string());
        }
        for fk in &table.foreign_keys {
            if let Some(pos) = fk.columns.iter().position(|c| c == &column.name) {
                let target_col = fk.referenced_columns.get(pos).map(String::as_str).unwrap_or("?");
                keys.push(format!("FK {}.{}", qualify(&fk.referenced_table), target_col));
            }
        }

        let data_type = if column.data_type.is_empty() {
            "ANY"
        } else {
            column.data_type.as_str()
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            column.name,
            data_type,
            if column.nullable { "yes" } else { "no" },
            keys.join(", ")
        );
    }

    if table.inferred_relationships.is_empty() {
        return;
    }

    out.push_str("\nRelationships:\n");
    for rel in &table.inferred_relationships {
        let origin = match &rel.origin {
            RelationshipOrigin::ForeignKey => "foreign key".to_string(),
            RelationshipOrigin::Inferred(rule) => {
                format!("inferred: {}, {:.2}", rule, rel.confidence)
            }
        };
        let _ = writeln!(
            out,
            "- {}.{} -> {}.{} ({})",
            table_name,
            rel.from_column,
            qualify(&rel.to_table),
            rel.to_column,
            origin
        );
    }
}
