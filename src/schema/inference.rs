//! Relationship discovery for one source.
//!
//! Declared foreign keys are taken as given. Everything else comes from
//! naming-convention rules, each with a base confidence, adjusted by column
//! type agreement and capped below the confidence of a declared constraint.

use std::collections::HashMap;

use inflector::Inflector;
use serde::Serialize;

use super::types::{InferredRelationship, RelationshipOrigin, SourceSchema, TableSchema};
use crate::sql::TypeFamily;

pub mod confidence {
    /// Relationships backed by a declared foreign key.
    pub const DB_CONSTRAINT: f64 = 0.98;
    /// Maximum confidence for inferred relationships.
    pub const INFERENCE_CAP: f64 = 0.95;
    /// Added when both columns are in the same type family.
    pub const TYPE_MATCH_BOOST: f64 = 0.05;
    /// Multiplier when the target table is named in the singular.
    pub const SINGULAR_FACTOR: f64 = 0.95;
}

/// Irregular plurals inflector gets wrong for table names.
static IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("analysis", "analyses"),
    ("criterion", "criteria"),
    ("datum", "data"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("status", "statuses"),
];

pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *singular || lower == *plural {
            return plural.to_string();
        }
    }
    lower.to_plural()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleMatcher {
    /// fk_customer_id -> customers.id
    FkPrefix,
    /// customer_id -> customers.id
    SuffixId,
    /// customer_key -> customers.customer_key
    SuffixKey,
    /// product_code -> products.product_code
    SuffixCode,
    /// region_sk -> regions.region_sk when that is its primary key
    ColumnNameMatch,
}

#[derive(Debug, Clone)]
struct InferenceRule {
    name: &'static str,
    base_confidence: f64,
    matcher: RuleMatcher,
}

fn default_rules() -> [InferenceRule; 5] {
    [
        InferenceRule {
            name: "fk_prefix",
            base_confidence: 0.90,
            matcher: RuleMatcher::FkPrefix,
        },
        InferenceRule {
            name: "suffix_id",
            base_confidence: 0.85,
            matcher: RuleMatcher::SuffixId,
        },
        InferenceRule {
            name: "suffix_key",
            base_confidence: 0.80,
            matcher: RuleMatcher::SuffixKey,
        },
        InferenceRule {
            name: "suffix_code",
            base_confidence: 0.75,
            matcher: RuleMatcher::SuffixCode,
        },
        InferenceRule {
            name: "column_name_match",
            base_confidence: 0.70,
            matcher: RuleMatcher::ColumnNameMatch,
        },
    ]
}

struct Candidate<'a> {
    table: &'a TableSchema,
    column: String,
    confidence: f64,
}

/// Tables of one source, by lowercase name.
struct TableIndex<'a> {
    by_name: HashMap<String, &'a TableSchema>,
}

impl<'a> TableIndex<'a> {
    fn new(tables: &'a [TableSchema]) -> Self {
        Self {
            by_name: tables.iter().map(|t| (t.name.to_lowercase(), t)).collect(),
        }
    }

    /// Plural form first at full confidence, then the base name as written.
    fn named(&self, base: &str, confidence: f64) -> Vec<(&'a TableSchema, f64)> {
        let mut out = Vec::new();
        let plural = pluralize(base);
        if let Some(t) = self.by_name.get(&plural) {
            out.push((*t, confidence));
        }
        if plural != base {
            if let Some(t) = self.by_name.get(base) {
                out.push((*t, confidence * confidence::SINGULAR_FACTOR));
            }
        }
        out
    }
}

/// Column of `target` a `from_column` most plausibly points at.
fn target_column(target: &TableSchema, preferred: &str) -> Option<String> {
    if let Some(col) = target.column(preferred) {
        return Some(col.name.clone());
    }
    match target.primary_key.as_slice() {
        [single] => Some(single.clone()),
        _ => None,
    }
}

impl InferenceRule {
    fn candidates<'a>(&self, column: &str, index: &TableIndex<'a>) -> Vec<Candidate<'a>> {
        let col = column.to_lowercase();
        let base = self.base_confidence;

        let found: Vec<(&'a TableSchema, f64, String)> = match self.matcher {
            RuleMatcher::FkPrefix => col
                .strip_prefix("fk_")
                .map(|rest| rest.strip_suffix("_id").unwrap_or(rest))
                .map(|stem| {
                    index
                        .named(stem, base)
                        .into_iter()
                        .map(|(t, c)| (t, c, "id".to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            RuleMatcher::SuffixId => col
                .strip_suffix("_id")
                .filter(|stem| !stem.is_empty())
                .map(|stem| {
                    index
                        .named(stem, base)
                        .into_iter()
                        .map(|(t, c)| (t, c, "id".to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            RuleMatcher::SuffixKey | RuleMatcher::SuffixCode => {
                let suffix = if self.matcher == RuleMatcher::SuffixKey {
                    "_key"
                } else {
                    "_code"
                };
                col.strip_suffix(suffix)
                    .filter(|stem| !stem.is_empty())
                    .map(|stem| {
                        index
                            .named(stem, base)
                            .into_iter()
                            .map(|(t, c)| (t, c, col.clone()))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            RuleMatcher::ColumnNameMatch => {
                let join_suffixes = ["_id", "_key", "_code", "_sk", "_bk"];
                if !join_suffixes.iter().any(|s| col.ends_with(s)) {
                    return Vec::new();
                }
                index
                    .by_name
                    .values()
                    .filter(|t| t.primary_key.len() == 1 && t.is_primary_key(&col))
                    .map(|t| (*t, base, col.clone()))
                    .collect()
            }
        };

        found
            .into_iter()
            .filter_map(|(table, confidence, preferred)| {
                target_column(table, &preferred).map(|column| Candidate {
                    table,
                    column,
                    confidence,
                })
            })
            .collect()
    }
}

/// Fill `inferred_relationships` on every table of a source.
///
/// Declared foreign keys come first; a column already covered by a foreign
/// key gets no inferred relationship.
pub fn infer_relationships(tables: &mut [TableSchema]) {
    let computed: Vec<Vec<InferredRelationship>> = {
        let index = TableIndex::new(tables);
        let rules = default_rules();
        tables
            .iter()
            .map(|table| relationships_for(table, &index, &rules))
            .collect()
    };

    for (table, relationships) in tables.iter_mut().zip(computed) {
        table.inferred_relationships = relationships;
    }
}

fn relationships_for(
    table: &TableSchema,
    index: &TableIndex<'_>,
    rules: &[InferenceRule],
) -> Vec<InferredRelationship> {
    let mut out: Vec<InferredRelationship> = Vec::new();

    for fk in &table.foreign_keys {
        for (from, to) in fk.columns.iter().zip(&fk.referenced_columns) {
            out.push(InferredRelationship {
                from_column: from.clone(),
                to_table: fk.referenced_table.clone(),
                to_column: to.clone(),
                origin: RelationshipOrigin::ForeignKey,
                confidence: confidence::DB_CONSTRAINT,
            });
        }
    }

    for column in &table.columns {
        let declared = table
            .foreign_keys
            .iter()
            .any(|fk| fk.columns.iter().any(|c| c.eq_ignore_ascii_case(&column.name)));
        let sole_key = table.primary_key.len() == 1 && table.is_primary_key(&column.name);
        if declared || sole_key {
            continue;
        }

        let from_family = TypeFamily::of(&column.data_type);
        let mut best: HashMap<(String, String), InferredRelationship> = HashMap::new();

        for rule in rules {
            for candidate in rule.candidates(&column.name, index) {
                if candidate.table.name == table.name {
                    continue;
                }
                let to_family = candidate
                    .table
                    .column(&candidate.column)
                    .map(|c| TypeFamily::of(&c.data_type))
                    .unwrap_or(TypeFamily::Unknown);

                let mut score = candidate.confidence;
                if from_family == to_family && from_family != TypeFamily::Unknown {
                    score += confidence::TYPE_MATCH_BOOST;
                }
                let score = score.min(confidence::INFERENCE_CAP);

                let key = (candidate.table.name.clone(), candidate.column.clone());
                let better = best.get(&key).map(|r| score > r.confidence).unwrap_or(true);
                if better {
                    best.insert(
                        key,
                        InferredRelationship {
                            from_column: column.name.clone(),
                            to_table: candidate.table.name.clone(),
                            to_column: candidate.column.clone(),
                            origin: RelationshipOrigin::Inferred(rule.name.to_string()),
                            confidence: score,
                        },
                    );
                }
            }
        }

        let mut found: Vec<_> = best.into_values().collect();
        found.sort_by(|a, b| a.to_table.cmp(&b.to_table).then(a.to_column.cmp(&b.to_column)));
        out.extend(found);
    }

    out
}

/// A ranked join candidate between two tables of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSuggestion {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub confidence: f64,
    pub origin: RelationshipOrigin,
}

/// Rank every known relationship in a source.
///
/// Pairs are deduplicated in either direction, keeping the strongest.
/// Ordered by descending confidence, then by name.
pub fn suggest_joins(source: &SourceSchema) -> Vec<JoinSuggestion> {
    let mut best: HashMap<(String, String), JoinSuggestion> = HashMap::new();

    for table in &source.tables {
        for rel in &table.inferred_relationships {
            let from = format!("{}.{}", table.name, rel.from_column).to_lowercase();
            let to = format!("{}.{}", rel.to_table, rel.to_column).to_lowercase();
            let key = if from <= to { (from, to) } else { (to, from) };

            let suggestion = JoinSuggestion {
                from_table: table.name.clone(),
                from_column: rel.from_column.clone(),
                to_table: rel.to_table.clone(),
                to_column: rel.to_column.clone(),
                confidence: rel.confidence,
                origin: rel.origin.clone(),
            };

            match best.get(&key) {
                Some(existing) if existing.confidence >= suggestion.confidence => {}
                _ => {
                    best.insert(key, suggestion);
                }
            }
        }
    }

    let mut ranked: Vec<JoinSuggestion> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.from_table.cmp(&b.from_table))
            .then_with(|| a.from_column.cmp(&b.from_column))
            .then_with(|| a.to_table.cmp(&b.to_table))
    });
    ranked
}
