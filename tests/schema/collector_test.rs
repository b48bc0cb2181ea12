//! Collecting schemas from live and unreachable sources.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{sqlite, StalledSource, BILLING, CRM, SALES};
use modelforge::error::EngineError;
use modelforge::schema::{RelationshipOrigin, SchemaCollector, SchemaWarning};
use modelforge::source::{DataSource, SqliteSource};

fn collector() -> SchemaCollector {
    SchemaCollector::new(Duration::from_millis(500))
}

#[tokio::test]
async fn test_collects_tables_columns_and_keys() {
    let source = sqlite("sales", SALES);
    let (schema, warning) = collector().collect(source.as_ref()).await.unwrap();

    assert!(warning.is_none());
    assert_eq!(schema.source_id, "sales");

    let mut names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["customers", "orders"]);

    let orders = schema.table("orders").unwrap();
    assert_eq!(orders.primary_key, vec!["id"]);
    assert_eq!(orders.row_count, Some(4));
    assert!(orders.column("customer_id").unwrap().nullable);
    assert!(!schema.table("customers").unwrap().column("name").unwrap().nullable);

    let rel = &orders.inferred_relationships[0];
    assert_eq!(rel.from_column, "customer_id");
    assert_eq!(rel.to_table, "customers");
    assert_eq!(rel.origin, RelationshipOrigin::ForeignKey);
}

#[test]
fn test_fixtures_satisfy_their_constraints() {
    // Bundled SQLite enforces foreign keys, so every seed row must resolve.
    for (id, seed) in [("sales", SALES), ("crm", CRM), ("billing", BILLING)] {
        if let Err(err) = SqliteSource::in_memory(id, id, seed) {
            panic!("{} fixture failed to load: {}", id, err);
        }
    }
}

#[tokio::test]
async fn test_stalled_source_is_dropped_with_warning() {
    let sources: Vec<Arc<dyn DataSource>> = vec![
        sqlite("sales", SALES),
        StalledSource::new("billing"),
        sqlite("crm", CRM),
    ];

    let started = Instant::now();
    let collected = collector().collect_all(&sources).await.unwrap();

    // Sources are collected concurrently, so one stall costs one timeout.
    assert!(started.elapsed() < Duration::from_secs(2));

    let ids: Vec<&str> = collected.sources.iter().map(|s| s.source_id.as_str()).collect();
    assert_eq!(ids, vec!["sales", "crm"]);
    assert_eq!(collected.dropped, vec!["billing"]);
    assert!(matches!(
        collected.warnings.as_slice(),
        [SchemaWarning::SourceDropped { source_id, reason }]
            if source_id == "billing" && reason.contains("timed out")
    ));
}

#[tokio::test]
async fn test_no_reachable_source_fails() {
    let sources: Vec<Arc<dyn DataSource>> =
        vec![StalledSource::new("a"), StalledSource::new("b")];

    match collector().collect_all(&sources).await {
        Err(EngineError::NoSchemaAvailable { dropped }) => assert_eq!(dropped, vec!["a", "b"]),
        other => panic!("expected NoSchemaAvailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_single_stalled_source_is_unreachable() {
    let source = StalledSource::new("billing");
    let err = collector().collect(source.as_ref()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::SourceUnreachable { ref source_id, .. } if source_id == "billing"
    ));
}

#[tokio::test]
async fn test_empty_source_warns_but_is_kept() {
    let sources: Vec<Arc<dyn DataSource>> = vec![sqlite("scratch", ""), sqlite("sales", SALES)];
    let collected = collector().collect_all(&sources).await.unwrap();

    assert_eq!(collected.sources.len(), 2);
    assert!(collected.sources[0].tables.is_empty());
    assert_eq!(
        collected.warnings,
        vec![SchemaWarning::EmptySchema {
            source_id: "scratch".into()
        }]
    );
    assert!(collected.dropped.is_empty());
}

#[tokio::test]
async fn test_inferred_relationship_without_declared_key() {
    let source = sqlite(
        "shop",
        "CREATE TABLE products (id INTEGER PRIMARY KEY, title TEXT);
         CREATE TABLE line_items (id INTEGER PRIMARY KEY, product_id INTEGER, qty INTEGER);",
    );
    let (schema, _) = collector().collect(source.as_ref()).await.unwrap();

    let rel = &schema.table("line_items").unwrap().inferred_relationships[0];
    assert_eq!(rel.to_table, "products");
    assert_eq!(rel.to_column, "id");
    assert!(matches!(rel.origin, RelationshipOrigin::Inferred(_)));
    assert!(rel.confidence <= 0.95);
}
