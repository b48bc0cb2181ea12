//! Cross-source composition: structural checks before any fetch, and
//! in-process joins over the fetched rows.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{registry, sqlite, standard_registry, CountingSource, BILLING, CRM, SALES};
use modelforge::config::QuerySettings;
use modelforge::error::EngineError;
use modelforge::executor::{QueryExecutor, SourceBinding};
use modelforge::federation::{compose, ExecutionPlan};
use modelforge::schema::{SchemaCollector, SchemaSnapshot};
use modelforge::source::DataSource;
use modelforge::sql::SqlJson;
use serde_json::{json, Value};

const ALL: [&str; 3] = ["sales", "crm", "billing"];

async fn snapshot() -> SchemaSnapshot {
    let registry = standard_registry();
    let sources = registry.resolve(&registry.ids()).unwrap();
    let collected = SchemaCollector::new(std::time::Duration::from_secs(1))
        .collect_all(&sources)
        .await
        .unwrap();
    SchemaSnapshot::build(collected.sources)
}

fn executor() -> QueryExecutor {
    QueryExecutor::new(Arc::new(standard_registry()), QuerySettings::default())
}

#[tokio::test]
async fn test_cycle_across_three_sources_fails_before_any_fetch() {
    let sales = CountingSource::new(sqlite("sales", SALES));
    let crm = CountingSource::new(sqlite("crm", CRM));
    let billing = CountingSource::new(sqlite("billing", BILLING));
    let executor = QueryExecutor::new(
        Arc::new(registry(vec![
            sales.clone() as Arc<dyn DataSource>,
            crm.clone() as Arc<dyn DataSource>,
            billing.clone() as Arc<dyn DataSource>,
        ])),
        QuerySettings::default(),
    );

    let sql = "SELECT o.id, i.amount, a.tier FROM sales.orders AS o \
               JOIN billing.invoices AS i ON i.order_id = o.id \
               JOIN crm.accounts AS a ON a.id = i.account_id AND a.customer_id = o.customer_id";
    let err = executor
        .execute(sql, &SourceBinding::sources(&ALL), None)
        .await
        .unwrap_err();

    match err {
        EngineError::CircularJoin { cycle } => {
            for table in ["sales.orders", "billing.invoices", "crm.accounts"] {
                assert!(cycle.iter().any(|t| t == table), "{} not in {:?}", table, cycle);
            }
            assert_eq!(cycle.first(), cycle.last());
        }
        other => panic!("expected CircularJoin, got {:?}", other),
    }
    assert_eq!(sales.fetch_count(), 0);
    assert_eq!(crm.fetch_count(), 0);
    assert_eq!(billing.fetch_count(), 0);
}

#[tokio::test]
async fn test_incompatible_join_types_fail_before_any_fetch() {
    let sales = CountingSource::new(sqlite("sales", SALES));
    let crm = CountingSource::new(sqlite("crm", CRM));
    let executor = QueryExecutor::new(
        Arc::new(registry(vec![
            sales.clone() as Arc<dyn DataSource>,
            crm.clone() as Arc<dyn DataSource>,
        ])),
        QuerySettings::default(),
    );

    let sql = "SELECT o.id FROM sales.orders AS o JOIN crm.accounts AS a ON a.opened = o.id";
    let err = executor
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), None)
        .await
        .unwrap_err();

    match err {
        EngineError::IncompatibleJoinTypes {
            left_type,
            right_type,
            ..
        } => {
            let mut types = [left_type, right_type];
            types.sort();
            assert_eq!(types, ["INTEGER".to_string(), "TIMESTAMP".to_string()]);
        }
        other => panic!("expected IncompatibleJoinTypes, got {:?}", other),
    }
    assert_eq!(sales.fetch_count() + crm.fetch_count(), 0);
}

#[tokio::test]
async fn test_inner_join_across_sources() {
    let sql = "SELECT o.id, a.tier FROM sales.orders AS o \
               JOIN crm.accounts AS a ON a.customer_id = o.customer_id \
               ORDER BY o.id";
    let result = executor()
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), None)
        .await
        .unwrap();

    assert_eq!(result.columns, vec!["id", "tier"]);
    assert_eq!(
        result.rows,
        vec![
            vec![json!(10), json!("gold")],
            vec![json!(11), json!("gold")],
            vec![json!(12), json!("silver")],
        ]
    );
    assert!(!result.row_cap_applied);
}

#[tokio::test]
async fn test_left_join_keeps_unmatched_rows() {
    let sql = "SELECT o.id, a.tier FROM sales.orders AS o \
               LEFT JOIN crm.accounts AS a ON a.customer_id = o.customer_id \
               ORDER BY o.id DESC";
    let result = executor()
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), None)
        .await
        .unwrap();

    assert_eq!(result.rows.len(), 4);
    assert_eq!(result.rows[0], vec![json!(13), Value::Null]);
    assert_eq!(result.rows[3], vec![json!(10), json!("gold")]);
}

#[tokio::test]
async fn test_filters_apply_to_both_sides() {
    let sql = "SELECT o.id, a.tier FROM sales.orders AS o \
               JOIN crm.accounts AS a ON a.customer_id = o.customer_id \
               WHERE a.tier = 'gold' AND o.status = 'shipped'";
    let result = executor()
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), None)
        .await
        .unwrap();

    assert_eq!(result.rows, vec![vec![json!(10), json!("gold")]]);
}

#[tokio::test]
async fn test_three_source_chain() {
    let sql = "SELECT i.id, o.status, a.tier FROM billing.invoices AS i \
               JOIN sales.orders AS o ON o.id = i.order_id \
               JOIN crm.accounts AS a ON a.id = i.account_id \
               ORDER BY i.id";
    let result = executor()
        .execute(sql, &SourceBinding::sources(&ALL), None)
        .await
        .unwrap();

    assert_eq!(
        result.rows,
        vec![
            vec![json!(1000), json!("shipped"), json!("gold")],
            vec![json!(1001), json!("shipped"), json!("silver")],
        ]
    );
}

#[tokio::test]
async fn test_same_table_under_two_aliases_joins() {
    let sql = "SELECT i.id, a1.tier, a2.tier FROM billing.invoices AS i \
               JOIN crm.accounts AS a1 ON a1.id = i.account_id \
               LEFT JOIN crm.accounts AS a2 ON a2.customer_id = i.order_id \
               ORDER BY i.id";
    let result = executor()
        .execute(sql, &SourceBinding::sources(&["billing", "crm"]), None)
        .await
        .unwrap();

    assert_eq!(
        result.rows,
        vec![
            vec![json!(1000), json!("gold"), Value::Null],
            vec![json!(1001), json!("silver"), Value::Null],
        ]
    );
}

#[tokio::test]
async fn test_offset_skips_joined_rows() {
    let sql = "SELECT o.id, a.tier FROM sales.orders AS o \
               JOIN crm.accounts AS a ON a.customer_id = o.customer_id \
               ORDER BY o.id LIMIT 1 OFFSET 1";
    let result = executor()
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), None)
        .await
        .unwrap();

    assert_eq!(result.rows, vec![vec![json!(11), json!("gold")]]);
}

#[tokio::test]
async fn test_row_cap_applies_after_the_join() {
    let sql = "SELECT o.id, a.tier FROM sales.orders AS o \
               JOIN crm.accounts AS a ON a.customer_id = o.customer_id";
    let result = executor()
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), Some(2))
        .await
        .unwrap();

    assert_eq!(result.rows.len(), 2);
    assert!(result.row_cap_applied);
}

#[tokio::test]
async fn test_aggregates_are_not_federated() {
    let sql = "SELECT a.tier, COUNT(*) FROM sales.orders AS o \
               JOIN crm.accounts AS a ON a.customer_id = o.customer_id GROUP BY a.tier";
    let err = executor()
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedFederation(_)));
}

#[tokio::test]
async fn test_unknown_table_is_a_query_error() {
    let sql = "SELECT o.id FROM sales.orders AS o JOIN crm.leads AS l ON l.id = o.id";
    let err = executor()
        .execute(sql, &SourceBinding::sources(&["sales", "crm"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::QueryExecution(_)));
}

#[tokio::test]
async fn test_plan_pushes_one_query_per_table() {
    let snapshot = snapshot().await;
    let query = SqlJson::parse(
        "SELECT o.id, a.tier FROM sales.orders AS o \
         JOIN crm.accounts AS a ON a.customer_id = o.customer_id \
         WHERE o.status = 'open'",
    )
    .unwrap();

    let ExecutionPlan::Federated(plan) = compose(&query, &snapshot, 1000).unwrap() else {
        panic!("expected a federated plan");
    };
    assert_eq!(plan.subqueries.len(), 2);

    let orders = plan.subqueries.iter().find(|s| s.source_id == "sales").unwrap();
    assert!(orders.sql.contains("FROM orders"));
    assert!(orders.sql.contains("WHERE status = 'open'"));

    let accounts = plan.subqueries.iter().find(|s| s.source_id == "crm").unwrap();
    assert!(accounts.sql.contains("FROM accounts"));
    assert!(!accounts.sql.contains("WHERE"));
}

#[tokio::test]
async fn test_query_on_one_source_is_not_federated() {
    let snapshot = snapshot().await;
    let query = SqlJson::parse(
        "SELECT o.id, c.name FROM sales.orders AS o JOIN sales.customers AS c ON c.id = o.customer_id",
    )
    .unwrap();

    match compose(&query, &snapshot, 1000).unwrap() {
        ExecutionPlan::SingleSource { source_id, sql } => {
            assert_eq!(source_id, "sales");
            assert!(sql.contains("FROM orders AS o"));
            assert!(!sql.contains("sales."));
        }
        other => panic!("expected a single-source plan, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unbounded_table_is_refused() {
    let snapshot = snapshot().await;
    let query = SqlJson::parse(
        "SELECT o.id, a.tier FROM sales.orders AS o JOIN crm.accounts AS a ON a.customer_id = o.customer_id",
    )
    .unwrap();

    assert!(matches!(
        compose(&query, &snapshot, 2),
        Err(EngineError::UnsupportedFederation(_))
    ));
}
