//! Saving sessions: validation before the durable write, atomicity, and
//! removal of the ephemeral session only after the write commits.

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Duration;
use common::{harness, harness_with, standard_registry, FailingStore, ScriptedAi, ORDERS_REPLY};
use modelforge::error::EngineError;
use modelforge::session::{ModelDraft, SessionKey};
use modelforge::sql::SqlJson;
use modelforge::storage::{DurableStore, StorageError};

fn sales_key() -> SessionKey {
    SessionKey::new(&["sales"], "u1").unwrap()
}

/// The stored mirror must render back to a query equivalent to the stored text.
fn assert_mirror_matches_text(mirror: &SqlJson, sql_text: &str) {
    let rendered = SqlJson::parse(&mirror.to_sql()).unwrap();
    let original = SqlJson::parse(sql_text).unwrap();
    assert!(
        rendered.logically_equivalent(&original),
        "{} does not match {}",
        mirror.to_sql(),
        sql_text
    );
}

fn draft(sql: &str) -> ModelDraft {
    ModelDraft {
        sql_text: sql.into(),
        ..ModelDraft::default()
    }
}

#[tokio::test]
async fn test_save_moves_session_into_durable_storage() {
    let h = harness(ScriptedAi::new([ORDERS_REPLY]));
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    let reply = h.engine.send_message(&key, "orders with status").await.unwrap();
    h.engine
        .update_draft(&key, reply.draft_for("m1").unwrap())
        .unwrap();
    let before = h.engine.get_session_state(&key).unwrap();

    let model = h.engine.save_session(&key, "  Order status  ").await.unwrap();

    assert_eq!(model.title, "Order status");
    assert_eq!(model.sql_text, "SELECT id, status FROM orders");
    assert_mirror_matches_text(model.sql_json.as_ref().unwrap(), &model.sql_text);
    assert_eq!(model.source_ids, vec!["sales"]);
    assert_eq!(model.user_id, "u1");
    assert_eq!(model.created_from_conversation_id, before.id);

    assert!(matches!(
        h.engine.get_session_state(&key),
        Err(EngineError::NoActiveSession { .. })
    ));

    let messages = h.durable.conversation_messages(before.id).unwrap();
    assert_eq!(messages, before.messages);

    assert_eq!(h.engine.data_model(model.id).await.unwrap(), model);
    assert_eq!(h.engine.list_models("u1").await.unwrap(), vec![model.clone()]);
    assert!(h.engine.list_models("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_write_keeps_session_active() {
    let store = FailingStore::new();
    let h = harness_with(standard_registry(), ScriptedAi::new([ORDERS_REPLY]), store.clone());
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();
    h.engine.send_message(&key, "orders").await.unwrap();
    h.engine
        .update_draft(&key, draft("SELECT id FROM orders"))
        .unwrap();
    let before = h.engine.get_session_state(&key).unwrap();

    let err = h.engine.save_session(&key, "Orders").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Storage(StorageError::Unavailable(_))
    ));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);

    let after = h.engine.get_session_state(&key).unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.messages, before.messages);
    assert_eq!(after.draft, before.draft);

    // The client may retry.
    assert!(h.engine.save_session(&key, "Orders").await.is_err());
    assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_title() {
    let h = harness(ScriptedAi::default());
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();
    h.engine
        .update_draft(&key, draft("SELECT id FROM orders"))
        .unwrap();

    for title in ["", "   "] {
        assert!(matches!(
            h.engine.save_session(&key, title).await,
            Err(EngineError::MissingTitle)
        ));
    }
    assert!(h.engine.get_session_state(&key).is_ok());
}

#[tokio::test]
async fn test_empty_draft() {
    let h = harness(ScriptedAi::default());
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    assert!(matches!(
        h.engine.save_session(&key, "Orders").await,
        Err(EngineError::EmptyDraft)
    ));
    assert!(h.engine.get_session_state(&key).is_ok());
}

#[tokio::test]
async fn test_draft_that_fails_to_run_is_not_saved() {
    let store = FailingStore::new();
    let h = harness_with(standard_registry(), ScriptedAi::default(), store.clone());
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    h.engine
        .update_draft(&key, draft("SELECT no_such_column FROM orders"))
        .unwrap();
    assert!(matches!(
        h.engine.save_session(&key, "Broken").await,
        Err(EngineError::QueryExecution(_))
    ));

    h.engine
        .update_draft(&key, draft("DELETE FROM orders"))
        .unwrap();
    assert!(matches!(
        h.engine.save_session(&key, "Destructive").await,
        Err(EngineError::ReadOnlyViolation(_))
    ));

    assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
    assert!(h.engine.get_session_state(&key).is_ok());
}

#[tokio::test]
async fn test_save_without_session() {
    let h = harness(ScriptedAi::default());
    assert!(matches!(
        h.engine.save_session(&sales_key(), "Orders").await,
        Err(EngineError::NoActiveSession { .. })
    ));
}

#[tokio::test]
async fn test_expired_session_cannot_be_saved() {
    let h = harness(ScriptedAi::default());
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();
    h.engine
        .update_draft(&key, draft("SELECT id FROM orders"))
        .unwrap();

    h.clock.advance(Duration::hours(25));
    assert!(matches!(
        h.engine.save_session(&key, "Orders").await,
        Err(EngineError::NoActiveSession { .. })
    ));
    assert!(h.engine.list_models("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cross_source_model() {
    let h = harness(ScriptedAi::default());
    let key = SessionKey::new(&["sales", "crm"], "u1").unwrap();
    let greeting = h
        .engine
        .initialize_session(&["sales", "crm"], "u1")
        .await
        .unwrap();
    assert!(greeting.cross_source);

    h.engine
        .update_draft(
            &key,
            draft(
                "SELECT o.id, a.tier FROM sales.orders AS o \
                 JOIN crm.accounts AS a ON a.customer_id = o.customer_id \
                 WHERE a.tier = 'gold' ORDER BY o.id LIMIT 5 OFFSET 1",
            ),
        )
        .unwrap();
    let model = h.engine.save_session(&key, "Orders by tier").await.unwrap();

    assert_eq!(model.source_ids, vec!["crm", "sales"]);
    let json = model.sql_json.unwrap();
    assert_mirror_matches_text(&json, &model.sql_text);
    assert_eq!(json.offset, Some(1));
    assert_eq!(json.from.name, "sales.orders");
    assert_eq!(json.joins[0].table.name, "crm.accounts");
}

#[tokio::test]
async fn test_saved_model_survives_a_new_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models.db");

    let durable = Arc::new(modelforge::storage::SqliteDurableStore::open(&path).unwrap());
    let h = harness_with(standard_registry(), ScriptedAi::default(), durable);
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();
    h.engine
        .update_draft(&key, draft("SELECT id FROM customers"))
        .unwrap();
    let model = h.engine.save_session(&key, "Customers").await.unwrap();
    drop(h);

    let reopened = Arc::new(modelforge::storage::SqliteDurableStore::open(&path).unwrap());
    let h = harness_with(standard_registry(), ScriptedAi::default(), reopened);
    assert_eq!(h.engine.data_model(model.id).await.unwrap(), model);
}
