//! End-to-end flows through the engine facade.

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    harness, harness_with, registry, sqlite, standard_registry, test_settings, ScriptedAi,
    StalledSource, ORDERS_REPLY, QUESTION_REPLY, SALES,
};
use modelforge::engine::{ModelingEngine, QueryRequest};
use modelforge::error::{EngineError, EngineResult};
use modelforge::gate::{AccessGate, LimitKind};
use modelforge::schema::{RelationshipOrigin, SchemaWarning};
use modelforge::session::{Role, SessionKey};
use modelforge::source::DataSource;
use modelforge::storage::SqliteDurableStore;
use serde_json::json;

#[tokio::test]
async fn test_full_modelling_flow() {
    let h = harness(ScriptedAi::new([QUESTION_REPLY, ORDERS_REPLY]));

    let greeting = h.engine.initialize_session(&["sales"], "ada").await.unwrap();
    assert!(!greeting.restored);
    assert!(!greeting.cross_source);
    assert_eq!(greeting.tables, vec!["customers", "orders"]);
    assert_eq!(
        greeting.greeting,
        "Connected to sales (2 tables). Describe the data model you want to build."
    );
    let key = greeting.key.clone();

    h.engine.send_message(&key, "I want orders").await.unwrap();
    let reply = h.engine.send_message(&key, "id and status").await.unwrap();
    h.engine
        .update_draft(&key, reply.draft_for("m1").unwrap())
        .unwrap();

    let preview = h
        .engine
        .execute_query(&QueryRequest {
            sql: "SELECT id, status FROM orders ORDER BY id".into(),
            user_id: "ada".into(),
            session: Some(key.clone()),
            row_cap: Some(2),
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(preview.rows, vec![vec![json!(10), json!("shipped")], vec![json!(11), json!("open")]]);
    assert!(preview.row_cap_applied);

    let model = h.engine.save_session(&key, "Orders").await.unwrap();
    assert_eq!(model.sql_text, "SELECT id, status FROM orders");
    assert!(h.engine.get_session_state(&key).is_err());

    // Saving ended the session; the same key starts over.
    let again = h.engine.initialize_session(&["sales"], "ada").await.unwrap();
    assert!(!again.restored);
    assert_ne!(again.session_id, greeting.session_id);
}

#[tokio::test]
async fn test_initialize_restores_live_session() {
    let h = harness(ScriptedAi::new([QUESTION_REPLY]));
    let first = h.engine.initialize_session(&["sales"], "ada").await.unwrap();
    h.engine.send_message(&first.key, "hello").await.unwrap();

    let second = h.engine.initialize_session(&["sales"], "ada").await.unwrap();
    assert!(second.restored);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.fingerprint, first.fingerprint);

    let session = h.engine.get_session_state(&second.key).unwrap();
    let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Ai]);
}

#[tokio::test]
async fn test_unreachable_source_is_named_in_greeting() {
    let h = harness_with(
        registry(vec![
            sqlite("sales", SALES),
            StalledSource::new("billing") as Arc<dyn DataSource>,
        ]),
        ScriptedAi::default(),
        Arc::new(SqliteDurableStore::open_in_memory().unwrap()),
    );

    let greeting = h
        .engine
        .initialize_session(&["sales", "billing"], "ada")
        .await
        .unwrap();

    assert_eq!(greeting.key.source_set, "billing+sales");
    assert!(!greeting.cross_source);
    assert_eq!(
        greeting.greeting,
        "Connected to sales (2 tables). Describe the data model you want to build. \
         Unavailable right now: billing."
    );
    assert!(matches!(
        greeting.warnings.as_slice(),
        [SchemaWarning::SourceDropped { source_id, .. }] if source_id == "billing"
    ));

    let session = h.engine.get_session_state(&greeting.key).unwrap();
    assert_eq!(session.source_ids(), vec!["sales"]);
    assert!(!session.schema.markdown.contains("billing"));
}

#[tokio::test]
async fn test_no_reachable_source() {
    let h = harness_with(
        registry(vec![StalledSource::new("billing") as Arc<dyn DataSource>]),
        ScriptedAi::default(),
        Arc::new(SqliteDurableStore::open_in_memory().unwrap()),
    );
    assert!(matches!(
        h.engine.initialize_session(&["billing"], "ada").await,
        Err(EngineError::NoSchemaAvailable { .. })
    ));
    let key = SessionKey::new(&["billing"], "ada").unwrap();
    assert!(h.engine.get_session_state(&key).is_err());
}

#[tokio::test]
async fn test_unknown_source() {
    let h = harness(ScriptedAi::default());
    assert!(matches!(
        h.engine.initialize_session(&["warehouse"], "ada").await,
        Err(EngineError::UnknownSource(_))
    ));
}

#[tokio::test]
async fn test_cross_source_session_prompt_is_namespaced() {
    let h = harness(ScriptedAi::new([QUESTION_REPLY]));
    let greeting = h
        .engine
        .initialize_session(&["sales", "crm"], "ada")
        .await
        .unwrap();
    assert!(greeting.cross_source);
    assert_eq!(
        greeting.tables,
        vec!["crm.accounts", "sales.customers", "sales.orders"]
    );

    h.engine.send_message(&greeting.key, "hi").await.unwrap();
    let requests = h.ai.requests.lock().unwrap();
    let system = &requests[0].messages[0].content;
    assert!(system.contains("### crm.accounts"));
    assert!(system.contains("### sales.orders"));
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = harness(ScriptedAi::default());
    let greeting = h.engine.initialize_session(&["sales"], "ada").await.unwrap();

    h.engine.cancel_session(&greeting.key);
    h.engine.cancel_session(&greeting.key);
    assert!(matches!(
        h.engine.get_session_state(&greeting.key),
        Err(EngineError::NoActiveSession { .. })
    ));
}

#[tokio::test]
async fn test_suggest_joins() {
    let h = harness(ScriptedAi::default());

    let joins = h.engine.suggest_joins("sales").await.unwrap();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].from_table, "orders");
    assert_eq!(joins[0].from_column, "customer_id");
    assert_eq!(joins[0].to_table, "customers");
    assert_eq!(joins[0].origin, RelationshipOrigin::ForeignKey);

    // A single table has nothing to join to.
    assert!(h.engine.suggest_joins("crm").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_draft_with_mismatched_structure_is_rejected() {
    let h = harness(ScriptedAi::default());
    let greeting = h.engine.initialize_session(&["sales"], "ada").await.unwrap();

    let mut draft = modelforge::session::ModelDraft {
        sql_text: "SELECT id FROM orders".into(),
        ..Default::default()
    };
    draft.sql_json = Some(modelforge::sql::SqlJson::parse("SELECT name FROM customers").unwrap());

    assert!(matches!(
        h.engine.update_draft(&greeting.key, draft),
        Err(EngineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_missing_model() {
    let h = harness(ScriptedAi::default());
    assert!(matches!(
        h.engine.data_model(uuid::Uuid::new_v4()).await,
        Err(EngineError::Storage(_))
    ));
}

/// Denies `crm` and allows two queries per user.
#[derive(Default)]
struct StrictGate {
    queries: AtomicUsize,
}

#[async_trait]
impl AccessGate for StrictGate {
    async fn authorize(&self, user_id: &str, source_ids: &[String]) -> EngineResult<()> {
        if source_ids.iter().any(|id| id == "crm") {
            return Err(EngineError::AccessDenied(format!("{} may not read crm", user_id)));
        }
        Ok(())
    }

    async fn enforce_limit(&self, _user_id: &str, kind: LimitKind) -> EngineResult<()> {
        if kind == LimitKind::Queries && self.queries.fetch_add(1, Ordering::SeqCst) >= 2 {
            return Err(EngineError::LimitExceeded(kind));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_gates_are_consulted() {
    let engine = ModelingEngine::builder(test_settings())
        .registry(standard_registry())
        .ai_engine(Arc::new(ScriptedAi::default()))
        .durable(Arc::new(SqliteDurableStore::open_in_memory().unwrap()))
        .gate(Arc::new(StrictGate::default()))
        .build()
        .unwrap();

    assert!(matches!(
        engine.initialize_session(&["sales", "crm"], "ada").await,
        Err(EngineError::AccessDenied(_))
    ));
    engine.initialize_session(&["sales"], "ada").await.unwrap();

    let request = QueryRequest {
        sql: "SELECT id FROM orders".into(),
        source_ids: vec!["sales".into()],
        user_id: "ada".into(),
        ..QueryRequest::default()
    };
    engine.execute_query(&request).await.unwrap();
    engine.execute_query(&request).await.unwrap();
    assert!(matches!(
        engine.execute_query(&request).await,
        Err(EngineError::LimitExceeded(LimitKind::Queries))
    ));

    let denied = QueryRequest {
        source_ids: vec!["crm".into()],
        ..request
    };
    assert!(matches!(
        engine.execute_query(&denied).await,
        Err(EngineError::AccessDenied(_))
    ));
}
