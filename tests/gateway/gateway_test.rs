//! Conversation turns: ordering, reply validation, timeouts and
//! cancellation during an in-flight AI call.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{harness, ScriptedAi, ORDERS_REPLY, QUESTION_REPLY};
use modelforge::ai::{AiError, MessageRole};
use modelforge::error::EngineError;
use modelforge::session::{Role, SessionKey};

fn sales_key() -> SessionKey {
    SessionKey::new(&["sales"], "u1").unwrap()
}

#[tokio::test]
async fn test_turns_alternate_in_order() {
    let h = harness(ScriptedAi::new([QUESTION_REPLY, ORDERS_REPLY]));
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    let first = h.engine.send_message(&key, "I need an orders model").await.unwrap();
    assert!(first.models.is_empty());
    assert_eq!(first.analysis, "Which columns do you need?");

    let second = h.engine.send_message(&key, "id and status").await.unwrap();
    assert_eq!(second.models.len(), 1);
    assert_eq!(second.sql[0].text, "SELECT id, status FROM orders");

    let session = h.engine.get_session_state(&key).unwrap();
    let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Ai, Role::User, Role::Ai]);
    assert_eq!(session.messages[0].text, "I need an orders model");
    assert_eq!(session.messages[3].payload.as_ref(), Some(&second));
    assert!(session
        .messages
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_request_replays_schema_and_history() {
    let h = harness(ScriptedAi::new([QUESTION_REPLY, QUESTION_REPLY]));
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    h.engine.send_message(&key, "first").await.unwrap();
    h.engine.send_message(&key, "second").await.unwrap();

    let requests = h.ai.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);

    let last = &requests[1].messages;
    assert_eq!(last.len(), 4);
    assert_eq!(last[0].role, MessageRole::System);
    assert!(last[0].content.contains("orders"));
    assert!(last[0].content.contains("customers"));
    assert_eq!(last[1].content, "first");
    assert_eq!(last[2].role, MessageRole::Assistant);
    assert_eq!(last[3].content, "second");
}

#[tokio::test]
async fn test_malformed_reply_keeps_user_message() {
    let bad = r#"{"analysis": "x", "models": [{"id": "m1"}], "sql": [{"modelId": "m2", "text": "SELECT 1"}]}"#;
    let h = harness(ScriptedAi::new([bad]));
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    let err = h.engine.send_message(&key, "build it").await.unwrap_err();
    match err {
        EngineError::MalformedAiResponse(reason) => assert!(reason.contains("m2")),
        other => panic!("expected MalformedAiResponse, got {:?}", other),
    }

    let session = h.engine.get_session_state(&key).unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[0].text, "build it");
}

#[tokio::test]
async fn test_reply_without_json_is_malformed() {
    let h = harness(ScriptedAi::new(["Sure, I can help with that."]));
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    assert!(matches!(
        h.engine.send_message(&key, "hello").await,
        Err(EngineError::MalformedAiResponse(_))
    ));
}

#[tokio::test]
async fn test_transport_failure_is_unavailable() {
    let ai = ScriptedAi::default();
    ai.push(Err(AiError::Transport("connection refused".into())));
    let h = harness(ai);
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    let err = h.engine.send_message(&key, "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::AiEngineUnavailable(_)));
    assert_eq!(h.engine.get_session_state(&key).unwrap().messages.len(), 1);
}

#[tokio::test]
async fn test_slow_engine_times_out() {
    let h = harness(ScriptedAi::new([QUESTION_REPLY]).with_delay(Duration::from_secs(10)));
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    let err = h.engine.send_message(&key, "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::AiEngineTimeout { seconds: 2 }));

    let session = h.engine.get_session_state(&key).unwrap();
    assert_eq!(session.messages.len(), 1);
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let h = harness(ScriptedAi::default());
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    assert!(matches!(
        h.engine.send_message(&key, "   ").await,
        Err(EngineError::InvalidRequest(_))
    ));
    assert_eq!(h.ai.request_count(), 0);
}

#[tokio::test]
async fn test_send_without_session() {
    let h = harness(ScriptedAi::new([QUESTION_REPLY]));
    let err = h.engine.send_message(&sales_key(), "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::NoActiveSession { .. }));
    assert_eq!(h.ai.request_count(), 0);
}

#[tokio::test]
async fn test_concurrent_sends_are_serialized() {
    let h = harness(
        ScriptedAi::new([QUESTION_REPLY, QUESTION_REPLY]).with_delay(Duration::from_millis(100)),
    );
    let key = sales_key();
    h.engine.initialize_session(&["sales"], "u1").await.unwrap();

    let (a, b) = tokio::join!(
        h.engine.send_message(&key, "one"),
        h.engine.send_message(&key, "two"),
    );
    a.unwrap();
    b.unwrap();

    let session = h.engine.get_session_state(&key).unwrap();
    let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Ai, Role::User, Role::Ai]);

    // The second request saw the first full turn.
    let requests = h.ai.requests.lock().unwrap();
    assert_eq!(requests[1].messages.len(), 4);
}

#[tokio::test]
async fn test_cancel_during_call_discards_reply() {
    let h = harness(ScriptedAi::new([ORDERS_REPLY]).with_delay(Duration::from_millis(300)));
    let engine = Arc::new(h.engine);
    let key = sales_key();
    engine.initialize_session(&["sales"], "u1").await.unwrap();

    let pending = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.send_message(&key, "orders please").await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel_session(&key);

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(EngineError::NoActiveSession { .. })));
    assert!(engine.get_session_state(&key).is_err());

    // A new session under the same key starts clean.
    let greeting = engine.initialize_session(&["sales"], "u1").await.unwrap();
    assert!(!greeting.restored);
    assert!(engine.get_session_state(&key).unwrap().messages.is_empty());
}
