//! Shared fixtures: seeded in-memory sources, a scripted AI engine and
//! storage fakes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use modelforge::ai::{AiEngine, AiError, ChatRequest};
use modelforge::config::{Driver, Settings};
use modelforge::engine::ModelingEngine;
use modelforge::schema::TableSchema;
use modelforge::session::{Clock, ManualClock, Message};
use modelforge::source::{DataSource, RowSet, SourceError, SourceRegistry, SqliteSource};
use modelforge::storage::{
    ConversationRecord, DataModel, DurableStore, SqliteDurableStore, StorageError, StorageResult,
};

pub const SALES: &str = "
    CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        customer_id INTEGER REFERENCES customers(id),
        total REAL,
        status TEXT
    );
    INSERT INTO customers VALUES (1, 'Ada'), (2, 'Grace');
    INSERT INTO orders VALUES
        (10, 1, 9.5, 'shipped'),
        (11, 1, 20.0, 'open'),
        (12, 2, 5.0, 'shipped'),
        (13, NULL, 1.0, 'shipped');
";

pub const CRM: &str = "
    CREATE TABLE accounts (id INTEGER PRIMARY KEY, customer_id INTEGER, tier TEXT, opened TIMESTAMP);
    INSERT INTO accounts VALUES
        (100, 1, 'gold', '2024-01-01 00:00:00'),
        (101, 2, 'silver', '2024-02-01 00:00:00');
";

pub const BILLING: &str = "
    CREATE TABLE invoices (id INTEGER PRIMARY KEY, account_id INTEGER, order_id INTEGER, amount REAL);
    INSERT INTO invoices VALUES (1000, 100, 10, 9.5), (1001, 101, 12, 5.0);
";

pub fn sqlite(id: &str, seed: &str) -> Arc<dyn DataSource> {
    Arc::new(SqliteSource::in_memory(id, id, seed).unwrap())
}

pub fn registry(sources: Vec<Arc<dyn DataSource>>) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source);
    }
    registry
}

/// `sales`, `crm` and `billing`, all seeded.
pub fn standard_registry() -> SourceRegistry {
    registry(vec![
        sqlite("sales", SALES),
        sqlite("crm", CRM),
        sqlite("billing", BILLING),
    ])
}

/// Counts fetches while delegating to an inner source.
pub struct CountingSource {
    inner: Arc<dyn DataSource>,
    pub fetches: AtomicUsize,
}

impl CountingSource {
    pub fn new(inner: Arc<dyn DataSource>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for CountingSource {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn label(&self) -> &str {
        self.inner.label()
    }

    fn driver(&self) -> Driver {
        self.inner.driver()
    }

    async fn introspect(&self) -> Result<Vec<TableSchema>, SourceError> {
        self.inner.introspect().await
    }

    async fn fetch(&self, sql: &str, max_rows: usize) -> Result<RowSet, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(sql, max_rows).await
    }
}

/// Never answers.
pub struct StalledSource {
    pub id: String,
}

impl StalledSource {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.into() })
    }
}

#[async_trait]
impl DataSource for StalledSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.id
    }

    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    async fn introspect(&self) -> Result<Vec<TableSchema>, SourceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn fetch(&self, _sql: &str, _max_rows: usize) -> Result<RowSet, SourceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(RowSet::default())
    }
}

/// Replies from a script, recording every request.
#[derive(Default)]
pub struct ScriptedAi {
    replies: Mutex<VecDeque<Result<String, AiError>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub delay: Option<Duration>,
}

impl ScriptedAi {
    pub fn new<I: IntoIterator<Item = &'static str>>(replies: I) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, reply: Result<String, AiError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AiEngine for ScriptedAi {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AiError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::Transport("script exhausted".into())))
    }
}

/// A reply proposing one model over `sales.orders`.
pub const ORDERS_REPLY: &str = r#"Here is a first cut.
```json
{
  "analysis": "Orders with their status.",
  "models": [{"id": "m1", "description": "orders", "tables": ["orders"], "columns": ["orders.id", "orders.status"], "joins": []}],
  "sql": [{"modelId": "m1", "text": "SELECT id, status FROM orders"}]
}
```"#;

pub const QUESTION_REPLY: &str = r#"{"analysis": "Which columns do you need?"}"#;

/// Always fails to write.
pub struct FailingStore {
    pub attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }
}

impl DurableStore for FailingStore {
    fn save_conversation(&self, _record: &ConversationRecord) -> StorageResult<DataModel> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("disk full".into()))
    }

    fn get_data_model(&self, id: Uuid) -> StorageResult<DataModel> {
        Err(StorageError::NotFound(id.to_string()))
    }

    fn list_data_models(&self, _user_id: &str) -> StorageResult<Vec<DataModel>> {
        Ok(Vec::new())
    }

    fn conversation_messages(&self, conversation_id: Uuid) -> StorageResult<Vec<Message>> {
        Err(StorageError::NotFound(conversation_id.to_string()))
    }
}

/// Settings with short timeouts for tests.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.query.collect_timeout_secs = 1;
    settings.query.timeout_secs = 2;
    settings.ai.timeout_secs = 2;
    settings
}

pub struct Harness {
    pub engine: ModelingEngine,
    pub ai: Arc<ScriptedAi>,
    pub durable: Arc<dyn DurableStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness_with(
    registry: SourceRegistry,
    ai: ScriptedAi,
    durable: Arc<dyn DurableStore>,
) -> Harness {
    let ai = Arc::new(ai);
    let clock = Arc::new(ManualClock::default());
    let engine = ModelingEngine::builder(test_settings())
        .registry(registry)
        .ai_engine(ai.clone())
        .durable(durable.clone())
        .clock(clock.clone() as Arc<dyn Clock>)
        .build()
        .unwrap();
    Harness {
        engine,
        ai,
        durable,
        clock,
    }
}

pub fn harness(ai: ScriptedAi) -> Harness {
    harness_with(
        standard_registry(),
        ai,
        Arc::new(SqliteDurableStore::open_in_memory().unwrap()),
    )
}
