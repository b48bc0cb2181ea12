//! `ModelingEngine`: every session operation behind one handle.
//!
//! The engine wires the source registry, session store, conversation
//! gateway, executor and persistence transfer together and consults the
//! access gate before each operation that creates or consumes anything.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::ai::{AiEngine, OpenAiCompatibleEngine, StructuredAiResponse};
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::executor::{QueryExecutor, QueryResult, SourceBinding};
use crate::gate::{AccessGate, AllowAll, LimitKind};
use crate::gateway::ConversationGateway;
use crate::schema::{suggest_joins, JoinSuggestion, SchemaCollector, SchemaSnapshot, SchemaWarning};
use crate::session::{Clock, ModelDraft, ReaperHandle, Session, SessionKey, SessionStore, SystemClock};
use crate::source::SourceRegistry;
use crate::storage::{DataModel, DurableStore, SqliteDurableStore, StorageError};
use crate::transfer::PersistenceTransfer;

/// What InitializeSession returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGreeting {
    pub key: SessionKey,
    pub session_id: Uuid,
    pub greeting: String,
    pub tables: Vec<String>,
    pub warnings: Vec<SchemaWarning>,
    /// An existing session was continued rather than created.
    pub restored: bool,
    pub fingerprint: String,
    pub cross_source: bool,
}

impl SessionGreeting {
    fn from_session(session: &Session, restored: bool) -> Self {
        Self {
            key: session.key.clone(),
            session_id: session.id,
            greeting: greeting(&session.schema, &session.warnings),
            tables: session.schema.table_names(),
            warnings: session.warnings.clone(),
            restored,
            fingerprint: session.schema.fingerprint.clone(),
            cross_source: session.cross_source,
        }
    }
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Deterministic greeting: sources, table count, and anything dropped.
fn greeting(schema: &SchemaSnapshot, warnings: &[SchemaWarning]) -> String {
    let labels: Vec<String> = schema.sources.iter().map(|s| s.source_label.clone()).collect();
    let count = schema.table_count();
    let mut text = format!(
        "Connected to {} ({} table{}). Describe the data model you want to build.",
        join_names(&labels),
        count,
        if count == 1 { "" } else { "s" }
    );

    let dropped: Vec<String> = warnings
        .iter()
        .filter_map(|w| match w {
            SchemaWarning::SourceDropped { source_id, .. } => Some(source_id.clone()),
            SchemaWarning::EmptySchema { .. } => None,
        })
        .collect();
    if !dropped.is_empty() {
        text.push_str(&format!(" Unavailable right now: {}.", join_names(&dropped)));
    }
    text
}

/// An ExecuteQuery call.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub sql: String,
    pub source_ids: Vec<String>,
    pub row_cap: Option<usize>,
    pub user_id: String,
    /// Run against this session's schema and sources instead of `source_ids`.
    pub session: Option<SessionKey>,
}

pub struct ModelingEngine {
    settings: Settings,
    registry: Arc<SourceRegistry>,
    store: Arc<SessionStore>,
    gateway: ConversationGateway,
    executor: Arc<QueryExecutor>,
    transfer: PersistenceTransfer,
    durable: Arc<dyn DurableStore>,
    gate: Arc<dyn AccessGate>,
    collector: SchemaCollector,
}

/// Builds a [`ModelingEngine`]. Anything not supplied is created from the
/// settings.
pub struct EngineBuilder {
    settings: Settings,
    registry: Option<SourceRegistry>,
    ai: Option<Arc<dyn AiEngine>>,
    durable: Option<Arc<dyn DurableStore>>,
    clock: Option<Arc<dyn Clock>>,
    gate: Option<Arc<dyn AccessGate>>,
}

impl EngineBuilder {
    pub fn registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ai_engine(mut self, ai: Arc<dyn AiEngine>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn durable(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self) -> EngineResult<ModelingEngine> {
        let settings = self.settings;

        let registry = Arc::new(match self.registry {
            Some(registry) => registry,
            None => SourceRegistry::from_settings(&settings)?,
        });
        let ai: Arc<dyn AiEngine> = match self.ai {
            Some(ai) => ai,
            None => Arc::new(OpenAiCompatibleEngine::from_settings(&settings.ai)?),
        };
        let durable: Arc<dyn DurableStore> = match self.durable {
            Some(durable) => durable,
            None => Arc::new(SqliteDurableStore::open(settings.storage.resolved_path()?)?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let gate = self.gate.unwrap_or_else(|| Arc::new(AllowAll));

        let store = Arc::new(SessionStore::new(clock, settings.session.ttl()));
        let executor = Arc::new(QueryExecutor::new(registry.clone(), settings.query.clone()));
        let gateway = ConversationGateway::new(store.clone(), ai, settings.ai.clone());
        let transfer = PersistenceTransfer::new(store.clone(), durable.clone(), executor.clone());
        let collector = SchemaCollector::new(settings.query.collect_timeout());

        Ok(ModelingEngine {
            settings,
            registry,
            store,
            gateway,
            executor,
            transfer,
            durable,
            gate,
            collector,
        })
    }
}

impl ModelingEngine {
    pub fn builder(settings: Settings) -> EngineBuilder {
        EngineBuilder {
            settings,
            registry: None,
            ai: None,
            durable: None,
            clock: None,
            gate: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start a session, or continue the live one for the same key.
    ///
    /// Sources are only collected when a new session is created.
    #[instrument(skip(self, source_ids))]
    pub async fn initialize_session<S: AsRef<str>>(
        &self,
        source_ids: &[S],
        user_id: &str,
    ) -> EngineResult<SessionGreeting> {
        let key = SessionKey::new(source_ids, user_id)?;
        let ids = key.source_ids();
        self.gate.authorize(user_id, &ids).await?;

        if let Ok(session) = self.store.get(&key) {
            info!(key = %key, "continuing live session");
            return Ok(SessionGreeting::from_session(&session, true));
        }

        self.gate.enforce_limit(user_id, LimitKind::Sessions).await?;
        let sources = self.registry.resolve(&ids)?;
        let collected = self.collector.collect_all(&sources).await?;
        let snapshot = SchemaSnapshot::build(collected.sources);

        let (session, restored) = self.store.initialize(key, snapshot, collected.warnings);
        Ok(SessionGreeting::from_session(&session, restored))
    }

    pub async fn send_message(
        &self,
        key: &SessionKey,
        text: &str,
    ) -> EngineResult<StructuredAiResponse> {
        self.gate.enforce_limit(&key.user_id, LimitKind::Messages).await?;
        self.gateway.send_message(key, text).await
    }

    /// Replace the draft. Text and structure are reconciled first; a pair
    /// that describes two different queries is refused.
    pub fn update_draft(&self, key: &SessionKey, draft: ModelDraft) -> EngineResult<()> {
        let draft = draft
            .normalized()
            .map_err(|e| EngineError::InvalidRequest(format!("draft: {}", e)))?;
        self.store.update_draft(key, draft)
    }

    pub fn get_session_state(&self, key: &SessionKey) -> EngineResult<Session> {
        self.store.get(key)
    }

    #[instrument(skip(self, request), fields(user = %request.user_id))]
    pub async fn execute_query(&self, request: &QueryRequest) -> EngineResult<QueryResult> {
        let binding = match &request.session {
            Some(key) => {
                let session = self.store.get(key)?;
                SourceBinding::sources(&session.source_ids()).with_schema(session.schema)
            }
            None => SourceBinding::sources(&request.source_ids),
        };

        self.gate.authorize(&request.user_id, &binding.source_ids).await?;
        self.gate.enforce_limit(&request.user_id, LimitKind::Queries).await?;
        self.executor
            .execute(&request.sql, &binding, request.row_cap)
            .await
    }

    pub async fn save_session(&self, key: &SessionKey, title: &str) -> EngineResult<DataModel> {
        self.gate.enforce_limit(&key.user_id, LimitKind::Models).await?;
        self.transfer.transfer(key, title).await
    }

    /// Idempotent: cancelling an absent or expired key succeeds.
    pub fn cancel_session(&self, key: &SessionKey) {
        self.store.cancel(key);
    }

    /// Ranked join candidates within one source. No candidates is an empty
    /// list, not an error.
    pub async fn suggest_joins(&self, source_id: &str) -> EngineResult<Vec<JoinSuggestion>> {
        let source = self.registry.get(source_id)?;
        let (schema, _) = self.collector.collect(source.as_ref()).await?;
        Ok(suggest_joins(&schema))
    }

    pub async fn data_model(&self, id: Uuid) -> EngineResult<DataModel> {
        let durable = self.durable.clone();
        blocking(move || durable.get_data_model(id)).await
    }

    pub async fn list_models(&self, user_id: &str) -> EngineResult<Vec<DataModel>> {
        let durable = self.durable.clone();
        let user_id = user_id.to_string();
        blocking(move || durable.list_data_models(&user_id)).await
    }

    pub fn spawn_reaper(&self) -> ReaperHandle {
        self.store.spawn_reaper(self.settings.session.reap_interval())
    }
}

async fn blocking<T, F>(f: F) -> EngineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?
        .map_err(EngineError::from)
}
