//! Axum server exposing the session operations.
//!
//! Sessions are addressed as `/api/sessions/{user}/{set}` where `set` is the
//! canonical source set (`crm+sales`). Errors come back as
//! `{"code": ..., "message": ...}` with a status chosen by error category.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::ai::StructuredAiResponse;
use crate::engine::{ModelingEngine, QueryRequest, SessionGreeting};
use crate::error::{EngineError, ErrorCategory};
use crate::executor::QueryResult;
use crate::schema::JoinSuggestion;
use crate::session::{ModelDraft, Session, SessionKey};
use crate::storage::DataModel;

pub type AppState = Arc<ModelingEngine>;

/// Error body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NoActiveSession { .. } | EngineError::UnknownSource(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::AiEngineTimeout { .. } | EngineError::QueryTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        EngineError::AccessDenied(_) => StatusCode::FORBIDDEN,
        EngineError::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        EngineError::Storage(crate::storage::StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        other => match other.category() {
            ErrorCategory::SourceReachability | ErrorCategory::AiProtocol => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCategory::SessionLifecycle | ErrorCategory::Access => StatusCode::BAD_REQUEST,
            ErrorCategory::QuerySemantic => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ApiErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sessions", post(initialize_session))
        .route(
            "/api/sessions/{user}/{set}",
            get(get_session).delete(cancel_session),
        )
        .route("/api/sessions/{user}/{set}/messages", post(send_message))
        .route("/api/sessions/{user}/{set}/draft", put(update_draft))
        .route("/api/sessions/{user}/{set}/save", post(save_session))
        .route("/api/query", post(execute_query))
        .route("/api/sources/{id}/joins", get(suggest_joins))
        .route("/api/models/{id}", get(get_model))
        .route("/api/users/{user}/models", get(list_models))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl+C. The session reaper runs for the server's lifetime.
pub async fn serve(engine: ModelingEngine, bind: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(engine);
    let reaper = engine.spawn_reaper();

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "modelforge API listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    reaper.shutdown().await;
    info!("server stopped");
    Ok(())
}

fn key(user: String, set: &str) -> Result<SessionKey, ApiError> {
    Ok(SessionKey::parse(set, user)?)
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeRequest {
    source_ids: Vec<String>,
    user_id: String,
}

/// POST /api/sessions
async fn initialize_session(
    State(engine): State<AppState>,
    Json(req): Json<InitializeRequest>,
) -> ApiResult<SessionGreeting> {
    Ok(Json(
        engine
            .initialize_session(&req.source_ids, &req.user_id)
            .await?,
    ))
}

/// GET /api/sessions/{user}/{set}
async fn get_session(
    State(engine): State<AppState>,
    Path((user, set)): Path<(String, String)>,
) -> ApiResult<Session> {
    Ok(Json(engine.get_session_state(&key(user, &set)?)?))
}

/// DELETE /api/sessions/{user}/{set}
async fn cancel_session(
    State(engine): State<AppState>,
    Path((user, set)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    engine.cancel_session(&key(user, &set)?);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

/// POST /api/sessions/{user}/{set}/messages
async fn send_message(
    State(engine): State<AppState>,
    Path((user, set)): Path<(String, String)>,
    Json(req): Json<MessageRequest>,
) -> ApiResult<StructuredAiResponse> {
    Ok(Json(engine.send_message(&key(user, &set)?, &req.text).await?))
}

/// PUT /api/sessions/{user}/{set}/draft
async fn update_draft(
    State(engine): State<AppState>,
    Path((user, set)): Path<(String, String)>,
    Json(draft): Json<ModelDraft>,
) -> Result<StatusCode, ApiError> {
    engine.update_draft(&key(user, &set)?, draft)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SaveRequest {
    #[serde(default)]
    title: String,
}

/// POST /api/sessions/{user}/{set}/save
async fn save_session(
    State(engine): State<AppState>,
    Path((user, set)): Path<(String, String)>,
    Json(req): Json<SaveRequest>,
) -> ApiResult<DataModel> {
    Ok(Json(engine.save_session(&key(user, &set)?, &req.title).await?))
}

// ============================================================================
// Queries, joins, models
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody {
    sql: String,
    #[serde(default)]
    source_ids: Vec<String>,
    row_cap: Option<usize>,
    user_id: String,
    /// Canonical source set of a live session to run against.
    session: Option<String>,
}

/// POST /api/query
async fn execute_query(
    State(engine): State<AppState>,
    Json(body): Json<QueryBody>,
) -> ApiResult<QueryResult> {
    let session = match &body.session {
        Some(set) => Some(key(body.user_id.clone(), set)?),
        None => None,
    };
    let request = QueryRequest {
        sql: body.sql,
        source_ids: body.source_ids,
        row_cap: body.row_cap,
        user_id: body.user_id,
        session,
    };
    Ok(Json(engine.execute_query(&request).await?))
}

/// GET /api/sources/{id}/joins
async fn suggest_joins(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<JoinSuggestion>> {
    Ok(Json(engine.suggest_joins(&id).await?))
}

/// GET /api/models/{id}
async fn get_model(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<DataModel> {
    Ok(Json(engine.data_model(id).await?))
}

/// GET /api/users/{user}/models
async fn list_models(
    State(engine): State<AppState>,
    Path(user): Path<String>,
) -> ApiResult<Vec<DataModel>> {
    Ok(Json(engine.list_models(&user).await?))
}
