//! llmtrace HTTP REST API
//!
//! Axum-based HTTP server exposing trace capture, browsing and replay.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Every body is wrapped in the envelope `{success, data?, message?}`.
//!
//! Endpoints (under `/api` unless noted):
//! - POST   /trace                       : record one captured turn
//! - GET    /sessions                    : paginated sessions, newest first
//! - GET    /sessions/:id/records        : paginated turns of a session
//! - POST   /records/:id/replay          : replay a stored turn
//! - DELETE /records/:id                 : delete a turn
//! - GET    /providers                   : configured providers and models
//! - GET    /replay-sessions             : paginated replay sessions
//! - POST   /replay-sessions             : fork a session for debugging
//! - GET    /replay-sessions/:id         : one replay session
//! - PATCH  /replay-sessions/:id         : set status (active/completed)
//! - DELETE /replay-sessions/:id         : delete a replay session and its records
//! - GET    /replay-sessions/:id/records : paginated replay records
//! - POST   /replay-debug                : replay with parameter overrides
//! - GET    /health (root)               : health check with DB status

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use llmtrace_core::models::{ReplaySessionStatus, TraceStatus};
use llmtrace_core::{LlmTraceConfig, LlmTraceError, ProviderRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::replay::{self, ReplayDebugInput, ReplayInput};
use crate::subsystems::replay_sessions::{self, CreateReplaySession};
use crate::subsystems::store::{self, Pagination};
use crate::subsystems::trace::{self, TraceInput};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub pool: SqlitePool,
    pub config: LlmTraceConfig,
    pub registry: ProviderRegistry,
}

impl HttpState {
    /// `registry` is built once at startup and shared by every replay route.
    pub fn new(pool: SqlitePool, config: LlmTraceConfig, registry: ProviderRegistry) -> Self {
        Self {
            pool,
            config,
            registry,
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let api = Router::new()
        .route("/trace", post(trace_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/:id/records", get(session_records_handler))
        .route("/records/:id", delete(delete_record_handler))
        .route("/records/:id/replay", post(replay_record_handler))
        .route("/providers", get(providers_handler))
        .route(
            "/replay-sessions",
            get(list_replay_sessions_handler).post(create_replay_session_handler),
        )
        .route(
            "/replay-sessions/:id",
            get(get_replay_session_handler)
                .patch(update_replay_session_handler)
                .delete(delete_replay_session_handler),
        )
        .route(
            "/replay-sessions/:id/records",
            get(replay_session_records_handler),
        )
        .route("/replay-debug", post(replay_debug_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    pool: SqlitePool,
    config: LlmTraceConfig,
    registry: ProviderRegistry,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = config.server.bind_addr();
    let state = Arc::new(HttpState::new(pool, config, registry));

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("llmtrace HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// Uniform response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(msg.into()),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(msg.into()),
        }
    }

    fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "success": false }))
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TraceRequest {
    pub session_id: Option<String>,
    pub turn_number: Option<i64>,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub status: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    /// Name for the session when this trace creates it.
    pub session_name: Option<String>,
}

/// Replay of a stored record. Omitted fields fall back to the record's own values.
#[derive(Debug, Deserialize, Default)]
pub struct ReplayRecordRequest {
    pub session_id: Option<String>,
    pub turn_number: Option<i64>,
    pub request: Option<Value>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateReplaySessionRequest {
    pub original_session_id: Option<String>,
    pub start_turn_number: Option<i64>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateReplaySessionRequest {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReplayDebugRequest {
    pub replay_session_id: Option<String>,
    pub turn_number: Option<i64>,
    pub request: Option<Value>,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Parameter overrides; malformed fields are dropped.
    #[serde(alias = "debug_config")]
    pub config: Option<Value>,
}

/// `page`/`size` query parameters. Unparseable values fall back to defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub page: Option<String>,
    pub size: Option<String>,
}

impl PageQuery {
    fn parts(&self) -> (Option<i64>, Option<i64>) {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse().ok());
        (parse(&self.page), parse(&self.size))
    }

    pub fn sessions(&self) -> Pagination {
        let (page, size) = self.parts();
        Pagination::sessions(page, size)
    }

    pub fn records(&self) -> Pagination {
        let (page, size) = self.parts();
        Pagination::records(page, size)
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: &SqlitePool) -> (StatusCode, Value) {
    match llmtrace_core::db::health_check(pool).await {
        Ok(version) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "sqlite": version,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

pub async fn trace_inner(pool: &SqlitePool, req: TraceRequest) -> (StatusCode, Value) {
    let input = match trace_input(req) {
        Ok(input) => input,
        Err(e) => return error_response(&e),
    };

    match trace::save_trace(pool, input).await {
        Ok(record) => (
            StatusCode::OK,
            ApiResponse {
                success: true,
                data: Some(json!({ "id": record.id })),
                message: Some("Trace data saved successfully".to_string()),
            }
            .into_value(),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn list_sessions_inner(pool: &SqlitePool, query: PageQuery) -> (StatusCode, Value) {
    respond(store::list_sessions(pool, query.sessions()).await)
}

pub async fn session_records_inner(
    pool: &SqlitePool,
    session_id: &str,
    query: PageQuery,
) -> (StatusCode, Value) {
    respond(store::list_session_records(pool, session_id, query.records()).await)
}

pub async fn delete_record_inner(pool: &SqlitePool, record_id: &str) -> (StatusCode, Value) {
    match store::delete_record(pool, record_id).await {
        Ok(()) => (
            StatusCode::OK,
            ApiResponse::message("Record deleted successfully").into_value(),
        ),
        Err(e) => error_response(&e),
    }
}

/// Inner replay of a stored record into its session's history.
pub async fn replay_record_inner(
    state: &HttpState,
    record_id: &str,
    req: ReplayRecordRequest,
) -> (StatusCode, Value) {
    let original = match store::get_record(&state.pool, record_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return error_response(&LlmTraceError::not_found("Record", record_id)),
        Err(e) => return error_response(&e),
    };

    let request = match req.request.filter(|v| !v.is_null()) {
        Some(request) => request,
        None => match serde_json::from_str(&original.request) {
            Ok(request) => request,
            Err(e) => return error_response(&LlmTraceError::from(e)),
        },
    };

    let input = ReplayInput {
        session_id: non_blank(req.session_id).unwrap_or(original.session_id),
        turn_number: req.turn_number.unwrap_or(original.turn_number),
        request,
        provider: req.provider.unwrap_or_default(),
        model: req.model.unwrap_or_default(),
    };

    respond(
        replay::execute_replay(&state.pool, &state.registry, &state.config.replay, input).await,
    )
}

/// Inner providers: pure, reads the registry only.
pub fn providers_inner(registry: &ProviderRegistry) -> (StatusCode, Value) {
    respond(Ok::<_, LlmTraceError>(registry.list()))
}

pub async fn list_replay_sessions_inner(
    pool: &SqlitePool,
    query: PageQuery,
) -> (StatusCode, Value) {
    respond(store::list_replay_sessions(pool, query.sessions()).await)
}

pub async fn create_replay_session_inner(
    pool: &SqlitePool,
    req: CreateReplaySessionRequest,
) -> (StatusCode, Value) {
    let Some(original_session_id) = non_blank(req.original_session_id) else {
        return error_response(&LlmTraceError::Validation(
            "original_session_id is required".to_string(),
        ));
    };
    let Some(start_turn_number) = req.start_turn_number else {
        return error_response(&LlmTraceError::Validation(
            "start_turn_number is required".to_string(),
        ));
    };

    let input = CreateReplaySession {
        original_session_id,
        start_turn_number,
        name: req.name,
    };
    respond(replay_sessions::create_replay_session(pool, input).await)
}

pub async fn get_replay_session_inner(pool: &SqlitePool, id: &str) -> (StatusCode, Value) {
    match store::get_replay_session(pool, id).await {
        Ok(Some(session)) => respond(Ok::<_, LlmTraceError>(session)),
        Ok(None) => error_response(&LlmTraceError::not_found("Replay session", id)),
        Err(e) => error_response(&e),
    }
}

pub async fn update_replay_session_inner(
    pool: &SqlitePool,
    id: &str,
    req: UpdateReplaySessionRequest,
) -> (StatusCode, Value) {
    let status = match req.status.as_deref().map(str::parse::<ReplaySessionStatus>) {
        Some(Ok(status)) => status,
        Some(Err(e)) => return error_response(&LlmTraceError::Validation(e)),
        None => {
            return error_response(&LlmTraceError::Validation("status is required".to_string()))
        }
    };

    respond(replay_sessions::update_replay_session_status(pool, id, status).await)
}

pub async fn delete_replay_session_inner(pool: &SqlitePool, id: &str) -> (StatusCode, Value) {
    match replay_sessions::delete_replay_session(pool, id).await {
        Ok(()) => (
            StatusCode::OK,
            ApiResponse::message("Replay session deleted successfully").into_value(),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn replay_session_records_inner(
    pool: &SqlitePool,
    id: &str,
    query: PageQuery,
) -> (StatusCode, Value) {
    respond(store::list_replay_records(pool, id, query.records()).await)
}

pub async fn replay_debug_inner(state: &HttpState, req: ReplayDebugRequest) -> (StatusCode, Value) {
    let Some(replay_session_id) = non_blank(req.replay_session_id) else {
        return error_response(&LlmTraceError::Validation(
            "replay_session_id is required".to_string(),
        ));
    };
    let Some(turn_number) = req.turn_number else {
        return error_response(&LlmTraceError::Validation(
            "turn_number is required".to_string(),
        ));
    };
    let Some(request) = req.request.filter(|v| !v.is_null()) else {
        return error_response(&LlmTraceError::Validation("request is required".to_string()));
    };

    let input = ReplayDebugInput {
        replay_session_id,
        turn_number,
        request,
        provider: req.provider.unwrap_or_default(),
        model: req.model.unwrap_or_default(),
        debug_config: req.config,
    };

    respond(
        replay::execute_replay_debug(&state.pool, &state.registry, &state.config.replay, input)
            .await,
    )
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool).await;
    (status, Json(body))
}

pub async fn trace_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<TraceRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => trace_inner(&state.pool, req).await,
        Err(rejection) => rejection_response(rejection),
    };
    (status, Json(body))
}

pub async fn list_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let (status, body) = list_sessions_inner(&state.pool, query).await;
    (status, Json(body))
}

pub async fn session_records_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let (status, body) = session_records_inner(&state.pool, &session_id, query).await;
    (status, Json(body))
}

pub async fn delete_record_handler(
    State(state): State<Arc<HttpState>>,
    Path(record_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = delete_record_inner(&state.pool, &record_id).await;
    (status, Json(body))
}

pub async fn replay_record_handler(
    State(state): State<Arc<HttpState>>,
    Path(record_id): Path<String>,
    payload: Result<Json<ReplayRecordRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => replay_record_inner(&state, &record_id, req).await,
        Err(rejection) => rejection_response(rejection),
    };
    (status, Json(body))
}

pub async fn providers_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = providers_inner(&state.registry);
    (status, Json(body))
}

pub async fn list_replay_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let (status, body) = list_replay_sessions_inner(&state.pool, query).await;
    (status, Json(body))
}

pub async fn create_replay_session_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<CreateReplaySessionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => create_replay_session_inner(&state.pool, req).await,
        Err(rejection) => rejection_response(rejection),
    };
    (status, Json(body))
}

pub async fn get_replay_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = get_replay_session_inner(&state.pool, &id).await;
    (status, Json(body))
}

pub async fn update_replay_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateReplaySessionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => update_replay_session_inner(&state.pool, &id, req).await,
        Err(rejection) => rejection_response(rejection),
    };
    (status, Json(body))
}

pub async fn delete_replay_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = delete_replay_session_inner(&state.pool, &id).await;
    (status, Json(body))
}

pub async fn replay_session_records_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let (status, body) = replay_session_records_inner(&state.pool, &id, query).await;
    (status, Json(body))
}

pub async fn replay_debug_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<ReplayDebugRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => replay_debug_inner(&state, req).await,
        Err(rejection) => rejection_response(rejection),
    };
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// HTTP status for a core error.
pub fn error_status(err: &LlmTraceError) -> StatusCode {
    match err {
        LlmTraceError::Validation(_) | LlmTraceError::ProviderConfig(_) => StatusCode::BAD_REQUEST,
        LlmTraceError::NotFound { .. } => StatusCode::NOT_FOUND,
        LlmTraceError::ProviderCall(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Envelope for a core error. A failed error-outcome write keeps the provider
/// error in `data.provider_error` next to the persistence failure.
pub fn error_response(err: &LlmTraceError) -> (StatusCode, Value) {
    let status = error_status(err);
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "Request failed");
    }

    let mut body = ApiResponse::error(err.to_string());
    if let LlmTraceError::OutcomeNotRecorded { provider_error, .. } = err {
        body.data = Some(json!({ "provider_error": provider_error.to_string() }));
    }
    (status, body.into_value())
}

fn respond<T: Serialize>(result: Result<T, LlmTraceError>) -> (StatusCode, Value) {
    match result.and_then(|data| serde_json::to_value(data).map_err(LlmTraceError::from)) {
        Ok(data) => (StatusCode::OK, ApiResponse::ok(data).into_value()),
        Err(e) => error_response(&e),
    }
}

fn rejection_response(rejection: JsonRejection) -> (StatusCode, Value) {
    (
        StatusCode::BAD_REQUEST,
        ApiResponse::error(format!("Invalid request format: {}", rejection.body_text()))
            .into_value(),
    )
}

fn trace_input(req: TraceRequest) -> Result<TraceInput, LlmTraceError> {
    let session_id = non_blank(req.session_id)
        .ok_or_else(|| LlmTraceError::Validation("session_id is required".to_string()))?;
    let turn_number = req
        .turn_number
        .ok_or_else(|| LlmTraceError::Validation("turn_number is required".to_string()))?;
    let request = req
        .request
        .filter(|v| !v.is_null())
        .ok_or_else(|| LlmTraceError::Validation("request is required".to_string()))?;
    let status = req
        .status
        .as_deref()
        .ok_or_else(|| LlmTraceError::Validation("status is required".to_string()))?
        .parse::<TraceStatus>()
        .map_err(LlmTraceError::Validation)?;

    let mut input = TraceInput::new(session_id, turn_number, request, status);
    input.response = req.response;
    input.error_message = req.error_message;
    input.metadata = req.metadata;
    input.session_name = req.session_name;
    Ok(input)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
