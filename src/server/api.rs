//! HTTP API server implementation

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::core::errors::AiError;
use crate::sync::{LockKey, RunOutcome, RunStatus};

/// Response envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Error mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        let status = match &err {
            AiError::NotFound { .. } => StatusCode::NOT_FOUND,
            AiError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            message: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AiRunRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub key: String,
}

#[derive(Serialize)]
struct CancelResponse {
    key: LockKey,
    released: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// 200 on completion, 409 when another run holds the lock, 500 on failure
fn run_response<T: Serialize>(outcome: RunOutcome<T>) -> Response {
    let (status, message) = match outcome.status {
        RunStatus::Completed => (StatusCode::OK, "completed"),
        RunStatus::AlreadyRunning => (StatusCode::CONFLICT, "operation already running"),
        RunStatus::Failed => (StatusCode::INTERNAL_SERVER_ERROR, "operation failed"),
    };
    let body = ApiResponse {
        success: outcome.success,
        error: outcome.error.clone(),
        data: Some(outcome),
        message: Some(message.to_string()),
    };
    (status, Json(body)).into_response()
}

async fn sync_mail(State(ctx): State<AppContext>) -> Response {
    run_response(ctx.orchestrator.sync_messages_only().await)
}

async fn sync_ai(State(ctx): State<AppContext>, body: Option<Json<AiRunRequest>>) -> Response {
    let limit = body
        .and_then(|Json(request)| request.limit)
        .unwrap_or(ctx.config.batch_limit);
    run_response(ctx.orchestrator.process_ai_only(limit).await)
}

async fn sync_ai_single(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Response {
    match ctx.orchestrator.process_single_message_by_id(&id, query.force).await {
        Ok(outcome) => {
            let status = if outcome.success {
                StatusCode::OK
            } else {
                StatusCode::UNPROCESSABLE_ENTITY
            };
            let body = ApiResponse {
                success: outcome.success,
                error: outcome.error.clone(),
                data: Some(outcome),
                message: None,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => {
            warn!("Single message run for {} failed: {}", id, e);
            ApiError::from(e).into_response()
        }
    }
}

async fn sync_status(
    State(ctx): State<AppContext>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Vec<crate::sync::LockStatus>> {
    let keys = match query.key {
        Some(key) => vec![key.parse::<LockKey>()?],
        None => LockKey::ALL.to_vec(),
    };
    let mut statuses = Vec::with_capacity(keys.len());
    for key in keys {
        statuses.push(ctx.orchestrator.get_sync_status(key).await?);
    }
    Ok(Json(ApiResponse::ok(statuses)))
}

async fn sync_cancel(State(ctx): State<AppContext>, Json(request): Json<CancelRequest>) -> ApiResult<CancelResponse> {
    let key: LockKey = request.key.parse()?;
    let released = ctx.orchestrator.force_release_lock(key).await?;
    let message = if released {
        "lock released"
    } else {
        "lock was not held"
    };
    Ok(Json(ApiResponse::ok(CancelResponse { key, released }).with_message(message)))
}

async fn ai_usage(State(ctx): State<AppContext>) -> ApiResult<crate::core::models::UsageStats> {
    Ok(Json(ApiResponse::ok(ctx.router.usage_stats().await?)))
}

/// Build the router
pub fn app(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/sync/mail", post(sync_mail))
        .route("/sync/ai", post(sync_ai))
        .route("/sync/ai/:id", post(sync_ai_single))
        .route("/sync/status", get(sync_status))
        .route("/sync/cancel", post(sync_cancel))
        .route("/ai/usage", get(ai_usage))
        .with_state(ctx)
}

/// Run the HTTP server
pub async fn run_server(ctx: AppContext, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(ctx)).await?;

    Ok(())
}
