//! API route handlers and the application router.

pub mod chat;

use adminhub_shared::{HealthResponse, HubError, ProblemDetails};
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthError;
use crate::state::AppState;
use crate::ws;

/// Handler error rendered as `application/problem+json`
#[derive(Debug)]
pub struct ApiError(pub ProblemDetails);

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::bad_request(detail))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::internal_error(detail))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.0)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Backend(_) => Self(ProblemDetails::internal_error(e.to_string())),
            _ => Self(ProblemDetails::unauthorized(e.to_string())),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        tracing::error!("Hub error: {}", e);
        Self::internal(e.to_string())
    }
}

/// Liveness probe
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        online: state.hub.online_count().await,
    })
}

/// Build the API router with CORS and request tracing applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // WebSocket
        .route(ws::WS_PATH, get(ws::ws_handler))
        // Chat
        .route("/api/v1/chats/messages", post(chat::send_message))
        .route("/api/v1/chats/notifications", post(chat::send_notification))
        .route("/api/v1/chats/tasks/progress", post(chat::send_task_progress))
        .route("/api/v1/chats/online", get(chat::online_users))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
