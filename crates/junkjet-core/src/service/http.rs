use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{self, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chatbot::ChatbotService;
use crate::error::SessionError;
use crate::service::auth::{auth_middleware, AuthState, AuthUser};
use crate::session::SessionInfo;

/// Shared application state for the HTTP API.
pub struct AppState {
    pub chatbot: Arc<ChatbotService>,
    pub auth: AuthState,
}

impl AppState {
    pub fn new(chatbot: Arc<ChatbotService>, auth: AuthState) -> Self {
        Self { chatbot, auth }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatbotQuery {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_keys: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used: Option<String>,
}

/// Session errors rendered as JSON with a matching status code.
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            SessionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SessionError::StoreTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SessionError::StoreUnavailable(_) | SessionError::Serialization(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Chatbot request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Create the axum Router with all chatbot routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/chatbot/chatbotquery", post(handle_chatbot_query))
        .route(
            "/chatbot/session",
            get(handle_get_session).delete(handle_clear_session),
        )
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .route("/chatbot/sessions/analytics", get(handle_analytics))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION]),
        )
        .with_state(state)
}

/// POST /chatbot/chatbotquery
async fn handle_chatbot_query(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ChatbotQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let reply = state
        .chatbot
        .send_message(&user.user_id, user.user_type, &req.message)
        .await?;
    Ok(Json(reply))
}

/// GET /chatbot/session
async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.chatbot.get_session_info(&user.user_id).await?;
    Ok(Json(SessionResponse {
        exists: session.is_some(),
        session,
    }))
}

/// DELETE /chatbot/session
async fn handle_clear_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    state.chatbot.clear_session(&user.user_id).await?;
    Ok(Json(serde_json::json!({ "cleared": true })))
}

/// GET /chatbot/sessions/analytics
async fn handle_analytics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.chatbot.get_session_analytics().await?;
    Ok(Json(snapshot))
}

/// GET /health
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.chatbot.store();
    let (status, code) = match store.ping().await {
        Ok(()) => ("ok", StatusCode::OK),
        Err(e) => {
            error!("Health check: store ping failed: {}", e);
            ("degraded", StatusCode::SERVICE_UNAVAILABLE)
        }
    };
    let stats = if code == StatusCode::OK {
        match store.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Health check: store stats unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };
    let (session_keys, memory_used) = match stats {
        Some(stats) => (Some(stats.session_keys), stats.memory_used),
        None => (None, None),
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: crate::VERSION.to_string(),
            store: store.backend_name().to_string(),
            session_keys,
            memory_used,
        }),
    )
}

/// Start the HTTP server on the given address, running until `shutdown` resolves.
pub async fn serve<F>(addr: &str, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
