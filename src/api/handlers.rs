//! HTTP request handlers

use super::types::{ChatListResponse, ChatResponse, CreateChatRequest, ErrorResponse, SuccessResponse};
use super::ws::ws_handler;
use super::AppState;
use crate::error::{ChatError, ErrorKind};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Agent connection
        .route("/ws/agent", get(ws_handler))
        // Chat management
        .route("/api/wallets/:wallet/chats", get(list_chats).post(create_chat))
        .route("/api/wallets/:wallet/chats/:chat_id", delete(delete_chat))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

/// Wallet addresses start with `0x` and name a storage directory, so only
/// ASCII alphanumerics may follow.
pub(super) fn validate_wallet(wallet: &str) -> Result<String, AppError> {
    let valid = wallet
        .strip_prefix("0x")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()));
    if valid {
        Ok(wallet.to_string())
    } else {
        Err(AppError::BadRequest("Invalid wallet address".to_string()))
    }
}

// ============================================================
// Chats
// ============================================================

async fn list_chats(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<Json<ChatListResponse>, AppError> {
    let wallet = validate_wallet(&wallet)?;
    let chats = state.runtime.registry().list_chats(&wallet);
    let connected = state.runtime.is_connected(&wallet).await;
    Ok(Json(ChatListResponse { chats, connected }))
}

async fn create_chat(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
    body: Option<Json<CreateChatRequest>>,
) -> Result<Json<ChatResponse>, AppError> {
    let wallet = validate_wallet(&wallet)?;
    let req = body.map_or_else(CreateChatRequest::default, |Json(req)| req);
    let chat = state.runtime.registry().create_chat(&wallet, req.name.as_deref());
    Ok(Json(ChatResponse { chat }))
}

async fn delete_chat(
    State(state): State<AppState>,
    Path((wallet, chat_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, AppError> {
    let wallet = validate_wallet(&wallet)?;
    state.runtime.registry().delete_chat(&wallet, &chat_id)?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_version() -> &'static str {
    concat!("contract-copilot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err.kind {
            ErrorKind::InvalidInput => AppError::BadRequest(err.message),
            ErrorKind::NotFound => AppError::NotFound(err.message),
            ErrorKind::UpstreamFailure | ErrorKind::PersistenceFailure => AppError::Internal(err.message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
