use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use parley_types::api::{ChatIdResponse, ChatPairRequest};
use parley_types::models::{ChatId, ChatSummary, User, UserId};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /get-chat: the id of the one chat between two users, created on
/// first use. Repeated or concurrent calls for the same pair, in either
/// order, return the same id.
pub async fn get_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatPairRequest>, JsonRejection>,
) -> Result<Json<ChatIdResponse>, ApiError> {
    let Json(req) = payload?;
    let (a, b) = (req.user1_id, req.user2_id);

    let id = state.run_write(move |db| db.resolve_or_create_chat(a, b)).await?;
    debug!("Resolved chat {} for users {} and {}", id, a, b);
    Ok(Json(ChatIdResponse { id }))
}

/// POST /chats: always creates a new chat for the two users.
pub async fn create_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatPairRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let (a, b) = (req.user1_id, req.user2_id);

    let chat = state.run_write(move |db| db.create_chat(a, b)).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_participants(
    State(state): State<AppState>,
    path: Result<Path<ChatId>, PathRejection>,
) -> Result<Json<Vec<User>>, ApiError> {
    let Path(chat_id) = path?;
    let users = state.run_db(move |db| db.participants(chat_id)).await?;
    Ok(Json(users))
}

/// GET /users/{user_id}/chats: every chat the user is in, newest activity first.
pub async fn list_user_chats(
    State(state): State<AppState>,
    path: Result<Path<UserId>, PathRejection>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let Path(user_id) = path?;
    let chats = state.run_db(move |db| db.chats_for_user(user_id)).await?;
    Ok(Json(chats))
}
