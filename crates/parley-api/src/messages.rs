use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_types::api::SendMessageRequest;
use parley_types::models::{ChatId, MessageRecord};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageQuery {
    /// Only return messages positioned after this seq.
    pub after: Option<i64>,
    pub limit: Option<u32>,
}

/// POST /chats/{chat_id}/messages
///
/// The message is committed before any push goes out, so a client that
/// reads history after seeing `new_message` always finds it.
pub async fn send_message(
    State(state): State<AppState>,
    path: Result<Path<ChatId>, PathRejection>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(chat_id) = path?;
    let Json(req) = payload?;

    let SendMessageRequest { user_id, content } = req;
    let message = state
        .run_write(move |db| db.append_message(chat_id, user_id, &content))
        .await?;

    state.notifier.message_appended(&message).await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /chats/{chat_id}/messages?after=&limit=
pub async fn get_messages(
    State(state): State<AppState>,
    path: Result<Path<ChatId>, PathRejection>,
    query: Result<Query<MessageQuery>, QueryRejection>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    let Path(chat_id) = path?;
    let Query(query) = query?;

    let messages = state
        .run_db(move |db| db.list_messages(chat_id, query.after, query.limit))
        .await?;
    Ok(Json(messages))
}
