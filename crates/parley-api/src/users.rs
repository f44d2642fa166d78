use axum::{Json, extract::State};

use parley_types::api::HealthResponse;
use parley_types::models::User;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = state.run_db(|db| db.list_users()).await?;
    Ok(Json(users))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        connections: state.hub.connection_count().await,
    })
}
