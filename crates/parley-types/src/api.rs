use serde::{Deserialize, Serialize};

use crate::models::{ChatId, UserId};

// -- JWT Claims --

/// JWT claims shared by parley-api (token issue) and parley-gateway
/// (push connection authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub token: String,
}

// -- Chats --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatPairRequest {
    pub user1_id: UserId,
    pub user2_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatIdResponse {
    pub id: ChatId,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub user_id: UserId,
    pub content: String,
}

// -- Misc --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
}
