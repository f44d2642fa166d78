pub mod auth;
pub mod chats;
pub mod error;
pub mod messages;
pub mod state;
pub mod users;

use axum::{
    Router,
    routing::{get, post},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Every REST route. The push channel and middleware layers are added by
/// the server binary.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(users::health))
        .route("/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/users", get(users::list_users))
        .route("/users/{user_id}/chats", get(chats::list_user_chats))
        .route("/get-chat", post(chats::get_chat))
        .route("/chats", post(chats::create_chat))
        .route("/chats/{chat_id}/participants", get(chats::list_participants))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .with_state(state)
}
