use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use parley_gateway::connection::{self, GatewayConfig};
use parley_gateway::ConnectionHub;
use parley_types::api::ErrorBody;

#[derive(Clone)]
pub struct GatewayState {
    pub hub: ConnectionHub,
    pub jwt_secret: String,
    pub config: GatewayConfig,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws
///
/// A `?token=` is checked before upgrading; without one the socket must
/// send an identify command first.
pub async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let GatewayState { hub, jwt_secret, config } = state;

    match params.token {
        Some(token) => match connection::verify_token(&token, &jwt_secret) {
            Some(claims) => ws
                .on_upgrade(move |socket| connection::handle_connection_authenticated(socket, hub, claims, config))
                .into_response(),
            None => {
                warn!("Rejected WebSocket upgrade with an invalid token");
                let body = ErrorBody {
                    error: "invalid token".into(),
                };
                (StatusCode::UNAUTHORIZED, Json(body)).into_response()
            }
        },
        None => ws
            .on_upgrade(move |socket| connection::handle_connection(socket, hub, jwt_secret, config))
            .into_response(),
    }
}
