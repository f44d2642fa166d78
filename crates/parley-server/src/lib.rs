pub mod config;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::{AppState, AppStateInner};
use parley_db::{Database, StoreOptions};
use parley_gateway::{ConnectionHub, GatewayConfig};

use crate::config::ServerConfig;
use crate::ws::GatewayState;

/// Everything `main` needs to serve: the router plus the hub, which the
/// reaper task runs against.
pub struct Services {
    pub router: Router,
    pub hub: ConnectionHub,
}

pub fn build(config: &ServerConfig) -> anyhow::Result<Services> {
    let options = StoreOptions {
        max_content_len: config.max_message_len,
        busy_timeout: config.db_timeout,
        write_timeout: config.db_timeout,
    };
    let db = Arc::new(Database::open(&config.db_path, options)?);
    info!("Database ready at {}", config.db_path.display());

    let hub = ConnectionHub::new(config.outbound_buffer);
    let app_state: AppState = Arc::new(AppStateInner::new(
        db,
        hub.clone(),
        config.jwt_secret.clone(),
        config.db_timeout,
    ));

    let gateway = GatewayState {
        hub: hub.clone(),
        jwt_secret: config.jwt_secret.clone(),
        config: GatewayConfig {
            heartbeat_interval: config.heartbeat_interval,
            ..GatewayConfig::default()
        },
    };

    let ws_route = Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .with_state(gateway);

    let router = Router::new()
        .merge(parley_api::routes(app_state))
        .merge(ws_route)
        .layer(cors_layer(config.cors_origin.as_deref())?)
        .layer(TraceLayer::new_for_http());

    Ok(Services { router, hub })
}

fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = origin else {
        return Ok(CorsLayer::permissive());
    };
    let origin: HeaderValue = origin.parse()?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}
