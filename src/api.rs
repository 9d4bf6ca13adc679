//! Axum surface for the daemon: client WebSocket, HTTP sidebar, and
//! Integration REST (spec §6), built on the teacher's
//! `Router::new().route(...).with_state(state)` chain (`api/handlers.rs`).

mod http;
mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::persistence::DataDirs;
use crate::swarm::SwarmManagerHandle;

/// Shared application state, analogous to the teacher's `AppState`
/// (`runtime`/`llm_registry`/`db`) but wired to SwarmManager instead of a
/// SQL-backed conversation store. `ChannelBridge` is not part of request
/// handling — it runs its own background tasks once started in `main`.
#[derive(Clone)]
pub struct AppState {
    pub swarm: SwarmManagerHandle,
    pub config: Arc<Config>,
    pub data_dirs: DataDirs,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/read-file", post(http::read_file))
        .route("/api/transcribe", post(http::transcribe))
        .route(
            "/api/managers/:manager_id/integrations/slack",
            get(http::get_slack_integration).put(http::put_slack_integration),
        )
        .route(
            "/api/managers/:manager_id/integrations/telegram",
            get(http::get_telegram_integration).put(http::put_telegram_integration),
        )
        .route(
            "/api/integrations/gsuite",
            get(http::get_gsuite_integration).put(http::put_gsuite_integration),
        )
        .route("/api/settings/env", get(http::get_env_settings).put(http::put_env_settings))
        .route("/api/settings/auth", get(http::get_auth_settings).put(http::put_auth_settings))
        .route("/version", get(http::get_version))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
