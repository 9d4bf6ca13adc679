//! Middleman - local supervisor daemon for LLM agent subprocesses.
//!
//! Multiplexes WebSocket UI/control clients over a SwarmManager actor and
//! bridges Slack/Telegram channels into the same agent conversations.

mod agent;
mod api;
mod channels;
mod config;
mod error;
mod persistence;
mod swarm;
mod wire;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent::SessionTimeouts;
use api::{create_router, AppState};
use channels::ChannelBridge;
use config::Config;
use persistence::DataDirs;
use swarm::SwarmManager;

/// Exit codes (spec.md:162): 0 normal stop, 1 fatal uncaught error, 2 port
/// unavailable after the one fallback-port attempt below.
const EXIT_FATAL: i32 = 1;
const EXIT_PORT_UNAVAILABLE: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "middleman=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    if let Err(code) = run().await {
        std::process::exit(code);
    }
}

async fn run() -> Result<(), i32> {
    let data_dirs = DataDirs::resolve();
    data_dirs.ensure_all().map_err(|e| {
        tracing::error!(error = %e, "failed to create data directories");
        EXIT_FATAL
    })?;

    let config_path = data_dirs.root().join("config.json");
    let config = Config::load(&config_path).map_err(|e| {
        tracing::error!(error = %e, "failed to load config");
        EXIT_FATAL
    })?;
    tracing::info!(root = %data_dirs.root().display(), port = config.port, "starting middleman daemon");

    let agent_runtime_program = std::env::var("MIDDLEMAN_AGENT_RUNTIME")
        .unwrap_or_else(|_| "middleman-agent-runtime".to_string());

    let session_timeouts = SessionTimeouts {
        graceful_stop: config.timeouts.graceful_stop(),
        steer_cancel: config.timeouts.steer_cancel(),
    };

    let swarm = SwarmManager::start(
        data_dirs.clone(),
        agent_runtime_program,
        config.history_capacity,
        config.subscriber_queue_capacity,
        session_timeouts,
    );

    let _channel_bridge: ChannelBridge = ChannelBridge::start(&config, swarm.clone());

    let listener = bind_with_fallback(config.port).await?;

    let state = AppState {
        swarm,
        config: Arc::new(config.clone()),
        data_dirs,
    };
    let app = create_router(state);

    let bound_addr = listener.local_addr().map_err(|e| {
        tracing::error!(error = %e, "failed to read bound listener address");
        EXIT_FATAL
    })?;
    tracing::info!(addr = %bound_addr, "middleman daemon listening");

    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!(error = %e, "server loop exited with an error");
        EXIT_FATAL
    })?;

    Ok(())
}

/// Binds `port`, falling back to `port + 1` exactly once on `AddrInUse`
/// before giving up (spec.md:162's "port unavailable after fallback
/// attempt").
async fn bind_with_fallback(port: u16) -> Result<tokio::net::TcpListener, i32> {
    let primary = SocketAddr::from(([0, 0, 0, 0], port));
    match tokio::net::TcpListener::bind(primary).await {
        Ok(listener) => return Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::warn!(addr = %primary, "port in use, attempting fallback port");
        }
        Err(e) => {
            tracing::error!(addr = %primary, error = %e, "failed to bind listener");
            return Err(EXIT_FATAL);
        }
    }

    let fallback = SocketAddr::from(([0, 0, 0, 0], port.wrapping_add(1)));
    tokio::net::TcpListener::bind(fallback).await.map_err(|e| {
        tracing::error!(primary = %primary, fallback = %fallback, error = %e, "fallback port also unavailable");
        EXIT_PORT_UNAVAILABLE
    })
}
