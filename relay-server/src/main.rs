mod config;
mod connection;
mod eat_arbiter;
mod error;
mod hub;
mod room;

use std::process::ExitCode;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use protocol::types::RoomId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, RelayConfig};
use crate::hub::Hub;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let cli = Cli::parse();
    let config = match RelayConfig::load(&cli).await {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let hub = Arc::new(Hub::new(config.room));

    let watchdog_hub = hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            watchdog_hub.reap_dead_rooms().await;
        }
    });

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/stats", get(stats_handler))
        .with_state(hub);

    let listener = match tokio::net::TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, addr = %config.listen, "failed to bind listener");
            return ExitCode::from(1);
        }
    };

    tracing::info!(addr = %config.listen, "relay-server listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(%err, "server loop exited with an error");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Upgrades the HTTP request to a websocket and hands it to [`connection::run`].
/// `roomHint` is accepted as an optional query-less convenience for now —
/// every socket is routed through [`Hub::assign`], which creates a room on
/// demand when no hint (or a dead one) is given.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    let room_config = hub_room_config(&hub);
    ws.on_upgrade(move |socket| async move {
        let room_hint: Option<RoomId> = None;
        connection::run(socket, hub, room_hint, room_config).await;
    })
}

fn hub_room_config(hub: &Hub) -> config::RoomConfig {
    hub.room_config()
}

async fn stats_handler(State(hub): State<Arc<Hub>>) -> Json<hub::Stats> {
    Json(hub.stats().await)
}
