mod config;
mod connection;
mod handlers;
mod queue;
mod scheduler;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Mode, ServerConfig};
use crate::scheduler::Scheduler;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("server=debug,common=info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::parse();
    let state = AppState::new(config.mode, config.scheduler());

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", config.bind))?;
    info!(
        "[INFO] servidor escuchando en {} (modo {:?})",
        listener.local_addr()?,
        config.mode
    );

    // scheduler en segundo plano (el modo directo no usa la cola)
    if config.mode == Mode::Scheduled {
        let scheduler = Scheduler::new(state.queue.clone(), state.scheduler);
        tokio::spawn(async move {
            scheduler.run().await;
        });
    }

    // API HTTP de estado
    if !config.no_http {
        let http = TcpListener::bind(config.http_bind)
            .await
            .with_context(|| format!("no se pudo escuchar en {}", config.http_bind))?;
        info!("[INFO] API de estado en http://{}", http.local_addr()?);

        let app = handlers::build_router(state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(http, app).await {
                error!("[ERROR] API de estado caída: {}", e);
            }
        });
    }

    connection::serve(listener, state).await
}
