//! eskala-server — HTTP server binary for the ticket engine
//!
//! ```bash
//! # Run with defaults (sled data in ./eskala_data, port 8080)
//! eskala-server
//!
//! # Point at a config file and seed two logged-in agents for a demo
//! eskala-server --config eskala.toml --login alice --login bob
//! ```
//!
//! ## Environment variables
//!
//! | Variable        | Description                              |
//! |-----------------|------------------------------------------|
//! | `ESKALA_CONFIG` | Path to the TOML config file             |
//! | `RUST_LOG`      | Logging filter (default: info)           |

use anyhow::Context;
use clap::Parser;
use eskala::api::{build_router, AppState};
use eskala::config::AppConfig;
use eskala::engine::TicketEngine;
use eskala::persistent::SledStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "eskala-server", about = "Eskala ticket escalation & distribution server")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides ESKALA_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long, short)]
    bind: Option<String>,

    /// Sled data directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Mark an agent as logged in at startup (repeatable). Normally the
    /// auth layer maintains the directory; this seeds development setups.
    #[arg(long)]
    login: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,eskala=debug")),
        )
        .init();

    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.server.data_dir = data_dir;
    }

    let store = SledStore::open(&config.server.data_dir)
        .with_context(|| format!("opening store at {}", config.server.data_dir.display()))?;

    for agent in &args.login {
        store.log_in(agent)?;
        info!(agent = %agent, "Seeded logged-in agent");
    }

    let engine = TicketEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config.engine.clone(),
    );

    let state = Arc::new(AppState {
        engine,
        store: store.clone(),
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    info!(
        bind = %config.server.bind_address,
        data_dir = %config.server.data_dir.display(),
        "Starting eskala-server"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
