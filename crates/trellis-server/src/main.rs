#![forbid(unsafe_code)]

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use trellis_core::config::load_config;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "trellisd: project, phase and task tracking service",
    long_about = None
)]
struct Cli {
    /// Path to trellis.toml (defaults to the platform config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on; overrides `[server] bind`.
    #[arg(long)]
    bind: Option<String>,

    /// SQLite store path; overrides `[store] path`.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TRELLIS_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "trellisd=debug,trellis_core=debug,trellis_server=debug,info"
        } else {
            "trellisd=info,trellis_core=info,trellis_server=info,warn"
        })
    });

    let format = env::var("TRELLIS_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact()).init();
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let mut config = load_config(cli.config.as_deref())?;
    config.apply_env_overrides(|key| env::var(key).ok());
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;

    let state = trellis_server::bootstrap(&config)?;
    let app = trellis_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        %addr,
        store = %config.store.path.display(),
        attachments = %config.attachments.root.display(),
        "trellisd listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP")?;
    Ok(())
}
