//! Lockbox Server - Main entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;

use api::AppState;

#[derive(Parser)]
#[command(name = "lockbox-server")]
#[command(about = "Lockbox - password-protected keychain server")]
#[command(version)]
struct Cli {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3000", env = "LOCKBOX_BIND_ADDRESS")]
    bind: String,

    /// File the exported keychain envelope is persisted to
    #[arg(long, default_value = "keychain.json", env = "LOCKBOX_STORE")]
    store: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let state = Arc::new(AppState::new(cli.store));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(bind = %cli.bind, "Lockbox server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
