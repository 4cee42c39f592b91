mod api;
mod catalog;
mod catalog_db;
mod config;
mod events;
mod live_sync;
mod models;
mod openapi;
mod playlist;
mod session;
mod session_registry;
mod shuffle;
mod startup;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::events::{LogBus, LogLayer};

const LOG_BUFFER_CAPACITY: usize = 500;

#[derive(Parser, Debug)]
#[command(name = "feed-hub-server")]
struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Catalog SQLite database file
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Server config file (TOML); defaults to config.toml next to the executable
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_bus = Arc::new(LogBus::new(LOG_BUFFER_CAPACITY));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,feed_hub_server=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .with(LogLayer::new(log_bus.clone()))
        .init();

    startup::run(args, log_bus).await
}
