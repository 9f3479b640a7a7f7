//! filedepot daemon entry point.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use filedepot_server::{DepotServer, ServerConfig};
use filedepot_store::Depot;

#[derive(Parser)]
#[command(name = "depotd", about = "filedepot file-transfer server", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::Config::load(&args.config)?;
    config.validate()?;

    // Structured logging; RUST_LOG overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        folder = %config.folder.display(),
        "starting depotd"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("depotd shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let depot = Arc::new(Depot::new(&config.folder));
    let server = DepotServer::new(
        ServerConfig {
            host: config.host,
            port: config.port,
        },
        depot,
    );

    let runner = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        // The server only returns early on an error (e.g. bind failure);
        // that aborts startup with a nonzero exit.
        result = &mut handle => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
            server.shutdown();
            handle.await??;
        }
    }
    Ok(())
}
