use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;
mod config_file;
mod output;
mod pattern;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=debug also prints per-stage render timings
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("Projector v{}", env!("CARGO_PKG_VERSION"));
    info!("Starting...");

    match app::run().await {
        Ok(()) => {
            info!("Projector exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}
