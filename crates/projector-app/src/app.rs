use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use projector_core::{Bounds, FrameSize};
use projector_renderer::SoftwareWindowSystem;
use tracing::{info, warn};

use crate::config_file::JsonConfigFile;
use crate::output::ProjectorOutput;
use crate::pattern::TestPattern;

const DEFAULT_CONFIG_PATH: &str = "projection-config.json";

/// Host output size of the synthetic video source.
const HOST_OUTPUT: FrameSize = FrameSize { width: 640, height: 360 };

/// Host video tick (~60 Hz).
const HOST_TICK: Duration = Duration::from_millis(16);

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the demo host until Ctrl-C.
///
/// # Flow
/// 1. Load (or generate) the projection config named by `PROJECTOR_CONFIG`
/// 2. Start the projector on the software window system
/// 3. Feed a moving test pattern at the host tick
/// 4. Re-apply the config file whenever its modification time changes
pub async fn run() -> Result<()> {
    // ── Configuration file ────────────────────────────────────────────────
    let path = std::env::var("PROJECTOR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config_file = JsonConfigFile::new(path);
    info!("Configuration file: {}", config_file.path().display());

    let windowing = SoftwareWindowSystem::new(Bounds::new(0, 0, 1280, 720));
    let output = Arc::new(ProjectorOutput::new(Box::new(windowing), config_file, HOST_OUTPUT));

    // ── Start (blocks until the render thread is up) ──────────────────────
    let o = Arc::clone(&output);
    tokio::task::spawn_blocking(move || o.start())
        .await
        .context("Start task panicked")??;
    info!("Projector output running at {}", HOST_OUTPUT);

    let producer = tokio::spawn(produce_frames(Arc::clone(&output)));
    let watcher = tokio::spawn(watch_config(Arc::clone(&output)));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");

    producer.abort();
    watcher.abort();

    let o = Arc::clone(&output);
    tokio::task::spawn_blocking(move || o.stop()).await.context("Stop task panicked")?;

    let stats = output.stats();
    info!(
        "Final stats: accepted={} dropped={} uploads={} presents={} hot_reloads={} restarts={}",
        stats.frames_accepted,
        stats.frames_dropped,
        stats.uploads,
        stats.presents,
        stats.hot_reloads,
        stats.restarts
    );
    Ok(())
}

// ── Synthetic producer ─────────────────────────────────────────────────────────

async fn produce_frames(output: Arc<ProjectorOutput>) {
    let mut pattern = TestPattern::new(HOST_OUTPUT);
    let layout = pattern.layout();
    let mut tick = tokio::time::interval(HOST_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        output.raw_video(pattern.next_frame(), layout);

        let n = pattern.frames();
        if n % 600 == 0 {
            let stats = output.stats();
            info!(
                "Produced {} frames (accepted={} dropped={} presents={})",
                n, stats.frames_accepted, stats.frames_dropped, stats.presents
            );
        }
    }
}

// ── Config file watcher ────────────────────────────────────────────────────────

async fn watch_config(output: Arc<ProjectorOutput>) {
    let mut last: Option<SystemTime> = output.config_file().modified();
    let mut tick = tokio::time::interval(WATCH_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let modified = output.config_file().modified();
        if modified.is_none() || modified == last {
            continue;
        }
        last = modified;
        info!("Configuration file changed, reloading");

        let o = Arc::clone(&output);
        match tokio::task::spawn_blocking(move || o.reload_config()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Reload failed: {:#}", e),
            Err(e) => warn!("Reload task panicked: {}", e),
        }
    }
}
