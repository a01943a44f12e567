//! Public facade: lifecycle, frame ingest and the reload coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use projector_core::{Bounds, FrameSize, ProjectionConfig, ProjectorError, RenderSettings};
use tracing::{error, info, warn};

use crate::events::EventPump;
use crate::monitor::WindowSystem;
use crate::reload::{LoopState, ReloadMailbox, ReloadOutcome, ReloadQueue};
use crate::render_loop::{self, LoopParts};
use crate::ring::{CompletionPolicy, FrameDelay, PixelRing};
use crate::staging::FrameIngest;
use crate::stats::{LoopCounters, PipelineStats};

/// Builds the completion policy for a set of render settings.
pub type PolicyFactory = Arc<dyn Fn(&RenderSettings) -> Box<dyn CompletionPolicy> + Send + Sync>;

// MARK: - Builder

pub struct ProjectorBuilder {
    windowing: Box<dyn WindowSystem>,
    pump: EventPump,
    policy: Option<PolicyFactory>,
    config: Option<ProjectionConfig>,
}

impl ProjectorBuilder {
    pub fn event_pump(mut self, pump: EventPump) -> Self {
        self.pump = pump;
        self
    }

    pub fn completion_policy(mut self, factory: PolicyFactory) -> Self {
        self.policy = Some(factory);
        self
    }

    /// Configuration used by the first `start`. Defaults to one monitor
    /// covering the window system's default bounds.
    pub fn initial_config(mut self, config: ProjectionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Projector {
        let config = self
            .config
            .unwrap_or_else(|| ProjectionConfig::default_for(self.windowing.default_bounds()));
        let policy = match self.policy {
            Some(policy) => policy,
            None => {
                let frame_delay: PolicyFactory = Arc::new(|settings: &RenderSettings| -> Box<dyn CompletionPolicy> {
                    Box::new(FrameDelay::new(settings.flush_delay_frames))
                });
                frame_delay
            }
        };
        Projector {
            control: Mutex::new(Control { windowing: self.windowing, output_size: None, running: None }),
            reloads: ReloadQueue::default(),
            mailbox: Arc::new(ReloadMailbox::new(config)),
            ingest: Arc::new(FrameIngest::new()),
            counters: Arc::new(LoopCounters::default()),
            pump: self.pump,
            policy,
        }
    }
}

// MARK: - Projector

struct RunningLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Control {
    windowing: Box<dyn WindowSystem>,
    output_size: Option<FrameSize>,
    running: Option<RunningLoop>,
}

/// Mirrors a host video output onto the configured monitor windows.
///
/// `accept` may be called from any thread and never blocks on the render
/// thread. `start`, `stop` and `schedule_reload` block and must not be called
/// from an async context.
pub struct Projector {
    control: Mutex<Control>,
    reloads: ReloadQueue,
    mailbox: Arc<ReloadMailbox>,
    ingest: Arc<FrameIngest>,
    counters: Arc<LoopCounters>,
    pump: EventPump,
    policy: PolicyFactory,
}

impl Projector {
    pub fn builder(windowing: Box<dyn WindowSystem>) -> ProjectorBuilder {
        ProjectorBuilder { windowing, pump: EventPump::None, policy: None, config: None }
    }

    /// Creates the monitor windows, the pixel ring and the render thread.
    ///
    /// `output_size` is the host's output size; the composite target is
    /// allocated at that size. No-op while already running.
    pub fn start(&self, output_size: FrameSize) -> Result<(), ProjectorError> {
        let mut control = self.control.lock();
        if Self::loop_alive(&control) {
            return Ok(());
        }
        Self::reap(&mut control);
        control.output_size = Some(output_size);
        self.start_locked(&mut control, output_size)
    }

    fn start_locked(&self, control: &mut Control, output_size: FrameSize) -> Result<(), ProjectorError> {
        let config = self.mailbox.current();
        config.validate()?;

        let monitors = control.windowing.create(&config)?;
        let ring = Arc::new(PixelRing::new(config.render.effective_ring_capacity()));
        self.ingest.attach(Arc::clone(&ring));

        let stop = Arc::new(AtomicBool::new(false));
        let parts = LoopParts {
            monitors,
            mailbox: Arc::clone(&self.mailbox),
            ingest: Arc::clone(&self.ingest),
            ring,
            policy: (self.policy)(&config.render),
            pump: self.pump.clone(),
            counters: Arc::clone(&self.counters),
            output_size,
            stop: Arc::clone(&stop),
        };
        match render_loop::spawn(parts) {
            Ok(handle) => {
                info!("Projector started: output {}, {} monitor(s)", output_size, config.monitors.len());
                control.running = Some(RunningLoop { stop, handle });
                Ok(())
            }
            Err(e) => {
                self.ingest.detach();
                error!("Projector failed to start: {}", e);
                Err(e)
            }
        }
    }

    /// Stops the render loop and waits for its teardown. Idempotent.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        Self::stop_locked(&mut control);
        self.ingest.detach();
    }

    fn stop_locked(control: &mut Control) {
        let Some(running) = control.running.take() else { return };
        running.stop.store(true, Ordering::Release);
        if running.handle.join().is_err() {
            error!("Render thread panicked");
        }
        info!("Projector stopped");
    }

    fn loop_alive(control: &Control) -> bool {
        control.running.as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    /// Joins a loop that exited on its own (all windows closed).
    fn reap(control: &mut Control) {
        if control.running.as_ref().is_some_and(|r| r.handle.is_finished()) {
            Self::stop_locked(control);
        }
    }

    /// Hands a host frame to the pipeline. Never blocks on the render thread;
    /// frames that cannot be queued are dropped in favour of newer ones.
    pub fn accept(&self, data: &[u8], width: u32, height: u32, stride: usize) {
        self.ingest.accept(data, width, height, stride);
    }

    /// Replaces the configuration and blocks until it takes effect.
    ///
    /// Structural changes (see [`ProjectionConfig::requires_restart`]) stop
    /// the loop, rebuild windows and assets and start again. Everything else
    /// is applied by the render thread between two cycles. Concurrent callers
    /// are served one at a time in arrival order.
    pub fn schedule_reload(&self, config: ProjectionConfig) -> Result<ReloadOutcome, ProjectorError> {
        config.validate()?;
        let config = Arc::new(config);

        let _turn = self.reloads.enter();
        let mut control = self.control.lock();
        Self::reap(&mut control);
        if !Self::loop_alive(&control) {
            self.mailbox.install(config);
            return Ok(ReloadOutcome::Installed);
        }

        let old = self.mailbox.current();
        if !ProjectionConfig::requires_restart(&old, &config) {
            return Ok(self.mailbox.submit_and_wait(config));
        }

        info!("Configuration change requires a restart");
        Self::stop_locked(&mut control);
        self.ingest.detach();
        drop(old);
        self.mailbox.install(config);

        let Some(output_size) = control.output_size else {
            warn!("Restart requested without a known output size");
            return Ok(ReloadOutcome::Installed);
        };
        self.start_locked(&mut control, output_size)?;
        LoopCounters::bump(&self.counters.restarts);
        Ok(ReloadOutcome::Restarted)
    }

    pub fn current_config(&self) -> Arc<ProjectionConfig> {
        self.mailbox.current()
    }

    pub fn state(&self) -> LoopState {
        self.mailbox.state()
    }

    pub fn is_running(&self) -> bool {
        Self::loop_alive(&self.control.lock())
    }

    pub fn default_bounds(&self) -> Bounds {
        self.control.lock().windowing.default_bounds()
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        let ingest = self.ingest.counters();
        PipelineStats {
            cycles: c.cycles.load(Ordering::Relaxed),
            uploads: c.uploads.load(Ordering::Relaxed),
            presents: c.presents.load(Ordering::Relaxed),
            hot_reloads: c.hot_reloads.load(Ordering::Relaxed),
            restarts: c.restarts.load(Ordering::Relaxed),
            frames_accepted: ingest.accepted.load(Ordering::Relaxed),
            frames_promoted: ingest.promoted.load(Ordering::Relaxed),
            frames_dropped: ingest.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Projector {
    fn drop(&mut self) {
        self.stop();
    }
}
