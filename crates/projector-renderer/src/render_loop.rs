//! The composite/render thread.
//!
//! # Cycle (fixed order)
//! 1. Apply at most one pending reload and release its requester
//! 2. Promote a staged frame, upload the newest queued ring slot and retire
//!    older queued slots without uploading them
//! 3. Composite: aspect-fit the source into the composite target
//! 4. Present into every monitor window and flip
//!
//! then recycle completed ring slots, pump window events, and sleep out the
//! rest of the period. Stop requests and window close requests are checked
//! once per cycle.
//!
//! # Teardown
//! stop flipping → release composite target → release ring → destroy windows

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use projector_core::{FrameSize, GpuError, ProjectionConfig, ProjectorError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::cadence::Pacer;
use crate::composite::Compositor;
use crate::events::{EventPoller, EventPump};
use crate::monitor::MonitorSet;
use crate::reload::{LoopState, ReloadMailbox};
use crate::ring::{CompletionPolicy, InFlightSlot, PixelRing};
use crate::staging::FrameIngest;
use crate::stats::{throttled, LoopCounters, StageTimer};

/// Cycles between periodic statistics reports.
const REPORT_EVERY: u64 = 300;

/// Everything the render thread takes ownership of at spawn.
pub(crate) struct LoopParts {
    pub monitors: Box<dyn MonitorSet>,
    pub mailbox: Arc<ReloadMailbox>,
    pub ingest: Arc<FrameIngest>,
    pub ring: Arc<PixelRing>,
    pub policy: Box<dyn CompletionPolicy>,
    pub pump: EventPump,
    pub counters: Arc<LoopCounters>,
    pub output_size: FrameSize,
    pub stop: Arc<AtomicBool>,
}

/// Spawns the render thread and waits for its initialization handshake.
///
/// Blocks the caller; must not be called from an async context.
pub(crate) fn spawn(parts: LoopParts) -> Result<JoinHandle<()>, ProjectorError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), GpuError>>();

    let handle = std::thread::Builder::new()
        .name("projector-render".into())
        .spawn(move || {
            let (render_loop, monitors) = RenderLoop::new(parts);
            render_loop.run(monitors, ready_tx);
        })
        .map_err(|e| ProjectorError::ThreadSpawn { reason: e.to_string() })?;

    match ready_rx.blocking_recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(ProjectorError::Gpu(e))
        }
        Err(_) => {
            let _ = handle.join();
            Err(ProjectorError::RenderThreadLost)
        }
    }
}

/// Releases reload waiters even if the loop unwinds.
struct FinishGuard(Arc<ReloadMailbox>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

struct RenderLoop {
    mailbox: Arc<ReloadMailbox>,
    ingest: Arc<FrameIngest>,
    ring: Arc<PixelRing>,
    compositor: Compositor,
    policy: Box<dyn CompletionPolicy>,
    in_flight: VecDeque<InFlightSlot>,
    /// Queued slots overtaken by a newer frame in the current cycle.
    superseded: Vec<usize>,
    pacer: Pacer,
    poller: EventPoller,
    counters: Arc<LoopCounters>,
    stop: Arc<AtomicBool>,
    cycle: u64,
    draw_failures: u64,
    present_failures: u64,
    timers: [StageTimer; 4],
}

impl RenderLoop {
    fn new(parts: LoopParts) -> (Self, Box<dyn MonitorSet>) {
        let config = parts.mailbox.current();
        let settings = &config.render;
        let capacity = parts.ring.capacity();
        let render_loop = Self {
            compositor: Compositor::new(parts.output_size, capacity),
            pacer: Pacer::new(settings.frame_interval()),
            poller: EventPoller::new(parts.pump, settings.event_poll_interval()),
            mailbox: parts.mailbox,
            ingest: parts.ingest,
            ring: parts.ring,
            policy: parts.policy,
            in_flight: VecDeque::new(),
            superseded: Vec::with_capacity(capacity),
            counters: parts.counters,
            stop: parts.stop,
            cycle: 0,
            draw_failures: 0,
            present_failures: 0,
            timers: [
                StageTimer::new("Renders Update Assets"),
                StageTimer::new("Renders Cycle"),
                StageTimer::new("Monitors Cycle"),
                StageTimer::new("Monitors Flip"),
            ],
        };
        (render_loop, parts.monitors)
    }

    fn run(mut self, mut monitors: Box<dyn MonitorSet>, ready: oneshot::Sender<Result<(), GpuError>>) {
        let _finish = FinishGuard(Arc::clone(&self.mailbox));

        if let Err(e) = monitors.gpu().make_current() {
            error!("Render thread could not bind the shared GPU context: {}", e);
            monitors.destroy();
            let _ = ready.send(Err(e));
            return;
        }
        self.compositor.init(monitors.gpu());

        // Any request raced in before the handshake is applied by the first cycle.
        self.mailbox.set_state(LoopState::Running);
        info!(
            "Render loop running: {} window(s), ring of {}, period {:?}",
            monitors.window_count(),
            self.ring.capacity(),
            self.pacer.period()
        );
        if ready.send(Ok(())).is_err() {
            warn!("Start requester went away before the handshake");
        }

        while !self.stop.load(Ordering::Acquire) {
            self.cycle(&mut *monitors);
            if monitors.should_close() {
                info!("All monitor windows requested close");
                break;
            }
        }

        self.mailbox.set_state(LoopState::Terminating);
        self.teardown(monitors);
    }

    fn cycle(&mut self, monitors: &mut dyn MonitorSet) {
        self.pacer.begin_cycle();
        self.cycle += 1;
        LoopCounters::bump(&self.counters.cycles);

        if let Some(reload) = self.mailbox.take_pending() {
            self.apply(monitors, reload.config());
            LoopCounters::bump(&self.counters.hot_reloads);
            self.mailbox.complete(reload);
        }

        self.timers[0].begin();
        self.ingest.promote_pending();
        if let Some(slot) = self.ring.acquire_latest_for_read(&mut self.superseded) {
            self.retire_superseded();
            if self.compositor.update_from_ring(monitors.gpu(), &self.ring, slot) {
                LoopCounters::bump(&self.counters.uploads);
            }
            match self.ring.commit_read(slot) {
                Ok(()) => self.in_flight.push_back(InFlightSlot { slot, uploaded_cycle: self.cycle }),
                Err(e) => error!("Ring slot {} lost: {}", slot, e),
            }
        }
        self.timers[0].end();

        self.timers[1].begin();
        if let Err(e) = self.compositor.draw(monitors.gpu()) {
            self.draw_failures += 1;
            if throttled(self.draw_failures) {
                warn!("Composite draw #{} failed: {}", self.draw_failures, e);
            }
        }
        self.timers[1].end();

        self.timers[2].begin();
        if let Some(target) = self.compositor.target() {
            let (texture, size) = (target.texture(), target.size());
            match monitors.present(texture, size) {
                Ok(()) => {
                    LoopCounters::bump(&self.counters.presents);
                }
                Err(e) => {
                    self.present_failures += 1;
                    if throttled(self.present_failures) {
                        warn!("Present #{} failed: {}", self.present_failures, e);
                    }
                }
            }
        }
        self.timers[2].end();

        self.timers[3].begin();
        monitors.flip();
        self.timers[3].end();

        self.recycle_completed();
        self.poller.tick(Instant::now());

        if self.cycle % REPORT_EVERY == 0 {
            self.report();
        }
        self.pacer.finish_cycle();
    }

    fn apply(&mut self, monitors: &mut dyn MonitorSet, config: &ProjectionConfig) {
        info!("Hot-reloading configuration ({} monitor(s))", config.monitors.len());
        monitors.reconfigure(config);
        self.pacer.set_period(config.render.frame_interval());
        self.poller.set_interval(config.render.event_poll_interval());
        self.policy.configure(&config.render);
    }

    /// Returns overtaken slots to `Free`. They were never uploaded, so no GPU
    /// work can still be reading them.
    fn retire_superseded(&mut self) {
        for slot in self.superseded.drain(..) {
            if let Err(e) = self.ring.commit_read(slot).and_then(|()| self.ring.flush(slot)) {
                error!("Superseded ring slot {} could not be recycled: {}", slot, e);
            }
        }
    }

    fn recycle_completed(&mut self) {
        while let Some(front) = self.in_flight.front().copied() {
            if !self.policy.is_complete(front, self.cycle) {
                break;
            }
            self.in_flight.pop_front();
            if let Err(e) = self.ring.flush(front.slot) {
                error!("Ring slot {} could not be recycled: {}", front.slot, e);
            }
        }
    }

    fn report(&mut self) {
        let c = &self.counters;
        let counters = self.ingest.counters();
        debug!(
            "Render stats: cycles={} uploads={} accepted={} dropped={} reloads={}",
            c.cycles.load(Ordering::Relaxed),
            c.uploads.load(Ordering::Relaxed),
            counters.accepted.load(Ordering::Relaxed),
            counters.dropped.load(Ordering::Relaxed),
            c.hot_reloads.load(Ordering::Relaxed),
        );
        for timer in &mut self.timers {
            timer.report();
        }
    }

    fn teardown(mut self, mut monitors: Box<dyn MonitorSet>) {
        monitors.stop_flip();
        self.compositor.release_target(monitors.gpu());

        self.ingest.detach();
        self.in_flight.clear();
        self.compositor.release_ring(monitors.gpu());

        monitors.destroy();
        info!("Render loop exited after {} cycle(s)", self.cycle);
    }
}
