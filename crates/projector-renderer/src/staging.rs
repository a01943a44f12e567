//! Producer-side ingest: single-slot staging buffer in front of the ring.
//!
//! [`FrameIngest::accept`] is called on the host's video thread. It copies the
//! frame into the staging buffer (latest frame wins) and, if the ring has a
//! free slot, promotes it immediately. Nothing here waits on the GPU or on
//! the render thread beyond the short ring/staging critical sections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use projector_core::FrameLayout;
use tracing::{debug, warn};

use crate::ring::PixelRing;

// MARK: - FrameBuffer

/// Owned copy of one host frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    layout: FrameLayout,
    bytes: Vec<u8>,
    reallocations: u64,
}

impl FrameBuffer {
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Copies `data` in, reallocating only when the layout changed.
    fn copy_from(&mut self, data: &[u8], layout: FrameLayout) {
        if self.layout != layout {
            self.bytes = vec![0; layout.byte_len()];
            self.layout = layout;
            self.reallocations += 1;
        }
        self.bytes.copy_from_slice(&data[..layout.byte_len()]);
    }
}

// MARK: - FrameStaging

#[derive(Default)]
struct Staged {
    frame: FrameBuffer,
    /// Set while the staged frame has not been promoted into the ring.
    fresh: bool,
}

/// Single-slot latest-frame cache. An unconsumed frame is silently replaced.
#[derive(Default)]
pub struct FrameStaging {
    slot: Mutex<Staged>,
}

impl FrameStaging {
    /// Stores the frame. Returns `true` if it replaced one never promoted.
    pub fn store(&self, data: &[u8], layout: FrameLayout) -> bool {
        let mut staged = self.slot.lock();
        let replaced = staged.fresh;
        staged.frame.copy_from(data, layout);
        staged.fresh = true;
        replaced
    }

    pub fn has_fresh_frame(&self) -> bool {
        self.slot.lock().fresh
    }

    pub fn layout(&self) -> FrameLayout {
        self.slot.lock().frame.layout()
    }

    pub fn reallocations(&self) -> u64 {
        self.slot.lock().frame.reallocations()
    }

    /// Moves the fresh frame into a free ring slot. Returns `true` on success;
    /// `false` when nothing is fresh or the ring is saturated.
    fn promote_into(&self, ring: &PixelRing) -> bool {
        let mut staged = self.slot.lock();
        if !staged.fresh {
            return false;
        }
        let Some(slot) = ring.acquire_for_write() else {
            return false;
        };
        let layout = staged.frame.layout();
        let committed = ring
            .write(slot, staged.frame.bytes(), layout)
            .and_then(|()| ring.commit_write(slot));
        if let Err(e) = committed {
            warn!("Ring rejected staged frame: {}", e);
            return false;
        }
        staged.fresh = false;
        true
    }
}

// MARK: - FrameIngest

/// Frame counters published by the ingest path.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub accepted: AtomicU64,
    pub promoted: AtomicU64,
    /// Frames overwritten in staging before reaching the ring, plus malformed frames.
    pub dropped: AtomicU64,
}

/// Staging buffer plus the currently attached ring (none while stopped).
#[derive(Default)]
pub struct FrameIngest {
    staging: FrameStaging,
    ring: Mutex<Option<Arc<PixelRing>>>,
    counters: IngestCounters,
}

impl FrameIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer-thread entry point. Never fails and never blocks on GPU work.
    pub fn accept(&self, data: &[u8], width: u32, height: u32, stride: usize) {
        let layout = FrameLayout::new(width, height, stride);
        if !layout.is_valid() || data.len() < layout.byte_len() {
            let n = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if n <= 5 || n % 300 == 0 {
                debug!(
                    "Dropping malformed frame {} ({} bytes, drop #{})",
                    layout,
                    data.len(),
                    n
                );
            }
            return;
        }

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        if self.staging.store(data, layout) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.promote_pending();
    }

    /// Pushes a staged frame into the ring if a slot is free. Called by the
    /// producer after each accept and by the render thread once per cycle so
    /// a frame staged during saturation still reaches the screen.
    pub fn promote_pending(&self) -> bool {
        let Some(ring) = self.ring.lock().clone() else {
            return false;
        };
        let promoted = self.staging.promote_into(&ring);
        if promoted {
            self.counters.promoted.fetch_add(1, Ordering::Relaxed);
        }
        promoted
    }

    pub fn attach(&self, ring: Arc<PixelRing>) {
        *self.ring.lock() = Some(ring);
    }

    /// Detaches the ring; later frames stay staged until the next attach.
    pub fn detach(&self) -> Option<Arc<PixelRing>> {
        self.ring.lock().take()
    }

    pub fn ring(&self) -> Option<Arc<PixelRing>> {
        self.ring.lock().clone()
    }

    pub fn staging(&self) -> &FrameStaging {
        &self.staging
    }

    pub fn counters(&self) -> &IngestCounters {
        &self.counters
    }
}
