//! Pixel transfer ring.
//!
//! A fixed arena of slots indexed by integer id. Each slot cycles strictly
//! `Free → Written → Queued → InFlight → Free`:
//!
//! ```text
//! producer:  acquire_for_write ─► write ─► commit_write
//!                                              │ (FIFO)
//! render:    acquire_latest_for_read ─► upload ─► commit_read ─► ... ─► flush
//! ```
//!
//! The render thread only ever uploads the newest queued slot. Older queued
//! slots are superseded and go straight back to `Free` without touching the GPU.
//!
//! The CPU side ([`PixelRing`]) is shared between the producer and the render
//! thread. The GPU buffers backing the slots ([`RingUploader`]) belong to the
//! render thread alone.

use std::collections::VecDeque;

use parking_lot::Mutex;
use projector_core::{FrameLayout, FrameSize, GpuError, RenderSettings, RingError};
use tracing::debug;

use crate::gpu::{BufferId, GpuDevice, TextureId};

// MARK: - SlotState

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Written,
    Queued,
    InFlight,
}

impl SlotState {
    /// The only state this one may move to.
    pub fn next(self) -> Self {
        match self {
            Self::Free => Self::Written,
            Self::Written => Self::Queued,
            Self::Queued => Self::InFlight,
            Self::InFlight => Self::Free,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Written => "Written",
            Self::Queued => "Queued",
            Self::InFlight => "InFlight",
        }
    }
}

// MARK: - SlotStorage

/// CPU-visible storage of one slot (the mapped side of its GPU buffer).
#[derive(Debug, Default)]
pub struct SlotStorage {
    layout: FrameLayout,
    bytes: Vec<u8>,
    resizes: u64,
}

impl SlotStorage {
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// How many times the backing storage was reallocated.
    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    fn store(&mut self, data: &[u8], layout: FrameLayout) {
        let len = layout.byte_len();
        if self.layout.size != layout.size || self.layout.stride != layout.stride {
            self.bytes = vec![0; len];
            self.layout = layout;
            self.resizes += 1;
        }
        let n = len.min(data.len());
        self.bytes[..n].copy_from_slice(&data[..n]);
    }
}

// MARK: - PixelRing

struct RingIndex {
    states: Vec<SlotState>,
    queued: VecDeque<usize>,
}

impl RingIndex {
    fn advance(&mut self, slot: usize, to: SlotState) -> Result<(), RingError> {
        let state = self
            .states
            .get_mut(slot)
            .ok_or(RingError::UnknownSlot { slot })?;
        if state.next() != to {
            return Err(RingError::InvalidTransition { slot, from: state.name(), to: to.name() });
        }
        *state = to;
        Ok(())
    }
}

/// Fixed-capacity ring of transfer slots. Capacity never changes after
/// construction; only slot metadata and storage mutate.
pub struct PixelRing {
    index: Mutex<RingIndex>,
    slots: Vec<Mutex<SlotStorage>>,
}

impl PixelRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            index: Mutex::new(RingIndex {
                states: vec![SlotState::Free; capacity],
                queued: VecDeque::with_capacity(capacity),
            }),
            slots: (0..capacity).map(|_| Mutex::new(SlotStorage::default())).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.index.lock().states.get(slot).copied()
    }

    /// Number of slots waiting to be read.
    pub fn queued_len(&self) -> usize {
        self.index.lock().queued.len()
    }

    /// Claims a free slot for the producer, or `None` when saturated.
    pub fn acquire_for_write(&self) -> Option<usize> {
        let mut index = self.index.lock();
        let slot = index.states.iter().position(|s| *s == SlotState::Free)?;
        index.states[slot] = SlotState::Written;
        Some(slot)
    }

    /// Copies a frame into a slot claimed with [`acquire_for_write`](Self::acquire_for_write).
    /// Storage is reallocated only when the layout differs from the slot's last one.
    pub fn write(&self, slot: usize, data: &[u8], layout: FrameLayout) -> Result<(), RingError> {
        if self.state(slot) != Some(SlotState::Written) {
            return Err(self.misuse(slot, SlotState::Written));
        }
        let mut storage = self.slots[slot].lock();
        let before = storage.resizes;
        storage.store(data, layout);
        if storage.resizes != before {
            debug!("Ring slot {} resized to {}", slot, layout);
        }
        Ok(())
    }

    /// `Written → Queued`; the slot joins the back of the read queue.
    pub fn commit_write(&self, slot: usize) -> Result<(), RingError> {
        let mut index = self.index.lock();
        index.advance(slot, SlotState::Queued)?;
        index.queued.push_back(slot);
        Ok(())
    }

    /// Dequeues the oldest queued slot. The slot stays `Queued` until
    /// [`commit_read`](Self::commit_read).
    pub fn acquire_for_read(&self) -> Option<usize> {
        self.index.lock().queued.pop_front()
    }

    /// Drains the read queue and returns its newest slot. Older queued slots
    /// are appended to `skipped`; they stay `Queued` and the caller retires
    /// them with [`commit_read`](Self::commit_read) then [`flush`](Self::flush)
    /// without uploading.
    pub fn acquire_latest_for_read(&self, skipped: &mut Vec<usize>) -> Option<usize> {
        let mut index = self.index.lock();
        let latest = index.queued.pop_back()?;
        skipped.extend(index.queued.drain(..));
        Some(latest)
    }

    /// `Queued → InFlight` once the GPU upload has been issued.
    pub fn commit_read(&self, slot: usize) -> Result<(), RingError> {
        let mut index = self.index.lock();
        if index.queued.contains(&slot) {
            return Err(RingError::InvalidTransition {
                slot,
                from: "Queued (not dequeued)",
                to: SlotState::InFlight.name(),
            });
        }
        index.advance(slot, SlotState::InFlight)
    }

    /// `InFlight → Free` once the GPU work reading the slot is complete.
    pub fn flush(&self, slot: usize) -> Result<(), RingError> {
        self.index.lock().advance(slot, SlotState::Free)
    }

    /// Runs `f` with the storage of a slot the caller currently owns.
    pub fn with_storage<R>(&self, slot: usize, f: impl FnOnce(&SlotStorage) -> R) -> Option<R> {
        self.slots.get(slot).map(|storage| f(&storage.lock()))
    }

    fn misuse(&self, slot: usize, expected: SlotState) -> RingError {
        match self.state(slot) {
            None => RingError::UnknownSlot { slot },
            Some(actual) => RingError::InvalidTransition {
                slot,
                from: actual.name(),
                to: expected.name(),
            },
        }
    }
}

// MARK: - Completion policy

/// A slot whose upload has been issued and whose GPU work may still be pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightSlot {
    pub slot: usize,
    pub uploaded_cycle: u64,
}

/// Decides when an in-flight slot may be recycled.
pub trait CompletionPolicy: Send {
    fn is_complete(&mut self, in_flight: InFlightSlot, current_cycle: u64) -> bool;

    /// Called on hot reload.
    fn configure(&mut self, _settings: &RenderSettings) {}
}

/// Frame-delay heuristic: a slot is complete after `frames` further cycles.
#[derive(Debug, Clone, Copy)]
pub struct FrameDelay {
    pub frames: u64,
}

impl FrameDelay {
    pub fn new(frames: u64) -> Self {
        Self { frames }
    }
}

impl CompletionPolicy for FrameDelay {
    fn is_complete(&mut self, in_flight: InFlightSlot, current_cycle: u64) -> bool {
        current_cycle.saturating_sub(in_flight.uploaded_cycle) >= self.frames
    }

    fn configure(&mut self, settings: &RenderSettings) {
        self.frames = settings.flush_delay_frames;
    }
}

/// Recycles slots as soon as the cycle that uploaded them ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl CompletionPolicy for Immediate {
    fn is_complete(&mut self, _in_flight: InFlightSlot, _current_cycle: u64) -> bool {
        true
    }
}

// MARK: - RingUploader

#[derive(Debug, Clone, Copy)]
struct GpuSlot {
    buffer: BufferId,
    len: usize,
}

/// Render-thread side of the ring: one GPU pixel buffer per slot.
pub struct RingUploader {
    buffers: Vec<Option<GpuSlot>>,
}

impl RingUploader {
    pub fn new(capacity: usize) -> Self {
        Self { buffers: vec![None; capacity] }
    }

    /// Streams a dequeued slot through its GPU buffer into `texture`, whose
    /// current size is `texture_size`. The texture is reallocated first when
    /// the slot's frame size differs. Returns the uploaded layout; empty slots
    /// upload nothing.
    pub fn upload(
        &mut self,
        gpu: &mut dyn GpuDevice,
        ring: &PixelRing,
        slot: usize,
        texture: TextureId,
        texture_size: FrameSize,
    ) -> Result<Option<FrameLayout>, GpuError> {
        let Some(entry) = self.buffers.get_mut(slot) else {
            return Err(GpuError::Unsupported(format!("ring slot {slot} out of range")));
        };
        let result = ring.with_storage(slot, |storage| -> Result<Option<FrameLayout>, GpuError> {
            let layout = storage.layout();
            if !layout.is_valid() {
                return Ok(None);
            }
            let len = storage.bytes().len();
            let buffer = match *entry {
                Some(gpu_slot) if gpu_slot.len == len => gpu_slot.buffer,
                Some(gpu_slot) => {
                    gpu.resize_pixel_buffer(gpu_slot.buffer, len)?;
                    *entry = Some(GpuSlot { buffer: gpu_slot.buffer, len });
                    gpu_slot.buffer
                }
                None => {
                    let buffer = gpu.create_pixel_buffer(len)?;
                    *entry = Some(GpuSlot { buffer, len });
                    buffer
                }
            };
            gpu.write_pixel_buffer(buffer, storage.bytes())?;
            if layout.size != texture_size {
                gpu.resize_texture(texture, layout.size)?;
            }
            gpu.upload_texture(texture, buffer, layout)?;
            Ok(Some(layout))
        });
        result.unwrap_or(Ok(None))
    }

    /// Deletes every GPU buffer. Safe to call more than once.
    pub fn release(&mut self, gpu: &mut dyn GpuDevice) {
        for entry in &mut self.buffers {
            if let Some(gpu_slot) = entry.take() {
                gpu.delete_pixel_buffer(gpu_slot.buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8, layout: FrameLayout) -> Vec<u8> {
        vec![fill; layout.byte_len()]
    }

    #[test]
    fn slots_cycle_through_every_state() {
        let ring = PixelRing::new(2);
        let layout = FrameLayout::new(2, 2, 8);

        let slot = ring.acquire_for_write().expect("free slot");
        assert_eq!(ring.state(slot), Some(SlotState::Written));
        ring.write(slot, &frame(1, layout), layout).unwrap();
        ring.commit_write(slot).unwrap();
        assert_eq!(ring.state(slot), Some(SlotState::Queued));

        assert_eq!(ring.acquire_for_read(), Some(slot));
        ring.commit_read(slot).unwrap();
        assert_eq!(ring.state(slot), Some(SlotState::InFlight));
        ring.flush(slot).unwrap();
        assert_eq!(ring.state(slot), Some(SlotState::Free));
    }

    #[test]
    fn rejects_skipped_states() {
        let ring = PixelRing::new(1);
        let slot = ring.acquire_for_write().unwrap();

        assert!(matches!(ring.commit_read(slot), Err(RingError::InvalidTransition { .. })));
        assert!(matches!(ring.flush(slot), Err(RingError::InvalidTransition { .. })));

        ring.commit_write(slot).unwrap();
        // Still in the read queue: must be dequeued before commit_read.
        assert!(ring.commit_read(slot).is_err());
        assert!(matches!(ring.flush(9), Err(RingError::UnknownSlot { slot: 9 })));
    }

    #[test]
    fn saturates_without_blocking() {
        let ring = PixelRing::new(2);
        let a = ring.acquire_for_write().unwrap();
        let b = ring.acquire_for_write().unwrap();
        assert_ne!(a, b);
        assert_eq!(ring.acquire_for_write(), None);

        ring.commit_write(a).unwrap();
        ring.acquire_for_read().unwrap();
        ring.commit_read(a).unwrap();
        assert_eq!(ring.acquire_for_write(), None, "in-flight slots are not free");
        ring.flush(a).unwrap();
        assert_eq!(ring.acquire_for_write(), Some(a));
    }

    #[test]
    fn reads_in_arrival_order() {
        let ring = PixelRing::new(3);
        let mut order = Vec::new();
        for _ in 0..3 {
            let slot = ring.acquire_for_write().unwrap();
            order.push(slot);
        }
        // Commit out of acquisition order; reads follow commit order.
        ring.commit_write(order[2]).unwrap();
        ring.commit_write(order[0]).unwrap();
        ring.commit_write(order[1]).unwrap();

        assert_eq!(ring.acquire_for_read(), Some(order[2]));
        assert_eq!(ring.acquire_for_read(), Some(order[0]));
        assert_eq!(ring.acquire_for_read(), Some(order[1]));
        assert_eq!(ring.acquire_for_read(), None);
    }

    #[test]
    fn latest_read_supersedes_older_frames() {
        let ring = PixelRing::new(4);
        let mut committed = Vec::new();
        for _ in 0..3 {
            let slot = ring.acquire_for_write().unwrap();
            ring.commit_write(slot).unwrap();
            committed.push(slot);
        }

        let mut skipped = Vec::new();
        assert_eq!(ring.acquire_latest_for_read(&mut skipped), Some(committed[2]));
        assert_eq!(skipped, committed[..2]);
        assert_eq!(ring.queued_len(), 0);

        for slot in skipped.drain(..) {
            ring.commit_read(slot).unwrap();
            ring.flush(slot).unwrap();
            assert_eq!(ring.state(slot), Some(SlotState::Free));
        }
        ring.commit_read(committed[2]).unwrap();
        assert_eq!(ring.state(committed[2]), Some(SlotState::InFlight));
        assert_eq!(ring.acquire_latest_for_read(&mut skipped), None);
        assert!(skipped.is_empty());
    }

    #[test]
    fn storage_resizes_only_on_layout_change() {
        let ring = PixelRing::new(1);
        let small = FrameLayout::new(2, 2, 8);
        let padded = FrameLayout::new(2, 2, 16);

        for (layout, expected_resizes) in [(small, 1), (small, 1), (padded, 2), (padded, 2)] {
            let slot = ring.acquire_for_write().unwrap();
            ring.write(slot, &frame(7, layout), layout).unwrap();
            ring.commit_write(slot).unwrap();
            ring.acquire_for_read().unwrap();
            ring.commit_read(slot).unwrap();
            let (resizes, len) = ring
                .with_storage(slot, |s| (s.resizes(), s.bytes().len()))
                .unwrap();
            assert_eq!(resizes, expected_resizes);
            assert_eq!(len, layout.byte_len());
            ring.flush(slot).unwrap();
        }
    }

    #[test]
    fn write_requires_claimed_slot() {
        let ring = PixelRing::new(1);
        let layout = FrameLayout::new(1, 1, 4);
        assert!(ring.write(0, &[0; 4], layout).is_err());
    }

    #[test]
    fn frame_delay_policy_waits_for_cycles() {
        let mut policy = FrameDelay::new(2);
        let slot = InFlightSlot { slot: 0, uploaded_cycle: 10 };
        assert!(!policy.is_complete(slot, 10));
        assert!(!policy.is_complete(slot, 11));
        assert!(policy.is_complete(slot, 12));

        policy.configure(&RenderSettings { flush_delay_frames: 0, ..Default::default() });
        assert!(policy.is_complete(slot, 10));
    }
}
