//! Configuration holder and single-slot reload rendezvous.
//!
//! One mutex guards the current configuration pointer, the loop state and a
//! one-slot pending request. Requesters take a ticket, deposit in ticket
//! order once the slot is empty, then wait until the render thread reports
//! their ticket applied.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use projector_core::ProjectionConfig;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Terminating,
}

/// How a reload request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Loop not running; stored for the next start.
    Installed,
    /// Applied by the running loop without tearing anything down.
    HotReloaded,
    /// Applied by a full stop, rebuild and start.
    Restarted,
}

/// A request taken by the render thread.
#[derive(Debug)]
pub(crate) struct PendingReload {
    ticket: u64,
    config: Arc<ProjectionConfig>,
}

impl PendingReload {
    pub(crate) fn config(&self) -> &ProjectionConfig {
        &self.config
    }
}

struct Shared {
    current: Arc<ProjectionConfig>,
    state: LoopState,
    pending: Option<PendingReload>,
    next_ticket: u64,
    deposit_turn: u64,
    applied: u64,
}

pub(crate) struct ReloadMailbox {
    shared: Mutex<Shared>,
    changed: Condvar,
}

impl ReloadMailbox {
    pub(crate) fn new(initial: ProjectionConfig) -> Self {
        Self {
            shared: Mutex::new(Shared {
                current: Arc::new(initial),
                state: LoopState::Idle,
                pending: None,
                next_ticket: 1,
                deposit_turn: 1,
                applied: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn current(&self) -> Arc<ProjectionConfig> {
        Arc::clone(&self.shared.lock().current)
    }

    pub(crate) fn state(&self) -> LoopState {
        self.shared.lock().state
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.shared.lock().state = state;
        self.changed.notify_all();
    }

    /// Replaces the current configuration directly. Used while the loop is
    /// not running and by the restart path between stop and start.
    pub(crate) fn install(&self, config: Arc<ProjectionConfig>) {
        self.shared.lock().current = config;
    }

    /// Hands `config` to the running loop and blocks until it is applied.
    ///
    /// Requests land in ticket order. A request whose turn comes while the loop
    /// is not running is installed for the next start instead, but only after
    /// every earlier request has been applied or installed.
    pub(crate) fn submit_and_wait(&self, config: Arc<ProjectionConfig>) -> ReloadOutcome {
        let mut shared = self.shared.lock();
        let ticket = shared.next_ticket;
        shared.next_ticket += 1;

        while shared.deposit_turn != ticket || shared.pending.is_some() {
            self.changed.wait(&mut shared);
        }
        shared.deposit_turn += 1;

        if shared.state != LoopState::Running {
            shared.current = config;
            shared.applied = shared.applied.max(ticket);
            self.changed.notify_all();
            return ReloadOutcome::Installed;
        }

        debug!("Reload #{} queued for render thread", ticket);
        shared.pending = Some(PendingReload { ticket, config });
        self.changed.notify_all();

        while shared.applied < ticket {
            self.changed.wait(&mut shared);
        }
        ReloadOutcome::HotReloaded
    }

    /// Render thread: takes the pending request and swaps it in as current.
    /// The requester stays blocked until [`complete`](Self::complete).
    pub(crate) fn take_pending(&self) -> Option<PendingReload> {
        let mut shared = self.shared.lock();
        let pending = shared.pending.take()?;
        shared.current = Arc::clone(&pending.config);
        Some(pending)
    }

    /// Render thread: releases the requester of `reload`.
    pub(crate) fn complete(&self, reload: PendingReload) {
        let mut shared = self.shared.lock();
        shared.applied = shared.applied.max(reload.ticket);
        self.changed.notify_all();
    }

    /// Render thread, on exit: installs any request still pending, releases
    /// every waiter and goes idle.
    pub(crate) fn finish(&self) {
        let mut shared = self.shared.lock();
        if let Some(pending) = shared.pending.take() {
            shared.current = pending.config;
            shared.applied = shared.applied.max(pending.ticket);
        }
        shared.state = LoopState::Idle;
        self.changed.notify_all();
    }
}

// MARK: - ReloadQueue

/// FIFO admission for reload callers: each caller takes a ticket on entry and
/// proceeds only when every earlier ticket has left.
#[derive(Default)]
pub(crate) struct ReloadQueue {
    tickets: Mutex<QueueTickets>,
    turn: Condvar,
}

#[derive(Default)]
struct QueueTickets {
    next: u64,
    serving: u64,
}

pub(crate) struct QueueTurn<'a> {
    queue: &'a ReloadQueue,
}

impl ReloadQueue {
    pub(crate) fn enter(&self) -> QueueTurn<'_> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
        QueueTurn { queue: self }
    }
}

impl Drop for QueueTurn<'_> {
    fn drop(&mut self) {
        self.queue.tickets.lock().serving += 1;
        self.queue.turn.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use projector_core::Bounds;
    use std::thread;
    use std::time::Duration;

    fn config(width: u32) -> Arc<ProjectionConfig> {
        Arc::new(ProjectionConfig::default_for(Bounds::new(0, 0, width, 100)))
    }

    fn width_of(config: &ProjectionConfig) -> u32 {
        config.monitors[0].window.width
    }

    #[test]
    fn installs_directly_when_idle() {
        let mailbox = ReloadMailbox::new(ProjectionConfig::default());
        assert_eq!(mailbox.submit_and_wait(config(10)), ReloadOutcome::Installed);
        assert_eq!(width_of(&mailbox.current()), 10);
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn requester_blocks_until_applied() {
        let mailbox = Arc::new(ReloadMailbox::new(ProjectionConfig::default()));
        mailbox.set_state(LoopState::Running);

        let m = Arc::clone(&mailbox);
        let requester = thread::spawn(move || m.submit_and_wait(config(20)));

        while !mailbox.has_pending() {
            thread::yield_now();
        }
        let pending = mailbox.take_pending().unwrap();
        assert_eq!(width_of(pending.config()), 20);
        assert_eq!(width_of(&mailbox.current()), 20);
        thread::sleep(Duration::from_millis(20));
        assert!(!requester.is_finished(), "not released before completion");

        mailbox.complete(pending);
        assert_eq!(requester.join().unwrap(), ReloadOutcome::HotReloaded);
    }

    #[test]
    fn concurrent_requests_are_served_in_order() {
        let mailbox = Arc::new(ReloadMailbox::new(ProjectionConfig::default()));
        mailbox.set_state(LoopState::Running);

        let mut requesters = Vec::new();
        for width in [1, 2, 3] {
            let m = Arc::clone(&mailbox);
            requesters.push(thread::spawn(move || m.submit_and_wait(config(width))));
            // Ticket order follows spawn order once each thread is parked.
            thread::sleep(Duration::from_millis(30));
        }

        let mut applied = Vec::new();
        while applied.len() < 3 {
            if let Some(pending) = mailbox.take_pending() {
                applied.push(width_of(pending.config()));
                mailbox.complete(pending);
            } else {
                thread::yield_now();
            }
        }
        for r in requesters {
            assert_eq!(r.join().unwrap(), ReloadOutcome::HotReloaded);
        }
        assert_eq!(applied, vec![1, 2, 3]);
    }

    #[test]
    fn queue_admits_in_entry_order() {
        let queue = Arc::new(ReloadQueue::default());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = queue.enter();
        let mut callers = Vec::new();
        for id in 1..=3 {
            let (q, o) = (Arc::clone(&queue), Arc::clone(&order));
            callers.push(thread::spawn(move || {
                let _turn = q.enter();
                o.lock().push(id);
            }));
            thread::sleep(Duration::from_millis(30));
        }
        assert!(order.lock().is_empty());
        drop(first);

        for c in callers {
            c.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn finish_releases_pending_requester() {
        let mailbox = Arc::new(ReloadMailbox::new(ProjectionConfig::default()));
        mailbox.set_state(LoopState::Running);

        let m = Arc::clone(&mailbox);
        let requester = thread::spawn(move || m.submit_and_wait(config(42)));
        while !mailbox.has_pending() {
            thread::yield_now();
        }
        mailbox.finish();

        assert_eq!(requester.join().unwrap(), ReloadOutcome::HotReloaded);
        assert_eq!(width_of(&mailbox.current()), 42);
        assert_eq!(mailbox.state(), LoopState::Idle);
    }

    #[test]
    fn request_during_shutdown_lands_after_earlier_one() {
        let mailbox = Arc::new(ReloadMailbox::new(ProjectionConfig::default()));
        mailbox.set_state(LoopState::Running);

        let m = Arc::clone(&mailbox);
        let earlier = thread::spawn(move || m.submit_and_wait(config(1)));
        while !mailbox.has_pending() {
            thread::yield_now();
        }

        mailbox.set_state(LoopState::Terminating);
        let m = Arc::clone(&mailbox);
        let later = thread::spawn(move || m.submit_and_wait(config(2)));
        thread::sleep(Duration::from_millis(30));
        assert!(!later.is_finished(), "waits behind the undelivered request");
        assert!(mailbox.current().monitors.is_empty(), "nothing applied yet");

        mailbox.finish();
        assert_eq!(earlier.join().unwrap(), ReloadOutcome::HotReloaded);
        assert_eq!(later.join().unwrap(), ReloadOutcome::Installed);
        assert_eq!(width_of(&mailbox.current()), 2);
    }
}
