//! Shared queue state: the only mutable state producers and the worker touch.
//!
//! One mutex guards the FIFO and the lifecycle state together, so a
//! submission can never slip in after the drain decision was made.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::model::{DispatcherState, WorkItem};
use crate::telemetry::metrics::DispatchMetrics;

/// A work item plus the moment it entered the queue.
pub(crate) struct Queued {
    pub(crate) item: WorkItem,
    pub(crate) enqueued_at: Instant,
}

struct Inner {
    queue: VecDeque<Queued>,
    state: DispatcherState,
    worker_exited: bool,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    /// Producers -> worker: queue became non-empty, or drain began.
    work_ready: Condvar,
    /// Worker -> terminators: worker loop has exited.
    drained: Condvar,
    capacity: Option<usize>,
    executed: AtomicU64,
    faulted: AtomicU64,
    pub(crate) metrics: DispatchMetrics,
}

impl Shared {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                state: DispatcherState::Running,
                worker_exited: false,
            }),
            work_ready: Condvar::new(),
            drained: Condvar::new(),
            capacity,
            executed: AtomicU64::new(0),
            faulted: AtomicU64::new(0),
            metrics: DispatchMetrics::new(),
        }
    }

    /// Append an item. Never blocks beyond the lock hold.
    pub(crate) fn push(&self, item: WorkItem) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.accepts_work() {
            return Err(Error::Rejected { state: inner.state });
        }
        if let Some(capacity) = self.capacity {
            if inner.queue.len() >= capacity {
                return Err(Error::QueueFull { capacity });
            }
        }
        let was_empty = inner.queue.is_empty();
        inner.queue.push_back(Queued {
            item,
            enqueued_at: Instant::now(),
        });
        drop(inner);
        // The worker only sleeps on an empty queue.
        if was_empty {
            self.work_ready.notify_one();
        }
        Ok(())
    }

    /// Block until an item is available. `None` once draining and empty.
    pub(crate) fn next(&self) -> Option<Queued> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(queued) = inner.queue.pop_front() {
                return Some(queued);
            }
            if inner.state != DispatcherState::Running {
                return None;
            }
            self.work_ready.wait(&mut inner);
        }
    }

    /// Running -> Draining. Returns false if already past Running.
    pub(crate) fn begin_drain(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(DispatcherState::Draining) {
            return false;
        }
        inner.state = DispatcherState::Draining;
        drop(inner);
        self.work_ready.notify_all();
        true
    }

    pub(crate) fn mark_worker_exited(&self) {
        let mut inner = self.inner.lock();
        inner.worker_exited = true;
        drop(inner);
        self.drained.notify_all();
    }

    /// Wait for the worker loop to exit. Returns false if `deadline` passed first.
    pub(crate) fn wait_worker_exited(&self, deadline: Option<Instant>) -> bool {
        let mut inner = self.inner.lock();
        while !inner.worker_exited {
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut inner, deadline).timed_out() {
                        return inner.worker_exited;
                    }
                }
                None => self.drained.wait(&mut inner),
            }
        }
        true
    }

    /// Draining -> Terminated, once the worker thread is joined.
    pub(crate) fn mark_terminated(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.can_transition_to(DispatcherState::Terminated) {
            return false;
        }
        inner.state = DispatcherState::Terminated;
        true
    }

    /// Remove items that will never run because the worker is gone.
    pub(crate) fn discard_pending(&self) -> Vec<Queued> {
        self.inner.lock().queue.drain(..).collect()
    }

    pub(crate) fn state(&self) -> DispatcherState {
        self.inner.lock().state
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub(crate) fn record_executed(&self, faulted: bool) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        if faulted {
            self.faulted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub(crate) fn faulted(&self) -> u64 {
        self.faulted.load(Ordering::Relaxed)
    }
}
