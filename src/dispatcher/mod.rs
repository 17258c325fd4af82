//! The dispatcher: serializes work from many producer threads onto one.
//!
//! Network threads hand over request executions and call completions via
//! [`Dispatcher::submit`], which only enqueues. A single dedicated worker
//! thread runs them in arrival order, so application code never runs
//! concurrently with itself. [`Dispatcher::terminate`] refuses new work,
//! drains what is queued, and joins the worker.

mod completion;
mod queue;
mod worker;

pub use completion::Completion;

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::fault::{FaultSink, LogFaultSink};
use crate::model::{DispatcherState, Origin, WorkId, WorkItem};
use crate::telemetry::work::record_state_transition;

use queue::Shared;

/// Handle to a running dispatcher.
///
/// Cheap to clone; inject it into every collaborator that produces work.
/// Dropping the last handle terminates the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    /// Taken by whichever terminator joins the worker.
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Start a dispatcher that logs item faults via `tracing`.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        Self::with_fault_sink(config, LogFaultSink)
    }

    /// Start a dispatcher that reports item faults to `sink`.
    ///
    /// Metric instruments are bound here, so install telemetry first.
    pub fn with_fault_sink(config: DispatcherConfig, sink: impl FaultSink + 'static) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config.capacity));
        let sink: Arc<dyn FaultSink> = Arc::new(sink);

        let handle = thread::Builder::new().name(config.thread_name.clone()).spawn({
            let shared = Arc::clone(&shared);
            move || worker::run(shared, sink)
        })?;

        info!(
            thread = %config.thread_name,
            capacity = ?config.capacity,
            "dispatcher started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                worker_id: handle.thread().id(),
                worker: Mutex::new(Some(handle)),
                config,
            }),
        })
    }

    /// Enqueue a work item and return immediately.
    ///
    /// Fails with [`Error::Rejected`] once termination has begun, and with
    /// [`Error::QueueFull`] if a capacity is configured and reached. The item
    /// never runs inline.
    pub fn submit(&self, item: WorkItem) -> Result<WorkId> {
        let id = item.id;
        let origin = item.origin.kind();
        let metrics = &self.inner.shared.metrics;

        match self.inner.shared.push(item) {
            Ok(()) => {
                metrics.record_submitted(origin);
                Ok(id)
            }
            Err(e) => {
                metrics.record_rejected(origin);
                debug!(work_id = %id, origin, "submission refused: {e}");
                Err(e)
            }
        }
    }

    /// Submit a closure with no particular origin.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Result<WorkId> {
        self.submit(WorkItem::new(Origin::Other, job))
    }

    /// Submit the execution of an inbound request received on `connection`.
    pub fn dispatch_request(
        &self,
        connection: impl Into<String>,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<WorkId> {
        let origin = Origin::Request {
            connection: Some(connection.into()),
        };
        self.submit(WorkItem::new(origin, job))
    }

    /// Submit the completion callback of an asynchronous call made on `connection`.
    pub fn dispatch_completion(
        &self,
        connection: impl Into<String>,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<WorkId> {
        let origin = Origin::Completion {
            connection: Some(connection.into()),
        };
        self.submit(WorkItem::new(origin, job))
    }

    /// Stop accepting work, run everything already queued, and join the worker.
    ///
    /// Blocks until the dispatcher is terminated. Idempotent. When called
    /// from an item running on this dispatcher, only begins the drain and
    /// returns, since waiting there would wait on itself.
    pub fn terminate(&self) -> Result<()> {
        self.inner.stop(None)
    }

    /// Like [`terminate`](Self::terminate), but gives up after `timeout`.
    ///
    /// On [`Error::DrainTimeout`] the dispatcher stays draining and the
    /// worker keeps going; a later `terminate` finishes the join.
    pub fn terminate_timeout(&self, timeout: Duration) -> Result<()> {
        self.inner.stop(Some(timeout))
    }

    /// Terminate using the configured drain timeout, if any.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.stop(self.inner.config.drain_timeout())
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.shared.state()
    }

    /// Number of items queued and not yet started.
    pub fn pending(&self) -> usize {
        self.inner.shared.pending()
    }

    /// Number of items run so far, faulted ones included.
    pub fn executed(&self) -> u64 {
        self.inner.shared.executed()
    }

    pub fn faulted(&self) -> u64 {
        self.inner.shared.faulted()
    }

    /// True when called from inside a work item on this dispatcher.
    pub fn is_dispatcher_thread(&self) -> bool {
        thread::current().id() == self.inner.worker_id
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub(crate) fn worker_id(&self) -> ThreadId {
        self.inner.worker_id
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread", &self.inner.config.thread_name)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Inner {
    fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        if self.shared.begin_drain() {
            record_state_transition(DispatcherState::Running, DispatcherState::Draining);
            info!(pending = self.shared.pending(), "dispatcher draining");
        }

        if thread::current().id() == self.worker_id {
            debug!("terminate requested from dispatcher thread; drain continues");
            return Ok(());
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        if !self.shared.wait_worker_exited(deadline) {
            let timeout = timeout.unwrap_or_default();
            warn!(
                ?timeout,
                pending = self.shared.pending(),
                "dispatcher drain timed out"
            );
            return Err(Error::DrainTimeout(timeout));
        }

        // Concurrent terminators queue up here until the joiner is done.
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                // Dropped here, off the dead thread; pending completions resolve as abandoned.
                let stranded = self.shared.discard_pending();
                error!(
                    stranded = stranded.len(),
                    "dispatcher thread panicked outside a work item"
                );
            }
            if self.shared.mark_terminated() {
                record_state_transition(DispatcherState::Draining, DispatcherState::Terminated);
                info!(executed = self.shared.executed(), "dispatcher terminated");
            }
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(e) = self.stop(None) {
            warn!("dispatcher drop failed to terminate: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(DispatcherConfig::default()).expect("failed to start dispatcher")
    }

    #[test]
    fn worker_thread_carries_configured_name() {
        let d = Dispatcher::new(DispatcherConfig::default().with_thread_name("ami-callbacks"))
            .unwrap();
        let name = d
            .submit_call(Origin::Other, || {
                thread::current().name().map(str::to_string)
            })
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(name.as_deref(), Some("ami-callbacks"));
        d.terminate().unwrap();
    }

    #[test]
    fn terminate_from_worker_begins_drain_without_deadlock() {
        let d = dispatcher();
        let inner = d.clone();
        let ran_after = Arc::new(AtomicUsize::new(0));

        d.dispatch(move || inner.terminate().unwrap()).unwrap();
        let counter = Arc::clone(&ran_after);
        // May or may not be accepted depending on timing; if it is, it must run.
        let accepted = d
            .dispatch(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .is_ok();

        d.terminate().unwrap();
        assert_eq!(d.state(), DispatcherState::Terminated);
        assert_eq!(ran_after.load(Ordering::SeqCst), usize::from(accepted));
    }

    #[test]
    fn dropping_last_handle_drains_queue() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let d = dispatcher();
            for _ in 0..50 {
                let count = Arc::clone(&count);
                d.dispatch(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn item_dropping_last_handle_detaches_worker_which_still_drains() {
        use std::cell::RefCell;
        use std::sync::mpsc;

        struct ExitSignal(mpsc::Sender<&'static str>);
        impl Drop for ExitSignal {
            fn drop(&mut self) {
                let _ = self.0.send("exited");
            }
        }
        thread_local! {
            static ON_EXIT: RefCell<Option<ExitSignal>> = const { RefCell::new(None) };
        }

        let (tx, rx) = mpsc::channel();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let d = dispatcher();

        let worker_gate = Arc::clone(&gate);
        d.dispatch(move || {
            worker_gate.wait();
        })
        .unwrap();
        // This item owns the last handle once `d` is gone; it drops it on the worker.
        let last = d.clone();
        d.dispatch(move || drop(last)).unwrap();
        d.dispatch(move || {
            tx.send("ran").unwrap();
            ON_EXIT.with(|slot| *slot.borrow_mut() = Some(ExitSignal(tx)));
        })
        .unwrap();

        drop(d);
        gate.wait();

        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "ran");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "exited");
    }
}
