//! The worker loop: pull one item, run it to completion, repeat.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info};

use super::queue::{Queued, Shared};
use crate::fault::{FaultSink, ItemFault};
use crate::telemetry::work::start_item_span;

/// Runs on the dispatcher thread until the queue is drained after termination.
pub(crate) fn run(shared: Arc<Shared>, sink: Arc<dyn FaultSink>) {
    let _exit = ExitGuard { shared: &shared };
    info!("dispatcher worker started");

    while let Some(queued) = shared.next() {
        execute(&shared, sink.as_ref(), queued);
    }

    info!(
        executed = shared.executed(),
        faulted = shared.faulted(),
        "dispatcher worker exited, queue drained"
    );
}

/// Marks the worker as gone however the loop ends.
///
/// If the thread unwinds, new submissions are refused from then on and
/// terminators are released instead of waiting on a dead thread.
struct ExitGuard<'a> {
    shared: &'a Shared,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared.begin_drain();
            error!(
                stranded = self.shared.pending(),
                "dispatcher worker died outside a work item"
            );
        }
        self.shared.mark_worker_exited();
    }
}

fn execute(shared: &Shared, sink: &dyn FaultSink, queued: Queued) {
    let Queued { item, enqueued_at } = queued;
    let id = item.id;
    let origin = item.origin.clone();

    let span = start_item_span(&id, &origin);
    let started = Instant::now();
    shared.metrics.record_queue_wait(started.duration_since(enqueued_at));

    let outcome = span.in_scope(|| panic::catch_unwind(AssertUnwindSafe(|| item.run())));

    shared.metrics.record_duration(started.elapsed(), origin.kind());
    shared.record_executed(outcome.is_err());

    let payload = match outcome {
        Ok(()) => return span.in_scope(|| debug!("work item done")),
        Err(payload) => payload,
    };

    shared.metrics.record_fault(origin.kind());
    let fault = ItemFault::from_panic(id, origin, payload.as_ref());
    contain(|| sink.report(&fault), || error!(work_id = %id, "fault sink panicked while reporting"));
    // The payload's own destructor is user code too.
    contain(move || drop(payload), || error!(work_id = %id, "panic payload panicked on drop"));
}

/// Run `f`, keeping any panic it raises on this side of the worker loop.
///
/// A nested panic payload is leaked rather than dropped, since dropping it
/// could panic again.
fn contain(f: impl FnOnce(), on_panic: impl FnOnce()) {
    if let Err(nested) = panic::catch_unwind(AssertUnwindSafe(f)) {
        std::mem::forget(nested);
        on_panic();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DispatcherState, Origin, WorkItem};

    #[test]
    fn exit_guard_refuses_work_and_releases_terminators_on_unwind() {
        let shared = Arc::new(Shared::new(None));
        shared.push(WorkItem::new(Origin::Other, || {})).unwrap();

        let worker_shared = Arc::clone(&shared);
        let died = thread::spawn(move || {
            let _exit = ExitGuard {
                shared: &worker_shared,
            };
            panic!("worker bug");
        })
        .join()
        .is_err();
        assert!(died);

        assert_eq!(shared.state(), DispatcherState::Draining);
        assert!(shared.wait_worker_exited(None));
        assert!(
            shared
                .push(WorkItem::new(Origin::Other, || {}))
                .unwrap_err()
                .is_rejected()
        );
    }

    #[test]
    fn exit_guard_leaves_state_alone_on_normal_exit() {
        let shared = Shared::new(None);
        drop(ExitGuard { shared: &shared });
        assert_eq!(shared.state(), DispatcherState::Running);
        assert!(shared.wait_worker_exited(None));
    }
}
