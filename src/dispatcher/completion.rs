//! Asynchronous invocation on the dispatcher thread.
//!
//! [`Dispatcher::submit_call`] queues a closure like any other work item and
//! hands back a [`Completion`] for its return value. The caller can await it
//! from async code or block on it from a plain thread.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use tokio::sync::oneshot;

use super::Dispatcher;
use crate::error::{Error, Result};
use crate::fault::panic_message;
use crate::model::{Origin, WorkId, WorkItem};

/// Pending result of a call queued with [`Dispatcher::submit_call`].
#[must_use = "a Completion does nothing unless awaited or waited on"]
pub struct Completion<T> {
    id: WorkId,
    rx: oneshot::Receiver<Result<T>>,
    worker_id: ThreadId,
}

impl<T> Completion<T> {
    pub fn id(&self) -> WorkId {
        self.id
    }

    /// Block the current thread until the call has run.
    ///
    /// Returns [`Error::WouldDeadlock`] when called on the dispatcher's own
    /// thread, and [`Error::BlockingInRuntime`] when called with a tokio
    /// runtime entered; await the completion there instead.
    pub fn wait(self) -> Result<T> {
        if thread::current().id() == self.worker_id {
            return Err(Error::WouldDeadlock);
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::BlockingInRuntime);
        }
        self.rx.blocking_recv().unwrap_or(Err(Error::Abandoned))
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Abandoned)))
    }
}

impl Dispatcher {
    /// Queue `call` and return a handle to its eventual result.
    ///
    /// A panic inside `call` resolves the completion to
    /// [`Error::ItemFault`] and is also reported to the fault sink.
    pub fn submit_call<T, F>(&self, origin: Origin, call: F) -> Result<Completion<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let item = WorkItem::new(origin, move || {
            match panic::catch_unwind(AssertUnwindSafe(call)) {
                Ok(value) => {
                    // Receiver may have been dropped; the call still ran.
                    let _ = tx.send(Ok(value));
                }
                Err(payload) => {
                    let _ = tx.send(Err(Error::ItemFault(panic_message(payload.as_ref()))));
                    panic::resume_unwind(payload);
                }
            }
        });

        let id = self.submit(item)?;
        Ok(Completion {
            id,
            rx,
            worker_id: self.worker_id(),
        })
    }
}
