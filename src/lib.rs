//! # serialq
//!
//! Single-consumer serializing dispatcher for RPC request dispatch and
//! asynchronous invocation callbacks.
//!
//! Network I/O threads hand work over with [`Dispatcher::submit`]; one
//! dedicated worker thread runs it in FIFO order, so application logic
//! never runs concurrently with itself. [`Dispatcher::terminate`] drains
//! the queue and joins the worker before shared resources are torn down.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fault;
pub mod model;
pub mod telemetry;

pub use dispatcher::{Completion, Dispatcher};
pub use error::{Error, Result};
pub use model::{DispatcherState, Origin, WorkId, WorkItem};
