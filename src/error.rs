//! Error types for serialq.

use std::time::Duration;

use thiserror::Error;

use crate::model::DispatcherState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("submission rejected: dispatcher is {state}")]
    Rejected { state: DispatcherState },

    #[error("queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    #[error("work item faulted: {0}")]
    ItemFault(String),

    #[error("drain did not complete within {0:?}")]
    DrainTimeout(Duration),

    #[error("work item was dropped before it ran")]
    Abandoned,

    #[error("blocking on the dispatcher thread would deadlock")]
    WouldDeadlock,

    #[error("cannot block inside an async runtime; await the completion instead")]
    BlockingInRuntime,

    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for submissions refused because shutdown already began.
    ///
    /// Callers tearing down the process should treat this as expected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
