//! Core data model.
//!
//! A work item is a unit of application logic handed over by the network
//! layer: an incoming request ready to execute, or a call completion ready
//! to fire. The dispatcher never looks inside it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// The executable part of a work item.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work owned by the dispatcher from submission until it runs.
pub struct WorkItem {
    /// Unique identifier.
    pub id: WorkId,

    /// Which hook produced this item. Diagnostics only; never affects order.
    pub origin: Origin,

    pub(crate) job: Job,
}

impl WorkItem {
    pub fn new(origin: Origin, job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: WorkId::new(),
            origin,
            job: Box::new(job),
        }
    }

    /// Consume the item and run it on the current thread.
    pub(crate) fn run(self) {
        (self.job)()
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Where a work item came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// An inbound request whose servant code is ready to run.
    Request { connection: Option<String> },
    /// An asynchronous invocation whose reply callback is ready to fire.
    Completion { connection: Option<String> },
    /// Anything else routed through the dispatcher.
    Other,
}

impl Origin {
    pub fn kind(&self) -> &'static str {
        match self {
            Origin::Request { .. } => "request",
            Origin::Completion { .. } => "completion",
            Origin::Other => "other",
        }
    }

    pub fn connection(&self) -> Option<&str> {
        match self {
            Origin::Request { connection } | Origin::Completion { connection } => {
                connection.as_deref()
            }
            Origin::Other => None,
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.connection() {
            Some(conn) => write!(f, "{}@{conn}", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher State
// ---------------------------------------------------------------------------

/// Lifecycle state of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// Accepting and executing work.
    Running,
    /// Termination requested; finishing queued work, refusing new work.
    Draining,
    /// Queue empty and worker joined. Terminal.
    Terminated,
}

impl DispatcherState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: DispatcherState) -> bool {
        use DispatcherState::*;
        matches!((self, to), (Running, Draining) | (Draining, Terminated))
    }

    /// Is new work accepted in this state?
    pub fn accepts_work(self) -> bool {
        self == DispatcherState::Running
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        self == DispatcherState::Terminated
    }
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DispatcherState::Running => "running",
            DispatcherState::Draining => "draining",
            DispatcherState::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}
