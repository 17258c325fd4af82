//! Work item span helpers.
//!
//! Provides span creation for items running on the dispatcher thread and
//! state-transition recording for the dispatcher lifecycle.

use tracing::Span;

use crate::model::{DispatcherState, Origin, WorkId};

/// Start a span for a single work item execution.
pub fn start_item_span(work_id: &WorkId, origin: &Origin) -> Span {
    tracing::info_span!(
        "dispatch.execute",
        "work.id" = %work_id,
        "work.origin" = origin.kind(),
        "work.connection" = origin.connection(),
    )
}

/// Record a dispatcher lifecycle transition.
///
/// Emits a tracing `info` event; the caller's span, if any, scopes it.
pub fn record_state_transition(from: DispatcherState, to: DispatcherState) {
    tracing::info!(from = %from, to = %to, "state_transition");
}
