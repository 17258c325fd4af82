//! Fault reporting for work items that panic on the dispatcher thread.
//!
//! A fault is isolated to its item: the worker catches the panic, hands an
//! [`ItemFault`] to the configured sink, and moves on to the next item.

use std::any::Any;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Origin, WorkId};

/// Record of a single faulted work item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFault {
    pub work_id: WorkId,
    pub origin: Origin,
    /// Panic message, if the payload was a string.
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ItemFault {
    pub(crate) fn from_panic(work_id: WorkId, origin: Origin, payload: &(dyn Any + Send)) -> Self {
        Self {
            work_id,
            origin,
            message: panic_message(payload),
            occurred_at: Utc::now(),
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Receives faults raised by work items.
///
/// Called on the dispatcher thread, so a slow sink delays the items queued
/// behind the faulted one.
pub trait FaultSink: Send + Sync {
    fn report(&self, fault: &ItemFault);
}

impl<F> FaultSink for F
where
    F: Fn(&ItemFault) + Send + Sync,
{
    fn report(&self, fault: &ItemFault) {
        self(fault)
    }
}

/// Default sink: logs the fault as a tracing error.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaultSink;

impl FaultSink for LogFaultSink {
    fn report(&self, fault: &ItemFault) {
        tracing::error!(
            work_id = %fault.work_id,
            origin = %fault.origin,
            message = %fault.message,
            "work item faulted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_str_string_and_other() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");

        let s: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(s.as_ref()), "owned boom");

        let s: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(s.as_ref()), "non-string panic payload");
    }

    #[test]
    fn closures_are_fault_sinks() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |fault: &ItemFault| seen.lock().unwrap().push(fault.message.clone());
        let payload: Box<dyn Any + Send> = Box::new("bad reply");
        sink.report(&ItemFault::from_panic(
            WorkId::new(),
            Origin::Other,
            payload.as_ref(),
        ));
        assert_eq!(seen.lock().unwrap().as_slice(), ["bad reply".to_string()]);
    }

    #[test]
    fn fault_serializes_with_origin_tag() {
        let payload: Box<dyn Any + Send> = Box::new("x");
        let fault = ItemFault::from_panic(
            WorkId::new(),
            Origin::Request { connection: None },
            payload.as_ref(),
        );
        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["origin"]["kind"], "request");
        assert_eq!(json["message"], "x");
    }
}
