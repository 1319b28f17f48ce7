//! Worker pool for user-initiated debugger actions.
//!
//! Actions (step, pause, run-into, ...) are posted to a small bounded
//! [`Scheduler`] so the UI thread never blocks on the debuggee; the event
//! dispatcher uses [`run_with_budget`] for bookkeeping that must not stall it.

mod scheduler;
mod task;
mod watchdog;

use std::time::Duration;

use thiserror::Error;

pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::BlockingTask;
pub use tokio_util::sync::CancellationToken;
pub use watchdog::run_with_budget;

/// Returned by task bodies that noticed their token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked,
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}

/// Best-effort rendering of a `catch_unwind` payload.
pub fn panic_payload_to_str(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
