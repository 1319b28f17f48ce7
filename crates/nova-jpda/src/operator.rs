//! Routing of VM events to the executors that requested them.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use nova_jdi::{Event, RequestId};
use parking_lot::Mutex;

use crate::session::DebugSession;

/// What the dispatcher does with the event thread(s) after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Resume,
    Stop,
    /// The event is stale (its thread was already resumed elsewhere): leave
    /// the VM as it is.
    Ignore,
}

/// Callback bound to one or more event requests.
///
/// `exec` runs on the dispatcher thread, serially per event set. It must
/// never panic out or block on user actions.
pub trait Executor: Send + Sync {
    fn exec(&self, session: &DebugSession, event: &Event) -> EventOutcome;

    /// `request` was unregistered.
    fn removed(&self, _request: RequestId) {}
}

/// Registration table: which executor handles which request.
#[derive(Default)]
pub struct Operator {
    executors: Mutex<HashMap<RequestId, Arc<dyn Executor>>>,
}

impl Operator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, request: RequestId, executor: Arc<dyn Executor>) {
        tracing::trace!(target: "nova.jpda.operator", request, "register");
        self.executors.lock().insert(request, executor);
    }

    /// Idempotent; returns whether `request` was registered.
    pub fn unregister(&self, request: RequestId) -> bool {
        let removed = self.executors.lock().remove(&request);
        match removed {
            Some(executor) => {
                tracing::trace!(target: "nova.jpda.operator", request, "unregister");
                executor.removed(request);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, request: RequestId) -> bool {
        self.executors.lock().contains_key(&request)
    }

    pub fn registered(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.executors.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn executor(&self, request: RequestId) -> Option<Arc<dyn Executor>> {
        self.executors.lock().get(&request).cloned()
    }

    pub(crate) fn clear(&self) {
        let drained: Vec<_> = self.executors.lock().drain().collect();
        for (request, executor) in drained {
            executor.removed(request);
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pumps `session`'s VM event queue on a dedicated `nova-jpda-operator`
/// thread until the VM goes away or the session finishes.
pub fn spawn_event_loop(session: Arc<DebugSession>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("nova-jpda-operator".to_owned())
        .spawn(move || loop {
            if session.is_finished() {
                break;
            }
            match session.vm().remove_event_set(POLL_INTERVAL) {
                Ok(Some(set)) => {
                    session.dispatch(&set);
                }
                Ok(None) => {}
                Err(err) if err.is_disconnect() => {
                    tracing::debug!(target: "nova.jpda.operator", "event queue closed");
                    session.mark_disconnected();
                    break;
                }
                Err(err) => {
                    tracing::warn!(target: "nova.jpda.operator", error = %err, "failed to read events");
                }
            }
        })
}
