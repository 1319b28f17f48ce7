use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::action::ActionKind;

#[derive(Default)]
struct Registry {
    scheduled: HashMap<ActionKind, usize>,
    running: HashMap<ActionKind, usize>,
    released: bool,
}

impl Registry {
    fn blocks(&self, action: ActionKind) -> Option<ActionKind> {
        action.waits_for().iter().copied().find(|other| {
            self.scheduled.get(other).copied().unwrap_or(0) > 0
                || self.running.get(other).copied().unwrap_or(0) > 0
        })
    }
}

fn decrement(map: &mut HashMap<ActionKind, usize>, action: ActionKind) {
    if let Some(count) = map.get_mut(&action) {
        *count -= 1;
        if *count == 0 {
            map.remove(&action);
        }
    }
}

/// Per-session ordering gate between debugger actions.
///
/// Resume-style actions wait until no breakpoint edit is scheduled or
/// running. Callers declare intent with [`action_scheduled`] before queueing
/// work, so a later [`action_starts`] cannot miss it.
///
/// [`action_scheduled`]: ActionsSynchronizer::action_scheduled
/// [`action_starts`]: ActionsSynchronizer::action_starts
#[derive(Default)]
pub struct ActionsSynchronizer {
    registry: Mutex<Registry>,
    changed: Condvar,
}

impl ActionsSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action_scheduled(&self, action: ActionKind) {
        *self.registry.lock().scheduled.entry(action).or_default() += 1;
    }

    /// Blocks until nothing `action` waits for is scheduled or running, then
    /// marks `action` running. Consumes one scheduled mark, if present.
    pub fn action_starts(&self, action: ActionKind) {
        let mut registry = self.registry.lock();
        while !registry.released {
            match registry.blocks(action) {
                Some(other) => {
                    tracing::debug!(
                        target: "nova.jpda.sync",
                        action = %action,
                        waiting_for = %other,
                        "action waits"
                    );
                    self.changed.wait(&mut registry);
                }
                None => break,
            }
        }
        decrement(&mut registry.scheduled, action);
        *registry.running.entry(action).or_default() += 1;
    }

    pub fn action_ends(&self, action: ActionKind) {
        let mut registry = self.registry.lock();
        decrement(&mut registry.running, action);
        self.changed.notify_all();
    }

    /// [`action_starts`](Self::action_starts) paired with a guard that calls
    /// [`action_ends`](Self::action_ends) when dropped.
    pub fn start(self: &Arc<Self>, action: ActionKind) -> ActionGuard {
        self.action_starts(action);
        ActionGuard {
            synchronizer: Arc::clone(self),
            action,
        }
    }

    pub fn is_scheduled_or_running(&self, action: ActionKind) -> bool {
        let registry = self.registry.lock();
        registry.scheduled.contains_key(&action) || registry.running.contains_key(&action)
    }

    /// Wakes every waiter and stops all future blocking. Called when the
    /// owning session finishes.
    pub fn release(&self) {
        let mut registry = self.registry.lock();
        registry.released = true;
        registry.scheduled.clear();
        self.changed.notify_all();
    }
}

#[must_use = "dropping the guard ends the action"]
pub struct ActionGuard {
    synchronizer: Arc<ActionsSynchronizer>,
    action: ActionKind,
}

impl ActionGuard {
    pub fn action(&self) -> ActionKind {
        self.action
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.synchronizer.action_ends(self.action);
    }
}
