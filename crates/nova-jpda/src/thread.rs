use nova_jdi::{ThreadId, Value};
use parking_lot::{Mutex, RwLock};

use crate::action::ActionKind;
use crate::editor::Operation;

#[derive(Default)]
struct ThreadState {
    in_step: bool,
    pending_action: Option<ActionKind>,
    current_operation: Option<Operation>,
    last_operations: Vec<Operation>,
    return_value: Option<Value>,
}

/// Debugger-side state of one debuggee thread.
pub struct JpdaThread {
    id: ThreadId,
    access: RwLock<()>,
    state: Mutex<ThreadState>,
}

impl JpdaThread {
    pub(crate) fn new(id: ThreadId) -> Self {
        Self {
            id,
            access: RwLock::new(()),
            state: Mutex::new(ThreadState::default()),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Serializes step state transitions of this thread when only the event
    /// thread is suspended.
    pub fn access_lock(&self) -> &RwLock<()> {
        &self.access
    }

    pub fn is_in_step(&self) -> bool {
        self.state.lock().in_step
    }

    pub(crate) fn set_in_step(&self, in_step: bool) {
        self.state.lock().in_step = in_step;
    }

    pub fn pending_action(&self) -> Option<ActionKind> {
        self.state.lock().pending_action
    }

    pub(crate) fn set_pending_action(&self, action: Option<ActionKind>) {
        self.state.lock().pending_action = action;
    }

    pub fn current_operation(&self) -> Option<Operation> {
        self.state.lock().current_operation.clone()
    }

    pub(crate) fn set_current_operation(&self, operation: Option<Operation>) {
        self.state.lock().current_operation = operation;
    }

    /// Operations finished by the last step, oldest first.
    pub fn last_operations(&self) -> Vec<Operation> {
        self.state.lock().last_operations.clone()
    }

    pub(crate) fn add_last_operation(&self, operation: Operation) {
        self.state.lock().last_operations.push(operation);
    }

    pub(crate) fn clear_last_operations(&self) {
        let mut state = self.state.lock();
        state.last_operations.clear();
        state.current_operation = None;
    }

    pub fn return_value(&self) -> Option<Value> {
        self.state.lock().return_value.clone()
    }

    pub(crate) fn set_return_value(&self, value: Option<Value>) {
        self.state.lock().return_value = value;
    }
}
