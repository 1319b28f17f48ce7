use std::sync::Arc;

use nova_jdi::SuspendPolicy;

use crate::action::ActionKind;
use crate::error::{DebugResult, DebuggerError};
use crate::provider::ActionProvider;
use crate::requests;
use crate::session::{DebugSession, DebuggerState};
use crate::step::abandon_or_fail;

/// Suspends the debuggee.
pub struct PauseActionProvider;

impl ActionProvider for PauseActionProvider {
    fn actions(&self) -> &'static [ActionKind] {
        &[ActionKind::Pause]
    }

    fn is_enabled(&self, session: &DebugSession, _action: ActionKind) -> bool {
        session.state() == DebuggerState::Running
    }

    fn do_action(&self, session: &Arc<DebugSession>, _action: ActionKind) -> DebugResult<()> {
        let vm = session.vm();
        let suspended = match (session.suspend_policy(), session.current_thread()) {
            (SuspendPolicy::EventThread, Some(thread)) => vm.suspend_thread(thread),
            _ => vm.suspend_all(),
        };
        if let Err(err) = suspended {
            return abandon_or_fail(session, err);
        }
        session.set_state(DebuggerState::Stopped);
        tracing::debug!(target: "nova.jpda.step", "paused");
        Ok(())
    }
}

/// Pops the topmost frame of the current thread.
pub struct PopTopmostCallActionProvider;

impl ActionProvider for PopTopmostCallActionProvider {
    fn actions(&self) -> &'static [ActionKind] {
        &[ActionKind::PopTopmostCall]
    }

    fn is_enabled(&self, session: &DebugSession, _action: ActionKind) -> bool {
        if session.state() != DebuggerState::Stopped {
            return false;
        }
        session
            .current_thread()
            .is_some_and(|thread| session.vm().frame_count(thread).is_ok_and(|count| count > 1))
    }

    fn do_action(&self, session: &Arc<DebugSession>, _action: ActionKind) -> DebugResult<()> {
        let thread = session
            .current_thread()
            .ok_or(DebuggerError::NoCurrentThread)?;
        let jt = session.thread(thread);
        let Some(_guard) = session.lock_suspended(&jt)? else {
            return Ok(());
        };
        let popped = requests::remove_step_requests(session, thread)
            .and_then(|()| session.vm().pop_frames(thread, 1));
        if let Err(err) = popped {
            return abandon_or_fail(session, err);
        }
        jt.clear_last_operations();
        jt.set_return_value(None);
        tracing::debug!(target: "nova.jpda.step", thread, "popped topmost call");
        Ok(())
    }
}
