//! Named debugger actions and their synchronous / asynchronous entry points.

use std::sync::Arc;

use nova_scheduler::BlockingTask;

use crate::action::ActionKind;
use crate::error::{DebugResult, DebuggerError};
use crate::pause::{PauseActionProvider, PopTopmostCallActionProvider};
use crate::session::{DebugSession, DebuggerState};
use crate::start::KillActionProvider;
use crate::step::StepActionProvider;
use crate::step_into::StepIntoActionProvider;

pub trait ActionProvider: Send + Sync {
    fn actions(&self) -> &'static [ActionKind];

    fn is_enabled(&self, session: &DebugSession, action: ActionKind) -> bool;

    /// Runs `action` on the calling thread.
    fn do_action(&self, session: &Arc<DebugSession>, action: ActionKind) -> DebugResult<()>;
}

/// Providers of every action available on a running session.
pub fn default_providers() -> Vec<Arc<dyn ActionProvider>> {
    vec![
        Arc::new(StepActionProvider),
        Arc::new(StepIntoActionProvider),
        Arc::new(PauseActionProvider),
        Arc::new(PopTopmostCallActionProvider),
        Arc::new(KillActionProvider),
    ]
}

pub fn provider_for(
    providers: &[Arc<dyn ActionProvider>],
    action: ActionKind,
) -> Option<Arc<dyn ActionProvider>> {
    providers
        .iter()
        .find(|provider| provider.actions().contains(&action))
        .cloned()
}

/// Runs `action` on the session's worker pool.
///
/// The action is declared to the synchronizer before it is queued, and the
/// current thread carries it as its pending action until it finishes.
pub fn post_action(
    provider: Arc<dyn ActionProvider>,
    session: &Arc<DebugSession>,
    action: ActionKind,
) -> BlockingTask<DebugResult<()>> {
    if session.is_finished() {
        return BlockingTask::ready(Ok(Err(DebuggerError::SessionFinished)));
    }
    if !provider.is_enabled(session, action) {
        return BlockingTask::ready(Ok(Err(DebuggerError::ActionDisabled(action.name()))));
    }
    session.synchronizer().action_scheduled(action);
    let thread = session.current_thread().map(|thread| session.thread(thread));
    if let Some(thread) = &thread {
        thread.set_pending_action(Some(action));
    }
    tracing::debug!(target: "nova.jpda.sync", action = %action, "action posted");

    let task_session = Arc::clone(session);
    session.scheduler().spawn(move |_token| {
        let result = {
            let _guard = task_session.synchronizer().start(action);
            provider.do_action(&task_session, action)
        };
        if let Some(thread) = thread {
            thread.set_pending_action(None);
        }
        if let Err(err) = &result {
            tracing::debug!(target: "nova.jpda.sync", action = %action, error = %err, "action failed");
        }
        Ok(result)
    })
}

/// Step-style actions need a stopped session with a current thread that has
/// no action pending.
pub(crate) fn can_step(session: &DebugSession) -> bool {
    session.state() == DebuggerState::Stopped
        && session
            .current_thread()
            .is_some_and(|thread| session.thread(thread).pending_action().is_none())
}
