use std::sync::Arc;

use nova_jdi::{JdiError, StepSize, ThreadId};

use crate::action::ActionKind;
use crate::editor::Operation;
use crate::error::{DebugResult, DebuggerError};
use crate::provider::{self, ActionProvider};
use crate::run_into::{RunIntoMethodActionSupport, RunIntoTarget};
use crate::session::DebugSession;
use crate::step::abandon_or_fail;

/// What a step into on the current line should do.
#[derive(Debug, Clone, PartialEq)]
enum IntoPlan {
    /// No known call on the line: plain step into.
    Step,
    RunInto(RunIntoTarget),
    /// The user dismissed the chooser.
    Cancelled,
}

/// STEP_INTO with method-call selection.
///
/// When the editor reports more than one call that can still run on the
/// current line, the session's method chooser picks one; a single candidate
/// is run into directly.
pub struct StepIntoActionProvider;

impl StepIntoActionProvider {
    pub fn step_into(session: &DebugSession, thread: ThreadId) -> DebugResult<()> {
        let jt = session.thread(thread);
        let plan = {
            let Some(_guard) = session.lock_suspended(&jt)? else {
                return Ok(());
            };
            match plan(session, thread) {
                Ok(plan) => plan,
                Err(err) => return abandon_or_fail(session, err),
            }
        };
        tracing::debug!(target: "nova.jpda.step_into", thread, ?plan, "step into");
        match plan {
            IntoPlan::RunInto(target) => {
                RunIntoMethodActionSupport::run_into_method(session, thread, target)
            }
            IntoPlan::Cancelled => Ok(()),
            IntoPlan::Step => {
                {
                    let Some(_guard) = session.lock_suspended(&jt)? else {
                        return Ok(());
                    };
                    if let Err(err) = session.step_into_next().start_locked(session, &jt, StepSize::Line) {
                        return abandon_or_fail(session, err);
                    }
                }
                match session.resume_after_action(thread) {
                    Ok(()) => Ok(()),
                    Err(err) => abandon_or_fail(session, err),
                }
            }
        }
    }
}

/// Candidate calls on the current line that control flow can still reach.
fn plan(session: &DebugSession, thread: ThreadId) -> Result<IntoPlan, JdiError> {
    let Some(editor) = session.editor() else {
        return Ok(IntoPlan::Step);
    };
    let location = session.vm().top_frame(thread)?;
    let Some(expression) = editor.expression(&location) else {
        return Ok(IntoPlan::Step);
    };
    let candidates: Vec<Operation> = expression
        .reachable_operations(location.code_index)
        .into_iter()
        .filter(|op| op.line == location.line)
        .cloned()
        .collect();

    let chosen = match (candidates.as_slice(), session.method_chooser()) {
        ([], _) => return Ok(IntoPlan::Step),
        ([only], _) => only.clone(),
        (_, Some(chooser)) => match chooser.choose(&candidates) {
            Some(op) => op,
            None => return Ok(IntoPlan::Cancelled),
        },
        (_, None) => return Ok(IntoPlan::Step),
    };
    Ok(IntoPlan::RunInto(RunIntoTarget {
        class_name: location.declaring_type().to_owned(),
        line: chosen.line,
        method_name: chosen.method_name,
        method_class: Some(chosen.method_class),
        expression_lines: Some((expression.first_line, expression.last_line)),
    }))
}

impl ActionProvider for StepIntoActionProvider {
    fn actions(&self) -> &'static [ActionKind] {
        &[ActionKind::StepInto]
    }

    fn is_enabled(&self, session: &DebugSession, _action: ActionKind) -> bool {
        provider::can_step(session)
    }

    fn do_action(&self, session: &Arc<DebugSession>, action: ActionKind) -> DebugResult<()> {
        if action != ActionKind::StepInto {
            return Err(DebuggerError::ActionDisabled(action.name()));
        }
        let thread = session
            .current_thread()
            .ok_or(DebuggerError::NoCurrentThread)?;
        Self::step_into(session, thread)
    }
}
