//! Stepping by expression operation: stop at the next method invocation of
//! the current expression instead of the next line.

use std::sync::{Arc, Weak};

use nova_jdi::{
    Event, EventKind, JdiError, Location, RequestId, RequestSpec, StepDepth, StepSize, ThreadId,
};
use parking_lot::Mutex;

use crate::editor::{Expression, Operation};
use crate::error::DebugResult;
use crate::operator::{EventOutcome, Executor};
use crate::requests;
use crate::session::DebugSession;
use crate::step::{abandon_or_fail, StepActionProvider, StepStart};
use crate::thread::JpdaThread;

/// Falls back to a line step over when the expression has no operation left.
pub(crate) fn step_operation(session: &DebugSession, thread: ThreadId) -> DebugResult<()> {
    let jt = session.thread(thread);
    let submitted = {
        let Some(_guard) = session.lock_suspended(&jt)? else {
            return Ok(());
        };
        OperationStep::submit(session, &jt)
    };
    match submitted {
        Ok(true) => match session.resume_after_action(thread) {
            Ok(()) => Ok(()),
            Err(err) => abandon_or_fail(session, err),
        },
        Ok(false) => {
            tracing::debug!(target: "nova.jpda.step", thread, "no next operation; stepping over");
            StepActionProvider::run_action(session, thread, StepDepth::Over, StepSize::Line)
        }
        Err(err) => abandon_or_fail(session, err),
    }
}

struct OperationStep {
    me: Weak<OperationStep>,
    thread: ThreadId,
    start: StepStart,
    expression: Expression,
    breakpoints: Mutex<Vec<RequestId>>,
}

impl OperationStep {
    /// Returns `false` when there is no next operation to stop at.
    fn submit(session: &DebugSession, jt: &JpdaThread) -> Result<bool, JdiError> {
        let Some(editor) = session.editor() else {
            return Ok(false);
        };
        let thread = jt.id();
        let start = StepStart::capture(session, thread)?;
        let Some(expression) = editor.expression(&start.location) else {
            return Ok(false);
        };
        let pc = start.location.code_index;
        let current = jt.current_operation();
        let next: Vec<Operation> = expression
            .reachable_operations(pc)
            .into_iter()
            .filter(|op| {
                op.bytecode_index > pc
                    || current
                        .as_ref()
                        .map_or(true, |current| current.bytecode_index != pc)
            })
            .cloned()
            .collect();
        if next.is_empty() {
            return Ok(false);
        }

        let step = Arc::new_cyclic(|me| OperationStep {
            me: me.clone(),
            thread,
            start,
            expression,
            breakpoints: Mutex::new(Vec::new()),
        });
        if let Err(err) = step.install(session, &next) {
            step.finish(session);
            return Err(err);
        }
        jt.set_in_step(true);
        tracing::debug!(
            target: "nova.jpda.step",
            thread,
            operations = next.len(),
            "operation step submitted"
        );
        Ok(true)
    }

    fn install(self: &Arc<Self>, session: &DebugSession, next: &[Operation]) -> Result<(), JdiError> {
        for op in next {
            let location = Location::new(self.start.location.method.clone(), op.line, op.bytecode_index);
            let spec = RequestSpec::breakpoint(location)
                .with_suspend_policy(session.suspend_policy())
                .with_thread_filter(self.thread);
            let request = requests::install(session, spec, &[], self.clone())?;
            self.breakpoints.lock().push(request);
        }
        self.set_boundary(session)
    }

    fn set_boundary(self: &Arc<Self>, session: &DebugSession) -> Result<(), JdiError> {
        let spec = RequestSpec::step(self.thread, StepSize::Line, StepDepth::Over)
            .with_suspend_policy(session.suspend_policy())
            .with_count_filter(1);
        requests::install_step(session, self.thread, spec, &[], self.clone())?;
        Ok(())
    }

    fn finish(&self, session: &DebugSession) {
        for request in self.breakpoints.lock().drain(..) {
            requests::discard(session, request);
        }
        if let Err(err) = requests::remove_step_requests(session, self.thread) {
            tracing::debug!(target: "nova.jpda.step", thread = self.thread, error = %err, "failed to remove boundary step");
        }
        session.thread(self.thread).set_in_step(false);
    }

    fn on_operation(&self, session: &DebugSession, jt: &JpdaThread, location: &Location) -> EventOutcome {
        self.finish(session);
        let reached = self
            .expression
            .operations
            .iter()
            .find(|op| op.bytecode_index == location.code_index)
            .cloned();
        jt.clear_last_operations();
        if let Some(previous) = self.expression.last_operation_before(location.code_index) {
            jt.add_last_operation(previous.clone());
        }
        tracing::debug!(
            target: "nova.jpda.step",
            thread = self.thread,
            operation = reached.as_ref().map(|op| op.method_name.as_str()),
            "reached operation"
        );
        jt.set_current_operation(reached);
        EventOutcome::Stop
    }

    fn on_boundary(
        self: &Arc<Self>,
        session: &DebugSession,
        jt: &JpdaThread,
        location: &Location,
    ) -> EventOutcome {
        let still_inside = session.vm().frame_count(self.thread).is_ok_and(|depth| {
            depth == self.start.depth
                && location.method.id == self.start.location.method.id
                && self.expression.contains_line(location.line)
        });
        if still_inside {
            match self.set_boundary(session) {
                Ok(()) => return EventOutcome::Resume,
                Err(err) => {
                    tracing::debug!(target: "nova.jpda.step", thread = self.thread, error = %err, "boundary step lost");
                }
            }
        }
        self.finish(session);
        jt.set_current_operation(None);
        EventOutcome::Stop
    }
}

impl Executor for OperationStep {
    fn exec(&self, session: &DebugSession, event: &Event) -> EventOutcome {
        let Some(this) = self.me.upgrade() else {
            return EventOutcome::Ignore;
        };
        let jt = session.thread(self.thread);
        let _guard = session.step_lock(&jt).write();
        match &event.kind {
            EventKind::Breakpoint { location } => self.on_operation(session, &jt, location),
            EventKind::Step { location } => this.on_boundary(session, &jt, location),
            _ => EventOutcome::Resume,
        }
    }
}
