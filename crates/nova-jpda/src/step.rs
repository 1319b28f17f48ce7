//! Step over / step out.
//!
//! A step is submitted under the thread's step lock and resolved on the event
//! dispatcher: [`StepRun::decide`] turns the step event into a
//! [`StepDecision`] while holding the lock, and [`StepRun::apply`] carries it
//! out (stop, re-step, hand over to step-into logic or let the thread run).

use std::sync::{Arc, Weak};
use std::time::Duration;

use nova_config::SteppingConfig;
use nova_jdi::{
    Event, EventKind, JdiError, Location, MethodId, RequestId, RequestSpec, StepDepth, StepSize,
    SuspendPolicy, ThreadId, Value,
};
use nova_scheduler::{run_with_budget, TaskError};
use parking_lot::Mutex;

use crate::action::ActionKind;
use crate::editor::{EditorContext, Operation};
use crate::error::{DebugResult, DebuggerError};
use crate::filter::{stop_in_class, ExclusionFilter, SmartSteppingFilterWrapper};
use crate::operation_step;
use crate::operator::{EventOutcome, Executor};
use crate::policy::{PolicyContext, StopOrStep};
use crate::provider::{self, ActionProvider};
use crate::requests;
use crate::session::DebugSession;
use crate::synthetic::synthetic_step;
use crate::thread::JpdaThread;

const LAST_OPERATION_BUDGET: Duration = Duration::from_millis(200);

/// What to do after a step event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepDecision {
    Stop,
    /// The thread is gone or was resumed by someone else.
    Abandon,
    /// Let the thread run to completion without stepping.
    RunFree,
    Step {
        size: StepSize,
        depth: StepDepth,
        synthetic: bool,
    },
    StepInto {
        size: StepSize,
    },
}

/// Where a step started.
#[derive(Debug, Clone)]
pub(crate) struct StepStart {
    pub location: Location,
    /// Stack depth (frame count).
    pub depth: usize,
}

impl StepStart {
    pub(crate) fn capture(session: &DebugSession, thread: ThreadId) -> Result<Self, JdiError> {
        let frames = session.vm().frames(thread)?;
        let depth = frames.len();
        let location = frames
            .into_iter()
            .next()
            .ok_or(JdiError::InvalidStackFrame)?;
        Ok(Self { location, depth })
    }

    /// Same class, method, line and depth.
    pub(crate) fn is_at(&self, location: &Location, depth: usize) -> bool {
        self.depth == depth
            && self.location.line == location.line
            && self.location.method_name() == location.method_name()
            && self.location.declaring_type() == location.declaring_type()
    }
}

/// Class filters for a new step request: the configured step filters plus
/// the step's smart-stepping exclusions.
pub(crate) fn step_exclusions(options: &SteppingConfig, filter: &dyn ExclusionFilter) -> Vec<String> {
    if !options.use_step_filters {
        return Vec::new();
    }
    let mut patterns = options.active_step_filters().to_vec();
    for pattern in filter.exclusion_patterns() {
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }
    patterns
}

/// Turns a failure into a silent abandon when it only means the thread or
/// the VM went away.
pub(crate) fn abandon_or_fail(session: &DebugSession, err: JdiError) -> DebugResult<()> {
    if err.is_abandon() {
        tracing::debug!(target: "nova.jpda.step", error = %err, "action abandoned");
        if err.is_disconnect() {
            session.mark_disconnected();
        }
        Ok(())
    } else {
        Err(err.into())
    }
}

/// Outcome of a step event whose follow-up request could not be submitted.
///
/// A disconnect finishes the session and a vanished thread or request only
/// ends the step; neither leaves the user stopped on it.
pub(crate) fn resubmit_failed(session: &DebugSession, err: &JdiError) -> EventOutcome {
    if err.is_disconnect() {
        session.mark_disconnected();
        EventOutcome::Ignore
    } else if err.is_abandon() {
        EventOutcome::Ignore
    } else {
        tracing::warn!(target: "nova.jpda.step", error = %err, "failed to continue stepping");
        EventOutcome::Stop
    }
}

/// STEP_OVER / STEP_OUT / STEP_OPERATION.
pub struct StepActionProvider;

impl StepActionProvider {
    /// Submits a `depth`/`size` step for `thread` and lets the debuggee run.
    pub fn run_action(
        session: &DebugSession,
        thread: ThreadId,
        depth: StepDepth,
        size: StepSize,
    ) -> DebugResult<()> {
        let jt = session.thread(thread);
        {
            let Some(_guard) = session.lock_suspended(&jt)? else {
                return Ok(());
            };
            if let Err(err) = StepRun::start(session, &jt, depth, size) {
                return abandon_or_fail(session, err);
            }
        }
        match session.resume_after_action(thread) {
            Ok(()) => Ok(()),
            Err(err) => abandon_or_fail(session, err),
        }
    }
}

impl ActionProvider for StepActionProvider {
    fn actions(&self) -> &'static [ActionKind] {
        &[
            ActionKind::StepOver,
            ActionKind::StepOut,
            ActionKind::StepOperation,
        ]
    }

    fn is_enabled(&self, session: &DebugSession, _action: ActionKind) -> bool {
        provider::can_step(session)
    }

    fn do_action(&self, session: &Arc<DebugSession>, action: ActionKind) -> DebugResult<()> {
        let thread = session
            .current_thread()
            .ok_or(DebuggerError::NoCurrentThread)?;
        match action {
            ActionKind::StepOver => Self::run_action(session, thread, StepDepth::Over, StepSize::Line),
            ActionKind::StepOut => Self::run_action(session, thread, StepDepth::Out, StepSize::Line),
            ActionKind::StepOperation => operation_step::step_operation(session, thread),
            other => Err(DebuggerError::ActionDisabled(other.name())),
        }
    }
}

/// One user-initiated step, alive until it stops or is abandoned.
pub(crate) struct StepRun {
    me: Weak<StepRun>,
    thread: ThreadId,
    size: StepSize,
    depth: StepDepth,
    start: StepStart,
    from_main: bool,
    wrapper: Arc<SmartSteppingFilterWrapper>,
    method_exit: Mutex<Option<RequestId>>,
}

impl StepRun {
    /// Caller holds the step lock of `jt`.
    pub(crate) fn start(
        session: &DebugSession,
        jt: &JpdaThread,
        depth: StepDepth,
        size: StepSize,
    ) -> Result<(), JdiError> {
        let thread = jt.id();
        let start = StepStart::capture(session, thread)?;
        jt.clear_last_operations();
        jt.set_return_value(None);

        let delegate: Arc<dyn ExclusionFilter> = session.filter().clone();
        let run = Arc::new_cyclic(|me| StepRun {
            me: me.clone(),
            thread,
            size,
            depth,
            from_main: start.depth == 1 && start.location.method_name() == "main",
            start,
            wrapper: Arc::new(SmartSteppingFilterWrapper::new(delegate)),
            method_exit: Mutex::new(None),
        });
        run.submit(session, depth, size)?;
        if depth == StepDepth::Out
            && session.vm().can_get_method_return_values()
            && !run.start.location.method.is_constructor()
        {
            if let Err(err) = run.arm_method_exit(session) {
                run.finish(session, jt);
                return Err(err);
            }
        }
        jt.set_in_step(true);
        tracing::debug!(
            target: "nova.jpda.step",
            thread,
            depth = depth.as_str(),
            ?size,
            start = %run.start.location,
            "step submitted"
        );
        Ok(())
    }

    fn submit(
        self: &Arc<Self>,
        session: &DebugSession,
        depth: StepDepth,
        size: StepSize,
    ) -> Result<RequestId, JdiError> {
        let options = session.options();
        let spec = RequestSpec::step(self.thread, size, depth)
            .with_suspend_policy(session.suspend_policy())
            .with_count_filter(1);
        let exclusions = step_exclusions(&options, &*self.wrapper);
        requests::install_step(session, self.thread, spec, &exclusions, self.clone())
    }

    fn arm_method_exit(&self, session: &DebugSession) -> Result<(), JdiError> {
        let method = &self.start.location.method;
        let spec = RequestSpec::method_exit(Some(self.thread), vec![method.declaring_type.clone()])
            .with_suspend_policy(SuspendPolicy::EventThread);
        let tracker = Arc::new(ReturnValueTracker {
            thread: self.thread,
            method: method.id,
            depth: self.start.depth,
        });
        let request = requests::install(session, spec, &[], tracker)?;
        *self.method_exit.lock() = Some(request);
        Ok(())
    }

    fn decide(
        &self,
        session: &DebugSession,
        jt: &JpdaThread,
        location: &Location,
    ) -> Result<StepDecision, JdiError> {
        let vm = session.vm();
        if !vm.is_suspended(jt.id())? {
            return Ok(StepDecision::Abandon);
        }
        let options = session.options();

        if options.use_step_filters && options.filter_synthetic_methods {
            if let Some(synthetic) = synthetic_step(location) {
                return Ok(StepDecision::Step {
                    size: self.size,
                    depth: synthetic.depth_or(self.depth),
                    synthetic: true,
                });
            }
        }

        if self.from_main
            && location.declaring_type() == "java.lang.Thread"
            && location.method_name() == "exit"
        {
            return Ok(StepDecision::RunFree);
        }

        let answer = if options.use_step_filters
            && !stop_in_class(location.declaring_type(), &*self.wrapper)
        {
            StopOrStep::skip()
        } else {
            let ctx = PolicyContext {
                thread: jt.id(),
                location,
                options: &options,
                editor: session.editor().map(|editor| &**editor),
            };
            session.policies().stop_at(&ctx, &*self.wrapper)
        };

        Ok(match answer {
            StopOrStep::Stop => StepDecision::Stop,
            StopOrStep::Skip { size, depth } => {
                let size = size.unwrap_or(self.size);
                let depth = depth.unwrap_or(
                    if !options.step_through_filters || options.smart_stepping_step_out {
                        StepDepth::Out
                    } else {
                        self.depth
                    },
                );
                if depth == StepDepth::Into {
                    StepDecision::StepInto { size }
                } else {
                    StepDecision::Step {
                        size,
                        depth,
                        synthetic: false,
                    }
                }
            }
        })
    }

    fn apply(
        self: &Arc<Self>,
        session: &DebugSession,
        jt: &Arc<JpdaThread>,
        location: &Location,
        decision: StepDecision,
    ) -> EventOutcome {
        match decision {
            StepDecision::Stop => {
                self.finish(session, jt);
                record_last_operations(session, jt, &self.start.location, location);
                EventOutcome::Stop
            }
            StepDecision::Abandon => {
                self.finish(session, jt);
                EventOutcome::Ignore
            }
            StepDecision::RunFree => {
                self.finish(session, jt);
                EventOutcome::Resume
            }
            StepDecision::Step {
                size,
                depth,
                synthetic,
            } => {
                if synthetic {
                    tracing::trace!(target: "nova.jpda.step", thread = self.thread, depth = depth.as_str(), "stepping through synthetic code");
                }
                let submitted = {
                    let _guard = session.step_lock(jt).write();
                    self.submit(session, depth, size)
                };
                match submitted {
                    Ok(_) => EventOutcome::Resume,
                    Err(err) => self.fail(session, jt, err),
                }
            }
            StepDecision::StepInto { size } => {
                self.discard_method_exit(session);
                let submitted = {
                    let _guard = session.step_lock(jt).write();
                    session.step_into_next().start_locked(session, jt, size)
                };
                match submitted {
                    Ok(()) => EventOutcome::Resume,
                    Err(err) => self.fail(session, jt, err),
                }
            }
        }
    }

    fn fail(&self, session: &DebugSession, jt: &JpdaThread, err: JdiError) -> EventOutcome {
        tracing::debug!(target: "nova.jpda.step", thread = self.thread, error = %err, "step abandoned");
        self.finish(session, jt);
        resubmit_failed(session, &err)
    }

    fn discard_method_exit(&self, session: &DebugSession) {
        if let Some(request) = self.method_exit.lock().take() {
            requests::discard(session, request);
        }
    }

    /// Drops every request this step still owns.
    fn finish(&self, session: &DebugSession, jt: &JpdaThread) {
        self.discard_method_exit(session);
        if let Err(err) = requests::remove_step_requests(session, self.thread) {
            tracing::debug!(target: "nova.jpda.step", thread = self.thread, error = %err, "failed to remove step requests");
        }
        jt.set_in_step(false);
    }
}

impl Executor for StepRun {
    fn exec(&self, session: &DebugSession, event: &Event) -> EventOutcome {
        let Some(this) = self.me.upgrade() else {
            return EventOutcome::Ignore;
        };
        let Some(location) = event.location() else {
            return EventOutcome::Resume;
        };
        let jt = session.thread(self.thread);
        let decision = {
            let _guard = session.step_lock(&jt).write();
            match self.decide(session, &jt, location) {
                Ok(decision) => decision,
                Err(err) if err.is_abandon() => {
                    tracing::debug!(target: "nova.jpda.step", thread = self.thread, error = %err, "thread gone");
                    StepDecision::Abandon
                }
                Err(err) => {
                    tracing::warn!(target: "nova.jpda.step", thread = self.thread, error = %err, "step decision failed");
                    StepDecision::Stop
                }
            }
        };
        tracing::debug!(
            target: "nova.jpda.step",
            thread = self.thread,
            ?decision,
            %location,
            "step event"
        );
        this.apply(session, &jt, location, decision)
    }
}

/// Records the value returned by the method a STEP_OUT started in.
struct ReturnValueTracker {
    thread: ThreadId,
    method: MethodId,
    depth: usize,
}

impl Executor for ReturnValueTracker {
    fn exec(&self, session: &DebugSession, event: &Event) -> EventOutcome {
        let EventKind::MethodExit {
            location,
            return_value,
        } = &event.kind
        else {
            return EventOutcome::Resume;
        };
        if location.method.id != self.method {
            return EventOutcome::Resume;
        }
        match session.vm().frame_count(self.thread) {
            Ok(depth) if depth == self.depth => {
                session.thread(self.thread).set_return_value(return_value.clone());
                if let Some(request) = event.request {
                    requests::discard(session, request);
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(target: "nova.jpda.step", thread = self.thread, error = %err, "method exit ignored");
            }
        }
        EventOutcome::Resume
    }
}

/// Fills `thread`'s last operations for a step from `start` that stopped at
/// `stop`. Waits at most [`LAST_OPERATION_BUDGET`]; slower editors publish
/// the result when they finish.
fn record_last_operations(
    session: &DebugSession,
    thread: &Arc<JpdaThread>,
    start: &Location,
    stop: &Location,
) {
    let Some(editor) = session.editor().cloned() else {
        return;
    };
    let returns_values = session.vm().can_get_method_return_values();
    let (thread, start, stop) = (thread.clone(), start.clone(), stop.clone());
    let id = thread.id();
    match run_with_budget(LAST_OPERATION_BUDGET, move || {
        apply_last_operations(&*editor, &thread, &start, &stop, returns_values)
    }) {
        Ok(count) => {
            tracing::trace!(target: "nova.jpda.step", thread = id, count, "last operations");
        }
        Err(TaskError::DeadlineExceeded(budget)) => {
            tracing::debug!(target: "nova.jpda.step", thread = id, ?budget, "last operations computed asynchronously");
        }
        Err(err) => {
            tracing::warn!(target: "nova.jpda.step", thread = id, error = %err, "failed to compute last operations");
        }
    }
}

fn apply_last_operations(
    editor: &dyn EditorContext,
    thread: &JpdaThread,
    start: &Location,
    stop: &Location,
    returns_values: bool,
) -> usize {
    let Some(expression) = editor.expression(start) else {
        return 0;
    };
    let same_frame = stop.method.id == start.method.id;
    let mut operations: Vec<Operation> = expression
        .reachable_operations(start.code_index)
        .into_iter()
        .filter(|op| !same_frame || op.bytecode_index < stop.code_index)
        .cloned()
        .collect();
    if let Some(last) = operations.last_mut() {
        last.return_value = match thread.return_value() {
            Some(value) => Some(value),
            None if returns_values && last.method_name == "<init>" => Some(Value::Void),
            None => None,
        };
    }
    thread.clear_last_operations();
    let count = operations.len();
    for operation in operations {
        thread.add_last_operation(operation);
    }
    count
}
