//! Run to a call site, then step into the named method.
//!
//! The call-site breakpoint hands over to a tracing executor that steps into
//! calls on the call-site line until it reaches a method with the target
//! name, steps back out of anything else, and gives up once execution leaves
//! the call-site expression or the step budget runs out.

use std::sync::{Arc, Weak};
use std::time::Duration;

use nova_jdi::{
    Event, EventKind, JdiError, Location, MethodInfo, RequestId, RequestSpec, StepDepth, StepSize,
    SuspendPolicy, ThreadId,
};
use parking_lot::Mutex;

use crate::error::DebugResult;
use crate::operator::{EventOutcome, Executor};
use crate::requests;
use crate::session::{DebugSession, HiddenBreakpoint, HiddenBreakpointKind};
use crate::step::{abandon_or_fail, resubmit_failed};

const MAX_TRACE_STEPS: usize = 50;
const PREFERRED_THREAD_POLLS: u32 = 5;
const PREFERRED_THREAD_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A method call to run into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIntoTarget {
    /// Class containing the call site.
    pub class_name: String,
    /// Line of the call site.
    pub line: i32,
    pub method_name: String,
    /// Declaring class of the called method, when known.
    pub method_class: Option<String>,
    /// First and last line of the expression around the call site.
    pub expression_lines: Option<(i32, i32)>,
}

impl RunIntoTarget {
    pub fn new(class_name: impl Into<String>, line: i32, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            line,
            method_name: method_name.into(),
            method_class: None,
            expression_lines: None,
        }
    }

    pub fn with_method_class(mut self, method_class: impl Into<String>) -> Self {
        self.method_class = Some(method_class.into());
        self
    }

    pub fn with_expression_lines(mut self, first: i32, last: i32) -> Self {
        self.expression_lines = Some((first, last));
        self
    }

    fn is_call_site(&self, location: &Location) -> bool {
        location.declaring_type() == self.class_name && location.line == self.line
    }

    fn in_expression(&self, location: &Location) -> bool {
        if location.declaring_type() != self.class_name {
            return false;
        }
        match self.expression_lines {
            Some((first, last)) => (first..=last).contains(&location.line),
            None => location.line == self.line,
        }
    }

    fn is_target(&self, location: &Location) -> bool {
        location.method_name() == self.method_name
            && self
                .method_class
                .as_deref()
                .map_or(true, |class| class == location.declaring_type())
    }
}

/// How a run-into submission left the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submitted {
    /// Waiting for a breakpoint or class load; the debuggee must run.
    Waiting,
    /// Tracing started from the current position; the debuggee must run.
    Tracing,
    /// Handed over to another debugging technology.
    Stopped,
    /// Nothing to run to; a message was shown.
    Nothing,
}

pub struct RunIntoMethodActionSupport;

impl RunIntoMethodActionSupport {
    /// Runs `thread` (or whichever thread reaches the call site first) into
    /// `target`.
    pub fn run_into_method(
        session: &DebugSession,
        thread: ThreadId,
        target: RunIntoTarget,
    ) -> DebugResult<()> {
        let jt = session.thread(thread);
        let submitted = {
            let Some(_guard) = session.lock_suspended(&jt)? else {
                return Ok(());
            };
            submit(session, thread, &target)
        };
        match submitted {
            Ok(Submitted::Waiting | Submitted::Tracing) => match session.resume_after_action(thread) {
                Ok(()) => Ok(()),
                Err(err) => abandon_or_fail(session, err),
            },
            Ok(Submitted::Stopped | Submitted::Nothing) => Ok(()),
            Err(err) => abandon_or_fail(session, err),
        }
    }
}

fn submit(session: &DebugSession, preferred: ThreadId, target: &RunIntoTarget) -> Result<Submitted, JdiError> {
    let vm = session.vm();
    if vm.classes_by_name(&target.class_name)?.is_empty() {
        let spec = RequestSpec::class_prepare(target.class_name.clone())
            .with_suspend_policy(SuspendPolicy::None);
        let waiter = Arc::new(ClassLoadWaiter {
            preferred,
            target: target.clone(),
        });
        let request = requests::install(session, spec, &[], waiter)?;
        session.add_hidden_breakpoint(HiddenBreakpoint {
            request,
            kind: HiddenBreakpointKind::ClassLoad {
                class_name: target.class_name.clone(),
            },
        });
        tracing::debug!(target: "nova.jpda.run_into", class = %target.class_name, request, "waiting for class load");
        return Ok(Submitted::Waiting);
    }

    let locations = match vm.locations_of_line(&target.class_name, target.line) {
        Ok(locations) => locations,
        Err(JdiError::AbsentInformation(class)) => {
            tracing::info!(target: "nova.jpda.run_into", class = %class, "no line number information");
            session.message(&format!("No line number information for {class}"));
            return Ok(Submitted::Nothing);
        }
        Err(err) => return Err(err),
    };
    if locations.is_empty() {
        session.message(&format!(
            "No executable code on line {} of {}",
            target.line, target.class_name
        ));
        return Ok(Submitted::Nothing);
    }

    let tracer = RunIntoTracer::new(preferred, target.clone());
    if vm.is_suspended(preferred)? && tracer.target.is_call_site(&vm.top_frame(preferred)?) {
        return tracer.trace_line_for_method(session, preferred);
    }

    for location in locations {
        let spec = RequestSpec::breakpoint(location).with_suspend_policy(session.suspend_policy());
        match requests::install(session, spec, &[], tracer.clone()) {
            Ok(request) => {
                tracer.breakpoints.lock().push(request);
                session.add_hidden_breakpoint(HiddenBreakpoint {
                    request,
                    kind: HiddenBreakpointKind::Line {
                        class_name: target.class_name.clone(),
                        line: target.line,
                    },
                });
            }
            Err(err) => {
                tracer.delete_breakpoints(session);
                return Err(err);
            }
        }
    }
    tracing::debug!(
        target: "nova.jpda.run_into",
        class = %target.class_name,
        line = target.line,
        method = %target.method_name,
        "running to call site"
    );
    Ok(Submitted::Waiting)
}

/// Re-submits a run-into once its class is loaded.
struct ClassLoadWaiter {
    preferred: ThreadId,
    target: RunIntoTarget,
}

impl Executor for ClassLoadWaiter {
    fn exec(&self, session: &DebugSession, event: &Event) -> EventOutcome {
        if !matches!(event.kind, EventKind::ClassPrepare { .. }) {
            return EventOutcome::Resume;
        }
        if let Some(request) = event.request {
            session.remove_hidden_breakpoint(request);
            requests::discard(session, request);
        }
        tracing::debug!(target: "nova.jpda.run_into", class = %self.target.class_name, "class loaded");
        let jt = session.thread(self.preferred);
        let submitted = {
            let _guard = session.step_lock(&jt).write();
            submit(session, self.preferred, &self.target)
        };
        match submitted {
            Ok(Submitted::Tracing) => {
                if let Err(err) = session.resume_after_action(self.preferred) {
                    tracing::debug!(target: "nova.jpda.run_into", error = %err, "failed to resume");
                    if err.is_disconnect() {
                        session.mark_disconnected();
                        return EventOutcome::Ignore;
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(target: "nova.jpda.run_into", error = %err, "run into abandoned");
                if err.is_disconnect() {
                    session.mark_disconnected();
                    return EventOutcome::Ignore;
                }
            }
        }
        EventOutcome::Resume
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceStep {
    Arrived,
    Into,
    Out,
    Missed,
    GaveUp,
}

struct TraceState {
    thread: ThreadId,
    start_depth: usize,
    steps: usize,
}

struct RunIntoTracer {
    me: Weak<RunIntoTracer>,
    preferred: ThreadId,
    target: RunIntoTarget,
    breakpoints: Mutex<Vec<RequestId>>,
    trace: Mutex<Option<TraceState>>,
}

impl RunIntoTracer {
    fn new(preferred: ThreadId, target: RunIntoTarget) -> Arc<Self> {
        Arc::new_cyclic(|me| RunIntoTracer {
            me: me.clone(),
            preferred,
            target,
            breakpoints: Mutex::new(Vec::new()),
            trace: Mutex::new(None),
        })
    }

    fn delete_breakpoints(&self, session: &DebugSession) {
        for request in self.breakpoints.lock().drain(..) {
            session.remove_hidden_breakpoint(request);
            requests::discard(session, request);
        }
    }

    /// The preferred thread when it reaches the call site shortly after
    /// `hit`, `hit` otherwise.
    fn choose_thread(&self, session: &DebugSession, hit: ThreadId) -> ThreadId {
        if hit == self.preferred {
            return hit;
        }
        let vm = session.vm();
        for _ in 0..PREFERRED_THREAD_POLLS {
            let arrived = vm.is_suspended(self.preferred).unwrap_or(false)
                && vm
                    .top_frame(self.preferred)
                    .is_ok_and(|top| self.target.is_call_site(&top));
            if arrived {
                return self.preferred;
            }
            std::thread::sleep(PREFERRED_THREAD_POLL_INTERVAL);
        }
        hit
    }

    fn target_method(&self, session: &DebugSession) -> Result<Option<MethodInfo>, JdiError> {
        let class = self.target.method_class.as_deref().unwrap_or(&self.target.class_name);
        Ok(session
            .vm()
            .classes_by_name(class)?
            .iter()
            .find_map(|info| info.methods_by_name(&self.target.method_name).next().cloned()))
    }

    /// Starts stepping into calls from the call site `thread` is suspended
    /// at. Caller holds the step lock of `thread`.
    fn trace_line_for_method(
        self: &Arc<Self>,
        session: &DebugSession,
        thread: ThreadId,
    ) -> Result<Submitted, JdiError> {
        if let Some(bridge) = session.technology_bridge() {
            if let Some(method) = self.target_method(session)? {
                if method.is_native
                    && bridge.suggest_switch(thread, &method.declaring_type, &method.name)
                {
                    tracing::debug!(target: "nova.jpda.run_into", method = %method.name, "switched debugging technology");
                    return Ok(Submitted::Stopped);
                }
            }
        }
        let start_depth = session.vm().frame_count(thread)?;
        *self.trace.lock() = Some(TraceState {
            thread,
            start_depth,
            steps: 0,
        });
        self.step(session, thread, StepDepth::Into)?;
        session.thread(thread).set_in_step(true);
        tracing::debug!(target: "nova.jpda.run_into", thread, start_depth, "tracing call site");
        Ok(Submitted::Tracing)
    }

    fn step(self: &Arc<Self>, session: &DebugSession, thread: ThreadId, depth: StepDepth) -> Result<(), JdiError> {
        let spec = RequestSpec::step(thread, StepSize::Line, depth)
            .with_suspend_policy(session.suspend_policy())
            .with_count_filter(1);
        requests::install_step(session, thread, spec, &[], self.clone())?;
        Ok(())
    }

    fn on_breakpoint(self: &Arc<Self>, session: &DebugSession, event: &Event) -> EventOutcome {
        let Some(hit) = event.thread else {
            return EventOutcome::Resume;
        };
        let thread = self.choose_thread(session, hit);
        self.delete_breakpoints(session);
        let jt = session.thread(thread);
        let traced = {
            let _guard = session.step_lock(&jt).write();
            self.trace_line_for_method(session, thread)
        };
        match traced {
            Ok(Submitted::Tracing) => {
                if thread != hit && session.suspend_policy() == SuspendPolicy::EventThread {
                    if let Err(err) = session.vm().resume_thread(thread) {
                        tracing::debug!(target: "nova.jpda.run_into", thread, error = %err, "failed to resume");
                    }
                }
                EventOutcome::Resume
            }
            Ok(_) => EventOutcome::Stop,
            Err(err) => {
                tracing::debug!(target: "nova.jpda.run_into", thread, error = %err, "run into abandoned");
                self.finish(session, thread);
                resubmit_failed(session, &err)
            }
        }
    }

    fn decide(&self, session: &DebugSession, thread: ThreadId, location: &Location) -> Result<TraceStep, JdiError> {
        let mut trace = self.trace.lock();
        let Some(state) = trace.as_mut().filter(|state| state.thread == thread) else {
            return Ok(TraceStep::Missed);
        };
        state.steps += 1;
        if state.steps > MAX_TRACE_STEPS {
            return Ok(TraceStep::GaveUp);
        }
        let depth = session.vm().frame_count(thread)?;
        Ok(if depth > state.start_depth {
            if self.target.is_target(location) {
                TraceStep::Arrived
            } else {
                TraceStep::Out
            }
        } else if depth == state.start_depth && self.target.in_expression(location) {
            TraceStep::Into
        } else {
            TraceStep::Missed
        })
    }

    fn on_step(self: &Arc<Self>, session: &DebugSession, thread: ThreadId, location: &Location) -> EventOutcome {
        let jt = session.thread(thread);
        let _guard = session.step_lock(&jt).write();
        let step = match self.decide(session, thread, location) {
            Ok(step) => step,
            Err(err) => {
                tracing::debug!(target: "nova.jpda.run_into", thread, error = %err, "trace abandoned");
                self.finish(session, thread);
                return resubmit_failed(session, &err);
            }
        };
        tracing::debug!(target: "nova.jpda.run_into", thread, ?step, %location, "trace step");
        let next = match step {
            TraceStep::Into => StepDepth::Into,
            TraceStep::Out => StepDepth::Out,
            TraceStep::Arrived | TraceStep::Missed | TraceStep::GaveUp => {
                self.finish(session, thread);
                return EventOutcome::Stop;
            }
        };
        match self.step(session, thread, next) {
            Ok(()) => EventOutcome::Resume,
            Err(err) => {
                tracing::debug!(target: "nova.jpda.run_into", thread, error = %err, "trace abandoned");
                self.finish(session, thread);
                resubmit_failed(session, &err)
            }
        }
    }

    fn finish(&self, session: &DebugSession, thread: ThreadId) {
        self.trace.lock().take();
        if let Err(err) = requests::remove_step_requests(session, thread) {
            tracing::debug!(target: "nova.jpda.run_into", thread, error = %err, "failed to remove step requests");
        }
        session.thread(thread).set_in_step(false);
    }
}

impl Executor for RunIntoTracer {
    fn exec(&self, session: &DebugSession, event: &Event) -> EventOutcome {
        let Some(this) = self.me.upgrade() else {
            return EventOutcome::Ignore;
        };
        match (&event.kind, event.thread) {
            (EventKind::Breakpoint { .. }, _) => this.on_breakpoint(session, event),
            (EventKind::Step { location }, Some(thread)) => this.on_step(session, thread, location),
            _ => EventOutcome::Resume,
        }
    }
}
