//! The step-into state machine shared by every thread of a session.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use nova_jdi::{Event, JdiError, Location, RequestId, RequestSpec, StepDepth, StepSize, ThreadId};
use parking_lot::Mutex;

use crate::filter::{stop_in_class, ExclusionFilter, SmartSteppingFilterWrapper};
use crate::operator::{EventOutcome, Executor};
use crate::policy::{PolicyContext, StopOrStep};
use crate::requests;
use crate::session::DebugSession;
use crate::step::{resubmit_failed, step_exclusions, StepDecision, StepStart};
use crate::synthetic::{is_boxing_helper, synthetic_step};
use crate::thread::JpdaThread;

struct NextMethodState {
    start: StepStart,
    size: StepSize,
    /// Long-lived STEP_INTO request, re-filtered and re-enabled between
    /// iterations.
    step_into_request: Option<(RequestId, StepSize)>,
    /// Current STEP_OVER / STEP_OUT request.
    other_request: Option<RequestId>,
    applied_patterns: Vec<String>,
    did_step_through: bool,
    was_in_boxing: bool,
    wrapper: Arc<SmartSteppingFilterWrapper>,
}

pub struct StepIntoNextMethod {
    me: Weak<StepIntoNextMethod>,
    threads: Mutex<HashMap<ThreadId, NextMethodState>>,
}

impl StepIntoNextMethod {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| StepIntoNextMethod {
            me: me.clone(),
            threads: Mutex::new(HashMap::new()),
        })
    }

    /// Whether the last step into on `thread` stepped through filtered or
    /// synthetic code to get where it is.
    pub fn did_step_through(&self, thread: ThreadId) -> bool {
        self.threads
            .lock()
            .get(&thread)
            .is_some_and(|state| state.did_step_through)
    }

    /// Starts stepping into from the current position of `jt`. Caller holds
    /// the step lock of `jt`.
    pub(crate) fn start_locked(
        &self,
        session: &DebugSession,
        jt: &JpdaThread,
        size: StepSize,
    ) -> Result<(), JdiError> {
        let thread = jt.id();
        let start = StepStart::capture(session, thread)?;
        let delegate: Arc<dyn ExclusionFilter> = session.filter().clone();
        let state = NextMethodState {
            start,
            size,
            step_into_request: None,
            other_request: None,
            applied_patterns: Vec::new(),
            did_step_through: false,
            was_in_boxing: false,
            wrapper: Arc::new(SmartSteppingFilterWrapper::new(delegate)),
        };
        if let Some(previous) = self.threads.lock().insert(thread, state) {
            release(session, previous);
        }
        jt.clear_last_operations();
        jt.set_return_value(None);
        self.set_step_request(session, thread, StepDepth::Into, size)?;
        jt.set_in_step(true);
        tracing::debug!(target: "nova.jpda.step_into", thread, ?size, "step into submitted");
        Ok(())
    }

    fn set_step_request(
        &self,
        session: &DebugSession,
        thread: ThreadId,
        depth: StepDepth,
        size: StepSize,
    ) -> Result<(), JdiError> {
        let Some(me) = self.me.upgrade() else {
            return Err(JdiError::Other("step-into state dropped".to_owned()));
        };
        let options = session.options();
        let mut threads = self.threads.lock();
        let Some(state) = threads.get_mut(&thread) else {
            return Err(JdiError::Other(format!("no step into in progress on thread {thread}")));
        };
        let patterns = step_exclusions(&options, &*state.wrapper);
        if let Some(other) = state.other_request.take() {
            requests::delete(session, other)?;
        }

        if depth != StepDepth::Into {
            if let Some((request, _)) = state.step_into_request.take() {
                state.applied_patterns.clear();
                requests::delete(session, request)?;
            }
            let spec = RequestSpec::step(thread, size, depth)
                .with_suspend_policy(session.suspend_policy())
                .with_count_filter(1);
            state.other_request = Some(requests::install_step(session, thread, spec, &patterns, me)?);
            return Ok(());
        }

        if let Some((request, request_size)) = state.step_into_request.take() {
            if request_size == size && session.operator().is_registered(request) {
                match refilter(session, request, &patterns, &mut state.applied_patterns) {
                    Ok(()) => {
                        state.step_into_request = Some((request, size));
                        return Ok(());
                    }
                    Err(err) if err.is_disconnect() => return Err(err),
                    Err(err) => {
                        tracing::debug!(
                            target: "nova.jpda.step_into",
                            request,
                            error = %err,
                            "recreating step into request"
                        );
                    }
                }
            }
            requests::discard(session, request);
            state.applied_patterns.clear();
        }
        let spec = RequestSpec::step(thread, size, StepDepth::Into)
            .with_suspend_policy(session.suspend_policy());
        let request = requests::install_step(session, thread, spec, &patterns, me)?;
        state.step_into_request = Some((request, size));
        state.applied_patterns = patterns;
        Ok(())
    }

    fn decide(
        &self,
        session: &DebugSession,
        thread: ThreadId,
        location: &Location,
    ) -> Result<StepDecision, JdiError> {
        let vm = session.vm();
        if !vm.is_suspended(thread)? {
            return Ok(StepDecision::Abandon);
        }
        let options = session.options();
        let frames = vm.frames(thread)?;
        let depth = frames.len();

        let (start, size, wrapper) = {
            let mut threads = self.threads.lock();
            let Some(state) = threads.get_mut(&thread) else {
                return Ok(StepDecision::Abandon);
            };
            let state_size = state.size;
            let step = |depth| StepDecision::Step {
                size: state_size,
                depth,
                synthetic: false,
            };

            if options.use_step_filters
                && !options.step_through_filters
                && depth > state.start.depth + 1
            {
                let filtered = frames[1..depth - state.start.depth]
                    .iter()
                    .find(|frame| state.wrapper.is_excluded(frame.declaring_type()));
                if let Some(frame) = filtered {
                    tracing::debug!(
                        target: "nova.jpda.step_into",
                        thread,
                        filtered = frame.declaring_type(),
                        "filtered class on the stack; stepping out"
                    );
                    return Ok(step(StepDepth::Out));
                }
            }

            if options.use_step_filters {
                if options.filter_synthetic_methods {
                    if let Some(synthetic) = synthetic_step(location) {
                        let depth = synthetic.depth_or(StepDepth::Into);
                        state.did_step_through = depth == StepDepth::Into;
                        return Ok(StepDecision::Step {
                            size: state.size,
                            depth,
                            synthetic: true,
                        });
                    }
                }
                let method = &location.method;
                if (options.filter_static_initializers && method.is_static_initializer())
                    || (options.filter_constructors && method.is_constructor())
                {
                    state.did_step_through = false;
                    return Ok(step(StepDepth::Out));
                }
                if is_boxing_helper(location) && (depth > state.start.depth + 1 || state.was_in_boxing) {
                    state.was_in_boxing = true;
                    return Ok(step(StepDepth::Into));
                }
                state.was_in_boxing = false;
            }
            (state.start.clone(), state.size, state.wrapper.clone())
        };

        let answer = if options.use_step_filters
            && !stop_in_class(location.declaring_type(), &*wrapper)
        {
            StopOrStep::skip()
        } else {
            let ctx = PolicyContext {
                thread,
                location,
                options: &options,
                editor: session.editor().map(|editor| &**editor),
            };
            session.policies().stop_at(&ctx, &*wrapper)
        };

        Ok(match answer {
            StopOrStep::Stop if start.is_at(location, depth) => {
                tracing::debug!(target: "nova.jpda.step_into", thread, %location, "back at start; stepping into again");
                StepDecision::StepInto { size }
            }
            StopOrStep::Stop => StepDecision::Stop,
            StopOrStep::Skip {
                size: skip_size,
                depth: skip_depth,
            } => {
                let depth = skip_depth.unwrap_or(StepDepth::Out);
                if depth == StepDepth::Into {
                    if let Some(state) = self.threads.lock().get_mut(&thread) {
                        state.did_step_through = true;
                    }
                }
                StepDecision::Step {
                    size: skip_size.unwrap_or(size),
                    depth,
                    synthetic: false,
                }
            }
        })
    }

    fn apply(
        &self,
        session: &DebugSession,
        jt: &JpdaThread,
        decision: StepDecision,
    ) -> EventOutcome {
        let thread = jt.id();
        let (depth, size) = match decision {
            StepDecision::Stop => {
                self.finish(session, jt);
                return EventOutcome::Stop;
            }
            StepDecision::Abandon => {
                self.finish(session, jt);
                return EventOutcome::Ignore;
            }
            StepDecision::RunFree => {
                self.finish(session, jt);
                return EventOutcome::Resume;
            }
            StepDecision::Step { size, depth, .. } => (depth, size),
            StepDecision::StepInto { size } => (StepDepth::Into, size),
        };
        let submitted = {
            let _guard = session.step_lock(jt).write();
            self.set_step_request(session, thread, depth, size)
        };
        match submitted {
            Ok(()) => EventOutcome::Resume,
            Err(err) => {
                tracing::debug!(target: "nova.jpda.step_into", thread, error = %err, "step into abandoned");
                self.finish(session, jt);
                resubmit_failed(session, &err)
            }
        }
    }

    /// Drops the thread's requests; `did_step_through` stays queryable.
    fn finish(&self, session: &DebugSession, jt: &JpdaThread) {
        let requests = self.threads.lock().get_mut(&jt.id()).map(|state| {
            state.applied_patterns.clear();
            (
                state.step_into_request.take().map(|(request, _)| request),
                state.other_request.take(),
            )
        });
        if let Some((into, other)) = requests {
            for request in into.into_iter().chain(other) {
                requests::discard(session, request);
            }
        }
        jt.set_in_step(false);
    }
}

fn release(session: &DebugSession, state: NextMethodState) {
    if let Some((request, _)) = state.step_into_request {
        requests::discard(session, request);
    }
    if let Some(request) = state.other_request {
        requests::discard(session, request);
    }
}

/// Disables `request`, adds the patterns it does not have yet and enables it
/// again.
fn refilter(
    session: &DebugSession,
    request: RequestId,
    patterns: &[String],
    applied: &mut Vec<String>,
) -> Result<(), JdiError> {
    let vm = session.vm();
    vm.disable_request(request)?;
    for pattern in patterns {
        if !applied.contains(pattern) {
            vm.add_class_exclusion(request, pattern)?;
            applied.push(pattern.clone());
        }
    }
    vm.enable_request(request)
}

impl Executor for StepIntoNextMethod {
    fn exec(&self, session: &DebugSession, event: &Event) -> EventOutcome {
        let (Some(thread), Some(location)) = (event.thread, event.location()) else {
            return EventOutcome::Resume;
        };
        let jt = session.thread(thread);
        let decision = {
            let _guard = session.step_lock(&jt).read();
            match self.decide(session, thread, location) {
                Ok(decision) => decision,
                Err(err) if err.is_abandon() => {
                    tracing::debug!(target: "nova.jpda.step_into", thread, error = %err, "thread gone");
                    StepDecision::Abandon
                }
                Err(err) => {
                    tracing::warn!(target: "nova.jpda.step_into", thread, error = %err, "step into decision failed");
                    StepDecision::Stop
                }
            }
        };
        tracing::debug!(target: "nova.jpda.step_into", thread, ?decision, %location, "step into event");
        self.apply(session, &jt, decision)
    }
}
