use std::sync::Arc;
use std::time::Duration;

use nova_config::SteppingConfig;
use nova_jdi::mock::{location, MockOp, MockVm};
use nova_jdi::{
    ClassInfo, EventSet, JdiError, Location, MethodInfo, RequestId, RequestKind, RequestSpec,
    StepDepth, StepSize, ThreadId, ThreadStatus, Value, VirtualMachine,
};
use nova_jpda::{
    remove_step_requests, DebugSession, DebuggerError, DebuggerState, EventOutcome,
    ExclusionFilter, Expression, Operation, StepActionProvider,
};

use crate::harness::{FixedEditor, Fixture, MAIN};

fn step_over(fx: &Fixture) {
    StepActionProvider::run_action(&fx.session, MAIN, StepDepth::Over, StepSize::Line).unwrap();
}

#[test]
fn step_over_stops_on_the_next_line() {
    let fx = Fixture::new();
    step_over(&fx);

    let request = fx.step_request(MAIN);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Over);
    assert_eq!(request.spec.count_filter, Some(1));
    assert_eq!(request.class_exclusions, vec!["java.lang.ClassLoader", "sun.*"]);
    assert_eq!(fx.vm.vm_resumes(), 1);
    assert_eq!(fx.session.state(), DebuggerState::Running);
    assert!(fx.session.thread(MAIN).is_in_step());

    let outcome = fx.step_to(
        MAIN,
        vec![location("app.Main", "run", 11, 6), location("app.Main", "main", 20, 4)],
    );
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert!(fx.session.operator().registered().is_empty());
    assert_eq!(fx.session.state(), DebuggerState::Stopped);
    assert_eq!(fx.session.current_thread(), Some(MAIN));
    assert!(!fx.session.thread(MAIN).is_in_step());
}

#[test]
fn a_new_step_replaces_the_previous_one() {
    let fx = Fixture::new();
    step_over(&fx);
    let first = fx.step_request(MAIN).id;

    fx.vm.set_suspended(MAIN, true);
    StepActionProvider::run_action(&fx.session, MAIN, StepDepth::Out, StepSize::Line).unwrap();

    let second = fx.step_request(MAIN);
    assert_ne!(second.id, first);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);
    assert!(!fx.session.operator().is_registered(first));
    assert_eq!(fx.registered_steps(MAIN), vec![second.id]);
}

#[test]
fn removing_step_requests_twice_is_a_no_op() {
    let fx = Fixture::new();
    step_over(&fx);

    remove_step_requests(&fx.session, MAIN).unwrap();
    remove_step_requests(&fx.session, MAIN).unwrap();
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert!(fx.session.operator().registered().is_empty());
}

/// Reports one extra step request for `MAIN` that can no longer be deleted,
/// ahead of the real ones.
struct UndeletableStep {
    vm: Arc<MockVm>,
    stale: RequestId,
}

impl VirtualMachine for UndeletableStep {
    fn can_get_method_return_values(&self) -> bool {
        self.vm.can_get_method_return_values()
    }

    fn thread_name(&self, thread: ThreadId) -> nova_jdi::Result<String> {
        self.vm.thread_name(thread)
    }

    fn thread_status(&self, thread: ThreadId) -> nova_jdi::Result<ThreadStatus> {
        self.vm.thread_status(thread)
    }

    fn is_suspended(&self, thread: ThreadId) -> nova_jdi::Result<bool> {
        self.vm.is_suspended(thread)
    }

    fn frames(&self, thread: ThreadId) -> nova_jdi::Result<Vec<Location>> {
        self.vm.frames(thread)
    }

    fn suspend_thread(&self, thread: ThreadId) -> nova_jdi::Result<()> {
        self.vm.suspend_thread(thread)
    }

    fn resume_thread(&self, thread: ThreadId) -> nova_jdi::Result<()> {
        self.vm.resume_thread(thread)
    }

    fn suspend_all(&self) -> nova_jdi::Result<()> {
        self.vm.suspend_all()
    }

    fn resume_all(&self) -> nova_jdi::Result<()> {
        self.vm.resume_all()
    }

    fn pop_frames(&self, thread: ThreadId, count: usize) -> nova_jdi::Result<()> {
        self.vm.pop_frames(thread, count)
    }

    fn classes_by_name(&self, name: &str) -> nova_jdi::Result<Vec<ClassInfo>> {
        self.vm.classes_by_name(name)
    }

    fn locations_of_line(&self, class_name: &str, line: i32) -> nova_jdi::Result<Vec<Location>> {
        self.vm.locations_of_line(class_name, line)
    }

    fn create_request(&self, spec: RequestSpec) -> nova_jdi::Result<RequestId> {
        self.vm.create_request(spec)
    }

    fn add_class_exclusion(&self, request: RequestId, pattern: &str) -> nova_jdi::Result<()> {
        self.vm.add_class_exclusion(request, pattern)
    }

    fn enable_request(&self, request: RequestId) -> nova_jdi::Result<()> {
        self.vm.enable_request(request)
    }

    fn disable_request(&self, request: RequestId) -> nova_jdi::Result<()> {
        self.vm.disable_request(request)
    }

    fn delete_request(&self, request: RequestId) -> nova_jdi::Result<()> {
        if request == self.stale {
            return Err(JdiError::InvalidRequestState(request));
        }
        self.vm.delete_request(request)
    }

    fn step_requests(&self) -> nova_jdi::Result<Vec<(RequestId, ThreadId)>> {
        let mut requests = vec![(self.stale, MAIN)];
        requests.extend(self.vm.step_requests()?);
        Ok(requests)
    }

    fn remove_event_set(&self, timeout: Duration) -> nova_jdi::Result<Option<EventSet>> {
        self.vm.remove_event_set(timeout)
    }

    fn dispose(&self) -> nova_jdi::Result<()> {
        self.vm.dispose()
    }
}

#[test]
fn removing_step_requests_continues_past_a_failed_delete() {
    let fx = Fixture::new();
    step_over(&fx);
    let real = fx.step_request(MAIN).id;

    let session = DebugSession::builder(Arc::new(UndeletableStep {
        vm: fx.vm.clone(),
        stale: 999,
    }))
    .build();
    let err = remove_step_requests(&session, MAIN).unwrap_err();
    assert_eq!(err, JdiError::InvalidRequestState(999));
    assert!(fx.vm.request(real).is_none());
}

#[test]
fn excluded_class_is_stepped_out_of() {
    let fx = Fixture::with_stepping(SteppingConfig {
        exclusion_patterns: vec!["com.lib.*".to_owned()],
        ..SteppingConfig::default()
    });
    step_over(&fx);
    let first = fx.step_request(MAIN);
    assert_eq!(
        first.class_exclusions,
        vec!["java.lang.ClassLoader", "sun.*", "com.lib.*"]
    );

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("com.lib.Util", "helper", 3, 0),
            location("app.Main", "run", 10, 2),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);
    assert!(!fx.session.operator().is_registered(first.id));
    assert_eq!(fx.registered_steps(MAIN).len(), 1);

    let outcome = fx.step_to(
        MAIN,
        vec![location("app.Main", "run", 11, 5), location("app.Main", "main", 20, 4)],
    );
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
}

#[test]
fn classes_without_source_are_excluded_for_the_rest_of_the_step() {
    let editor = Arc::new(FixedEditor {
        expression: None,
        no_source: vec!["lib.Opaque".to_owned()],
    });
    let fx = Fixture::with(SteppingConfig::default(), |builder| builder.editor(editor));
    step_over(&fx);

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("lib.Opaque", "work", 40, 0),
            location("app.Main", "run", 10, 2),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);
    assert!(fx
        .step_request(MAIN)
        .class_exclusions
        .contains(&"lib.Opaque".to_owned()));
    assert!(fx.session.filter().exclusion_patterns().is_empty());
}

#[test]
fn lambda_proxy_frames_are_stepped_through() {
    let fx = Fixture::new();
    step_over(&fx);
    let first = fx.step_request(MAIN).id;

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("app.Main$$Lambda$14/0x0000000800c03000", "run", -1, 0),
            location("app.Main", "run", 10, 3),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    let request = fx.step_request(MAIN);
    assert_ne!(request.id, first);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Over);
}

#[test]
fn stepping_off_the_end_of_main_lets_the_thread_finish() {
    let fx = Fixture::new();
    fx.vm.set_frames(MAIN, vec![location("app.Main", "main", 20, 4)]);
    step_over(&fx);

    let outcome = fx.step_to(MAIN, vec![location("java.lang.Thread", "exit", -1, 0)]);
    assert_eq!(outcome, EventOutcome::Resume);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert_eq!(fx.vm.vm_resumes(), 2);
    assert_eq!(fx.session.state(), DebuggerState::Running);
}

#[test]
fn step_event_for_a_resumed_thread_is_ignored() {
    let fx = Fixture::new();
    step_over(&fx);

    let set = fx.step_event(MAIN);
    fx.vm.set_suspended(MAIN, false);
    let outcome = fx.session.dispatch(&set);

    assert_eq!(outcome, EventOutcome::Ignore);
    assert_eq!(fx.vm.vm_resumes(), 1);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert_eq!(fx.session.state(), DebuggerState::Running);
}

#[test]
fn dead_thread_abandons_the_step_silently() {
    let fx = Fixture::new();
    fx.vm
        .fail_next(MockOp::EnableRequest, JdiError::IllegalThreadState(MAIN));

    step_over(&fx);
    assert!(fx.vm.requests().is_empty());
    assert!(fx.session.operator().registered().is_empty());
    assert_eq!(fx.vm.vm_resumes(), 0);
    assert!(!fx.session.thread(MAIN).is_in_step());
}

#[test]
fn disconnect_while_stepping_finishes_the_session() {
    let fx = Fixture::new();
    fx.vm.fail_next(MockOp::CreateRequest, JdiError::VmDisconnected);

    step_over(&fx);
    assert!(fx.session.is_finished());
    assert_eq!(fx.session.state(), DebuggerState::Disconnected);
    assert!(fx.vm.requests().is_empty());
}

fn excluding_com_lib() -> Fixture {
    Fixture::with_stepping(SteppingConfig {
        exclusion_patterns: vec!["com.lib.*".to_owned()],
        ..SteppingConfig::default()
    })
}

/// Step event for `MAIN` landing in the excluded `com.lib.Util`.
fn landed_in_excluded_class(fx: &Fixture) -> EventSet {
    fx.vm.set_frames(
        MAIN,
        vec![
            location("com.lib.Util", "helper", 3, 0),
            location("app.Main", "run", 10, 2),
            location("app.Main", "main", 20, 4),
        ],
    );
    fx.step_event(MAIN)
}

#[test]
fn disconnect_while_stepping_on_finishes_the_session() {
    let fx = excluding_com_lib();
    step_over(&fx);
    let set = landed_in_excluded_class(&fx);
    fx.vm.fail_next(MockOp::CreateRequest, JdiError::VmDisconnected);

    assert_eq!(fx.session.dispatch(&set), EventOutcome::Ignore);
    assert!(fx.session.is_finished());
    assert_eq!(fx.session.state(), DebuggerState::Disconnected);
    assert_eq!(fx.session.current_thread(), None);
}

#[test]
fn thread_dying_while_stepping_on_ends_the_step_quietly() {
    let fx = excluding_com_lib();
    step_over(&fx);
    let set = landed_in_excluded_class(&fx);
    fx.vm
        .fail_next(MockOp::EnableRequest, JdiError::IllegalThreadState(MAIN));

    assert_eq!(fx.session.dispatch(&set), EventOutcome::Ignore);
    assert!(!fx.session.is_finished());
    assert_eq!(fx.session.state(), DebuggerState::Running);
    assert!(fx.vm.requests().is_empty());
    assert!(fx.session.operator().registered().is_empty());
    assert!(!fx.session.thread(MAIN).is_in_step());
    assert_eq!(fx.vm.vm_resumes(), 1);
}

#[test]
fn disconnect_while_waiting_for_suspension_finishes_the_session() {
    let fx = Fixture::new();
    fx.vm.fail_next(MockOp::IsSuspended, JdiError::VmDisconnected);

    StepActionProvider::run_action(&fx.session, MAIN, StepDepth::Over, StepSize::Line).unwrap();
    assert!(fx.session.is_finished());
    assert_eq!(fx.session.state(), DebuggerState::Disconnected);
    assert!(fx.vm.requests().is_empty());
}

#[test]
fn thread_dying_while_waiting_for_suspension_abandons_the_step() {
    let fx = Fixture::new();
    fx.vm
        .fail_next(MockOp::IsSuspended, JdiError::IllegalThreadState(MAIN));

    StepActionProvider::run_action(&fx.session, MAIN, StepDepth::Over, StepSize::Line).unwrap();
    assert!(!fx.session.is_finished());
    assert!(fx.vm.requests().is_empty());
    assert_eq!(fx.vm.vm_resumes(), 0);
}

#[test]
fn step_needs_a_suspended_thread() {
    let fx = Fixture::new();
    fx.vm.set_suspended(MAIN, false);

    let err = StepActionProvider::run_action(&fx.session, MAIN, StepDepth::Over, StepSize::Line)
        .unwrap_err();
    assert_eq!(err, DebuggerError::NotSuspended(MAIN));
    assert!(fx.vm.requests().is_empty());
}

#[test]
fn step_out_records_the_return_value() {
    let fx = Fixture::new();
    fx.vm.set_can_get_method_return_values(true);
    StepActionProvider::run_action(&fx.session, MAIN, StepDepth::Out, StepSize::Line).unwrap();

    let exits = fx.requests_of(|kind| matches!(kind, RequestKind::MethodExit { .. }));
    assert_eq!(exits.len(), 1);
    assert_eq!(
        exits[0].spec.kind,
        RequestKind::MethodExit {
            thread: Some(MAIN),
            class_filters: vec!["app.Main".to_owned()],
        }
    );

    let set = fx.vm.method_exit_event(MAIN, Value::Int(42)).unwrap();
    assert_eq!(fx.session.dispatch(&set), EventOutcome::Resume);
    assert_eq!(fx.vm.thread_resumes(MAIN), 1);
    assert!(fx
        .requests_of(|kind| matches!(kind, RequestKind::MethodExit { .. }))
        .is_empty());

    let outcome = fx.step_to(MAIN, vec![location("app.Main", "main", 20, 7)]);
    assert_eq!(outcome, EventOutcome::Stop);
    assert_eq!(fx.session.thread(MAIN).return_value(), Some(Value::Int(42)));
}

#[test]
fn step_out_of_a_constructor_does_not_track_return_values() {
    let fx = Fixture::new();
    fx.vm.set_can_get_method_return_values(true);
    let ctor = MethodInfo::new(77, "app.Point", "<init>", "(II)V");
    fx.vm.set_frames(
        MAIN,
        vec![
            nova_jdi::Location::new(ctor, 4, 0),
            location("app.Main", "main", 20, 4),
        ],
    );
    StepActionProvider::run_action(&fx.session, MAIN, StepDepth::Out, StepSize::Line).unwrap();

    assert!(fx
        .requests_of(|kind| matches!(kind, RequestKind::MethodExit { .. }))
        .is_empty());
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);
}

#[test]
fn stopping_records_the_operations_that_ran() {
    let editor = FixedEditor::new(Expression {
        first_line: 10,
        last_line: 10,
        operations: vec![
            Operation::new(3, "app.Point", "<init>", 10),
            Operation::new(9, "app.Main", "draw", 10),
            Operation::new(15, "app.Main", "flush", 10),
        ],
        conditionals: Vec::new(),
    });
    let fx = Fixture::with(SteppingConfig::default(), |builder| builder.editor(editor));
    step_over(&fx);

    let outcome = fx.step_to(
        MAIN,
        vec![location("app.Main", "run", 11, 12), location("app.Main", "main", 20, 4)],
    );
    assert_eq!(outcome, EventOutcome::Stop);
    let names: Vec<String> = fx
        .session
        .thread(MAIN)
        .last_operations()
        .into_iter()
        .map(|op| op.method_name)
        .collect();
    assert_eq!(names, ["<init>", "draw"]);
}
