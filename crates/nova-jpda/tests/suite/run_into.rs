use std::sync::Arc;
use std::time::Duration;

use nova_config::SteppingConfig;
use nova_jdi::mock::location;
use nova_jdi::{ClassInfo, MethodInfo, RequestKind, StepDepth, ThreadId};
use nova_jpda::{
    EventOutcome, HiddenBreakpointKind, RunIntoMethodActionSupport, RunIntoTarget,
    TechnologyBridge,
};
use parking_lot::Mutex;

use crate::harness::{Fixture, Messages, MAIN};

const WORKER: ThreadId = 2;

fn class(name: &str, methods: Vec<MethodInfo>) -> ClassInfo {
    ClassInfo {
        id: 7,
        name: name.to_owned(),
        methods,
    }
}

fn breakpoints(fx: &Fixture) -> Vec<u32> {
    fx.requests_of(|kind| matches!(kind, RequestKind::Breakpoint { .. }))
        .into_iter()
        .map(|request| request.id)
        .collect()
}

#[test]
fn unloaded_class_is_waited_for_once() {
    let fx = Fixture::new();
    RunIntoMethodActionSupport::run_into_method(
        &fx.session,
        MAIN,
        RunIntoTarget::new("app.Late", 7, "compute"),
    )
    .unwrap();

    let hidden = fx.session.hidden_breakpoints();
    assert_eq!(hidden.len(), 1);
    assert_eq!(
        hidden[0].kind,
        HiddenBreakpointKind::ClassLoad {
            class_name: "app.Late".to_owned()
        }
    );
    let prepares = fx.requests_of(|kind| matches!(kind, RequestKind::ClassPrepare { .. }));
    assert_eq!(prepares.len(), 1);
    assert_eq!(prepares[0].spec.suspend_policy, nova_jdi::SuspendPolicy::None);
    assert_eq!(fx.vm.vm_resumes(), 1);

    fx.vm
        .set_line_locations("app.Late", 7, vec![location("app.Late", "go", 7, 0)]);
    let loaded = fx
        .vm
        .class_prepare_event(MAIN, class("app.Late", Vec::new()))
        .unwrap();
    assert_eq!(fx.session.dispatch(&loaded), EventOutcome::Resume);

    assert!(fx
        .requests_of(|kind| matches!(kind, RequestKind::ClassPrepare { .. }))
        .is_empty());
    let hidden = fx.session.hidden_breakpoints();
    assert_eq!(hidden.len(), 1);
    assert_eq!(
        hidden[0].kind,
        HiddenBreakpointKind::Line {
            class_name: "app.Late".to_owned(),
            line: 7
        }
    );
    let line_breakpoints = breakpoints(&fx);
    assert_eq!(line_breakpoints.len(), 1);

    // A late duplicate of the class-prepare event changes nothing.
    assert_eq!(fx.session.dispatch(&loaded), EventOutcome::Resume);
    assert_eq!(breakpoints(&fx), line_breakpoints);

    let hit = fx.vm.breakpoint_event(line_breakpoints[0], MAIN).unwrap();
    assert_eq!(fx.session.dispatch(&hit), EventOutcome::Resume);
    assert!(fx.session.hidden_breakpoints().is_empty());
    assert!(breakpoints(&fx).is_empty());
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("app.Calc", "compute", 3, 0),
            location("app.Late", "go", 7, 0),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
}

#[test]
fn class_load_resubmission_waits_for_the_step_lock() {
    let fx = Fixture::new();
    RunIntoMethodActionSupport::run_into_method(
        &fx.session,
        MAIN,
        RunIntoTarget::new("app.Late", 7, "compute"),
    )
    .unwrap();
    fx.vm
        .set_line_locations("app.Late", 7, vec![location("app.Late", "go", 7, 0)]);
    let loaded = fx
        .vm
        .class_prepare_event(MAIN, class("app.Late", Vec::new()))
        .unwrap();

    let jt = fx.session.thread(MAIN);
    let guard = fx.session.step_lock(&jt).write();
    let session = fx.session.clone();
    let dispatcher = std::thread::spawn(move || session.dispatch(&loaded));

    std::thread::sleep(Duration::from_millis(50));
    assert!(!dispatcher.is_finished());
    assert!(breakpoints(&fx).is_empty());

    drop(guard);
    assert_eq!(dispatcher.join().unwrap(), EventOutcome::Resume);
    assert_eq!(breakpoints(&fx).len(), 1);
}

#[test]
fn class_without_line_numbers_shows_a_message() {
    let messages = Arc::new(Messages::default());
    let fx = Fixture::with(SteppingConfig::default(), |builder| {
        builder.message_sink(messages.sink())
    });
    fx.vm.load_class(class("app.NoLines", Vec::new()));
    fx.vm.set_absent_information("app.NoLines");

    RunIntoMethodActionSupport::run_into_method(
        &fx.session,
        MAIN,
        RunIntoTarget::new("app.NoLines", 3, "run"),
    )
    .unwrap();

    assert_eq!(messages.all(), ["No line number information for app.NoLines"]);
    assert!(fx.vm.requests().is_empty());
    assert_eq!(fx.vm.vm_resumes(), 0);
}

fn at_call_site() -> Fixture {
    let fx = Fixture::new();
    fx.vm.load_class(class("app.Main", Vec::new()));
    fx.vm
        .set_line_locations("app.Main", 10, vec![location("app.Main", "run", 10, 0)]);
    fx
}

#[test]
fn leaving_the_call_site_without_the_call_stops() {
    let fx = at_call_site();
    RunIntoMethodActionSupport::run_into_method(
        &fx.session,
        MAIN,
        RunIntoTarget::new("app.Main", 10, "missing"),
    )
    .unwrap();
    assert!(breakpoints(&fx).is_empty());
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);
    assert!(fx.session.thread(MAIN).is_in_step());

    let outcome = fx.step_to(
        MAIN,
        vec![location("app.Main", "run", 11, 14), location("app.Main", "main", 20, 4)],
    );
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert!(!fx.session.thread(MAIN).is_in_step());
}

#[test]
fn multi_line_expression_keeps_tracing() {
    let fx = at_call_site();
    RunIntoMethodActionSupport::run_into_method(
        &fx.session,
        MAIN,
        RunIntoTarget::new("app.Main", 10, "format").with_expression_lines(10, 12),
    )
    .unwrap();

    let outcome = fx.step_to(
        MAIN,
        vec![location("app.Main", "run", 12, 3), location("app.Main", "main", 20, 4)],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("app.Text", "format", 40, 0),
            location("app.Main", "run", 12, 3),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Stop);
}

#[derive(Default)]
struct AcceptingBridge {
    offered: Mutex<Vec<(ThreadId, String, String)>>,
}

impl TechnologyBridge for AcceptingBridge {
    fn suggest_switch(&self, thread: ThreadId, class_name: &str, method_name: &str) -> bool {
        self.offered
            .lock()
            .push((thread, class_name.to_owned(), method_name.to_owned()));
        true
    }
}

#[test]
fn native_target_is_handed_to_the_technology_bridge() {
    let bridge = Arc::new(AcceptingBridge::default());
    let fx = Fixture::with(SteppingConfig::default(), {
        let bridge = bridge.clone();
        move |builder| builder.technology_bridge(bridge)
    });
    let native = MethodInfo::new(9, "app.Main", "checksum", "([B)J").native();
    fx.vm.load_class(class("app.Main", vec![native]));
    fx.vm
        .set_line_locations("app.Main", 10, vec![location("app.Main", "run", 10, 0)]);

    RunIntoMethodActionSupport::run_into_method(
        &fx.session,
        MAIN,
        RunIntoTarget::new("app.Main", 10, "checksum"),
    )
    .unwrap();

    assert_eq!(
        *bridge.offered.lock(),
        [(MAIN, "app.Main".to_owned(), "checksum".to_owned())]
    );
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert_eq!(fx.vm.vm_resumes(), 0);
}

#[test]
fn first_thread_at_the_call_site_is_traced() {
    let fx = Fixture::new();
    fx.vm.load_class(class("app.Main", Vec::new()));
    fx.vm
        .set_line_locations("app.Main", 10, vec![location("app.Main", "run", 10, 0)]);
    fx.vm.set_frames(
        MAIN,
        vec![location("app.Main", "run", 30, 0), location("app.Main", "main", 20, 4)],
    );
    fx.vm.add_thread(WORKER, "worker");
    fx.vm.set_frames(
        WORKER,
        vec![location("app.Main", "run", 8, 0), location("app.Worker", "loop", 3, 2)],
    );

    RunIntoMethodActionSupport::run_into_method(
        &fx.session,
        MAIN,
        RunIntoTarget::new("app.Main", 10, "compute"),
    )
    .unwrap();
    let line_breakpoints = breakpoints(&fx);
    assert_eq!(line_breakpoints.len(), 1);

    let hit = fx.vm.breakpoint_event(line_breakpoints[0], WORKER).unwrap();
    assert_eq!(fx.session.dispatch(&hit), EventOutcome::Resume);
    assert_eq!(fx.vm.step_requests_for(WORKER).len(), 1);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert!(breakpoints(&fx).is_empty());
}
