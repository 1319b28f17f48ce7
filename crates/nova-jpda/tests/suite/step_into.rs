use std::sync::Arc;

use nova_config::SteppingConfig;
use nova_jdi::mock::location;
use nova_jdi::{ClassInfo, Location, MethodInfo, StepDepth};
use nova_jpda::{
    DebugSession, EventOutcome, Expression, MethodChooser, Operation, StepIntoActionProvider,
};
use parking_lot::Mutex;

use crate::harness::{FixedEditor, Fixture, MAIN};

fn step_into(fx: &Fixture) {
    StepIntoActionProvider::step_into(&fx.session, MAIN).unwrap();
}

fn did_step_through(session: &DebugSession) -> bool {
    session.step_into_next().did_step_through(MAIN)
}

fn caller() -> Vec<Location> {
    vec![location("app.Main", "run", 10, 0), location("app.Main", "main", 20, 4)]
}

fn called_from_run(top: Location) -> Vec<Location> {
    let mut frames = vec![top];
    frames.extend(caller());
    frames
}

#[test]
fn step_into_stops_in_the_called_method() {
    let fx = Fixture::new();
    step_into(&fx);

    let request = fx.step_request(MAIN);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);
    assert_eq!(request.spec.count_filter, None);
    assert_eq!(fx.vm.vm_resumes(), 1);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Calc", "compute", 3, 0)));
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
    assert!(!did_step_through(&fx.session));
    assert!(!fx.session.thread(MAIN).is_in_step());
}

#[test]
fn landing_back_on_the_start_line_keeps_the_step_into_request() {
    let fx = Fixture::new();
    step_into(&fx);
    let request = fx.step_request(MAIN).id;

    let outcome = fx.step_to(MAIN, vec![location("app.Main", "run", 10, 5), location("app.Main", "main", 20, 4)]);
    assert_eq!(outcome, EventOutcome::Resume);
    let again = fx.step_request(MAIN);
    assert_eq!(again.id, request);
    assert!(again.enabled);
    assert_eq!(fx.registered_steps(MAIN), vec![request]);
}

#[test]
fn recursive_call_on_the_same_line_is_a_new_frame() {
    let fx = Fixture::new();
    fx.vm.set_frames(
        MAIN,
        vec![location("app.Main", "fact", 5, 0), location("app.Main", "main", 20, 4)],
    );
    step_into(&fx);

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("app.Main", "fact", 5, 0),
            location("app.Main", "fact", 5, 9),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Stop);
}

#[test]
fn bridge_methods_are_stepped_through() {
    let fx = Fixture::new();
    step_into(&fx);

    let bridge = MethodInfo::new(31, "app.Impl", "compareTo", "(Ljava/lang/Object;)I").synthetic();
    let outcome = fx.step_to(MAIN, called_from_run(Location::new(bridge, 3, 0)));
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);
    assert!(did_step_through(&fx.session));

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("app.Impl", "compareTo", 7, 0),
            Location::new(
                MethodInfo::new(31, "app.Impl", "compareTo", "(Ljava/lang/Object;)I").synthetic(),
                3,
                4,
            ),
            location("app.Main", "run", 10, 0),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(did_step_through(&fx.session));
}

#[test]
fn filtered_constructors_are_stepped_out_of() {
    let fx = Fixture::with_stepping(SteppingConfig {
        filter_constructors: true,
        ..SteppingConfig::default()
    });
    step_into(&fx);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Point", "<init>", 4, 0)));
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);
    assert_eq!(fx.step_request(MAIN).spec.count_filter, Some(1));
    assert!(!did_step_through(&fx.session));

    // Back on the start line after the constructor returned: step into the
    // next call.
    let outcome = fx.step_to(MAIN, vec![location("app.Main", "run", 10, 8), location("app.Main", "main", 20, 4)]);
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Calc", "compute", 3, 0)));
    assert_eq!(outcome, EventOutcome::Stop);
}

#[test]
fn filtered_static_initializers_are_stepped_out_of() {
    let fx = Fixture::with_stepping(SteppingConfig {
        filter_static_initializers: true,
        ..SteppingConfig::default()
    });
    step_into(&fx);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Config", "<clinit>", 2, 0)));
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);
    assert_eq!(fx.step_request(MAIN).spec.count_filter, Some(1));
    assert!(!did_step_through(&fx.session));
}

#[test]
fn static_initializers_stop_unless_filtered() {
    let fx = Fixture::new();
    step_into(&fx);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Config", "<clinit>", 2, 0)));
    assert_eq!(outcome, EventOutcome::Stop);
}

#[test]
fn boxing_helpers_below_the_called_method_are_stepped_through() {
    let fx = Fixture::new();
    step_into(&fx);
    let request = fx.step_request(MAIN).id;

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("java.lang.Integer", "valueOf", 1, 0),
            location("app.Calc", "compute", 3, 2),
            location("app.Main", "run", 10, 0),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);
    assert_eq!(fx.step_request(MAIN).id, request);
    assert!(!did_step_through(&fx.session));

    // Still inside boxing code, now one frame up.
    let outcome = fx.step_to(
        MAIN,
        vec![
            location("java.lang.Integer", "intValue", 1, 0),
            location("app.Main", "run", 10, 3),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Calc", "compute", 4, 0)));
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(!did_step_through(&fx.session));
}

#[test]
fn boxing_helper_called_from_the_stepped_line_stops() {
    let fx = Fixture::new();
    step_into(&fx);

    let outcome = fx.step_to(MAIN, called_from_run(location("java.lang.Integer", "valueOf", 1, 0)));
    assert_eq!(outcome, EventOutcome::Stop);
}

#[test]
fn filtered_frames_between_start_and_landing_step_out() {
    let fx = Fixture::with_stepping(SteppingConfig {
        exclusion_patterns: vec!["com.lib.*".to_owned()],
        ..SteppingConfig::default()
    });
    step_into(&fx);

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("app.Callback", "call", 5, 0),
            location("com.lib.Runner", "run", 9, 3),
            location("app.Main", "run", 10, 0),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);
}

#[test]
fn stepping_through_filters_stops_below_filtered_frames() {
    let fx = Fixture::with_stepping(SteppingConfig {
        exclusion_patterns: vec!["com.lib.*".to_owned()],
        step_through_filters: true,
        ..SteppingConfig::default()
    });
    step_into(&fx);

    let outcome = fx.step_to(
        MAIN,
        vec![
            location("app.Callback", "call", 5, 0),
            location("com.lib.Runner", "run", 9, 3),
            location("app.Main", "run", 10, 0),
            location("app.Main", "main", 20, 4),
        ],
    );
    assert_eq!(outcome, EventOutcome::Stop);
}

struct PickByName {
    name: &'static str,
    offered: Mutex<Vec<String>>,
}

impl PickByName {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            offered: Mutex::new(Vec::new()),
        })
    }
}

impl MethodChooser for PickByName {
    fn choose(&self, candidates: &[Operation]) -> Option<Operation> {
        self.offered
            .lock()
            .extend(candidates.iter().map(|op| op.method_name.clone()));
        candidates.iter().find(|op| op.method_name == self.name).cloned()
    }
}

fn two_calls() -> Expression {
    Expression {
        first_line: 10,
        last_line: 10,
        operations: vec![
            Operation::new(2, "app.Calc", "compute", 10),
            Operation::new(6, "app.Log", "info", 10),
        ],
        conditionals: Vec::new(),
    }
}

fn load_main(fx: &Fixture) {
    fx.vm.load_class(ClassInfo {
        id: 1,
        name: "app.Main".to_owned(),
        methods: Vec::new(),
    });
    fx.vm
        .set_line_locations("app.Main", 10, vec![location("app.Main", "run", 10, 0)]);
}

#[test]
fn chosen_call_is_run_into() {
    let chooser = PickByName::new("info");
    let fx = Fixture::with(SteppingConfig::default(), {
        let chooser = chooser.clone();
        move |builder| builder.editor(FixedEditor::new(two_calls())).method_chooser(chooser)
    });
    load_main(&fx);
    step_into(&fx);

    assert_eq!(*chooser.offered.lock(), ["compute", "info"]);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);
    assert_eq!(fx.vm.vm_resumes(), 1);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Calc", "compute", 3, 0)));
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Out);

    let outcome = fx.step_to(MAIN, vec![location("app.Main", "run", 10, 6), location("app.Main", "main", 20, 4)]);
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Log", "info", 12, 0)));
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(fx.vm.step_requests_for(MAIN).is_empty());
}

#[test]
fn dismissing_the_chooser_does_nothing() {
    let chooser = PickByName::new("missing");
    let fx = Fixture::with(SteppingConfig::default(), {
        let chooser = chooser.clone();
        move |builder| builder.editor(FixedEditor::new(two_calls())).method_chooser(chooser)
    });
    load_main(&fx);
    step_into(&fx);

    assert_eq!(chooser.offered.lock().len(), 2);
    assert!(fx.vm.requests().is_empty());
    assert_eq!(fx.vm.vm_resumes(), 0);
}

#[test]
fn several_calls_without_a_chooser_step_into_plainly() {
    let fx = Fixture::with(SteppingConfig::default(), |builder| {
        builder.editor(FixedEditor::new(two_calls()))
    });
    step_into(&fx);

    assert_eq!(fx.step_depth(MAIN), StepDepth::Into);
    assert_eq!(fx.step_request(MAIN).spec.count_filter, None);
}

#[test]
fn single_call_is_run_into_directly() {
    let expression = Expression {
        first_line: 10,
        last_line: 10,
        operations: vec![Operation::new(2, "app.Calc", "compute", 10)],
        conditionals: Vec::new(),
    };
    let fx = Fixture::with(SteppingConfig::default(), |builder| {
        builder.editor(FixedEditor::new(expression))
    });
    load_main(&fx);
    step_into(&fx);

    let request = fx.step_request(MAIN);
    assert_eq!(request.spec.count_filter, Some(1));

    let outcome = fx.step_to(MAIN, called_from_run(location("app.Calc", "compute", 3, 0)));
    assert_eq!(outcome, EventOutcome::Stop);
}
