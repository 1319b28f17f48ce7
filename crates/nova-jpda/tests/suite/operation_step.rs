use nova_config::SteppingConfig;
use nova_jdi::mock::location;
use nova_jdi::{RequestKind, StepDepth};
use nova_jpda::{ActionKind, ActionProvider, EventOutcome, Expression, Operation, StepActionProvider};

use crate::harness::{FixedEditor, Fixture, MAIN};

fn expression() -> Expression {
    // total = compute(x) + log.info(total); on line 10
    Expression {
        first_line: 10,
        last_line: 10,
        operations: vec![
            Operation::new(4, "app.Calc", "compute", 10),
            Operation::new(9, "app.Log", "info", 10),
        ],
        conditionals: Vec::new(),
    }
}

fn fixture() -> Fixture {
    Fixture::with(SteppingConfig::default(), |builder| {
        builder.editor(FixedEditor::new(expression()))
    })
}

fn step_operation(fx: &Fixture) {
    StepActionProvider
        .do_action(&fx.session, ActionKind::StepOperation)
        .unwrap();
}

/// Breakpoint request placed at `code_index`.
fn breakpoint_at(fx: &Fixture, code_index: u64) -> u32 {
    let found = fx
        .requests_of(|kind| {
            matches!(kind, RequestKind::Breakpoint { location } if location.code_index == code_index)
        })
        .into_iter()
        .next();
    match found {
        Some(request) => request.id,
        None => panic!("no breakpoint at bci {code_index}"),
    }
}

#[test]
fn operation_step_stops_at_the_next_call() {
    let fx = fixture();
    step_operation(&fx);

    let operations = fx.requests_of(|kind| matches!(kind, RequestKind::Breakpoint { .. }));
    assert_eq!(operations.len(), 2);
    assert!(operations
        .iter()
        .all(|request| request.spec.thread_filter == Some(MAIN)));
    assert_eq!(fx.step_depth(MAIN), StepDepth::Over);
    assert_eq!(fx.vm.vm_resumes(), 1);

    let hit = fx.vm.breakpoint_event(breakpoint_at(&fx, 4), MAIN).unwrap();
    assert_eq!(fx.session.dispatch(&hit), EventOutcome::Stop);

    let thread = fx.session.thread(MAIN);
    assert_eq!(
        thread.current_operation().map(|op| op.method_name),
        Some("compute".to_owned())
    );
    assert!(thread.last_operations().is_empty());
    assert!(fx.vm.requests().is_empty());
    assert!(!thread.is_in_step());
}

#[test]
fn next_operation_step_finishes_the_current_call() {
    let fx = fixture();
    step_operation(&fx);
    let hit = fx.vm.breakpoint_event(breakpoint_at(&fx, 4), MAIN).unwrap();
    fx.session.dispatch(&hit);

    step_operation(&fx);
    let operations = fx.requests_of(|kind| matches!(kind, RequestKind::Breakpoint { .. }));
    assert_eq!(operations.len(), 1);

    let hit = fx.vm.breakpoint_event(breakpoint_at(&fx, 9), MAIN).unwrap();
    assert_eq!(fx.session.dispatch(&hit), EventOutcome::Stop);
    let thread = fx.session.thread(MAIN);
    let finished: Vec<String> = thread
        .last_operations()
        .into_iter()
        .map(|op| op.method_name)
        .collect();
    assert_eq!(finished, ["compute"]);
    assert_eq!(
        thread.current_operation().map(|op| op.method_name),
        Some("info".to_owned())
    );
}

#[test]
fn boundary_inside_the_expression_keeps_waiting() {
    let fx = fixture();
    step_operation(&fx);

    let outcome = fx.step_to(
        MAIN,
        vec![location("app.Main", "run", 10, 2), location("app.Main", "main", 20, 4)],
    );
    assert_eq!(outcome, EventOutcome::Resume);
    assert_eq!(fx.step_depth(MAIN), StepDepth::Over);
    assert_eq!(
        fx.requests_of(|kind| matches!(kind, RequestKind::Breakpoint { .. }))
            .len(),
        2
    );
}

#[test]
fn leaving_the_expression_ends_the_operation_step() {
    let fx = fixture();
    step_operation(&fx);

    let outcome = fx.step_to(
        MAIN,
        vec![location("app.Main", "run", 11, 0), location("app.Main", "main", 20, 4)],
    );
    assert_eq!(outcome, EventOutcome::Stop);
    assert!(fx.vm.requests().is_empty());
    assert_eq!(fx.session.thread(MAIN).current_operation(), None);
}

#[test]
fn without_an_editor_operation_step_steps_over_the_line() {
    let fx = Fixture::new();
    step_operation(&fx);

    assert_eq!(fx.step_depth(MAIN), StepDepth::Over);
    assert!(fx
        .requests_of(|kind| matches!(kind, RequestKind::Breakpoint { .. }))
        .is_empty());
}
