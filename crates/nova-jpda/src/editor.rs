//! Source-level knowledge the stepping engine borrows from the editor.

use std::ops::Range;

use nova_jdi::{Location, Value};

/// A method invocation inside an expression, in bytecode order.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Bytecode index of the invoke instruction.
    pub bytecode_index: u64,
    pub method_name: String,
    /// Declaring type of the invoked method.
    pub method_class: String,
    pub line: i32,
    pub return_value: Option<Value>,
}

impl Operation {
    pub fn new(
        bytecode_index: u64,
        method_class: impl Into<String>,
        method_name: impl Into<String>,
        line: i32,
    ) -> Self {
        Self {
            bytecode_index,
            method_name: method_name.into(),
            method_class: method_class.into(),
            line,
            return_value: None,
        }
    }
}

/// A `?:` (or `if`) whose arms cover disjoint bytecode ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional {
    pub arms: Vec<Range<u64>>,
}

impl Conditional {
    fn arm_of(&self, bytecode_index: u64) -> Option<usize> {
        self.arms.iter().position(|arm| arm.contains(&bytecode_index))
    }
}

/// The statement-level expression around a code position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub first_line: i32,
    pub last_line: i32,
    pub operations: Vec<Operation>,
    pub conditionals: Vec<Conditional>,
}

impl Expression {
    pub fn contains_line(&self, line: i32) -> bool {
        (self.first_line..=self.last_line).contains(&line)
    }

    /// Operations control flow can still reach from `pc`: not yet executed,
    /// and not in a different arm of a conditional `pc` is inside of.
    pub fn reachable_operations(&self, pc: u64) -> Vec<&Operation> {
        self.operations
            .iter()
            .filter(|op| op.bytecode_index >= pc)
            .filter(|op| {
                self.conditionals.iter().all(|cond| match cond.arm_of(pc) {
                    Some(arm) => match cond.arm_of(op.bytecode_index) {
                        Some(op_arm) => op_arm == arm,
                        None => true,
                    },
                    None => true,
                })
            })
            .collect()
    }

    pub fn last_operation_before(&self, pc: u64) -> Option<&Operation> {
        self.operations
            .iter()
            .filter(|op| op.bytecode_index < pc)
            .max_by_key(|op| op.bytecode_index)
    }
}

/// Editor collaborator. Implementations may parse sources, so callers on the
/// event dispatcher bound how long they wait for answers.
pub trait EditorContext: Send + Sync {
    fn has_source(&self, class_name: &str) -> bool;

    fn expression(&self, location: &Location) -> Option<Expression>;
}

/// Lets the user pick one of several calls on the current line.
pub trait MethodChooser: Send + Sync {
    fn choose(&self, candidates: &[Operation]) -> Option<Operation>;
}

/// Hand-off to a different debugging technology, e.g. a native debugger for
/// `native` methods.
pub trait TechnologyBridge: Send + Sync {
    /// Returns `true` if the user accepted the switch.
    fn suggest_switch(&self, thread: nova_jdi::ThreadId, class_name: &str, method_name: &str)
        -> bool;
}
