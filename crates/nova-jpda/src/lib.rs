//! Stepping engine of the Nova Java debugger.
//!
//! A [`DebugSession`] wraps one debuggee VM (through `nova_jdi`) and owns the
//! per-session context: the [`ActionsSynchronizer`] ordering user actions,
//! the smart-stepping [`SmartSteppingFilter`] and policies, the [`Operator`]
//! routing VM events to executors, and per-thread step state.
//!
//! User actions are exposed through [`ActionProvider`]s and run either
//! synchronously (`do_action`) or on the session's worker pool
//! ([`post_action`]). Step decisions are made on the event dispatcher thread
//! started by [`spawn_event_loop`].

mod action;
mod editor;
mod error;
mod filter;
mod operation_step;
mod operator;
mod pause;
mod policy;
mod provider;
mod requests;
mod run_into;
mod session;
mod start;
mod step;
mod step_into;
mod step_into_next;
mod synchronizer;
mod synthetic;
mod thread;

pub use action::ActionKind;
pub use editor::{Conditional, EditorContext, Expression, MethodChooser, Operation, TechnologyBridge};
pub use error::{DebugResult, DebuggerError};
pub use filter::{
    matches_pattern, stop_in_class, ExclusionFilter, FilterChange, SmartSteppingFilter,
    SmartSteppingFilterWrapper,
};
pub use operator::{spawn_event_loop, EventOutcome, Executor, Operator};
pub use pause::{PauseActionProvider, PopTopmostCallActionProvider};
pub use policy::{
    ClassFilterPolicy, CompoundSmartSteppingListener, PolicyContext, SourceAvailabilityPolicy,
    StepPolicy, StopOrStep,
};
pub use provider::{default_providers, post_action, provider_for, ActionProvider};
pub use requests::remove_step_requests;
pub use run_into::{RunIntoMethodActionSupport, RunIntoTarget};
pub use session::{
    DebugSession, DebugSessionBuilder, DebuggerState, HiddenBreakpoint, HiddenBreakpointKind,
    MessageSink,
};
pub use start::{Connector, KillActionProvider, StartActionProvider};
pub use step::StepActionProvider;
pub use step_into::StepIntoActionProvider;
pub use step_into_next::StepIntoNextMethod;
pub use synchronizer::{ActionGuard, ActionsSynchronizer};
pub use synthetic::{is_boxing_helper, synthetic_step, SyntheticStep};
pub use thread::JpdaThread;
