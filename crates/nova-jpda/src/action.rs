use std::fmt;

/// User-visible debugger actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Continue,
    StepInto,
    StepOperation,
    StepOut,
    StepOver,
    RunToCursor,
    RunIntoMethod,
    ToggleBreakpoint,
    Fix,
    Pause,
    Start,
    PopTopmostCall,
    Kill,
}

const BREAKPOINT_EDITS: &[ActionKind] = &[ActionKind::ToggleBreakpoint, ActionKind::Fix];

impl ActionKind {
    pub const ALL: [ActionKind; 13] = [
        ActionKind::Continue,
        ActionKind::StepInto,
        ActionKind::StepOperation,
        ActionKind::StepOut,
        ActionKind::StepOver,
        ActionKind::RunToCursor,
        ActionKind::RunIntoMethod,
        ActionKind::ToggleBreakpoint,
        ActionKind::Fix,
        ActionKind::Pause,
        ActionKind::Start,
        ActionKind::PopTopmostCall,
        ActionKind::Kill,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Continue => "continue",
            ActionKind::StepInto => "stepInto",
            ActionKind::StepOperation => "stepOperation",
            ActionKind::StepOut => "stepOut",
            ActionKind::StepOver => "stepOver",
            ActionKind::RunToCursor => "runToCursor",
            ActionKind::RunIntoMethod => "runIntoMethod",
            ActionKind::ToggleBreakpoint => "toggleBreakpoint",
            ActionKind::Fix => "fix",
            ActionKind::Pause => "pause",
            ActionKind::Start => "start",
            ActionKind::PopTopmostCall => "popTopmostCall",
            ActionKind::Kill => "kill",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }

    /// Actions that must be neither scheduled nor running when `self` starts.
    pub fn waits_for(self) -> &'static [ActionKind] {
        if self.resumes() {
            BREAKPOINT_EDITS
        } else {
            &[]
        }
    }

    /// Whether the action lets the debuggee run.
    pub fn resumes(self) -> bool {
        matches!(
            self,
            ActionKind::Continue
                | ActionKind::StepInto
                | ActionKind::StepOperation
                | ActionKind::StepOut
                | ActionKind::StepOver
                | ActionKind::RunToCursor
                | ActionKind::RunIntoMethod
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
