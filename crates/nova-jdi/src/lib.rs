//! Java Debug Interface (JDI) façade for Nova's JPDA stepping engine.
//!
//! `nova-jpda` drives a live debuggee exclusively through the
//! [`VirtualMachine`] trait defined here: event request lifecycles, thread
//! suspension, stack introspection and line tables. The wire protocol itself
//! lives elsewhere; every call may fail with one of the disconnection-style
//! errors classified by [`JdiError::kind`].

#[cfg(any(test, feature = "test-support"))]
mod poison;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use std::{fmt, time::Duration};

use thiserror::Error;

pub type ThreadId = u64;
pub type ObjectId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type RequestId = u32;

/// Granularity of a JDI step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepSize {
    Min,
    Line,
}

impl StepSize {
    /// `StepRequest.STEP_MIN` / `StepRequest.STEP_LINE`.
    pub fn jdi_constant(self) -> i32 {
        match self {
            StepSize::Min => -1,
            StepSize::Line => -2,
        }
    }
}

/// How a step traverses call-stack levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepDepth {
    Into,
    Over,
    Out,
}

impl StepDepth {
    /// `StepRequest.STEP_INTO` / `STEP_OVER` / `STEP_OUT`.
    pub fn jdi_constant(self) -> i32 {
        match self {
            StepDepth::Into => 1,
            StepDepth::Over => 2,
            StepDepth::Out => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepDepth::Into => "into",
            StepDepth::Over => "over",
            StepDepth::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SuspendPolicy {
    None,
    EventThread,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    NotStarted,
    Running,
    Sleeping,
    Waiting,
    Zombie,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodInfo {
    pub id: MethodId,
    pub declaring_type: String,
    pub name: String,
    pub signature: String,
    pub is_synthetic: bool,
    pub is_static: bool,
    pub is_native: bool,
}

impl MethodInfo {
    pub fn new(
        id: MethodId,
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            id,
            declaring_type: declaring_type.into(),
            name: name.into(),
            signature: signature.into(),
            is_synthetic: false,
            is_static: false,
            is_native: false,
        }
    }

    pub fn synthetic(mut self) -> Self {
        self.is_synthetic = true;
        self
    }

    pub fn static_(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn native(mut self) -> Self {
        self.is_native = true;
        self
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }
}

/// A code position inside a loaded method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub method: MethodInfo,
    /// Source line, or `-1` when the method has no line table.
    pub line: i32,
    pub code_index: u64,
}

impl Location {
    pub fn new(method: MethodInfo, line: i32, code_index: u64) -> Self {
        Self {
            method,
            line,
            code_index,
        }
    }

    pub fn declaring_type(&self) -> &str {
        &self.method.declaring_type
    }

    pub fn method_name(&self) -> &str {
        &self.method.name
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}:{} (bci {})",
            self.method.declaring_type, self.method.name, self.line, self.code_index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub id: ReferenceTypeId,
    pub name: String,
    pub methods: Vec<MethodInfo>,
}

impl ClassInfo {
    pub fn methods_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodInfo> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Void,
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Object { id: ObjectId, runtime_type: String },
}

/// What a request asks the VM to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Step {
        thread: ThreadId,
        size: StepSize,
        depth: StepDepth,
    },
    Breakpoint {
        location: Location,
    },
    MethodExit {
        thread: Option<ThreadId>,
        class_filters: Vec<String>,
    },
    ClassPrepare {
        class_filter: String,
    },
}

/// Creation parameters of an event request. Requests are created disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub kind: RequestKind,
    pub suspend_policy: SuspendPolicy,
    pub count_filter: Option<u32>,
    pub thread_filter: Option<ThreadId>,
}

impl RequestSpec {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            suspend_policy: SuspendPolicy::All,
            count_filter: None,
            thread_filter: None,
        }
    }

    pub fn step(thread: ThreadId, size: StepSize, depth: StepDepth) -> Self {
        Self::new(RequestKind::Step {
            thread,
            size,
            depth,
        })
    }

    pub fn breakpoint(location: Location) -> Self {
        Self::new(RequestKind::Breakpoint { location })
    }

    pub fn class_prepare(class_filter: impl Into<String>) -> Self {
        Self::new(RequestKind::ClassPrepare {
            class_filter: class_filter.into(),
        })
    }

    pub fn method_exit(thread: Option<ThreadId>, class_filters: Vec<String>) -> Self {
        Self::new(RequestKind::MethodExit {
            thread,
            class_filters,
        })
    }

    pub fn with_suspend_policy(mut self, policy: SuspendPolicy) -> Self {
        self.suspend_policy = policy;
        self
    }

    pub fn with_count_filter(mut self, count: u32) -> Self {
        self.count_filter = Some(count);
        self
    }

    pub fn with_thread_filter(mut self, thread: ThreadId) -> Self {
        self.thread_filter = Some(thread);
        self
    }

    /// Thread the request is bound to, if any.
    pub fn thread(&self) -> Option<ThreadId> {
        match &self.kind {
            RequestKind::Step { thread, .. } => Some(*thread),
            RequestKind::MethodExit { thread, .. } => *thread,
            _ => self.thread_filter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Step {
        location: Location,
    },
    Breakpoint {
        location: Location,
    },
    MethodExit {
        location: Location,
        return_value: Option<Value>,
    },
    ClassPrepare {
        class_name: String,
    },
    ThreadDeath,
    VmDeath,
    VmDisconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Request that produced this event (`None` for VM lifecycle events).
    pub request: Option<RequestId>,
    pub thread: Option<ThreadId>,
    pub kind: EventKind,
}

impl Event {
    pub fn location(&self) -> Option<&Location> {
        match &self.kind {
            EventKind::Step { location }
            | EventKind::Breakpoint { location }
            | EventKind::MethodExit { location, .. } => Some(location),
            _ => None,
        }
    }

    pub fn is_vm_gone(&self) -> bool {
        matches!(self.kind, EventKind::VmDeath | EventKind::VmDisconnect)
    }
}

/// Events delivered together; the set's suspend policy says what the VM
/// suspended before delivering them.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSet {
    pub suspend_policy: SuspendPolicy,
    pub events: Vec<Event>,
}

impl EventSet {
    pub fn single(suspend_policy: SuspendPolicy, event: Event) -> Self {
        Self {
            suspend_policy,
            events: vec![event],
        }
    }

    pub fn thread(&self) -> Option<ThreadId> {
        self.events.iter().find_map(|e| e.thread)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The VM is gone (or failed internally); abandon everything silently.
    Disconnected,
    /// A mirrored object was garbage collected.
    Collected,
    /// The request or frame is no longer in a usable state.
    InvalidState,
    /// The thread died or is not suspended.
    ThreadDied,
    /// No line number table for the method.
    AbsentInformation,
    Other,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JdiError {
    #[error("target VM disconnected")]
    VmDisconnected,
    #[error("internal error in the target VM (code {0})")]
    Internal(u16),
    #[error("object {0} has been collected")]
    ObjectCollected(ObjectId),
    #[error("event request {0} is in an invalid state")]
    InvalidRequestState(RequestId),
    #[error("a step request already exists for thread {0}")]
    DuplicateStepRequest(ThreadId),
    #[error("thread {0} is not alive")]
    IllegalThreadState(ThreadId),
    #[error("thread {0} is not suspended")]
    IncompatibleThreadState(ThreadId),
    #[error("invalid stack frame")]
    InvalidStackFrame,
    #[error("no line number information for {0}")]
    AbsentInformation(String),
    #[error("class {0} is not prepared")]
    ClassNotPrepared(String),
    #[error("{0}")]
    Other(String),
}

impl JdiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JdiError::VmDisconnected | JdiError::Internal(_) => ErrorKind::Disconnected,
            JdiError::ObjectCollected(_) => ErrorKind::Collected,
            JdiError::InvalidRequestState(_)
            | JdiError::DuplicateStepRequest(_)
            | JdiError::InvalidStackFrame
            | JdiError::ClassNotPrepared(_) => ErrorKind::InvalidState,
            JdiError::IllegalThreadState(_) | JdiError::IncompatibleThreadState(_) => {
                ErrorKind::ThreadDied
            }
            JdiError::AbsentInformation(_) => ErrorKind::AbsentInformation,
            JdiError::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether the failure means "this step is gone": the caller unregisters
    /// what it created and gives up without surfacing an error.
    pub fn is_abandon(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Disconnected
                | ErrorKind::Collected
                | ErrorKind::InvalidState
                | ErrorKind::ThreadDied
        )
    }

    pub fn is_disconnect(&self) -> bool {
        self.kind() == ErrorKind::Disconnected
    }
}

pub type Result<T, E = JdiError> = std::result::Result<T, E>;

/// Synchronous handle to a debuggee VM.
///
/// All methods take `&self`: the handle is shared between the event
/// dispatcher thread and the action worker pool.
pub trait VirtualMachine: Send + Sync {
    fn can_get_method_return_values(&self) -> bool;

    fn thread_name(&self, thread: ThreadId) -> Result<String>;
    fn thread_status(&self, thread: ThreadId) -> Result<ThreadStatus>;
    fn is_suspended(&self, thread: ThreadId) -> Result<bool>;

    /// Stack frames of a suspended thread, innermost first.
    fn frames(&self, thread: ThreadId) -> Result<Vec<Location>>;

    fn frame_count(&self, thread: ThreadId) -> Result<usize> {
        Ok(self.frames(thread)?.len())
    }

    fn top_frame(&self, thread: ThreadId) -> Result<Location> {
        self.frames(thread)?
            .into_iter()
            .next()
            .ok_or(JdiError::InvalidStackFrame)
    }

    fn suspend_thread(&self, thread: ThreadId) -> Result<()>;
    fn resume_thread(&self, thread: ThreadId) -> Result<()>;
    fn suspend_all(&self) -> Result<()>;
    fn resume_all(&self) -> Result<()>;

    /// Pops `count` frames off a suspended thread's stack.
    fn pop_frames(&self, thread: ThreadId, count: usize) -> Result<()>;

    fn classes_by_name(&self, name: &str) -> Result<Vec<ClassInfo>>;

    /// Executable locations on `line` of a loaded class.
    fn locations_of_line(&self, class_name: &str, line: i32) -> Result<Vec<Location>>;

    fn create_request(&self, spec: RequestSpec) -> Result<RequestId>;
    /// Only valid while the request is disabled.
    fn add_class_exclusion(&self, request: RequestId, pattern: &str) -> Result<()>;
    fn enable_request(&self, request: RequestId) -> Result<()>;
    fn disable_request(&self, request: RequestId) -> Result<()>;
    fn delete_request(&self, request: RequestId) -> Result<()>;
    /// All step requests currently known to the VM with their threads.
    fn step_requests(&self) -> Result<Vec<(RequestId, ThreadId)>>;

    /// Waits up to `timeout` for the next event set.
    fn remove_event_set(&self, timeout: Duration) -> Result<Option<EventSet>>;

    /// Terminates the connection.
    fn dispose(&self) -> Result<()>;
}
