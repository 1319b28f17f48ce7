use nova_jdi::{JdiError, ThreadId};
use nova_scheduler::TaskError;
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebuggerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DebuggerError {
    #[error("jdi: {0}")]
    Jdi(#[from] JdiError),
    #[error("thread {0} did not suspend")]
    NotSuspended(ThreadId),
    #[error("no current thread")]
    NoCurrentThread,
    #[error("action {0} is not enabled")]
    ActionDisabled(&'static str),
    #[error("no line number information for {0}")]
    AbsentInformation(String),
    #[error("debugger session has finished")]
    SessionFinished,
    #[error("failed to start debugger: {0}")]
    Start(String),
    #[error("action task: {0}")]
    Task(#[from] TaskError),
}
