//! Request lifecycle helpers keeping the VM request table and the operator's
//! registrations in lock step.

use std::sync::Arc;

use nova_jdi::{JdiError, RequestId, RequestSpec, ThreadId};

use crate::operator::Executor;
use crate::session::DebugSession;

/// Creates `spec`, applies `exclusions`, registers `executor` and enables the
/// request. Nothing stays behind when a step fails.
pub(crate) fn install(
    session: &DebugSession,
    spec: RequestSpec,
    exclusions: &[String],
    executor: Arc<dyn Executor>,
) -> Result<RequestId, JdiError> {
    let vm = session.vm();
    let request = vm.create_request(spec)?;
    for pattern in exclusions {
        if let Err(err) = vm.add_class_exclusion(request, pattern) {
            discard(session, request);
            return Err(err);
        }
    }
    session.operator().register(request, executor);
    if let Err(err) = vm.enable_request(request) {
        session.operator().unregister(request);
        discard(session, request);
        return Err(err);
    }
    Ok(request)
}

/// [`install`] for step requests: any step request the thread still has is
/// removed first, so at most one exists per thread.
pub(crate) fn install_step(
    session: &DebugSession,
    thread: ThreadId,
    spec: RequestSpec,
    exclusions: &[String],
    executor: Arc<dyn Executor>,
) -> Result<RequestId, JdiError> {
    remove_step_requests(session, thread)?;
    install(session, spec, exclusions, executor)
}

/// Unregisters and deletes `request`. Deleting a request the VM no longer
/// knows is not an error.
pub(crate) fn delete(session: &DebugSession, request: RequestId) -> Result<(), JdiError> {
    session.operator().unregister(request);
    session.vm().delete_request(request)
}

/// Best-effort [`delete`] for cleanup paths; failures are only logged.
pub(crate) fn discard(session: &DebugSession, request: RequestId) {
    session.operator().unregister(request);
    if let Err(err) = session.vm().delete_request(request) {
        tracing::debug!(target: "nova.jpda.step", request, error = %err, "failed to delete request");
    }
}

/// Removes every step request of `thread`, carrying on past failed deletes
/// and reporting the first one. Calling it again with nothing left to remove
/// is a no-op.
pub fn remove_step_requests(session: &DebugSession, thread: ThreadId) -> Result<(), JdiError> {
    let mut first_err = None;
    for (request, owner) in session.vm().step_requests()? {
        if owner != thread {
            continue;
        }
        tracing::trace!(target: "nova.jpda.step", request, thread, "removing step request");
        if let Err(err) = delete(session, request) {
            tracing::debug!(target: "nova.jpda.step", request, error = %err, "failed to delete step request");
            first_err.get_or_insert(err);
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
