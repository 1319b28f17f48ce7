use std::sync::mpsc;
use std::time::Duration;

use crate::{panic_payload_to_str, TaskError};

/// Runs `f` on a helper thread and waits at most `budget` for it.
///
/// On overrun `DeadlineExceeded` is returned and `f` keeps running to
/// completion in the background, so it must publish its own result rather
/// than rely on the caller.
pub fn run_with_budget<T, F>(budget: Duration, f: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<T, TaskError>>();
    let spawned = std::thread::Builder::new()
        .name("nova-budgeted".to_owned())
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(
                |panic| {
                    tracing::error!(
                        target = "nova.scheduler",
                        panic = %panic_payload_to_str(&*panic),
                        "budgeted task panicked"
                    );
                    TaskError::Panicked
                },
            );
            let _ = tx.send(result);
        });
    if let Err(err) = spawned {
        tracing::warn!(
            target = "nova.scheduler",
            error = %err,
            "failed to spawn budgeted task thread"
        );
        return Err(TaskError::Panicked);
    }

    match rx.recv_timeout(budget) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(TaskError::DeadlineExceeded(budget)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(TaskError::Panicked),
    }
}
