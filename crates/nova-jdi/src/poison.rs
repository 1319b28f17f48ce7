use std::panic::Location;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

fn report_poison(context: &'static str, loc: &Location<'static>) {
    tracing::error!(
        target = "nova.jdi",
        context,
        file = loc.file(),
        line = loc.line(),
        "mock VM state lock poisoned by a panicking test thread; recovering"
    );
}

/// Locks `mutex`, recovering the guard if a previous holder panicked.
#[track_caller]
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|err| {
        report_poison(context, Location::caller());
        err.into_inner()
    })
}

/// `Condvar::wait_timeout` with the same poison recovery as [`lock`].
#[track_caller]
pub(crate) fn wait_timeout<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    context: &'static str,
) -> MutexGuard<'a, T> {
    match condvar.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(err) => {
            report_poison(context, Location::caller());
            err.into_inner().0
        }
    }
}
