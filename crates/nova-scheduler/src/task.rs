use tokio::sync::oneshot;

use crate::{CancellationToken, TaskError};

/// Handle to a job running on the [`Scheduler`](crate::Scheduler) pool.
pub struct BlockingTask<T> {
    token: CancellationToken,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> BlockingTask<T> {
    pub(crate) fn new(
        token: CancellationToken,
        rx: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self { token, rx }
    }

    /// A task that has already finished with `result`.
    pub fn ready(result: Result<T, TaskError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(CancellationToken::new(), rx)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn join(self) -> Result<T, TaskError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TaskError::Cancelled),
            result = self.rx => match result {
                Ok(result) => result,
                Err(_) => Err(TaskError::Panicked),
            }
        }
    }

    /// Blocks the calling thread until the job finishes.
    ///
    /// Must not be called from within an async runtime. Cancelling the token
    /// does not interrupt the wait; the job decides when to observe it.
    pub fn join_blocking(self) -> Result<T, TaskError> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(TaskError::Panicked),
        }
    }
}
