use std::sync::Arc;

use rayon::ThreadPool;
use tokio::sync::oneshot;

use crate::{panic_payload_to_str, task::BlockingTask, CancellationToken, Cancelled, TaskError};

enum BlockingPool {
    Rayon(ThreadPool),
    Inline,
}

impl BlockingPool {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            BlockingPool::Rayon(pool) => pool.spawn(job),
            BlockingPool::Inline => job(),
        }
    }
}

fn build_rayon_pool(prefix: &'static str, threads: usize) -> BlockingPool {
    // Thread creation can fail under low RLIMIT_NPROC; degrade instead of crashing.
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return BlockingPool::Rayon(pool),
            Err(_) if threads > 1 => {
                threads = (threads / 2).max(1);
            }
            Err(err) => {
                tracing::warn!(
                    target = "nova.scheduler",
                    error = %err,
                    "failed to start action workers; running actions inline"
                );
                return BlockingPool::Inline;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_threads: usize,
    pub thread_name_prefix: &'static str,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name_prefix: "nova-jpda-actions",
        }
    }
}

/// Bounded pool running debugger actions off the caller's thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    pool: BlockingPool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pool: build_rayon_pool(config.thread_name_prefix, config.worker_threads),
            }),
        }
    }

    /// A scheduler that runs every job on the submitting thread.
    pub fn inline() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pool: BlockingPool::Inline,
            }),
        }
    }

    pub fn spawn_blocking<T, F>(&self, token: CancellationToken, f: F) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if token.is_cancelled() {
            let _ = tx.send(Err(TaskError::Cancelled));
            return BlockingTask::new(token, rx);
        }

        let token_for_job = token.clone();
        let job = move || {
            let result =
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(token_for_job))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::from(err)),
                    Err(panic) => {
                        let message = panic_payload_to_str(&*panic);
                        tracing::error!(
                            target = "nova.scheduler",
                            panic = %message,
                            "action panicked"
                        );
                        Err(TaskError::Panicked)
                    }
                };
            let _ = tx.send(result);
        };

        self.inner.pool.spawn(job);
        BlockingTask::new(token, rx)
    }

    pub fn spawn<T, F>(&self, f: F) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        self.spawn_blocking(CancellationToken::new(), f)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
