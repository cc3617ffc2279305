//! Strictly serial FIFO job queue.
//!
//! [`JobQueue`] runs at most one job at a time, in submission order. A
//! runner task is spawned on the first enqueue after the queue went idle
//! and exits once the queue is drained, firing the idle callback exactly
//! once for that busy-to-idle transition.
//!
//! If new work arrives between the drain and the notification, the stale
//! notification is dropped and the newer runner reports idleness instead.
//! The callback still runs outside the queue lock, so listeners that act
//! later should re-check [`JobQueue::is_idle`].
//!
//! The handle is cheap to clone; all clones share the same queue.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;

/// Error type a job closure may fail with. Only logged by the queue.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), JobError>> + Send>;

/// Callback invoked when the queue becomes idle.
pub type IdleCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct State {
    pending: VecDeque<Job>,
    /// A job is currently executing.
    busy: bool,
    /// A runner task exists and will drain `pending`.
    runner_active: bool,
    /// Bumped every time a runner drains the queue.
    idle_epoch: u64,
}

struct Shared {
    state: Mutex<State>,
    on_idle: Mutex<Option<IdleCallback>>,
}

impl Shared {
    /// Nothing was enqueued since the drain that produced `epoch`.
    fn still_idle(&self, epoch: u64) -> bool {
        let state = lock(&self.state);
        state.idle_epoch == epoch && !state.runner_active
    }
}

#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                on_idle: Mutex::new(None),
            }),
        }
    }

    /// Register the idle callback, replacing any previous one.
    pub fn on_idle<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.shared.on_idle) = Some(Arc::new(callback));
    }

    /// Append a job and return its 1-indexed position in line, counting
    /// the job currently running (if any).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<F, Fut>(&self, job: F) -> usize
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let (position, spawn_runner) = {
            let mut state = lock(&self.shared.state);
            state.pending.push_back(Box::new(move || job().boxed()));
            let position = state.pending.len() + usize::from(state.busy);
            let spawn_runner = !state.runner_active;
            state.runner_active = true;
            (position, spawn_runner)
        };

        tracing::debug!(position, "Job enqueued");

        if spawn_runner {
            tokio::spawn(run(Arc::clone(&self.shared)));
        }
        position
    }

    /// No job running and nothing pending.
    pub fn is_idle(&self) -> bool {
        let state = lock(&self.shared.state);
        !state.busy && state.pending.is_empty()
    }

    /// Jobs waiting or running.
    pub fn len(&self) -> usize {
        let state = lock(&self.shared.state);
        state.pending.len() + usize::from(state.busy)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain the queue one job at a time.
async fn run(shared: Arc<Shared>) {
    let epoch = loop {
        let job = {
            let mut state = lock(&shared.state);
            match state.pending.pop_front() {
                Some(job) => {
                    state.busy = true;
                    job
                }
                None => {
                    state.busy = false;
                    state.runner_active = false;
                    state.idle_epoch += 1;
                    break state.idle_epoch;
                }
            }
        };

        match AssertUnwindSafe(async move { job().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Queued job failed"),
            Err(panic) => tracing::error!(
                panic = panic_message(panic.as_ref()),
                "Queued job panicked",
            ),
        }
    };

    if !shared.still_idle(epoch) {
        tracing::debug!("Job queue busy again, skipping idle notification");
        return;
    }
    let callback = lock(&shared.on_idle).clone();
    if let Some(callback) = callback {
        tracing::debug!("Job queue idle");
        callback();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Lock ignoring poisoning; no job code ever runs under these locks.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
