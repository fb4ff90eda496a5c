use crate::cache_dir::CacheDir;
use crate::error::CacheError;
use crate::gc::GarbageCollector;
use crate::index::CacheIndex;
use crate::util::LOG_TARGET;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Dedicated background thread running cleanup passes.
///
/// Submissions are fire-and-forget. At most one pass per cache directory is queued: a new
/// request for a directory that is already waiting replaces the older snapshot. The worker
/// exits once every handle is dropped and the queue is drained.
#[derive(Clone, Debug)]
pub struct CleanupExecutor {
    handle: Arc<Handle>,
}

#[derive(Debug)]
struct Handle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    wake: Condvar,
    idle: Condvar,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<CleanupJob>,
    running: bool,
    shutdown: bool,
}

#[derive(Debug)]
struct CleanupJob {
    dir: CacheDir,
    snapshot: CacheIndex,
}

impl CleanupExecutor {
    pub fn new() -> Result<Self, CacheError> {
        let inner = Arc::new(Inner {
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });

        let for_thread = inner.clone();
        std::thread::Builder::new()
            .name("ltoffice-cache-cleanup".to_string())
            .spawn(move || worker_loop(for_thread))?;

        Ok(Self {
            handle: Arc::new(Handle { inner }),
        })
    }

    /// Queues a cleanup pass of `dir` against `snapshot`.
    pub fn submit(&self, dir: CacheDir, snapshot: CacheIndex) {
        let inner = &self.handle.inner;
        let mut state = lock_state(inner);
        if let Some(pending) = state.queue.iter_mut().find(|job| job.dir == dir) {
            pending.snapshot = snapshot;
            return;
        }
        state.queue.push_back(CleanupJob { dir, snapshot });
        inner.wake.notify_all();
    }

    /// Blocks until no pass is queued or running, or `timeout` elapses. Returns true if the
    /// executor went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let inner = &self.handle.inner;
        let deadline = Instant::now() + timeout;
        let mut state = lock_state(inner);
        while state.running || !state.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = inner
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        true
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let mut state = lock_state(&self.inner);
        state.shutdown = true;
        self.inner.wake.notify_all();
    }
}

fn lock_state(inner: &Inner) -> MutexGuard<'_, State> {
    inner
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let job = {
            let mut state = lock_state(&inner);
            while state.queue.is_empty() && !state.shutdown {
                state = inner
                    .wake
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            let Some(job) = state.queue.pop_front() else {
                // Shut down with nothing left to do.
                return;
            };
            state.running = true;
            job
        };

        run_job(&job);

        let mut state = lock_state(&inner);
        state.running = false;
        if state.queue.is_empty() {
            inner.idle.notify_all();
        }
    }
}

fn run_job(job: &CleanupJob) {
    let collector = GarbageCollector::new(job.dir.clone());
    match catch_unwind(AssertUnwindSafe(|| collector.collect(&job.snapshot))) {
        Ok(Ok(_report)) => {}
        Ok(Err(err)) => {
            tracing::warn!(
                target: LOG_TARGET,
                dir = %job.dir.root().display(),
                error = %err,
                "cache cleanup failed"
            );
        }
        Err(_) => {
            tracing::error!(
                target: LOG_TARGET,
                dir = %job.dir.root().display(),
                "cache cleanup panicked"
            );
        }
    }
}
