//! Two-queue asynchronous pipeline loader.
//!
//! Pipeline creation splits into a cheap *init* stage (descriptor layout and
//! state preparation) and an expensive *bake* stage (the driver-side
//! compile). The loader runs both on one worker thread but always drains the
//! init queue first, so cheap preparation is never starved behind slow
//! bakes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{GpuError, Result};

/// Handle to a queued pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

type InitFn<P> = Box<dyn FnOnce() -> Result<BakeFn<P>> + Send>;
type BakeFn<P> = Box<dyn FnOnce() -> Result<P> + Send>;

struct LoaderState<P> {
    init_queue: VecDeque<(JobId, InitFn<P>)>,
    bake_queue: VecDeque<(JobId, BakeFn<P>)>,
    results: HashMap<JobId, Result<P>>,
    /// Jobs currently executing on the worker (0 or 1).
    in_flight: usize,
    shutdown: bool,
}

struct LoaderShared<P> {
    state: Mutex<LoaderState<P>>,
    cond: Condvar,
}

/// Asynchronous two-stage loader, generic over the produced pipeline type.
///
/// Results (or the errors of failed stages) are stored until taken by id.
/// Dropping the loader shuts the worker down; jobs not yet started are
/// discarded.
pub struct PipelineLoader<P: Send + 'static> {
    shared: Arc<LoaderShared<P>>,
    next_id: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl<P: Send + 'static> PipelineLoader<P> {
    /// Spawn the loader worker with the given thread name.
    #[must_use]
    pub fn spawn(thread_name: &str) -> Self {
        let shared = Arc::new(LoaderShared {
            state: Mutex::new(LoaderState {
                init_queue: VecDeque::new(),
                bake_queue: VecDeque::new(),
                results: HashMap::new(),
                in_flight: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || Self::worker_loop(&worker_shared))
            .unwrap_or_else(|e| panic!("failed to spawn loader thread {thread_name:?}: {e}"));

        Self {
            shared,
            next_id: AtomicU64::new(0),
            thread: Some(thread),
        }
    }

    fn worker_loop(shared: &LoaderShared<P>) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                return;
            }

            // Init work always preempts bake work.
            if let Some((id, init)) = state.init_queue.pop_front() {
                state.in_flight += 1;
                drop(state);

                let outcome = init();

                state = shared.state.lock();
                state.in_flight -= 1;
                match outcome {
                    Ok(bake) => state.bake_queue.push_back((id, bake)),
                    Err(err) => {
                        state.results.insert(id, Err(err));
                    }
                }
                shared.cond.notify_all();
            } else if let Some((id, bake)) = state.bake_queue.pop_front() {
                state.in_flight += 1;
                drop(state);

                let outcome = bake();

                state = shared.state.lock();
                state.in_flight -= 1;
                state.results.insert(id, outcome);
                shared.cond.notify_all();
            } else {
                shared.cond.wait(&mut state);
            }
        }
    }

    /// Queue a pipeline job.
    ///
    /// `init` runs first and returns the bake closure that performs the
    /// expensive creation.
    pub fn queue<I, K>(&self, init: I) -> JobId
    where
        I: FnOnce() -> Result<K> + Send + 'static,
        K: FnOnce() -> Result<P> + Send + 'static,
    {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let init: InitFn<P> = Box::new(move || init().map(|bake| Box::new(bake) as BakeFn<P>));

        let mut state = self.shared.state.lock();
        state.init_queue.push_back((id, init));
        drop(state);
        self.shared.cond.notify_all();
        id
    }

    /// Take the result for `id` if it is ready.
    pub fn try_take(&self, id: JobId) -> Option<Result<P>> {
        self.shared.state.lock().results.remove(&id)
    }

    /// Block until the result for `id` is ready and take it.
    pub fn wait(&self, id: JobId) -> Result<P> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = state.results.remove(&id) {
                return result;
            }
            if state.shutdown {
                return Err(GpuError::PipelineLoad(format!(
                    "loader shut down before job {id:?} completed"
                )));
            }
            self.shared.cond.wait(&mut state);
        }
    }

    /// Block until both queues are empty and every result is stored.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock();
        while !state.init_queue.is_empty() || !state.bake_queue.is_empty() || state.in_flight > 0 {
            self.shared.cond.wait(&mut state);
        }
    }

    /// Number of jobs queued or executing but not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.init_queue.len() + state.bake_queue.len() + state.in_flight
    }

    /// Number of finished results awaiting pickup.
    #[must_use]
    pub fn ready(&self) -> usize {
        self.shared.state.lock().results.len()
    }
}

impl<P: Send + 'static> Drop for PipelineLoader<P> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
