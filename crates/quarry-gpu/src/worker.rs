//! Dedicated worker thread for off-thread recording and baking.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::error;

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// Pending-job accounting shared with the worker.
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

/// A named thread consuming `FnOnce` jobs from a channel.
///
/// [`wait_idle`](Self::wait_idle) blocks until every submitted job has run.
/// Dropping the handle sends a shutdown sentinel and joins the thread.
pub struct WorkerThread {
    job_tx: Sender<Job>,
    pending: Arc<Pending>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Spawn a worker with the given thread name.
    #[must_use]
    pub fn spawn(name: &str) -> Self {
        let (job_tx, job_rx) = channel::unbounded::<Job>();
        let pending = Arc::new(Pending {
            count: Mutex::new(0),
            idle: Condvar::new(),
        });

        let worker_pending = Arc::clone(&pending);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match job_rx.recv() {
                    Ok(Job::Run(job)) => {
                        // A panicking job must still decrement the pending
                        // count, otherwise wait_idle callers hang forever.
                        if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("worker job panicked");
                        }
                        let mut count = worker_pending.count.lock();
                        *count -= 1;
                        if *count == 0 {
                            worker_pending.idle.notify_all();
                        }
                    }
                    Ok(Job::Shutdown) | Err(_) => return,
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn worker thread {name:?}: {e}"));

        Self {
            job_tx,
            pending,
            thread: Some(thread),
        }
    }

    /// Submit a job for execution.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        {
            let mut count = self.pending.count.lock();
            *count += 1;
        }
        // The worker only exits after a shutdown sentinel, which is only
        // sent from drop, so the send cannot fail while `self` is alive.
        let _ = self.job_tx.send(Job::Run(Box::new(job)));
    }

    /// Block until all submitted jobs have finished.
    pub fn wait_idle(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.idle.wait(&mut count);
        }
    }

    /// Number of jobs submitted but not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.count.lock()
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn jobs_run_in_submission_order() {
        let worker = WorkerThread::spawn("test-worker");
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let log = Arc::clone(&log);
            worker.execute(move || log.lock().push(i));
        }
        worker.wait_idle();

        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn wait_idle_observes_all_jobs() {
        let worker = WorkerThread::spawn("test-worker");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            worker.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        worker.wait_idle();

        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn panicking_job_does_not_wedge_the_worker() {
        let worker = WorkerThread::spawn("test-worker");
        let counter = Arc::new(AtomicUsize::new(0));

        worker.execute(|| panic!("job failure"));
        let after = Arc::clone(&counter);
        worker.execute(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });
        worker.wait_idle();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn drop_joins_after_outstanding_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let worker = WorkerThread::spawn("test-worker");
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                worker.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            worker.wait_idle();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
