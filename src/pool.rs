//! Bounded worker pool driving producers onto renderer lines.

use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, error, info};

use crate::renderer::Renderer;

/// Something that performs one job and reports human-readable progress.
///
/// Each call to `report` replaces the text shown on the job's line. Whatever
/// was reported last when `produce` returns stays in the terminal's
/// scrollback. Failures are reported as text too; the pool never sees them.
pub trait Producer: Send + Sync {
    fn produce(&self, input: &Path, report: &dyn Fn(&str));
}

impl<F> Producer for F
where
    F: Fn(&Path, &dyn Fn(&str)) + Send + Sync,
{
    fn produce(&self, input: &Path, report: &dyn Fn(&str)) {
        self(input, report)
    }
}

/// Outcome of a finished pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    /// Jobs that ran to completion (successful or not, as far as the pool knows).
    pub completed: usize,
    /// Jobs whose producer panicked. Their lines are still closed.
    pub panicked: usize,
}

#[derive(Default)]
struct Tracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
}

#[derive(Default)]
struct TrackerState {
    outstanding: usize,
    report: PoolReport,
}

impl Tracker {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self) {
        self.lock().outstanding += 1;
    }

    fn finish(&self, panicked: bool) {
        let mut state = self.lock();
        state.outstanding -= 1;
        if panicked {
            state.report.panicked += 1;
        } else {
            state.report.completed += 1;
        }
        if state.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) -> PoolReport {
        let mut state = self.lock();
        while state.outstanding > 0 {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.report
    }
}

/// Marks a job finished when dropped, including during a panic unwind.
struct JobGuard(Arc<Tracker>);

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.0.finish(thread::panicking());
    }
}

/// Runs at most `workers` jobs at a time, each on its own renderer line.
pub struct WorkerPool {
    workers: usize,
    renderer: Arc<Renderer>,
    producer: Arc<dyn Producer>,
    queue: VecDeque<PathBuf>,
    tracker: Arc<Tracker>,
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Create a pool. A worker count of zero is treated as one.
    pub fn new(workers: usize, renderer: Arc<Renderer>, producer: Arc<dyn Producer>) -> Self {
        Self {
            workers: workers.max(1),
            renderer,
            producer,
            queue: VecDeque::new(),
            tracker: Arc::new(Tracker::default()),
            pool: None,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a job. Once the pool is running the job is dispatched immediately.
    pub fn submit(&mut self, job: impl Into<PathBuf>) {
        let job = job.into();
        match &self.pool {
            Some(pool) => self.dispatch(pool, job),
            None => self.queue.push_back(job),
        }
    }

    /// Jobs submitted but not yet handed to a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Start the workers and hand them every queued job.
    ///
    /// Failing to create the worker threads is fatal.
    pub fn run(&mut self) -> Result<()> {
        if self.pool.is_some() {
            bail!("worker pool is already running");
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("webify-worker-{i}"))
            .panic_handler(|payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %msg, "job panicked");
            })
            .build()
            .with_context(|| format!("spawning {} worker threads", self.workers))?;

        info!(workers = self.workers, jobs = self.queue.len(), "starting worker pool");
        while let Some(job) = self.queue.pop_front() {
            self.dispatch(&pool, job);
        }
        self.pool = Some(pool);
        Ok(())
    }

    /// Wait for every dispatched job to finish and shut the workers down.
    ///
    /// There is no timeout: a producer that never returns keeps this blocked.
    pub fn join(self) -> Result<PoolReport> {
        let Some(pool) = self.pool else {
            bail!("worker pool was never started");
        };
        let report = self.tracker.wait_idle();
        drop(pool);
        info!(
            completed = report.completed,
            panicked = report.panicked,
            "worker pool finished"
        );
        Ok(report)
    }

    fn dispatch(&self, pool: &rayon::ThreadPool, job: PathBuf) {
        self.tracker.enqueue();
        let guard = JobGuard(Arc::clone(&self.tracker));
        let renderer = Arc::clone(&self.renderer);
        let producer = Arc::clone(&self.producer);
        debug!(job = %job.display(), "dispatching job");
        pool.spawn(move || {
            let _guard = guard;
            execute(&renderer, producer.as_ref(), &job);
        });
    }
}

fn execute(renderer: &Arc<Renderer>, producer: &dyn Producer, input: &Path) {
    debug!(job = %input.display(), "job started");
    let line = renderer.acquire_line("");
    producer.produce(input, &|text| line.update(text));
    line.close();
    debug!(job = %input.display(), "job finished");
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("pending", &self.queue.len())
            .field("running", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn quiet_renderer() -> Arc<Renderer> {
        Renderer::new("", Box::new(io::sink()))
    }

    #[test]
    fn test_zero_workers_becomes_one() {
        let pool = WorkerPool::new(0, quiet_renderer(), Arc::new(|_: &Path, _: &dyn Fn(&str)| {}));
        assert_eq!(pool.workers(), 1);
    }

    #[test]
    fn test_join_before_run_is_an_error() {
        let pool = WorkerPool::new(2, quiet_renderer(), Arc::new(|_: &Path, _: &dyn Fn(&str)| {}));
        assert!(pool.join().is_err());
    }

    #[test]
    fn test_run_twice_is_an_error() {
        let mut pool = WorkerPool::new(2, quiet_renderer(), Arc::new(|_: &Path, _: &dyn Fn(&str)| {}));
        pool.run().unwrap();
        assert!(pool.run().is_err());
        assert_eq!(pool.join().unwrap(), PoolReport::default());
    }

    #[test]
    fn test_all_submitted_jobs_complete() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let producer = move |_: &Path, report: &dyn Fn(&str)| {
            counter.fetch_add(1, Ordering::SeqCst);
            report("done");
        };
        let renderer = quiet_renderer();
        let mut pool = WorkerPool::new(3, Arc::clone(&renderer), Arc::new(producer));
        for i in 0..10 {
            pool.submit(format!("file{i}.mp4"));
        }
        assert_eq!(pool.pending(), 10);
        pool.run().unwrap();
        assert_eq!(pool.pending(), 0);
        let report = pool.join().unwrap();
        assert_eq!(report.completed, 10);
        assert_eq!(report.panicked, 0);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(renderer.live_lines(), 0);
    }

    #[test]
    fn test_submit_after_run_is_dispatched() {
        let renderer = quiet_renderer();
        let mut pool = WorkerPool::new(1, Arc::clone(&renderer), Arc::new(|_: &Path, _: &dyn Fn(&str)| {}));
        pool.run().unwrap();
        pool.submit("late.mov");
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.join().unwrap().completed, 1);
    }

    #[test]
    fn test_panicking_job_closes_line_and_is_counted() {
        let renderer = quiet_renderer();
        let producer = |input: &Path, report: &dyn Fn(&str)| {
            report("working");
            if input.ends_with("bad.mp4") {
                panic!("producer blew up");
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        let mut pool = WorkerPool::new(2, Arc::clone(&renderer), Arc::new(producer));
        pool.submit("good.mp4");
        pool.submit("bad.mp4");
        pool.run().unwrap();
        let report = pool.join().unwrap();
        assert_eq!(report, PoolReport { completed: 1, panicked: 1 });
        assert_eq!(renderer.live_lines(), 0);
    }
}
