//! Background re-checking on a fixed interval.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

type Task = Arc<dyn Fn() -> Result<usize> + Send + Sync>;

struct State {
    /// Bumped by every enable and disable; a worker stops once it no
    /// longer matches.
    generation: u64,
    scans: u64,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    scanned: Condvar,
}

struct Worker {
    handle: JoinHandle<()>,
    interval: Duration,
}

/// Runs a task every `interval` on its own thread while enabled.
///
/// A run that fails or panics still counts as a scan and wakes
/// [`wait_for_scan`](Self::wait_for_scan) callers.
pub struct PeriodicScanner {
    task: Task,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl PeriodicScanner {
    pub fn new(task: impl Fn() -> Result<usize> + Send + Sync + 'static) -> Self {
        Self {
            task: Arc::new(task),
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    generation: 0,
                    scans: 0,
                }),
                wake: Condvar::new(),
                scanned: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start scanning every `interval`, replacing any previous schedule.
    /// The first scan runs one interval from now.
    pub fn enable(&self, interval: Duration) -> Result<()> {
        self.disable();

        let mut worker = self.worker.lock();
        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.generation
        };
        let shared = Arc::clone(&self.shared);
        let task = Arc::clone(&self.task);
        let handle = thread::Builder::new()
            .name("nestvfs-scan".into())
            .spawn(move || run(&shared, &task, generation, interval))?;

        tracing::debug!(?interval, "periodic scan enabled");
        // a worker from a racing enable sees the new generation and exits
        *worker = Some(Worker { handle, interval });
        Ok(())
    }

    /// Cancel the pending scan, if any. A scan already running finishes
    /// first. Calling this again, or from the scan task itself, is fine.
    pub fn disable(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        self.stop(worker);
        tracing::debug!("periodic scan disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.worker.lock().as_ref().map(|w| w.interval)
    }

    /// Scans completed so far, failed ones included.
    pub fn scan_count(&self) -> u64 {
        self.shared.state.lock().scans
    }

    /// Block until more than `after` scans have completed or `timeout`
    /// passes. Returns whether the count got there.
    pub fn wait_for_scan(&self, after: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.scans <= after {
            if self
                .shared
                .scanned
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.scans > after;
            }
        }
        true
    }

    /// Run the task once on the calling thread, counted like a scheduled run.
    pub fn scan_now(&self) -> Result<usize> {
        let outcome = (self.task)();
        self.shared.finish_scan();
        outcome
    }

    fn stop(&self, worker: Worker) {
        self.shared.state.lock().generation += 1;
        self.shared.wake.notify_all();
        if worker.handle.thread().id() == current_thread() {
            return;
        }
        if worker.handle.join().is_err() {
            tracing::warn!("scan thread exited abnormally");
        }
    }
}

impl Shared {
    fn finish_scan(&self) {
        self.state.lock().scans += 1;
        self.scanned.notify_all();
    }
}

fn current_thread() -> ThreadId {
    thread::current().id()
}

fn run(shared: &Shared, task: &Task, generation: u64, interval: Duration) {
    loop {
        {
            let deadline = Instant::now() + interval;
            let mut state = shared.state.lock();
            while state.generation == generation && Instant::now() < deadline {
                shared.wake.wait_until(&mut state, deadline);
            }
            if state.generation != generation {
                return;
            }
        }

        match catch_unwind(AssertUnwindSafe(|| task())) {
            Ok(Ok(evicted)) => tracing::trace!(evicted, "periodic scan finished"),
            Ok(Err(e)) => tracing::warn!(error = %e, "periodic scan failed"),
            Err(_) => tracing::warn!("periodic scan panicked"),
        }
        shared.finish_scan();
    }
}

impl Drop for PeriodicScanner {
    fn drop(&mut self) {
        self.disable();
    }
}

impl fmt::Debug for PeriodicScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicScanner")
            .field("interval", &self.interval())
            .field("scans", &self.scan_count())
            .finish()
    }
}
