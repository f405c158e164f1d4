use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    closed: bool,
    busy: bool,
    /// Set when a drain timed out: the worker keeps running queued jobs
    /// after the close instead of exiting.
    handed_off: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    idle: Condvar,
}

/// Single background thread running persistence jobs in submission order.
pub struct PersistenceExecutor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceExecutor {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            idle: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(&worker_shared))?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job. Returns `false` once the executor is shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return false;
        }
        queue.jobs.push_back(Box::new(job));
        self.shared.available.notify_one();
        true
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().closed
    }

    /// Stop accepting jobs, wait up to `timeout` for the running job, then
    /// run every queued job on the calling thread. Returns how many jobs ran
    /// inline.
    ///
    /// If the running job outlives `timeout`, queued jobs stay with the
    /// worker so they still run after it, in submission order, and nothing
    /// runs inline.
    pub fn drain_and_shutdown(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let remaining = {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return 0;
            }
            queue.closed = true;
            self.shared.available.notify_all();
            while queue.busy {
                if self.shared.idle.wait_until(&mut queue, deadline).timed_out() && queue.busy {
                    queue.handed_off = true;
                    warn!(
                        queued = queue.jobs.len(),
                        "persistence worker still busy at drain deadline, leaving queued jobs to it"
                    );
                    return 0;
                }
            }
            std::mem::take(&mut queue.jobs)
        };

        let count = remaining.len();
        for job in remaining {
            run_job(job);
        }

        if let Some(handle) = self.worker.lock().take() {
            // The worker exits on its own once it sees the closed flag.
            if handle.join().is_err() {
                error!("persistence worker panicked");
            }
        }
        debug!(inline_jobs = count, "persistence executor drained");
        count
    }
}

impl Drop for PersistenceExecutor {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.closed = true;
        self.shared.available.notify_all();
    }
}

fn run_job(job: Job) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
        error!("persistence job panicked");
    }
}

fn run_worker(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.closed && !queue.handed_off {
                    queue.busy = false;
                    shared.idle.notify_all();
                    return;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    queue.busy = true;
                    break job;
                }
                if queue.closed {
                    queue.busy = false;
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        run_job(job);
        let mut queue = shared.queue.lock();
        queue.busy = false;
        shared.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_in_order() {
        let executor = PersistenceExecutor::new("test-persistence").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let log = log.clone();
            assert!(executor.submit(move || log.lock().push(i)));
        }
        executor.drain_and_shutdown(Duration::from_secs(5));
        assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn queued_jobs_run_inline_on_drain() {
        let executor = PersistenceExecutor::new("test-persistence").unwrap();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let ran = Arc::new(AtomicUsize::new(0));

        // Block the worker so later jobs stay queued.
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        {
            let gate = gate.clone();
            executor.submit(move || {
                let _ = started_tx.send(());
                let (lock, cvar) = &*gate;
                let mut open = lock.lock();
                while !*open {
                    cvar.wait(&mut open);
                }
            });
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..3 {
            let ran = ran.clone();
            executor.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        let opener = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                let (lock, cvar) = &*gate;
                *lock.lock() = true;
                cvar.notify_all();
            })
        };

        let inline = executor.drain_and_shutdown(Duration::from_secs(5));
        opener.join().unwrap();
        assert_eq!(inline, 3);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn timed_out_drain_leaves_queued_jobs_in_order() {
        let executor = PersistenceExecutor::new("test-persistence").unwrap();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let log = Arc::new(Mutex::new(Vec::new()));

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        {
            let gate = gate.clone();
            let log = log.clone();
            executor.submit(move || {
                let _ = started_tx.send(());
                let (lock, cvar) = &*gate;
                let mut open = lock.lock();
                while !*open {
                    cvar.wait(&mut open);
                }
                log.lock().push(0);
            });
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for i in 1..=3 {
            let log = log.clone();
            executor.submit(move || log.lock().push(i));
        }

        assert_eq!(executor.drain_and_shutdown(Duration::from_millis(20)), 0);
        assert!(log.lock().is_empty());
        assert!(!executor.submit(|| {}));

        {
            let (lock, cvar) = &*gate;
            *lock.lock() = true;
            cvar.notify_all();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while log.lock().len() < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let executor = PersistenceExecutor::new("test-persistence").unwrap();
        executor.drain_and_shutdown(Duration::from_millis(100));
        assert!(executor.is_shut_down());
        assert!(!executor.submit(|| {}));
        assert_eq!(executor.drain_and_shutdown(Duration::from_millis(100)), 0);
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let executor = PersistenceExecutor::new("test-persistence").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        executor.submit(|| panic!("boom"));
        let r = ran.clone();
        executor.submit(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        executor.drain_and_shutdown(Duration::from_secs(5));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
