//! An in-process pool of indexing worker threads.

use crossbeam::channel::{self, Receiver, Sender};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use strata_common::prelude::*;

use super::{JobStatus, WorkerEntrypoint};

/// A pool of `n_workers` threads, each running submitted indexing attempts
/// to completion.
///
/// Indexing is CPU- and memory-hungry, so the pool refuses work beyond its
/// worker count instead of queueing it: a refused attempt simply stays
/// `NOT_STARTED` in the store and is resubmitted on a later tick.
pub struct LocalJobClient {
    sender: Sender<QueuedJob>,
    active: Arc<AtomicUsize>,
    n_workers: usize,
}

struct QueuedJob {
    attempt_id: i32,
    num_threads: usize,
    shared: Arc<JobShared>,
}

/// State shared between a handle and the worker running its job.
#[derive(Debug)]
struct JobShared {
    status: Mutex<JobStatus>,
    error: Mutex<Option<String>>,
    canceled: AtomicBool,
}

impl JobShared {
    fn new() -> JobShared {
        JobShared {
            status: Mutex::new(JobStatus::Pending),
            error: Mutex::new(None),
            canceled: AtomicBool::new(false),
        }
    }

    fn set_status(&self, status: JobStatus) {
        *self.status.lock().expect("job status mutex poisoned") = status;
    }

    fn fail(&self, message: &str) {
        *self.error.lock().expect("job error mutex poisoned") = Some(message.to_owned());
        self.set_status(JobStatus::Error);
    }
}

impl LocalJobClient {
    /// Start a pool with `n_workers` worker threads running `entrypoint`.
    pub fn new(n_workers: usize, entrypoint: WorkerEntrypoint) -> Result<LocalJobClient> {
        let (sender, receiver) = channel::unbounded::<QueuedJob>();
        let active = Arc::new(AtomicUsize::new(0));
        for n in 0..n_workers {
            let receiver = receiver.clone();
            let entrypoint = entrypoint.clone();
            let active = active.clone();
            thread::Builder::new()
                .name(format!("indexing-{}", n))
                .spawn(move || worker_loop(receiver, entrypoint, active))
                .context("could not spawn indexing worker thread")?;
        }
        Ok(LocalJobClient {
            sender,
            active,
            n_workers,
        })
    }

    /// Submit an attempt, or refuse it if every worker is occupied.
    pub fn submit(&self, attempt_id: i32, num_threads: usize) -> Option<LocalJobHandle> {
        let active = self.active.load(Ordering::SeqCst);
        if active >= self.n_workers {
            debug!(
                "local pool is full ({} of {} workers busy), deferring attempt {}",
                active, self.n_workers, attempt_id
            );
            return None;
        }

        let shared = Arc::new(JobShared::new());
        self.active.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedJob {
            attempt_id,
            num_threads,
            shared: shared.clone(),
        };
        if self.sender.send(queued).is_err() {
            // Every worker thread has died; nothing will run this.
            self.active.fetch_sub(1, Ordering::SeqCst);
            error!("local pool has no live workers, cannot submit attempt {}", attempt_id);
            return None;
        }
        Some(LocalJobHandle { shared })
    }
}

fn worker_loop(
    receiver: Receiver<QueuedJob>,
    entrypoint: WorkerEntrypoint,
    active: Arc<AtomicUsize>,
) {
    while let Ok(job) = receiver.recv() {
        if job.shared.canceled.load(Ordering::SeqCst) {
            job.shared.fail("canceled before starting");
            active.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        job.shared.set_status(JobStatus::Running);
        let result = catch_unwind(AssertUnwindSafe(|| {
            (entrypoint)(job.attempt_id, job.num_threads)
        }));
        match result {
            Ok(Ok(())) => job.shared.set_status(JobStatus::Finished),
            Ok(Err(err)) => job
                .shared
                .fail(&format!("{}", err.display_causes_without_backtrace())),
            Err(panic) => job.shared.fail(panic_message(panic.as_ref())),
        }
        active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Extract whatever printable message a panic payload carries.
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "an unknown panic occurred"
    }
}

/// A handle on a job running in the local pool.
#[derive(Debug)]
pub struct LocalJobHandle {
    shared: Arc<JobShared>,
}

impl LocalJobHandle {
    /// The job's current status.
    pub fn status(&self) -> JobStatus {
        *self.shared.status.lock().expect("job status mutex poisoned")
    }

    /// The job's error message, if it failed.
    pub fn exception(&self) -> Option<String> {
        self.shared.error.lock().expect("job error mutex poisoned").clone()
    }

    /// Stop the job from starting, if it hasn't yet.
    ///
    /// A thread already inside the entrypoint cannot be interrupted; the
    /// supervisor relies on the store's FAILED transition instead.
    pub fn cancel(&self) {
        self.shared.canceled.store(true, Ordering::SeqCst);
    }

    /// Release the handle. The local pool holds nothing beyond shared
    /// status, so this just drops our half.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration as StdDuration, Instant};

    fn wait_until<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + StdDuration::from_secs(5);
        while !cond() {
            if Instant::now() > deadline {
                panic!("timed out waiting for job state change");
            }
            thread::sleep(StdDuration::from_millis(5));
        }
    }

    #[test]
    fn jobs_run_and_finish() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_job = ran.clone();
        let entrypoint: WorkerEntrypoint = Arc::new(move |_attempt_id, _threads| {
            ran_in_job.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let client = LocalJobClient::new(1, entrypoint).unwrap();
        let handle = client.submit(1, 1).expect("pool should accept the job");
        wait_until(|| handle.status().is_done());
        assert_eq!(handle.status(), JobStatus::Finished);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(handle.exception(), None);
    }

    #[test]
    fn failures_surface_as_errors() {
        let entrypoint: WorkerEntrypoint =
            Arc::new(|_attempt_id, _threads| Err(anyhow!("no documents for you")));
        let client = LocalJobClient::new(1, entrypoint).unwrap();
        let handle = client.submit(2, 1).unwrap();
        wait_until(|| handle.status().is_done());
        assert_eq!(handle.status(), JobStatus::Error);
        assert!(handle.exception().unwrap().contains("no documents for you"));
    }

    #[test]
    fn panics_surface_as_errors() {
        let entrypoint: WorkerEntrypoint =
            Arc::new(|_attempt_id, _threads| panic!("worker exploded"));
        let client = LocalJobClient::new(1, entrypoint).unwrap();
        let handle = client.submit(3, 1).unwrap();
        wait_until(|| handle.status().is_done());
        assert_eq!(handle.status(), JobStatus::Error);
        assert!(handle.exception().unwrap().contains("worker exploded"));
    }

    #[test]
    fn a_full_pool_refuses_work() {
        let gate = Arc::new(AtomicBool::new(false));
        let gate_in_job = gate.clone();
        let entrypoint: WorkerEntrypoint = Arc::new(move |_attempt_id, _threads| {
            while !gate_in_job.load(Ordering::SeqCst) {
                thread::sleep(StdDuration::from_millis(5));
            }
            Ok(())
        });
        let client = LocalJobClient::new(1, entrypoint).unwrap();
        let first = client.submit(4, 1).expect("pool should accept the first job");
        wait_until(|| first.status() == JobStatus::Running);
        assert!(client.submit(5, 1).is_none());
        gate.store(true, Ordering::SeqCst);
        wait_until(|| first.status().is_done());
    }
}
