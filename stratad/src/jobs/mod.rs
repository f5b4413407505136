//! Job submission and observation over the two worker pool variants.
//!
//! The rest of the loop only ever sees [`JobClient`] and [`JobHandle`]; which
//! pool actually runs an attempt never leaks into the scheduler or reaper.

use std::cmp::max;
use std::sync::Arc;

use strata_common::{config, prelude::*};

mod local;
mod spawned;

pub use self::local::{LocalJobClient, LocalJobHandle};
pub use self::spawned::{SpawnedJobClient, SpawnedJobHandle};

/// The indexing entrypoint a submitted job runs: `(attempt_id, num_threads)`.
///
/// The worker owns every attempt-row transition out of `NOT_STARTED`; the
/// supervisor only submits this function and watches.
pub type WorkerEntrypoint = Arc<dyn Fn(i32, usize) -> Result<()> + Send + Sync>;

/// Observable states of a submitted job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// Waiting for a pool worker.
    Pending,
    /// Running on a pool worker.
    Running,
    /// Completed without error.
    Finished,
    /// Crashed, failed, or was cancelled.
    Error,
}

impl JobStatus {
    /// Return true if the job has finished, successfully or not.
    pub fn is_done(self) -> bool {
        match self {
            JobStatus::Pending | JobStatus::Running => false,
            JobStatus::Finished | JobStatus::Error => true,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        };
        s.fmt(f)
    }
}

/// A client for one worker pool.
///
/// Separate clients are built for the primary and secondary embedding models;
/// a job never migrates between them.
pub enum JobClient {
    /// An in-process pool of worker threads.
    Local(LocalJobClient),
    /// A pool that launches each run as a `strata-indexer` process.
    Spawned(SpawnedJobClient),
}

impl JobClient {
    /// Submit an indexing run, without blocking.
    ///
    /// Returns `None` when the pool cannot take the job right now; the
    /// attempt stays `NOT_STARTED` in the store and is retried next tick.
    pub fn submit(&self, attempt_id: i32, num_threads: usize) -> Option<JobHandle> {
        match self {
            JobClient::Local(client) => {
                client.submit(attempt_id, num_threads).map(JobHandle::Local)
            }
            JobClient::Spawned(client) => {
                client.submit(attempt_id, num_threads).map(JobHandle::Spawned)
            }
        }
    }
}

/// A handle on one submitted job.
#[derive(Debug)]
pub enum JobHandle {
    /// A job running on the in-process pool.
    Local(LocalJobHandle),
    /// A job running as a spawned process.
    Spawned(SpawnedJobHandle),
}

impl JobHandle {
    /// The job's current status.
    pub fn status(&self) -> JobStatus {
        match self {
            JobHandle::Local(handle) => handle.status(),
            JobHandle::Spawned(handle) => handle.status(),
        }
    }

    /// Return true if the job has finished, successfully or not.
    pub fn done(&self) -> bool {
        self.status().is_done()
    }

    /// The job's error, meaningful only when `status()` is `Error`.
    pub fn exception(&self) -> Option<String> {
        match self {
            JobHandle::Local(handle) => handle.exception(),
            JobHandle::Spawned(handle) => handle.exception(),
        }
    }

    /// Ask the job to stop. Best-effort and safe to repeat; the store's
    /// FAILED transition is the authoritative signal, not this.
    pub fn cancel(&self) {
        match self {
            JobHandle::Local(handle) => handle.cancel(),
            JobHandle::Spawned(handle) => handle.cancel(),
        }
    }

    /// Release client-side resources. Called exactly once, when the
    /// supervisor stops tracking the job.
    pub fn release(self) {
        match self {
            JobHandle::Local(handle) => handle.release(),
            JobHandle::Spawned(handle) => handle.release(),
        }
    }
}

/// Number of threads an indexing job may use for its ML models.
///
/// Queried per submission, so configuration changes take effect promptly.
pub fn num_threads() -> usize {
    max(config::min_threads_ml_models(), num_cpus::get_physical())
}
