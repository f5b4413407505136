//! A pool that runs each indexing attempt as a separate process.
//!
//! Launching `strata-indexer` per run keeps worker crashes and memory
//! blowups out of the supervisor's address space. The worker talks to the
//! same database, so the only coordination channel is the attempt row.

use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

use strata_common::{config, prelude::*};

use super::JobStatus;

/// A client that spawns one `strata-indexer` process per submission.
///
/// There is no queue: process startup either works or it doesn't, and a
/// failed spawn leaves the attempt `NOT_STARTED` to be retried next tick.
pub struct SpawnedJobClient {
    binary: String,
}

impl SpawnedJobClient {
    /// Create a client launching the configured `strata-indexer` binary.
    pub fn new() -> SpawnedJobClient {
        SpawnedJobClient {
            binary: config::indexer_binary(),
        }
    }

    /// Launch a run. Spawn failures are logged and reported as `None`.
    pub fn submit(&self, attempt_id: i32, num_threads: usize) -> Option<SpawnedJobHandle> {
        let spawned = Command::new(&self.binary)
            .arg(attempt_id.to_string())
            .arg("--threads")
            .arg(num_threads.to_string())
            .stdin(Stdio::null())
            // stdout and stderr pass through to the supervisor's console.
            .spawn();
        match spawned {
            Ok(child) => Some(SpawnedJobHandle {
                state: Arc::new(Mutex::new(SpawnedState {
                    child,
                    status: JobStatus::Running,
                    exit_message: None,
                })),
            }),
            Err(err) => {
                warn!(
                    "could not launch {} for attempt {}: {}",
                    self.binary, attempt_id, err
                );
                None
            }
        }
    }
}

impl Default for SpawnedJobClient {
    fn default() -> Self {
        SpawnedJobClient::new()
    }
}

#[derive(Debug)]
struct SpawnedState {
    child: Child,
    status: JobStatus,
    exit_message: Option<String>,
}

impl SpawnedState {
    /// Fold the child's latest exit information into our cached status.
    fn poll(&mut self) {
        if self.status.is_done() {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(exit)) if exit.success() => self.status = JobStatus::Finished,
            Ok(Some(exit)) => {
                self.status = JobStatus::Error;
                self.exit_message = Some(format!("strata-indexer {}", exit));
            }
            Ok(None) => {}
            Err(err) => {
                self.status = JobStatus::Error;
                self.exit_message = Some(format!("could not poll strata-indexer: {}", err));
            }
        }
    }
}

/// A handle on a job running as a spawned process.
#[derive(Debug)]
pub struct SpawnedJobHandle {
    state: Arc<Mutex<SpawnedState>>,
}

impl SpawnedJobHandle {
    fn state(&self) -> MutexGuard<'_, SpawnedState> {
        self.state.lock().expect("spawned job mutex poisoned")
    }

    /// The job's current status, from the child's exit information.
    pub fn status(&self) -> JobStatus {
        let mut state = self.state();
        state.poll();
        state.status
    }

    /// How the child process died, if it did.
    pub fn exception(&self) -> Option<String> {
        let mut state = self.state();
        state.poll();
        state.exit_message.clone()
    }

    /// Kill the child process. Safe to call repeatedly; killing an already
    /// dead process is a no-op.
    pub fn cancel(&self) {
        let mut state = self.state();
        state.poll();
        if !state.status.is_done() {
            if let Err(err) = state.child.kill() {
                warn!("could not kill strata-indexer: {}", err);
            }
        }
    }

    /// Reap the child process so it doesn't linger as a zombie. A child
    /// still running when the supervisor abandons its handle is killed
    /// first.
    pub fn release(self) {
        let mut state = self.state();
        state.poll();
        if !state.status.is_done() {
            let _ = state.child.kill();
        }
        let _ = state.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration as StdDuration, Instant};

    fn wait_until<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + StdDuration::from_secs(5);
        while !cond() {
            if Instant::now() > deadline {
                panic!("timed out waiting for process state change");
            }
            thread::sleep(StdDuration::from_millis(5));
        }
    }

    fn client_for(binary: &str) -> SpawnedJobClient {
        SpawnedJobClient {
            binary: binary.to_owned(),
        }
    }

    #[test]
    fn a_clean_exit_reports_finished() {
        // `true` exits 0 regardless of our arguments.
        let client = client_for("true");
        let handle = client.submit(1, 1).expect("spawn should work");
        wait_until(|| handle.status().is_done());
        assert_eq!(handle.status(), JobStatus::Finished);
        handle.release();
    }

    #[test]
    fn a_nonzero_exit_reports_error() {
        let client = client_for("false");
        let handle = client.submit(2, 1).expect("spawn should work");
        wait_until(|| handle.status().is_done());
        assert_eq!(handle.status(), JobStatus::Error);
        assert!(handle.exception().is_some());
        handle.release();
    }

    #[test]
    fn a_missing_binary_reports_no_handle() {
        let client = client_for("strata-indexer-does-not-exist");
        assert!(client.submit(3, 1).is_none());
    }

    #[test]
    fn cancel_kills_a_running_job() {
        // `sleep` chokes on the `--threads` arguments the client appends, so
        // build the handle around a plain long-running child.
        let handle = SpawnedJobHandle {
            state: Arc::new(Mutex::new(SpawnedState {
                child: Command::new("sleep")
                    .arg("60")
                    .spawn()
                    .expect("sleep should spawn"),
                status: JobStatus::Running,
                exit_message: None,
            })),
        };
        assert_eq!(handle.status(), JobStatus::Running);
        handle.cancel();
        wait_until(|| handle.status().is_done());
        assert_eq!(handle.status(), JobStatus::Error);
        handle.release();
    }
}
