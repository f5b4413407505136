//! The supervisor loop.
//!
//! One sequential task drives Swap → Reap → Schedule → Dispatch on a fixed
//! cadence. Submitted jobs run elsewhere (threads or processes); all of
//! their observable progress reaches the supervisor through the store and
//! the job handle, never through shared state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use strata_common::prelude::*;

use crate::dispatcher::kickoff_indexing_jobs;
use crate::jobs::{JobClient, JobHandle};
use crate::reaper::cleanup_indexing_jobs;
use crate::scheduler::create_indexing_attempts;
use crate::store::Store;
use crate::swap::check_index_swap;

/// The jobs this supervisor currently owns, keyed by attempt id.
///
/// Owned solely by the supervisor. A tick that errors out leaves the map
/// intact, so in-flight jobs stay owned and get reconciled on the next tick.
#[derive(Debug, Default)]
pub struct TrackedJobs {
    jobs: HashMap<i32, JobHandle>,
}

impl TrackedJobs {
    /// Create an empty map.
    pub fn new() -> TrackedJobs {
        TrackedJobs {
            jobs: HashMap::new(),
        }
    }

    /// The tracked attempt ids, in a stable order.
    pub fn attempt_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.jobs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Is this attempt currently tracked?
    pub fn contains(&self, attempt_id: i32) -> bool {
        self.jobs.contains_key(&attempt_id)
    }

    /// The handle for one tracked attempt.
    pub fn get(&self, attempt_id: i32) -> Option<&JobHandle> {
        self.jobs.get(&attempt_id)
    }

    /// Start tracking a submitted job.
    pub fn insert(&mut self, attempt_id: i32, handle: JobHandle) {
        self.jobs.insert(attempt_id, handle);
    }

    /// Stop tracking an attempt, handing its handle back for release.
    pub fn remove(&mut self, attempt_id: i32) -> Option<JobHandle> {
        self.jobs.remove(&attempt_id)
    }

    /// How many jobs are tracked.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Is anything tracked at all?
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Release every handle, e.g. on shutdown.
    pub fn release_all(&mut self) {
        for (_, handle) in self.jobs.drain() {
            handle.release();
        }
    }

    /// One-line description of the tracked jobs for the tick log.
    fn describe(&self) -> String {
        let mut parts: Vec<(i32, String)> = self
            .jobs
            .iter()
            .map(|(attempt_id, handle)| (*attempt_id, handle.status().to_string()))
            .collect();
        parts.sort_unstable();
        let parts: Vec<String> = parts
            .into_iter()
            .map(|(attempt_id, status)| format!("{}: {}", attempt_id, status))
            .collect();
        parts.join(", ")
    }
}

/// Tunables applied once at supervisor construction.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Target time between ticks.
    pub poll_delay: StdDuration,
    /// How long a tracked run may go without progress before the reaper
    /// declares it frozen.
    pub stall_timeout_hours: i64,
}

impl SupervisorConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> SupervisorConfig {
        SupervisorConfig {
            poll_delay: strata_common::config::poll_delay(),
            stall_timeout_hours: strata_common::config::stall_timeout_hours(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            poll_delay: StdDuration::from_secs(10),
            stall_timeout_hours: 3,
        }
    }
}

/// The indexing supervisor.
pub struct Supervisor<S> {
    store: S,
    primary_client: JobClient,
    secondary_client: JobClient,
    tracked: TrackedJobs,
    config: SupervisorConfig,
    shutdown: Arc<AtomicBool>,
}

impl<S: Store> Supervisor<S> {
    /// Build a supervisor. Separate clients serve the primary and secondary
    /// embedding models; a job never migrates between them.
    pub fn new(
        store: S,
        primary_client: JobClient,
        secondary_client: JobClient,
        config: SupervisorConfig,
    ) -> Supervisor<S> {
        Supervisor {
            store,
            primary_client,
            secondary_client,
            tracked: TrackedJobs::new(),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A flag that stops [`Supervisor::run`] after the current tick and cuts
    /// the inter-tick sleep short.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// The currently tracked jobs.
    pub fn tracked(&self) -> &TrackedJobs {
        &self.tracked
    }

    /// Run one pass: swap, reap, schedule, dispatch.
    ///
    /// The order matters: a just-promoted model must be visible to the
    /// scheduler as primary, stale in-progress rows must be cleared before
    /// the one-queued-attempt rule is evaluated, and an attempt must exist
    /// before it can be dispatched.
    pub fn tick(&mut self) -> Result<()> {
        check_index_swap(&mut self.store)?;
        cleanup_indexing_jobs(
            &mut self.store,
            &mut self.tracked,
            self.config.stall_timeout_hours,
        )?;
        create_indexing_attempts(&mut self.store, &self.tracked)?;
        kickoff_indexing_jobs(
            &mut self.store,
            &mut self.tracked,
            &self.primary_client,
            &self.secondary_client,
        )?;
        Ok(())
    }

    /// Run ticks forever, until the shutdown flag is raised.
    ///
    /// A failing tick is logged and retried on the next one; no state
    /// machine advances on an error, and the tracked map survives so
    /// in-flight jobs stay owned.
    pub fn run(&mut self) -> Result<()> {
        // A supervisor that died mid-run can leave cc-pairs claiming
        // IN_PROGRESS with no job behind them; clear those before ticking.
        self.store.mark_all_in_progress_cc_pairs_failed()?;

        while !self.shutdown.load(Ordering::SeqCst) {
            let start = Instant::now();
            info!(
                "running update, current UTC time: {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S")
            );
            if !self.tracked.is_empty() {
                info!("found existing indexing jobs: {}", self.tracked.describe());
            }

            if let Err(err) = self.tick() {
                error!(
                    "failed to run update: {}",
                    err.display_causes_and_backtrace()
                );
            }

            let elapsed = start.elapsed();
            if elapsed < self.config.poll_delay {
                self.sleep_interruptibly(self.config.poll_delay - elapsed);
            }
        }

        info!(
            "supervisor shutting down, releasing {} tracked jobs",
            self.tracked.len()
        );
        self.tracked.release_all();
        Ok(())
    }

    /// Sleep for `total`, waking early if the shutdown flag is raised.
    fn sleep_interruptibly(&self, total: StdDuration) {
        let deadline = Instant::now() + total;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(StdDuration::from_millis(250)));
        }
    }
}
