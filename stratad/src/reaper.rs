//! Reconciles tracked jobs and in-flight attempt rows.
//!
//! Two sweeps run every tick. The first walks the supervisor's tracked jobs
//! and reaps the finished ones. The second walks the store's in-progress
//! rows and fails the ones nothing is actually running: stalled runs whose
//! heartbeat went quiet, and orphans left behind by a killed supervisor.

use strata_common::prelude::*;

use crate::jobs::JobStatus;
use crate::store::Store;
use crate::supervisor::TrackedJobs;

/// Failure reason recorded when an attempt claims to be running but the job
/// behind it is gone or dead.
pub const UNEXPECTED_STATE_FAILURE_REASON: &str =
    "Stopped mid run, likely due to the background process being killed";

/// Failure reason recorded when a tracked run stops heartbeating.
pub const FROZEN_FAILURE_REASON: &str =
    "Indexing run frozen - no updates in the last three hours. \
     The run will be re-attempted at next scheduled indexing time.";

/// Reap finished and wedged indexing runs.
pub fn cleanup_indexing_jobs<S: Store>(
    store: &mut S,
    tracked: &mut TrackedJobs,
    timeout_hours: i64,
) -> Result<()> {
    // Sweep 1: tracked jobs.
    for attempt_id in tracked.attempt_ids() {
        let attempt = store.attempt(attempt_id)?;
        let finished_in_store = attempt
            .as_ref()
            .map(|attempt| attempt.status.is_terminal())
            .unwrap_or(false);

        let (handle_done, handle_errored, exception) = match tracked.get(attempt_id) {
            Some(handle) => (
                handle.done(),
                handle.status() == JobStatus::Error,
                handle.exception(),
            ),
            None => continue,
        };

        // An ongoing job that hasn't reported a terminal state on either
        // side is left alone.
        if !handle_done && !finished_in_store {
            continue;
        }

        if handle_errored {
            error!(
                "indexing job for attempt {} failed: {}",
                attempt_id,
                exception.unwrap_or_else(|| "unknown error".to_owned())
            );
        }
        if let Some(handle) = tracked.remove(attempt_id) {
            handle.release();
        }

        let attempt = match attempt {
            Some(attempt) => attempt,
            None => {
                error!(
                    "unable to find index attempt {} while cleaning up indexing jobs",
                    attempt_id
                );
                continue;
            }
        };
        if attempt.status == IndexingStatus::InProgress || handle_errored {
            mark_run_failed(store, &attempt, UNEXPECTED_STATE_FAILURE_REASON)?;
        }
    }

    // Sweep 2: in-progress rows in the store.
    for connector in store.list_connectors()? {
        for attempt in store.attempts_in_progress(connector.id)? {
            match tracked.get(attempt.id) {
                Some(handle) => {
                    // The worker bumps `time_updated` on every batch of
                    // documents, so a quiet row means a wedged run. Strictly
                    // greater: a run exactly at the timeout gets one more
                    // tick.
                    let stall = store.now()? - attempt.time_updated;
                    if stall > Duration::hours(timeout_hours) {
                        warn!(
                            "indexing attempt {} has made no progress in {}s, cancelling it",
                            attempt.id,
                            stall.num_seconds()
                        );
                        handle.cancel();
                        mark_run_failed(store, &attempt, FROZEN_FAILURE_REASON)?;
                    }
                }
                // In progress in the store, but this supervisor owns no such
                // job: a previous supervisor died with the run in flight.
                None => mark_run_failed(store, &attempt, UNEXPECTED_STATE_FAILURE_REASON)?,
            }
        }
    }
    Ok(())
}

/// Mark an attempt as failed and, for primary-model runs, surface the
/// failure on the cc-pair aggregate.
///
/// Idempotent through the store: failing an already terminal attempt is a
/// no-op there.
pub fn mark_run_failed<S: Store>(
    store: &mut S,
    attempt: &IndexAttempt,
    failure_reason: &str,
) -> Result<()> {
    warn!(
        "marking attempt {} (connector: {:?}, credential: {:?}) as failed: {}",
        attempt.id, attempt.connector_id, attempt.credential_id, failure_reason
    );
    store.mark_attempt_failed(attempt.id, failure_reason)?;

    // Failures while building a future model's index stay invisible to
    // users; the cc-pair mirrors the primary model only.
    let model_is_present = store
        .model(attempt.embedding_model_id)?
        .map(|model| model.status == IndexModelStatus::Present)
        .unwrap_or(false);
    if let (Some(connector_id), Some(credential_id), true) =
        (attempt.connector_id, attempt.credential_id, model_is_present)
    {
        store.update_cc_pair_status(connector_id, credential_id, IndexingStatus::Failed)?;
    }
    Ok(())
}
