//! Picks up attempts that haven't started and submits them to the right
//! worker pool.

use strata_common::prelude::*;

use crate::jobs::{num_threads, JobClient};
use crate::store::Store;
use crate::supervisor::TrackedJobs;

/// Submit every dispatchable `NOT_STARTED` attempt.
///
/// Attempts whose connector or credential has been deleted since scheduling
/// are failed instead of submitted. Attempts against a `Future` model go to
/// the secondary pool; everything else goes to the primary pool.
pub fn kickoff_indexing_jobs<S: Store>(
    store: &mut S,
    tracked: &mut TrackedJobs,
    primary_client: &JobClient,
    secondary_client: &JobClient,
) -> Result<()> {
    // Jobs submitted on an earlier tick may still be waiting in the pool
    // with their row untouched; don't submit them twice.
    let new_attempts: Vec<IndexAttempt> = store
        .attempts_not_started()?
        .into_iter()
        .filter(|attempt| !tracked.contains(attempt.id))
        .collect();
    info!("found {} new indexing tasks", new_attempts.len());

    for attempt in new_attempts {
        let use_secondary = store
            .model(attempt.embedding_model_id)?
            .map(|model| model.status == IndexModelStatus::Future)
            .unwrap_or(false);

        // The rows behind this attempt may be gone by now; the schema nulls
        // the references rather than deleting the attempt.
        let connector = match attempt.connector_id {
            Some(connector_id) => store.connector(connector_id)?,
            None => None,
        };
        let connector = match connector {
            Some(connector) => connector,
            None => {
                warn!(
                    "skipping index attempt {} because its connector has been deleted",
                    attempt.id
                );
                store.mark_attempt_failed(attempt.id, "Connector is null")?;
                continue;
            }
        };
        let credential = match attempt.credential_id {
            Some(credential_id) => store.credential(credential_id)?,
            None => None,
        };
        if credential.is_none() {
            warn!(
                "skipping index attempt {} because its credential has been deleted",
                attempt.id
            );
            store.mark_attempt_failed(attempt.id, "Credential is null")?;
            continue;
        }

        let client = if use_secondary {
            secondary_client
        } else {
            primary_client
        };
        match client.submit(attempt.id, num_threads()) {
            Some(handle) => {
                info!(
                    "kicked off {}indexing attempt {} for connector '{}' with config {} \
                     and credential {:?}",
                    if use_secondary { "(secondary index) " } else { "" },
                    attempt.id,
                    connector.name,
                    connector.config,
                    attempt.credential_id,
                );
                tracked.insert(attempt.id, handle);
            }
            // Pool is full (or couldn't take the job); the attempt stays
            // NOT_STARTED and is retried next tick.
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration as StdDuration, Instant};

    use crate::jobs::{LocalJobClient, WorkerEntrypoint};
    use crate::store::MemStore;

    fn wait_until<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + StdDuration::from_secs(5);
        while !cond() {
            if Instant::now() > deadline {
                panic!("timed out waiting for job state change");
            }
            thread::sleep(StdDuration::from_millis(5));
        }
    }

    fn fixture_store() -> MemStore {
        let store = MemStore::new();
        store.add_connector(Connector::factory(1));
        store.add_credential(Credential::factory(1));
        store.add_cc_pair(1, 1);
        store.add_model(EmbeddingModel::factory(10, IndexModelStatus::Present));
        store
    }

    /// A client that records which attempt ids it runs.
    fn recording_client(seen: Arc<Mutex<Vec<i32>>>) -> JobClient {
        let entrypoint: WorkerEntrypoint = Arc::new(move |attempt_id, _threads| {
            seen.lock().unwrap().push(attempt_id);
            Ok(())
        });
        JobClient::Local(LocalJobClient::new(2, entrypoint).unwrap())
    }

    #[test]
    fn not_started_attempts_are_submitted_and_tracked() {
        let store = fixture_store();
        let mut store_handle = store.clone();
        let mut tracked = TrackedJobs::new();
        let seen = Arc::new(Mutex::new(vec![]));
        let primary = recording_client(seen.clone());
        let secondary = recording_client(Arc::new(Mutex::new(vec![])));

        let attempt = store_handle.create_attempt(1, 1, 10).unwrap();
        kickoff_indexing_jobs(&mut store_handle, &mut tracked, &primary, &secondary).unwrap();

        assert!(tracked.contains(attempt.id));
        wait_until(|| seen.lock().unwrap().len() == 1);
        assert_eq!(*seen.lock().unwrap(), vec![attempt.id]);
    }

    #[test]
    fn future_model_attempts_go_to_the_secondary_pool() {
        let store = fixture_store();
        store.add_model(EmbeddingModel::factory(20, IndexModelStatus::Future));
        let mut store_handle = store.clone();
        let mut tracked = TrackedJobs::new();
        let primary_seen = Arc::new(Mutex::new(vec![]));
        let secondary_seen = Arc::new(Mutex::new(vec![]));
        let primary = recording_client(primary_seen.clone());
        let secondary = recording_client(secondary_seen.clone());

        let attempt = store_handle.create_attempt(1, 1, 20).unwrap();
        kickoff_indexing_jobs(&mut store_handle, &mut tracked, &primary, &secondary).unwrap();

        wait_until(|| secondary_seen.lock().unwrap().len() == 1);
        assert_eq!(*secondary_seen.lock().unwrap(), vec![attempt.id]);
        assert!(primary_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn a_deleted_connector_fails_the_attempt_without_submitting() {
        let store = fixture_store();
        let mut store_handle = store.clone();
        let mut tracked = TrackedJobs::new();
        let seen = Arc::new(Mutex::new(vec![]));
        let primary = recording_client(seen.clone());
        let secondary = recording_client(Arc::new(Mutex::new(vec![])));

        let attempt = store_handle.create_attempt(1, 1, 10).unwrap();
        store.remove_connector(1);
        kickoff_indexing_jobs(&mut store_handle, &mut tracked, &primary, &secondary).unwrap();

        assert!(tracked.is_empty());
        let attempt = store.get_attempt(attempt.id).unwrap();
        assert_eq!(attempt.status, IndexingStatus::Failed);
        assert_eq!(attempt.failure_reason.as_deref(), Some("Connector is null"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn a_deleted_credential_fails_the_attempt_without_submitting() {
        let store = fixture_store();
        let mut store_handle = store.clone();
        let mut tracked = TrackedJobs::new();
        let primary = recording_client(Arc::new(Mutex::new(vec![])));
        let secondary = recording_client(Arc::new(Mutex::new(vec![])));

        let attempt = store_handle.create_attempt(1, 1, 10).unwrap();
        store.remove_credential(1);
        kickoff_indexing_jobs(&mut store_handle, &mut tracked, &primary, &secondary).unwrap();

        assert!(tracked.is_empty());
        let attempt = store.get_attempt(attempt.id).unwrap();
        assert_eq!(attempt.status, IndexingStatus::Failed);
        assert_eq!(attempt.failure_reason.as_deref(), Some("Credential is null"));
    }

    #[test]
    fn a_full_pool_leaves_attempts_queued_for_the_next_tick() {
        let store = fixture_store();
        store.add_credential(Credential::factory(2));
        store.add_cc_pair(1, 2);
        let mut store_handle = store.clone();
        let mut tracked = TrackedJobs::new();

        let gate = Arc::new(AtomicBool::new(false));
        let gate_in_job = gate.clone();
        let entrypoint: WorkerEntrypoint = Arc::new(move |_attempt_id, _threads| {
            while !gate_in_job.load(Ordering::SeqCst) {
                thread::sleep(StdDuration::from_millis(5));
            }
            Ok(())
        });
        let primary = JobClient::Local(LocalJobClient::new(1, entrypoint).unwrap());
        let secondary = recording_client(Arc::new(Mutex::new(vec![])));

        store_handle.create_attempt(1, 1, 10).unwrap();
        store_handle.create_attempt(1, 2, 10).unwrap();
        kickoff_indexing_jobs(&mut store_handle, &mut tracked, &primary, &secondary).unwrap();

        // One worker, two attempts: one tracked, one deferred.
        assert_eq!(tracked.len(), 1);
        assert_eq!(store_handle.attempts_not_started().unwrap().len(), 2);
        gate.store(true, Ordering::SeqCst);
    }
}
