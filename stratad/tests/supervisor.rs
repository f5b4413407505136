//! Tick-by-tick scenarios for the supervisor, driven against the in-memory
//! store and the local worker pool.
//!
//! The fake workers deliberately never touch the attempt rows; tests move
//! rows themselves to simulate worker progress, which keeps every tick
//! deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use strata_common::prelude::*;
use stratad::jobs::{JobClient, LocalJobClient, WorkerEntrypoint};
use stratad::store::{MemStore, Store};
use stratad::supervisor::{Supervisor, SupervisorConfig};

struct Harness {
    store: MemStore,
    supervisor: Supervisor<MemStore>,
    /// While false, submitted jobs sit in their entrypoint without
    /// finishing.
    gate: Arc<AtomicBool>,
    primary_seen: Arc<Mutex<Vec<i32>>>,
    secondary_seen: Arc<Mutex<Vec<i32>>>,
}

impl Harness {
    fn new(store: MemStore) -> Harness {
        let gate = Arc::new(AtomicBool::new(false));
        let primary_seen = Arc::new(Mutex::new(vec![]));
        let secondary_seen = Arc::new(Mutex::new(vec![]));
        let primary = gated_recording_client(gate.clone(), primary_seen.clone());
        let secondary = gated_recording_client(gate.clone(), secondary_seen.clone());
        let supervisor = Supervisor::new(
            store.clone(),
            primary,
            secondary,
            SupervisorConfig::default(),
        );
        Harness {
            store,
            supervisor,
            gate,
            primary_seen,
            secondary_seen,
        }
    }

    /// Let every gated job run to completion, and wait until the tracked
    /// handles have all reported done.
    fn finish_all_jobs(&self) {
        self.gate.store(true, Ordering::SeqCst);
        let tracked = self.supervisor.tracked();
        wait_until(|| {
            tracked
                .attempt_ids()
                .iter()
                .all(|id| tracked.get(*id).map(|handle| handle.done()).unwrap_or(true))
        });
    }
}

fn gated_recording_client(gate: Arc<AtomicBool>, seen: Arc<Mutex<Vec<i32>>>) -> JobClient {
    let entrypoint: WorkerEntrypoint = Arc::new(move |attempt_id, _num_threads| {
        seen.lock().unwrap().push(attempt_id);
        while !gate.load(Ordering::SeqCst) {
            thread::sleep(StdDuration::from_millis(5));
        }
        Ok(())
    });
    JobClient::Local(LocalJobClient::new(4, entrypoint).unwrap())
}

fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + StdDuration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for condition");
        }
        thread::sleep(StdDuration::from_millis(5));
    }
}

/// Connectors 1 and 2 (refresh 60s) with one credential each, the ingestion
/// pseudo-pair, and a single present model (10).
fn fresh_store() -> MemStore {
    let store = MemStore::new();
    let mut ingestion = Connector::factory(INGESTION_API_CONNECTOR_ID);
    ingestion.refresh_freq = None;
    store.add_connector(ingestion);
    store.add_credential(Credential::factory(0));
    store.add_cc_pair(INGESTION_API_CONNECTOR_ID, 0);
    for id in 1..=2 {
        store.add_connector(Connector::factory(id));
        store.add_credential(Credential::factory(id));
        store.add_cc_pair(id, id);
    }
    store.add_model(EmbeddingModel::factory(10, IndexModelStatus::Present));
    store
}

#[test]
fn fresh_start_schedules_and_dispatches_every_pair() {
    let mut harness = Harness::new(fresh_store());

    harness.supervisor.tick().unwrap();

    // One attempt per real pair, both dispatched to the primary pool.
    let attempts = harness.store.attempts_for_model(10);
    assert_eq!(attempts.len(), 2);
    assert_eq!(harness.supervisor.tracked().len(), 2);
    for attempt in &attempts {
        assert_eq!(attempt.status, IndexingStatus::NotStarted);
        assert_ne!(attempt.connector_id, Some(INGESTION_API_CONNECTOR_ID));
    }
    // The user-visible pairs reflect the queued runs.
    assert_eq!(
        harness.store.get_cc_pair(1, 1).unwrap().last_attempt_status,
        Some(IndexingStatus::NotStarted)
    );
    wait_until(|| harness.primary_seen.lock().unwrap().len() == 2);
    assert!(harness.secondary_seen.lock().unwrap().is_empty());

    harness.finish_all_jobs();
}

#[test]
fn a_tick_with_no_external_change_is_idempotent() {
    let mut harness = Harness::new(fresh_store());

    harness.supervisor.tick().unwrap();
    let attempts_after_one = harness.store.attempts_for_model(10).len();
    let tracked_after_one = harness.supervisor.tracked().attempt_ids();

    harness.supervisor.tick().unwrap();

    assert_eq!(harness.store.attempts_for_model(10).len(), attempts_after_one);
    assert_eq!(harness.supervisor.tracked().attempt_ids(), tracked_after_one);

    harness.finish_all_jobs();
}

#[test]
fn the_ingestion_pseudo_connector_is_never_scheduled() {
    let mut harness = Harness::new(fresh_store());

    for _ in 0..3 {
        harness.supervisor.tick().unwrap();
        harness.store.advance_clock(Duration::seconds(120));
    }

    let scheduled_for_ingestion = harness
        .store
        .attempts_for_model(10)
        .iter()
        .any(|attempt| attempt.connector_id == Some(INGESTION_API_CONNECTOR_ID));
    assert!(!scheduled_for_ingestion);

    harness.finish_all_jobs();
}

#[test]
fn cadence_gates_rescheduling_until_refresh_freq_elapses() {
    let store = MemStore::new();
    store.add_connector(Connector::factory(1));
    store.add_credential(Credential::factory(1));
    store.add_cc_pair(1, 1);
    store.add_model(EmbeddingModel::factory(10, IndexModelStatus::Present));
    let mut harness = Harness::new(store);

    // A successful run just finished.
    let mut previous = IndexAttempt::factory(1, 1, 1, 10);
    previous.status = IndexingStatus::Success;
    let now = harness.store.clone().now().unwrap();
    previous.time_created = now;
    previous.time_updated = now;
    harness.store.insert_attempt(previous);

    harness.supervisor.tick().unwrap();
    assert_eq!(harness.store.attempts_for_model(10).len(), 1);

    harness.store.advance_clock(Duration::seconds(30));
    harness.supervisor.tick().unwrap();
    assert_eq!(harness.store.attempts_for_model(10).len(), 1);

    harness.store.advance_clock(Duration::seconds(31));
    harness.supervisor.tick().unwrap();
    assert_eq!(harness.store.attempts_for_model(10).len(), 2);
    assert_eq!(harness.supervisor.tracked().len(), 1);

    harness.finish_all_jobs();
}

#[test]
fn startup_recovery_reaps_runs_from_a_killed_supervisor() {
    let store = fresh_store();

    // A previous supervisor died mid-run: attempt 7 claims to be running,
    // nothing is tracked, and the pair still shows IN_PROGRESS.
    let mut orphan = IndexAttempt::factory(7, 1, 1, 10);
    orphan.status = IndexingStatus::InProgress;
    store.insert_attempt(orphan);
    let mut handle = store.clone();
    handle
        .update_cc_pair_status(1, 1, IndexingStatus::InProgress)
        .unwrap();

    let mut harness = Harness::new(store);

    // What `Supervisor::run` does before its first tick.
    harness
        .store
        .clone()
        .mark_all_in_progress_cc_pairs_failed()
        .unwrap();
    assert_eq!(
        harness.store.get_cc_pair(1, 1).unwrap().last_attempt_status,
        Some(IndexingStatus::Failed)
    );

    harness.supervisor.tick().unwrap();

    let orphan = harness.store.get_attempt(7).unwrap();
    assert_eq!(orphan.status, IndexingStatus::Failed);
    assert_eq!(
        orphan.failure_reason.as_deref(),
        Some("Stopped mid run, likely due to the background process being killed")
    );

    harness.finish_all_jobs();
}

#[test]
fn a_model_migration_builds_swaps_and_resyncs() {
    let store = MemStore::new();
    let mut ingestion = Connector::factory(INGESTION_API_CONNECTOR_ID);
    ingestion.refresh_freq = None;
    store.add_connector(ingestion);
    store.add_credential(Credential::factory(0));
    store.add_cc_pair(INGESTION_API_CONNECTOR_ID, 0);
    // Connector 1 is live; connector 2 is disabled but must still get its
    // one forced build against the future model.
    store.add_connector(Connector::factory(1));
    store.add_credential(Credential::factory(1));
    store.add_cc_pair(1, 1);
    let mut disabled = Connector::factory(2);
    disabled.disabled = true;
    store.add_connector(disabled);
    store.add_credential(Credential::factory(2));
    store.add_cc_pair(2, 2);
    store.add_model(EmbeddingModel::factory(10, IndexModelStatus::Present));
    store.add_model(EmbeddingModel::factory(20, IndexModelStatus::Future));

    let mut harness = Harness::new(store);

    // Keep the primary model quiet so the migration is the only action.
    let now = harness.store.clone().now().unwrap();
    let mut recent = IndexAttempt::factory(100, 1, 1, 10);
    recent.status = IndexingStatus::Success;
    recent.time_created = now;
    recent.time_updated = now;
    harness.store.insert_attempt(recent);

    harness.supervisor.tick().unwrap();

    // Both real pairs get a build against model 20, on the secondary pool.
    let future_attempts = harness.store.attempts_for_model(20);
    assert_eq!(future_attempts.len(), 2);
    wait_until(|| harness.secondary_seen.lock().unwrap().len() == 2);
    assert!(harness.primary_seen.lock().unwrap().is_empty());

    // No swap while the builds are still running.
    harness.supervisor.tick().unwrap();
    assert_eq!(harness.store.clone().current_model().unwrap().id, 10);

    // The workers finish: the live connector succeeds, the disabled one
    // fails.
    let now = harness.store.clone().now().unwrap();
    let succeeded = future_attempts
        .iter()
        .find(|a| a.connector_id == Some(1))
        .unwrap()
        .id;
    let failed = future_attempts
        .iter()
        .find(|a| a.connector_id == Some(2))
        .unwrap()
        .id;
    harness.store.update_attempt(succeeded, |a| {
        a.status = IndexingStatus::Success;
        a.time_updated = now;
    });
    harness.store.update_attempt(failed, |a| {
        a.status = IndexingStatus::Failed;
        a.time_updated = now;
    });
    harness.finish_all_jobs();

    harness.supervisor.tick().unwrap();

    // Swapped: 20 is primary, 10 is past, and the pair aggregates mirror
    // model 20's runs.
    assert_eq!(harness.store.clone().current_model().unwrap().id, 20);
    assert_eq!(
        harness.store.clone().model(10).unwrap().unwrap().status,
        IndexModelStatus::Past
    );
    assert!(harness.store.clone().secondary_model().unwrap().is_none());
    assert_eq!(
        harness.store.get_cc_pair(1, 1).unwrap().last_attempt_status,
        Some(IndexingStatus::Success)
    );
    assert_eq!(
        harness.store.get_cc_pair(2, 2).unwrap().last_attempt_status,
        Some(IndexingStatus::Failed)
    );

    // The finished jobs were reaped, and the new primary follows the normal
    // cadence rules: nothing new is scheduled yet.
    assert!(harness.supervisor.tracked().is_empty());
    assert_eq!(harness.store.attempts_for_model(20).len(), 2);
}

#[test]
fn a_failing_tick_leaves_tracked_jobs_owned() {
    let mut harness = Harness::new(fresh_store());
    harness.supervisor.tick().unwrap();
    assert_eq!(harness.supervisor.tracked().len(), 2);

    // Break the store invariant the scheduler relies on: no present model.
    harness
        .store
        .clone()
        .set_model_status(10, IndexModelStatus::Past)
        .unwrap();
    assert!(harness.supervisor.tick().is_err());

    // The failed tick didn't drop the in-flight jobs.
    assert_eq!(harness.supervisor.tracked().len(), 2);

    harness.finish_all_jobs();
}
