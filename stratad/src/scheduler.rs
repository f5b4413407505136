//! Decides which (connector, credential, embedding model) triples deserve a
//! fresh indexing attempt.
//!
//! The scheduler only creates `NOT_STARTED` rows; submitting them to a pool
//! is the dispatcher's job.

use strata_common::prelude::*;

use crate::store::Store;
use crate::supervisor::TrackedJobs;

/// Create new attempts for every triple that is due one.
///
/// A triple is due when its connector is enabled, its `refresh_freq` has
/// elapsed since the last run, and neither a tracked job nor a queued
/// attempt already covers it. During an embedding model migration the
/// `Future` model additionally forces one build of every real triple.
pub fn create_indexing_attempts<S: Store>(store: &mut S, tracked: &TrackedJobs) -> Result<()> {
    // Triples already owned by a tracked job are never double-scheduled.
    let mut ongoing = HashSet::new();
    for attempt_id in tracked.attempt_ids() {
        match store.attempt(attempt_id)? {
            Some(attempt) => {
                ongoing.insert((
                    attempt.connector_id,
                    attempt.credential_id,
                    attempt.embedding_model_id,
                ));
            }
            None => error!(
                "unable to find index attempt {} while creating indexing jobs",
                attempt_id
            ),
        }
    }

    let mut models = vec![store.current_model()?];
    if let Some(secondary) = store.secondary_model()? {
        models.push(secondary);
    }

    let now = store.now()?;
    let connectors = store.list_connectors()?;
    let cc_pairs = store.list_cc_pairs()?;
    for connector in &connectors {
        let credential_ids: Vec<i32> = cc_pairs
            .iter()
            .filter(|pair| pair.connector_id == connector.id)
            .map(|pair| pair.credential_id)
            .collect();
        for credential_id in credential_ids {
            for model in &models {
                if ongoing.contains(&(Some(connector.id), Some(credential_id), model.id)) {
                    continue;
                }
                let last_attempt =
                    store.last_attempt(connector.id, credential_id, model.id)?;
                if !should_create_new_indexing(connector, last_attempt.as_ref(), model, now) {
                    continue;
                }

                debug!(
                    "queueing indexing attempt for connector {} / credential {} / model {}",
                    connector.id, credential_id, model.id
                );
                store.create_attempt(connector.id, credential_id, model.id)?;

                // The cc-pair mirrors only the primary model's runs; pairs
                // are re-synced wholesale when the indices are swapped.
                if model.status == IndexModelStatus::Present {
                    store.update_cc_pair_status(
                        connector.id,
                        credential_id,
                        IndexingStatus::NotStarted,
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Decide whether one triple needs a fresh attempt. Rules are ordered.
pub fn should_create_new_indexing(
    connector: &Connector,
    last_attempt: Option<&IndexAttempt>,
    model: &EmbeddingModel,
    now: NaiveDateTime,
) -> bool {
    // When switching embedding models, index every real triple at least
    // once, disabled connectors included, or the swap could never complete.
    // The ingestion pseudo-connector is fed through the API and is the one
    // exception.
    if model.status == IndexModelStatus::Future && last_attempt.is_none() {
        return connector.id != INGESTION_API_CONNECTOR_ID;
    }

    if connector.disabled {
        return false;
    }
    let refresh_freq = match connector.refresh_freq {
        Some(seconds) => seconds,
        // Manual-only connector.
        None => return false,
    };
    let last_attempt = match last_attempt {
        Some(attempt) => attempt,
        None => return true,
    };

    // One queued attempt per triple at a time. A second one behind a
    // *running* attempt is equally pointless: the running one will finish no
    // earlier than now, so the cadence check below already covers it.
    if last_attempt.status == IndexingStatus::NotStarted {
        return false;
    }

    now - last_attempt.time_updated >= Duration::seconds(refresh_freq)
}
