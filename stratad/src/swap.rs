//! Promotes the secondary embedding model once its index has caught up.

use strata_common::prelude::*;

use crate::store::Store;

/// Swap the indices if the secondary model has covered every eligible pair.
///
/// Coverage means a *terminal* attempt (success or failure) for every real
/// (connector, credential) pair; requiring success would let one permanently
/// broken connector block the migration forever. Failures are retried on the
/// normal cadence once the model is primary.
pub fn check_index_swap<S: Store>(store: &mut S) -> Result<()> {
    let all_cc_pairs = store.list_cc_pairs()?;
    // The ingestion pseudo-pair is fed through the API and never scheduled,
    // so it is excluded from the condition by identity.
    let eligible = all_cc_pairs
        .iter()
        .filter(|pair| pair.connector_id != INGESTION_API_CONNECTOR_ID)
        .count() as i64;

    let future_model = match store.secondary_model()? {
        Some(model) => model,
        None => return Ok(()),
    };

    let attempted = store.count_distinct_cc_pairs_attempted(future_model.id)?;
    if attempted > eligible {
        bail!(
            "{} distinct cc-pairs have indexed against embedding model {} but only {} \
             are eligible; this should never happen",
            attempted,
            future_model.id,
            eligible
        );
    }
    if attempted < eligible {
        debug!(
            "embedding model {} has indexed {} of {} cc-pairs, not swapping yet",
            future_model.id, attempted, eligible
        );
        return Ok(());
    }

    let present_model = store.current_model()?;
    info!(
        "swapping indices: promoting embedding model {} ('{}'), demoting {} ('{}')",
        future_model.id, future_model.model_name, present_model.id, present_model.model_name
    );
    store.set_model_status(present_model.id, IndexModelStatus::Past)?;
    store.set_model_status(future_model.id, IndexModelStatus::Present)?;

    // The pairs have been mirroring the old primary; recount everything
    // against the new one.
    for cc_pair in &all_cc_pairs {
        store.resync_cc_pair(cc_pair)?;
    }
    Ok(())
}
