//! The durable-state gateway the control loop programs against.

use strata_common::prelude::*;

mod mem;
mod pg;

pub use self::mem::MemStore;
pub use self::pg::PgStore;

/// Read and write operations against the durable state.
///
/// Implementations open their own short-lived session per call; the loop
/// never holds one across components, deliberately trading cross-component
/// read consistency for robustness against long ticks.
///
/// Row lookups are explicit (`connector`, `credential`, `model`) rather than
/// navigated from an attempt, because the referenced rows may have been
/// deleted since the attempt row was written.
pub trait Store {
    /// All configured connectors.
    fn list_connectors(&mut self) -> Result<Vec<Connector>>;

    /// One connector, or `None` if the row has been deleted.
    fn connector(&mut self, connector_id: i32) -> Result<Option<Connector>>;

    /// One credential, or `None` if the row has been deleted.
    fn credential(&mut self, credential_id: i32) -> Result<Option<Credential>>;

    /// All (connector, credential) pairs.
    fn list_cc_pairs(&mut self) -> Result<Vec<ConnectorCredentialPair>>;

    /// Set the user-visible status of one pair.
    fn update_cc_pair_status(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        status: IndexingStatus,
    ) -> Result<()>;

    /// Recompute a pair's aggregates from the current primary model's
    /// attempts. Called for every pair after a swap.
    fn resync_cc_pair(&mut self, cc_pair: &ConnectorCredentialPair) -> Result<()>;

    /// Fail every pair claiming an in-progress run; startup recovery.
    fn mark_all_in_progress_cc_pairs_failed(&mut self) -> Result<()>;

    /// The embedding model behind the primary index.
    fn current_model(&mut self) -> Result<EmbeddingModel>;

    /// The embedding model being migrated to, if any.
    fn secondary_model(&mut self) -> Result<Option<EmbeddingModel>>;

    /// One model, or `None` if the row has been deleted.
    fn model(&mut self, model_id: i32) -> Result<Option<EmbeddingModel>>;

    /// Move a model to a new lifecycle status.
    fn set_model_status(&mut self, model_id: i32, status: IndexModelStatus) -> Result<()>;

    /// One attempt, or `None` if the row has been deleted.
    fn attempt(&mut self, attempt_id: i32) -> Result<Option<IndexAttempt>>;

    /// The most recent attempt for one triple.
    fn last_attempt(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
    ) -> Result<Option<IndexAttempt>>;

    /// All attempts still waiting for a worker.
    fn attempts_not_started(&mut self) -> Result<Vec<IndexAttempt>>;

    /// All in-progress attempts for one connector.
    fn attempts_in_progress(&mut self, connector_id: i32) -> Result<Vec<IndexAttempt>>;

    /// How many distinct pairs have a terminal attempt against `model_id`.
    fn count_distinct_cc_pairs_attempted(&mut self, model_id: i32) -> Result<i64>;

    /// Queue a `NOT_STARTED` attempt for one triple.
    fn create_attempt(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
    ) -> Result<IndexAttempt>;

    /// Fail an attempt, recording why. No-op on terminal attempts.
    fn mark_attempt_failed(&mut self, attempt_id: i32, failure_reason: &str) -> Result<()>;

    /// The database server's clock. Scheduling and stall decisions never use
    /// the supervisor's wall clock.
    fn now(&mut self) -> Result<NaiveDateTime>;
}
