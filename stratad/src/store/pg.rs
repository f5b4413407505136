//! The PostgreSQL store.

use strata_common::db::{self, PgPool, PgPooledConnection};
use strata_common::prelude::*;

use super::Store;

/// Connections the supervisor keeps around. One is enough for a strictly
/// sequential loop; a second covers pool checkouts that overlap a retry.
const POOL_SIZE: u32 = 2;

/// A [`Store`] backed by PostgreSQL.
///
/// Every operation checks its own connection out of the pool and returns it
/// when done, so no session outlives a single store call.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using `DATABASE_URL`.
    pub fn connect() -> Result<PgStore> {
        Ok(PgStore {
            pool: db::pool(POOL_SIZE)?,
        })
    }

    fn conn(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .context("could not check out a database connection")
    }
}

impl Store for PgStore {
    fn list_connectors(&mut self) -> Result<Vec<Connector>> {
        let mut conn = self.conn()?;
        Connector::list(&mut conn)
    }

    fn connector(&mut self, connector_id: i32) -> Result<Option<Connector>> {
        let mut conn = self.conn()?;
        Connector::find(connector_id, &mut conn)
    }

    fn credential(&mut self, credential_id: i32) -> Result<Option<Credential>> {
        let mut conn = self.conn()?;
        Credential::find(credential_id, &mut conn)
    }

    fn list_cc_pairs(&mut self) -> Result<Vec<ConnectorCredentialPair>> {
        let mut conn = self.conn()?;
        ConnectorCredentialPair::list(&mut conn)
    }

    fn update_cc_pair_status(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        status: IndexingStatus,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        ConnectorCredentialPair::update_status(connector_id, credential_id, status, &mut conn)
    }

    fn resync_cc_pair(&mut self, cc_pair: &ConnectorCredentialPair) -> Result<()> {
        let mut conn = self.conn()?;
        let present = EmbeddingModel::current(&mut conn)?;
        cc_pair.resync(present.id, &mut conn)
    }

    fn mark_all_in_progress_cc_pairs_failed(&mut self) -> Result<()> {
        let mut conn = self.conn()?;
        let recovered = ConnectorCredentialPair::mark_all_in_progress_failed(&mut conn)?;
        if recovered > 0 {
            warn!(
                "recovered {} cc-pairs left claiming an in-progress run",
                recovered
            );
        }
        Ok(())
    }

    fn current_model(&mut self) -> Result<EmbeddingModel> {
        let mut conn = self.conn()?;
        EmbeddingModel::current(&mut conn)
    }

    fn secondary_model(&mut self) -> Result<Option<EmbeddingModel>> {
        let mut conn = self.conn()?;
        EmbeddingModel::secondary(&mut conn)
    }

    fn model(&mut self, model_id: i32) -> Result<Option<EmbeddingModel>> {
        let mut conn = self.conn()?;
        EmbeddingModel::find(model_id, &mut conn)
    }

    fn set_model_status(&mut self, model_id: i32, status: IndexModelStatus) -> Result<()> {
        let mut conn = self.conn()?;
        EmbeddingModel::set_status(model_id, status, &mut conn)
    }

    fn attempt(&mut self, attempt_id: i32) -> Result<Option<IndexAttempt>> {
        let mut conn = self.conn()?;
        IndexAttempt::find(attempt_id, &mut conn)
    }

    fn last_attempt(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
    ) -> Result<Option<IndexAttempt>> {
        let mut conn = self.conn()?;
        IndexAttempt::last_attempt(connector_id, credential_id, model_id, &mut conn)
    }

    fn attempts_not_started(&mut self) -> Result<Vec<IndexAttempt>> {
        let mut conn = self.conn()?;
        IndexAttempt::not_started(&mut conn)
    }

    fn attempts_in_progress(&mut self, connector_id: i32) -> Result<Vec<IndexAttempt>> {
        let mut conn = self.conn()?;
        IndexAttempt::in_progress_for_connector(connector_id, &mut conn)
    }

    fn count_distinct_cc_pairs_attempted(&mut self, model_id: i32) -> Result<i64> {
        let mut conn = self.conn()?;
        IndexAttempt::count_distinct_cc_pairs(model_id, &mut conn)
    }

    fn create_attempt(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
    ) -> Result<IndexAttempt> {
        let mut conn = self.conn()?;
        NewIndexAttempt::new(connector_id, credential_id, model_id).insert(&mut conn)
    }

    fn mark_attempt_failed(&mut self, attempt_id: i32, failure_reason: &str) -> Result<()> {
        let mut conn = self.conn()?;
        IndexAttempt::mark_failed(attempt_id, failure_reason, &mut conn)
    }

    fn now(&mut self) -> Result<NaiveDateTime> {
        let mut conn = self.conn()?;
        db::now(&mut conn)
    }
}
