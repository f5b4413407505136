use diesel::dsl;

use crate::prelude::*;
use crate::schema::*;

/// A (connector, credential) pairing, carrying the user-visible indexing
/// status of its most recent run against the primary embedding model.
///
/// Runs against a `Future` model never touch this row until the indices are
/// swapped, at which point [`ConnectorCredentialPair::resync`] recomputes it.
#[derive(Clone, Debug, Deserialize, Identifiable, Queryable, Serialize)]
#[diesel(table_name = connector_credential_pairs)]
#[diesel(primary_key(connector_id, credential_id))]
pub struct ConnectorCredentialPair {
    /// The connector half of this pair.
    pub connector_id: i32,
    /// The credential half of this pair.
    pub credential_id: i32,
    /// When this pair was created.
    pub time_created: NaiveDateTime,
    /// Status of the latest indexing run against the primary model, if any.
    pub last_attempt_status: Option<IndexingStatus>,
    /// When this pair last finished a successful run against the primary
    /// model.
    pub last_successful_index_time: Option<NaiveDateTime>,
}

impl ConnectorCredentialPair {
    /// Get all known pairs.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn list(conn: &mut PgConnection) -> Result<Vec<ConnectorCredentialPair>> {
        connector_credential_pairs::table
            .order_by((
                connector_credential_pairs::connector_id,
                connector_credential_pairs::credential_id,
            ))
            .load(conn)
            .context("could not list connector credential pairs")
    }

    /// Set the user-visible status of one pair.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn update_status(
        connector_id: i32,
        credential_id: i32,
        status: IndexingStatus,
        conn: &mut PgConnection,
    ) -> Result<()> {
        diesel::update(
            connector_credential_pairs::table
                .filter(connector_credential_pairs::connector_id.eq(connector_id))
                .filter(connector_credential_pairs::credential_id.eq(credential_id)),
        )
        .set(connector_credential_pairs::last_attempt_status.eq(status))
        .execute(conn)
        .with_context(|| {
            format!(
                "could not update status of cc-pair ({}, {})",
                connector_id, credential_id
            )
        })?;
        Ok(())
    }

    /// Recompute this pair's aggregates from the attempts recorded against
    /// `model_id` (the embedding model that just became primary).
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn resync(&self, model_id: i32, conn: &mut PgConnection) -> Result<()> {
        let latest: Option<IndexAttempt> = index_attempts::table
            .filter(index_attempts::connector_id.eq(self.connector_id))
            .filter(index_attempts::credential_id.eq(self.credential_id))
            .filter(index_attempts::embedding_model_id.eq(model_id))
            .order_by(index_attempts::time_updated.desc())
            .first(conn)
            .optional()
            .context("could not load latest attempt while resyncing cc-pair")?;
        let latest_success: Option<NaiveDateTime> = index_attempts::table
            .filter(index_attempts::connector_id.eq(self.connector_id))
            .filter(index_attempts::credential_id.eq(self.credential_id))
            .filter(index_attempts::embedding_model_id.eq(model_id))
            .filter(index_attempts::status.eq(IndexingStatus::Success))
            .select(dsl::max(index_attempts::time_updated))
            .first(conn)
            .context("could not load latest success while resyncing cc-pair")?;

        diesel::update(self)
            .set((
                connector_credential_pairs::last_attempt_status
                    .eq(latest.map(|attempt| attempt.status)),
                connector_credential_pairs::last_successful_index_time.eq(latest_success),
            ))
            .execute(conn)
            .context("could not resync cc-pair")?;
        Ok(())
    }

    /// Mark every pair claiming an in-progress run as failed.
    ///
    /// Run once at supervisor startup: a killed supervisor can leave pairs
    /// claiming `IN_PROGRESS` with no live job behind them.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn mark_all_in_progress_failed(conn: &mut PgConnection) -> Result<usize> {
        diesel::update(
            connector_credential_pairs::table.filter(
                connector_credential_pairs::last_attempt_status
                    .eq(IndexingStatus::InProgress),
            ),
        )
        .set(connector_credential_pairs::last_attempt_status.eq(IndexingStatus::Failed))
        .execute(conn)
        .context("could not fail in-progress cc-pairs")
    }

    /// Generate a sample value for testing.
    pub fn factory(connector_id: i32, credential_id: i32) -> Self {
        ConnectorCredentialPair {
            connector_id,
            credential_id,
            time_created: Utc::now().naive_utc(),
            last_attempt_status: None,
            last_successful_index_time: None,
        }
    }
}
