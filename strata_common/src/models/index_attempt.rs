use diesel::dsl;

use crate::prelude::*;
use crate::schema::*;

/// One scheduled (and later executed) indexing run for a (connector,
/// credential, embedding model) triple.
///
/// Workers bump `time_updated` on every progress batch; the supervisor's
/// stall detection depends on it.
#[derive(Clone, Debug, Deserialize, Identifiable, Queryable, Serialize)]
pub struct IndexAttempt {
    /// The unique ID of this attempt.
    pub id: i32,
    /// The connector indexed by this attempt. `None` once the connector row
    /// has been deleted.
    pub connector_id: Option<i32>,
    /// The credential used by this attempt. `None` once the credential row
    /// has been deleted.
    pub credential_id: Option<i32>,
    /// The embedding model this run indexes into.
    pub embedding_model_id: i32,
    /// The current status of this attempt.
    pub status: IndexingStatus,
    /// Why the attempt failed, when it did.
    pub failure_reason: Option<String>,
    /// When this attempt was created.
    pub time_created: NaiveDateTime,
    /// When this attempt last made progress.
    pub time_updated: NaiveDateTime,
}

impl IndexAttempt {
    /// Find an attempt by ID, if it still exists.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn find(id: i32, conn: &mut PgConnection) -> Result<Option<IndexAttempt>> {
        index_attempts::table
            .find(id)
            .first(conn)
            .optional()
            .with_context(|| format!("could not load index attempt {}", id))
    }

    /// The most recent attempt for one triple, by progress time.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn last_attempt(
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
        conn: &mut PgConnection,
    ) -> Result<Option<IndexAttempt>> {
        index_attempts::table
            .filter(index_attempts::connector_id.eq(connector_id))
            .filter(index_attempts::credential_id.eq(credential_id))
            .filter(index_attempts::embedding_model_id.eq(model_id))
            .order_by(index_attempts::time_updated.desc())
            .first(conn)
            .optional()
            .context("could not load the last index attempt")
    }

    /// All attempts still waiting for a worker, oldest first.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn not_started(conn: &mut PgConnection) -> Result<Vec<IndexAttempt>> {
        index_attempts::table
            .filter(index_attempts::status.eq(IndexingStatus::NotStarted))
            .order_by(index_attempts::time_created)
            .load(conn)
            .context("could not list attempts waiting to start")
    }

    /// All in-progress attempts for one connector.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn in_progress_for_connector(
        connector_id: i32,
        conn: &mut PgConnection,
    ) -> Result<Vec<IndexAttempt>> {
        index_attempts::table
            .filter(index_attempts::connector_id.eq(connector_id))
            .filter(index_attempts::status.eq(IndexingStatus::InProgress))
            .load(conn)
            .context("could not list in-progress attempts")
    }

    /// How many distinct (connector, credential) pairs have a terminal
    /// attempt against `model_id`. Drives the index swap condition.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn count_distinct_cc_pairs(model_id: i32, conn: &mut PgConnection) -> Result<i64> {
        // Diesel has no `COUNT(DISTINCT (a, b))`, but `dsl::sql` lets us
        // build the aggregate by hand.
        index_attempts::table
            .filter(index_attempts::embedding_model_id.eq(model_id))
            .filter(
                index_attempts::status
                    .eq_any(vec![IndexingStatus::Success, IndexingStatus::Failed]),
            )
            .select(dsl::sql::<diesel::sql_types::BigInt>(
                "count(distinct (connector_id, credential_id))",
            ))
            .first(conn)
            .context("could not count indexed cc-pairs")
    }

    /// Mark an attempt as failed, recording why.
    ///
    /// Idempotent: a terminal attempt is left untouched, including its
    /// `time_updated`. Both the supervisor (for orphaned and stalled runs)
    /// and the worker (for its own failures) funnel through here.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn mark_failed(id: i32, failure_reason: &str, conn: &mut PgConnection) -> Result<()> {
        diesel::update(
            index_attempts::table
                .filter(index_attempts::id.eq(id))
                .filter(index_attempts::status.eq_any(vec![
                    IndexingStatus::NotStarted,
                    IndexingStatus::InProgress,
                ])),
        )
        .set((
            index_attempts::status.eq(IndexingStatus::Failed),
            index_attempts::failure_reason.eq(failure_reason),
            index_attempts::time_updated.eq(dsl::now),
        ))
        .execute(conn)
        .with_context(|| format!("could not mark attempt {} as failed", id))?;
        Ok(())
    }

    /// Mark this attempt as picked up by a worker.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn mark_in_progress(&mut self, conn: &mut PgConnection) -> Result<()> {
        *self = diesel::update(index_attempts::table.filter(index_attempts::id.eq(self.id)))
            .set((
                index_attempts::status.eq(IndexingStatus::InProgress),
                index_attempts::time_updated.eq(dsl::now),
            ))
            .get_result(conn)
            .with_context(|| format!("could not mark attempt {} as in progress", self.id))?;
        Ok(())
    }

    /// Record one batch of progress.
    ///
    /// The supervisor declares runs that stop heartbeating frozen, so this
    /// must be called for every batch indexed.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn heartbeat(&mut self, conn: &mut PgConnection) -> Result<()> {
        *self = diesel::update(index_attempts::table.filter(index_attempts::id.eq(self.id)))
            .set(index_attempts::time_updated.eq(dsl::now))
            .get_result(conn)
            .with_context(|| format!("could not heartbeat attempt {}", self.id))?;
        Ok(())
    }

    /// Mark this attempt as successfully completed.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn mark_succeeded(&mut self, conn: &mut PgConnection) -> Result<()> {
        *self = diesel::update(index_attempts::table.filter(index_attempts::id.eq(self.id)))
            .set((
                index_attempts::status.eq(IndexingStatus::Success),
                index_attempts::time_updated.eq(dsl::now),
            ))
            .get_result(conn)
            .with_context(|| format!("could not mark attempt {} as succeeded", self.id))?;
        Ok(())
    }

    /// Generate a sample value for testing.
    pub fn factory(id: i32, connector_id: i32, credential_id: i32, model_id: i32) -> Self {
        let now = Utc::now().naive_utc();
        IndexAttempt {
            id,
            connector_id: Some(connector_id),
            credential_id: Some(credential_id),
            embedding_model_id: model_id,
            status: IndexingStatus::NotStarted,
            failure_reason: None,
            time_created: now,
            time_updated: now,
        }
    }
}

/// Data required to create a new `IndexAttempt`.
#[derive(Debug, Insertable)]
#[diesel(table_name = index_attempts)]
pub struct NewIndexAttempt {
    /// The connector to index.
    pub connector_id: i32,
    /// The credential to index with.
    pub credential_id: i32,
    /// The embedding model to index into.
    pub embedding_model_id: i32,
    /// The initial status, always [`IndexingStatus::NotStarted`].
    pub status: IndexingStatus,
}

impl NewIndexAttempt {
    /// Queue a new attempt for one triple.
    pub fn new(connector_id: i32, credential_id: i32, embedding_model_id: i32) -> Self {
        NewIndexAttempt {
            connector_id,
            credential_id,
            embedding_model_id,
            status: IndexingStatus::NotStarted,
        }
    }

    /// Insert a new attempt into the database.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn insert(&self, conn: &mut PgConnection) -> Result<IndexAttempt> {
        diesel::insert_into(index_attempts::table)
            .values(self)
            .get_result(conn)
            .context("error inserting index attempt")
    }
}
