use crate::prelude::*;
use crate::schema::*;

/// A vectorization configuration backing one index.
#[derive(Clone, Debug, Deserialize, Identifiable, Queryable, Serialize)]
pub struct EmbeddingModel {
    /// The unique ID of this model.
    pub id: i32,
    /// The model's name, as understood by the embedding service.
    pub model_name: String,
    /// Where this model stands in the index lifecycle.
    pub status: IndexModelStatus,
    /// When this model was registered.
    pub time_created: NaiveDateTime,
}

impl EmbeddingModel {
    /// Find a model by ID, if it still exists.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn find(id: i32, conn: &mut PgConnection) -> Result<Option<EmbeddingModel>> {
        embedding_models::table
            .find(id)
            .first(conn)
            .optional()
            .with_context(|| format!("could not load embedding model {}", id))
    }

    /// The model behind the primary index. Exactly one model is `Present` at
    /// any moment; a store without one is broken.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn current(conn: &mut PgConnection) -> Result<EmbeddingModel> {
        embedding_models::table
            .filter(embedding_models::status.eq(IndexModelStatus::Present))
            .first(conn)
            .context("no embedding model is marked as present")
    }

    /// The model whose secondary index is being built, if a migration is
    /// underway.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn secondary(conn: &mut PgConnection) -> Result<Option<EmbeddingModel>> {
        embedding_models::table
            .filter(embedding_models::status.eq(IndexModelStatus::Future))
            .first(conn)
            .optional()
            .context("could not load the secondary embedding model")
    }

    /// Move a model to a new lifecycle status.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn set_status(
        id: i32,
        new_status: IndexModelStatus,
        conn: &mut PgConnection,
    ) -> Result<()> {
        diesel::update(embedding_models::table.find(id))
            .set(embedding_models::status.eq(new_status))
            .execute(conn)
            .with_context(|| format!("could not update status of embedding model {}", id))?;
        Ok(())
    }

    /// Generate a sample value for testing.
    pub fn factory(id: i32, status: IndexModelStatus) -> Self {
        EmbeddingModel {
            id,
            model_name: format!("model-{}", id),
            status,
            time_created: Utc::now().naive_utc(),
        }
    }
}
