use crate::prelude::*;
use crate::schema::*;

/// An access credential some connectors need to reach their source.
///
/// The supervisor never looks inside a credential; it only needs to know
/// whether the row still exists when an attempt is dispatched.
#[derive(Clone, Debug, Deserialize, Identifiable, Queryable, Serialize)]
pub struct Credential {
    /// The unique ID of this credential.
    pub id: i32,
    /// When this credential was created.
    pub time_created: NaiveDateTime,
}

impl Credential {
    /// Find a credential by ID, if it still exists.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn find(id: i32, conn: &mut PgConnection) -> Result<Option<Credential>> {
        credentials::table
            .find(id)
            .first(conn)
            .optional()
            .with_context(|| format!("could not load credential {}", id))
    }

    /// Generate a sample value for testing.
    pub fn factory(id: i32) -> Self {
        Credential {
            id,
            time_created: Utc::now().naive_utc(),
        }
    }
}
