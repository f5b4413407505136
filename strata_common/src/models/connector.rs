use serde_json::json;

use crate::prelude::*;
use crate::schema::*;

/// The reserved id of the ingestion-API pseudo-connector.
///
/// Its documents arrive through the HTTP ingestion surface, so the supervisor
/// must never schedule indexing runs for it.
pub const INGESTION_API_CONNECTOR_ID: i32 = 0;

/// A configured document source.
#[derive(Clone, Debug, Deserialize, Identifiable, Queryable, Serialize)]
pub struct Connector {
    /// The unique ID of this connector.
    pub id: i32,
    /// Human-readable name, shown in logs and the admin surface.
    pub name: String,
    /// Source-specific configuration. Opaque to the supervisor; the worker
    /// interprets it.
    pub config: serde_json::Value,
    /// Seconds between scheduled indexing runs. `None` marks a manual-only
    /// connector.
    pub refresh_freq: Option<i64>,
    /// Disabled connectors are not scheduled, except for the one forced
    /// build during an embedding model migration.
    pub disabled: bool,
    /// When this connector was created.
    pub time_created: NaiveDateTime,
    /// When this connector was last updated.
    pub time_updated: NaiveDateTime,
}

impl Connector {
    /// Find a connector by ID, if it still exists.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn find(id: i32, conn: &mut PgConnection) -> Result<Option<Connector>> {
        connectors::table
            .find(id)
            .first(conn)
            .optional()
            .with_context(|| format!("could not load connector {}", id))
    }

    /// Get all known connectors.
    #[tracing::instrument(skip(conn), level = "trace")]
    pub fn list(conn: &mut PgConnection) -> Result<Vec<Connector>> {
        connectors::table
            .order_by(connectors::id)
            .load(conn)
            .context("could not list connectors")
    }

    /// Generate a sample value for testing.
    pub fn factory(id: i32) -> Self {
        let now = Utc::now().naive_utc();
        Connector {
            id,
            name: format!("connector-{}", id),
            config: json!({ "cmd": ["true"] }),
            refresh_freq: Some(60),
            disabled: false,
            time_created: now,
            time_updated: now,
        }
    }
}
