//! Database models.

use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql};
use diesel::pg::Pg;
use diesel::serialize::{self, IsNull, ToSql};
use std::io::Write;

use crate::prelude::*;

mod cc_pair;
mod connector;
mod credential;
mod embedding_model;
mod index_attempt;

pub use self::cc_pair::*;
pub use self::connector::*;
pub use self::credential::*;
pub use self::embedding_model::*;
pub use self::index_attempt::*;

/// Custom SQL types.
pub mod sql_types {
    /// The `indexing_status` enumeration type for use in Diesel's `table!`
    /// macro.
    #[derive(QueryId, SqlType)]
    #[diesel(postgres_type(name = "indexing_status"))]
    pub struct IndexingStatusType;

    /// The `index_model_status` enumeration type for use in Diesel's `table!`
    /// macro.
    #[derive(QueryId, SqlType)]
    #[diesel(postgres_type(name = "index_model_status"))]
    pub struct IndexModelStatusType;
}

/// Lifecycle states of an indexing attempt.
///
/// The supervisor owns only the transitions into [`IndexingStatus::Failed`]
/// for orphaned and stalled attempts; workers own everything else.
#[derive(
    AsExpression,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    FromSqlRow,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[diesel(sql_type = sql_types::IndexingStatusType)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    /// The attempt is queued, waiting for a worker to pick it up.
    NotStarted,
    /// A worker is indexing this attempt.
    InProgress,
    /// The run completed and every batch was written to the index.
    Success,
    /// The run failed, or the supervisor declared it dead.
    Failed,
}

impl IndexingStatus {
    /// Return true if this attempt has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        match self {
            IndexingStatus::NotStarted | IndexingStatus::InProgress => false,
            IndexingStatus::Success | IndexingStatus::Failed => true,
        }
    }
}

impl fmt::Display for IndexingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IndexingStatus::NotStarted => "not_started",
            IndexingStatus::InProgress => "in_progress",
            IndexingStatus::Success => "success",
            IndexingStatus::Failed => "failed",
        };
        s.fmt(f)
    }
}

impl ToSql<sql_types::IndexingStatusType, Pg> for IndexingStatus {
    fn to_sql(&self, out: &mut serialize::Output<'_, '_, Pg>) -> serialize::Result {
        match *self {
            IndexingStatus::NotStarted => out.write_all(b"not_started")?,
            IndexingStatus::InProgress => out.write_all(b"in_progress")?,
            IndexingStatus::Success => out.write_all(b"success")?,
            IndexingStatus::Failed => out.write_all(b"failed")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<sql_types::IndexingStatusType, Pg> for IndexingStatus {
    fn from_sql(bytes: <Pg as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        match <String as FromSql<diesel::sql_types::Text, Pg>>::from_sql(bytes)?.as_str() {
            "not_started" => Ok(IndexingStatus::NotStarted),
            "in_progress" => Ok(IndexingStatus::InProgress),
            "success" => Ok(IndexingStatus::Success),
            "failed" => Ok(IndexingStatus::Failed),
            val => Err(format!("Unrecognized indexing status from database: {}", val).into()),
        }
    }
}

/// Where an embedding model stands in the index lifecycle.
///
/// Exactly one model is `Present` at any moment; during a migration a second
/// one is `Future` until the swap promotes it.
#[derive(
    AsExpression,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    FromSqlRow,
    PartialEq,
    Serialize,
)]
#[diesel(sql_type = sql_types::IndexModelStatusType)]
#[serde(rename_all = "snake_case")]
pub enum IndexModelStatus {
    /// A previously active model, kept only for bookkeeping.
    Past,
    /// The model behind the primary index.
    Present,
    /// A model whose secondary index is still being built.
    Future,
}

impl fmt::Display for IndexModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IndexModelStatus::Past => "past",
            IndexModelStatus::Present => "present",
            IndexModelStatus::Future => "future",
        };
        s.fmt(f)
    }
}

impl ToSql<sql_types::IndexModelStatusType, Pg> for IndexModelStatus {
    fn to_sql(&self, out: &mut serialize::Output<'_, '_, Pg>) -> serialize::Result {
        match *self {
            IndexModelStatus::Past => out.write_all(b"past")?,
            IndexModelStatus::Present => out.write_all(b"present")?,
            IndexModelStatus::Future => out.write_all(b"future")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<sql_types::IndexModelStatusType, Pg> for IndexModelStatus {
    fn from_sql(bytes: <Pg as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        match <String as FromSql<diesel::sql_types::Text, Pg>>::from_sql(bytes)?.as_str() {
            "past" => Ok(IndexModelStatus::Past),
            "present" => Ok(IndexModelStatus::Present),
            "future" => Ok(IndexModelStatus::Future),
            val => Err(format!("Unrecognized model status from database: {}", val).into()),
        }
    }
}
