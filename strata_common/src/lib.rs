//! Code shared between the Strata indexing supervisor and its workers.

#![warn(missing_docs)]

#[macro_use]
pub extern crate diesel;

pub use chrono;
pub use serde_json;

pub mod config;
pub mod db;
pub mod errors;
pub mod models;
#[allow(missing_docs, unused_imports)]
mod schema;
pub mod tracing_support;

/// Common imports used by many modules.
pub mod prelude {
    pub use anyhow::{anyhow, bail, ensure, Context};
    pub use chrono::{Duration, NaiveDateTime, Utc};
    pub use diesel::{self, prelude::*, PgConnection};
    pub use serde::{Deserialize, Serialize};
    pub use std::{
        collections::{HashMap, HashSet},
        fmt,
    };
    pub use tracing::{debug, error, info, trace, warn};

    pub use crate::errors::DisplayCausesAndBacktraceExt;
    pub use crate::models::*;
    pub use crate::{Error, Result};
}

/// Error type for this crate's functions.
pub type Error = anyhow::Error;

/// Result type for this crate's functions.
pub type Result<T> = std::result::Result<T, Error>;
