//! Database utilities.

use backoff::{retry, Error as BackoffError, ExponentialBackoff};
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::env;

use crate::prelude::*;

/// A pool of PostgreSQL connections, for long-running services.
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// A connection checked out of a [`PgPool`].
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// All schema migrations, embedded at compile time.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Get an appropriate database URL.
pub fn database_url() -> Result<String> {
    env::var("DATABASE_URL").context("DATABASE_URL must be set")
}

/// Connect to PostgreSQL.
pub fn connect() -> Result<PgConnection> {
    let database_url = database_url()?;
    let conn = PgConnection::establish(&database_url)
        .with_context(|| format!("error connecting to {}", database_url))?;
    Ok(conn)
}

/// Connect to PostgreSQL, retrying with exponential backoff.
///
/// Workers and the supervisor may come up before (or outlive a restart of)
/// the database, so initial connections are always worth retrying.
pub fn connect_with_retries() -> Result<PgConnection> {
    retry(ExponentialBackoff::default(), || {
        connect().map_err(|err| {
            warn!(
                "could not connect to the database (will retry): {}",
                err.display_causes_without_backtrace()
            );
            BackoffError::transient(err)
        })
    })
    .map_err(|err| match err {
        BackoffError::Transient { err, .. } => err,
        BackoffError::Permanent(err) => err,
    })
}

/// Build a connection pool of at most `max_size` connections.
pub fn pool(max_size: u32) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url()?);
    Pool::builder()
        .max_size(max_size)
        .build(manager)
        .context("could not create database connection pool")
}

/// Bring the database schema up to date.
pub fn run_pending_migrations(conn: &mut PgConnection) -> Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("could not run database migrations: {}", err))?;
    Ok(())
}

/// Fetch the database server's current time.
///
/// Every scheduling and stall decision compares against this clock; a local
/// timestamp is never compared to a stored one.
pub fn now(conn: &mut PgConnection) -> Result<NaiveDateTime> {
    diesel::select(diesel::dsl::now)
        .get_result(conn)
        .context("could not fetch the database's current time")
}
