//! The Strata indexing supervisor daemon.

use std::process;
use std::sync::Arc;

use strata_common::{config, db, prelude::*, tracing_support};
use stratad::jobs::{JobClient, LocalJobClient, SpawnedJobClient, WorkerEntrypoint};
use stratad::store::PgStore;
use stratad::supervisor::{Supervisor, SupervisorConfig};

fn main() {
    tracing_support::initialize_tracing();
    if let Err(err) = run() {
        eprintln!("{}", err.display_causes_and_backtrace());
        process::exit(1);
    }
}

fn run() -> Result<()> {
    info!("starting indexing supervisor");

    let mut conn = db::connect_with_retries()?;
    db::run_pending_migrations(&mut conn)?;
    drop(conn);

    let (primary_client, secondary_client) = build_job_clients()?;
    let store = PgStore::connect()?;
    let mut supervisor = Supervisor::new(
        store,
        primary_client,
        secondary_client,
        SupervisorConfig::from_env(),
    );
    supervisor.run()
}

/// Build the primary and secondary pool clients.
///
/// Pool policy (worker counts, client variant, worker binary) is decided
/// here, once, and never inside the loop body.
fn build_job_clients() -> Result<(JobClient, JobClient)> {
    if config::spawned_job_client_enabled() {
        return Ok((
            JobClient::Spawned(SpawnedJobClient::new()),
            JobClient::Spawned(SpawnedJobClient::new()),
        ));
    }

    let num_workers = config::num_indexing_workers();
    let entrypoint: WorkerEntrypoint = Arc::new(strata_indexer::run_indexing_entrypoint);
    Ok((
        JobClient::Local(LocalJobClient::new(num_workers, entrypoint.clone())?),
        JobClient::Local(LocalJobClient::new(num_workers, entrypoint)?),
    ))
}
