//! The indexing worker.
//!
//! The supervisor only ever submits [`run_indexing_entrypoint`] to a worker
//! pool and watches the attempt row; every transition out of `NOT_STARTED`
//! happens here. The worker also bumps the row's `time_updated` for each
//! batch of documents it indexes, which is what the supervisor's stall
//! detection keys on.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use strata_common::{db, prelude::*};

/// How a connector's opaque configuration describes its ingest pipeline: a
/// command that fetches, embeds, and writes documents, printing one line per
/// completed batch.
#[derive(Debug, Deserialize)]
struct IngestSpec {
    /// The command to run, program first.
    cmd: Vec<String>,
    /// Extra environment variables for the command.
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Run one indexing attempt to completion.
///
/// `num_threads` is the ML thread budget for the run; it is exported to the
/// ingest command as `STRATA_NUM_THREADS`.
pub fn run_indexing_entrypoint(attempt_id: i32, num_threads: usize) -> Result<()> {
    let mut conn = db::connect_with_retries()?;

    let mut attempt = IndexAttempt::find(attempt_id, &mut conn)?
        .ok_or_else(|| anyhow!("index attempt {} does not exist", attempt_id))?;

    // The connector or credential may have been deleted since the attempt
    // was scheduled.
    let connector = match attempt.connector_id {
        Some(connector_id) => Connector::find(connector_id, &mut conn)?,
        None => None,
    };
    let connector = match connector {
        Some(connector) => connector,
        None => {
            IndexAttempt::mark_failed(attempt_id, "Connector is null", &mut conn)?;
            bail!("connector for index attempt {} has been deleted", attempt_id);
        }
    };
    let credential = match attempt.credential_id {
        Some(credential_id) => Credential::find(credential_id, &mut conn)?,
        None => None,
    };
    if credential.is_none() {
        IndexAttempt::mark_failed(attempt_id, "Credential is null", &mut conn)?;
        bail!("credential for index attempt {} has been deleted", attempt_id);
    }

    let spec = match parse_ingest_spec(&connector) {
        Ok(spec) => spec,
        Err(err) => {
            let reason = format!("{}", err.display_causes_without_backtrace());
            IndexAttempt::mark_failed(attempt_id, &reason, &mut conn)?;
            return Err(err);
        }
    };

    attempt.mark_in_progress(&mut conn)?;
    info!(
        "indexing attempt {} for connector '{}' started",
        attempt_id, connector.name
    );

    match run_ingest_command(&mut attempt, &spec, num_threads, &mut conn) {
        Ok(batches) => {
            // Reconnect before the final update; a long run may have
            // outlived the original connection.
            let mut conn = db::connect_with_retries()?;
            attempt.mark_succeeded(&mut conn)?;
            info!(
                "indexing attempt {} finished after {} batches",
                attempt_id, batches
            );
            Ok(())
        }
        Err(err) => {
            error!(
                "indexing attempt {} failed: {}",
                attempt_id,
                err.display_causes_and_backtrace()
            );
            let mut conn = db::connect_with_retries()?;
            let reason = format!("{}", err.display_causes_without_backtrace());
            IndexAttempt::mark_failed(attempt_id, &reason, &mut conn)?;
            Err(err)
        }
    }
}

/// Interpret a connector's opaque configuration as an ingest command.
fn parse_ingest_spec(connector: &Connector) -> Result<IngestSpec> {
    let spec: IngestSpec = serde_json::from_value(connector.config.clone())
        .with_context(|| format!("invalid ingest config for connector {}", connector.id))?;
    if spec.cmd.is_empty() {
        bail!("connector {} has an empty ingest command", connector.id);
    }
    Ok(spec)
}

/// Spawn the ingest command and drain its stdout, treating each line as one
/// completed batch of documents.
fn run_ingest_command(
    attempt: &mut IndexAttempt,
    spec: &IngestSpec,
    num_threads: usize,
    conn: &mut PgConnection,
) -> Result<u64> {
    let (program, args) = spec
        .cmd
        .split_first()
        .expect("ingest command was checked to be non-empty");
    let mut child = Command::new(program)
        .args(args)
        .envs(&spec.env)
        .env("STRATA_NUM_THREADS", num_threads.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        // stderr passes straight through to our own log output.
        .spawn()
        .with_context(|| format!("could not start ingest command {:?}", spec.cmd))?;

    let stdout = child.stdout.take().expect("child stdout was not captured");
    let mut batches = 0u64;
    for line in BufReader::new(stdout).lines() {
        let line = line.context("error reading ingest command output")?;
        trace!("attempt {} completed a batch: {}", attempt.id, line);
        batches += 1;
        attempt.heartbeat(conn)?;
    }

    let status = child.wait().context("error waiting for ingest command")?;
    if !status.success() {
        bail!("ingest command {:?} failed with {}", spec.cmd, status);
    }
    Ok(batches)
}
