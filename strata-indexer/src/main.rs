use std::{env, process};

use strata_common::{config, prelude::*, tracing_support};

/// Instructions on how to use this program.
const USAGE: &str = "Usage: strata-indexer <attempt id> [--threads N]";

/// Our main entry point.
fn main() {
    tracing_support::initialize_tracing();
    if let Err(err) = run() {
        eprintln!("{}", err.display_causes_and_backtrace());
        process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse our arguments manually, so we don't need to drag in a CLI
    // library for two flags.
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    if args.iter().any(|arg| arg == "--version") {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut attempt_id = None;
    let mut num_threads = config::min_threads_ml_models();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--threads" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow!("--threads requires a value"))?;
            num_threads = value.parse().context("can't parse --threads")?;
        } else if attempt_id.is_none() {
            attempt_id = Some(arg.parse::<i32>().context("can't parse attempt ID")?);
        } else {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    }
    let attempt_id = match attempt_id {
        Some(attempt_id) => attempt_id,
        None => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };
    debug!("attempt ID: {}, threads: {}", attempt_id, num_threads);

    strata_indexer::run_indexing_entrypoint(attempt_id, num_threads)
}
