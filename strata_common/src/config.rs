//! Environment-driven configuration.
//!
//! Every tunable has a code default so a bare `DATABASE_URL` is enough to
//! run. Values are read when asked for, not cached, so anything queried per
//! tick (like the ML thread floor) picks up changes promptly.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Read `name` from the environment, falling back to `default` when the
/// variable is unset or unparseable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => value.parse().unwrap_or(default),
        Err(_) => default,
    }
}

/// How long the supervisor waits between ticks.
pub fn poll_delay() -> Duration {
    Duration::from_secs(env_or("STRATA_POLL_DELAY_SECONDS", 10))
}

/// Worker count for each indexing pool (one pool per embedding model).
pub fn num_indexing_workers() -> usize {
    env_or("STRATA_NUM_INDEXING_WORKERS", 1)
}

/// How long a tracked run may go without bumping its attempt row before the
/// reaper assumes it has frozen.
pub fn stall_timeout_hours() -> i64 {
    env_or("STRATA_INDEXING_STALL_TIMEOUT_HOURS", 3)
}

/// Run indexing jobs as spawned `strata-indexer` processes instead of the
/// in-process worker pool.
pub fn spawned_job_client_enabled() -> bool {
    env_or("STRATA_SPAWNED_JOB_CLIENT", false)
}

/// Floor for the per-job ML thread count.
pub fn min_threads_ml_models() -> usize {
    env_or("STRATA_MIN_THREADS_ML_MODELS", 1)
}

/// The `strata-indexer` binary the spawned job client launches.
pub fn indexer_binary() -> String {
    env::var("STRATA_INDEXER_BIN").unwrap_or_else(|_| "strata-indexer".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        assert_eq!(env_or("STRATA_TEST_DOES_NOT_EXIST", 42_i64), 42);
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        env::set_var("STRATA_TEST_GARBAGE_VALUE", "three");
        assert_eq!(env_or("STRATA_TEST_GARBAGE_VALUE", 3_u64), 3);
    }

    #[test]
    fn set_variables_are_parsed() {
        env::set_var("STRATA_TEST_SET_VALUE", "17");
        assert_eq!(env_or("STRATA_TEST_SET_VALUE", 3_u64), 17);
    }
}
