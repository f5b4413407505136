//! The Strata indexing supervisor.
//!
//! At steady state this daemon decides which (connector, credential,
//! embedding model) triples deserve a fresh indexing run, dispatches those
//! runs to a worker pool, reaps finished and wedged runs, and atomically
//! swaps in a newly built secondary index once it has caught up with the
//! primary.

pub mod dispatcher;
pub mod jobs;
pub mod reaper;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod swap;
