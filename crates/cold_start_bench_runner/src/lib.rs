//! Network-facing side of the cold-start benchmark: request signing, the
//! Cloud Run and object-store adapters, the benchmark components, and the
//! command handlers behind the `cold-start-bench` binary.
//!
//! Pure domain types, statistics and report rendering live in
//! `cold_start_bench_core`.

pub mod adapters;
pub mod benchmark;
pub mod handlers;
pub mod logging;
pub mod persistence;
pub mod signer;
