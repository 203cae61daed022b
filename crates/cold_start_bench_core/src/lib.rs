//! Shared cold-start benchmark domain primitives.
//!
//! This crate owns the data model, statistics, configuration, storage key
//! scheme, reading consolidation and report rendering. It intentionally
//! excludes HTTP clients, cloud SDKs and the async runtime; those live in
//! `cold_start_bench_runner`.

pub mod config;
pub mod consolidate;
pub mod contract;
pub mod duration;
pub mod report;
pub mod stats;
pub mod storage_keys;
