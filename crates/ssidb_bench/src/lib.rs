//! Shared helpers for the SSIDB benchmarks.

pub mod utils;
