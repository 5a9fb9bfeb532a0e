//! # SSIDB Testkit
//!
//! Test utilities for SSIDB.
//!
//! This crate provides:
//! - In-process cluster fixtures wired through the loopback transport
//! - Recording and failing persistence sinks
//! - Property-based test generators using proptest
//! - Concurrent stress workloads
//!
//! ## Usage
//!
//! ```rust
//! use ssidb_testkit::prelude::*;
//!
//! let cluster = TestCluster::two_node();
//! let commit = cluster.commit_writes(0, &[("x", "1"), ("y", "1")]).unwrap();
//! assert_eq!(commit, cluster.version(&[1, 1]));
//! assert_eq!(cluster.read_latest("y"), Some(b"1".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
