//! # SSIDB Core
//!
//! Multiversion concurrency core for a partitioned in-memory key-value
//! store, providing snapshot reads and serializable snapshot isolation
//! across partitions.
//!
//! This crate provides:
//! - Vector-clock version algebra over cluster views
//! - Per-key version chains and commit trace chains in a slot arena
//! - A sharded data container with visible-read watermarks
//! - Prepare-time validation in plain or SSI mode
//! - A per-node commit queue that applies commits in version order
//! - The node participant and the coordinator driving two-phase commit
//! - Garbage collection behind the cluster-wide snapshot floor
//! - In-process clusters over the loopback transport
//!
//! ## Modes
//!
//! [`ValidationMode`] and [`OrderingMode`] are chosen once in
//! [`CoreConfig`]. Every combination is supported.
//!
//! ## Example
//!
//! ```rust
//! use ssidb_core::{
//!     ClusterSnapshot, Coordinator, CoreConfig, HashOwnership, Key, LoopbackTransport,
//!     NodeAddress, NodeEngine, ViewId, ViewRegistry,
//! };
//! use std::sync::Arc;
//!
//! let address = NodeAddress::from("n0");
//! let views = Arc::new(ViewRegistry::with_view(ClusterSnapshot::new(
//!     ViewId::new(1),
//!     vec![address.clone()],
//! )));
//! let node = Arc::new(
//!     NodeEngine::new(CoreConfig::default(), address, views, Arc::new(HashOwnership::default()))
//!         .unwrap(),
//! );
//! let transport = Arc::new(LoopbackTransport::new());
//! transport.register(Arc::clone(&node));
//! let coordinator = Coordinator::new(node, transport);
//!
//! let mut tx = coordinator.begin().unwrap();
//! coordinator.write(&mut tx, Key::from("k"), b"v".to_vec()).unwrap();
//! let commit = coordinator.commit(&mut tx).unwrap();
//!
//! let mut reader = coordinator.begin_after(Some(&commit)).unwrap();
//! assert_eq!(coordinator.read(&mut reader, &Key::from("k")).unwrap(), Some(b"v".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod cluster;
pub mod commit_log;
pub mod config;
pub mod container;
pub mod coordinator;
pub mod error;
pub mod gc;
pub mod messages;
pub mod node;
pub mod ownership;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod total_order;
pub mod transaction;
pub mod transport;
pub mod types;
pub mod validation;
pub mod version;

pub use cluster::{node_address, LocalCluster, LocalClusterBuilder, FIRST_VIEW};
pub use commit_log::{CommitLog, LogPosition};
pub use config::{CoreConfig, OrderingMode, ValidationMode};
pub use container::{CacheEntry, DataContainer, EntryState};
pub use coordinator::Coordinator;
pub use error::{AbortReason, CoreError, CoreResult};
pub use gc::{GarbageCollector, GcReport, GcWorker};
pub use messages::{
    CommitRequest, PrepareRequest, PrepareVote, ReadRequest, ReadResponse, Response,
    RollbackRequest, SnapshotFloorRequest,
};
pub use node::NodeEngine;
pub use ownership::{ExplicitOwnership, HashOwnership, KeyOwnership};
pub use scheduler::{CommitScheduler, QueueState};
pub use sink::{NoopSink, PersistenceSink, SinkError};
pub use stats::{NodeStats, StatsSnapshot};
pub use total_order::TotalOrderSequencer;
pub use transaction::{Modification, Transaction, TransactionState, WriteOp};
pub use transport::{ClusterTransport, LoopbackTransport};
pub use types::{GlobalTxId, Key, NodeAddress, Value, ViewId};
pub use version::{
    ClusterSnapshot, DistributedVersion, EntryCreationVersion, ReadWindowVersion,
    ReplicatedVersion, Version, VersionGenerator, VersionOrdering, VersionScheme, ViewRegistry,
    NON_EXISTING,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
