//! In-process cluster fixtures.
//!
//! A [`TestCluster`] is a [`LocalCluster`] with helpers that panic instead
//! of returning errors, so tests read straight through.

use parking_lot::Mutex;
use ssidb_core::{
    CoreConfig, CoreResult, DistributedVersion, GlobalTxId, Key, LocalCluster,
    LocalClusterBuilder, PersistenceSink, SinkError, Value, ViewId, FIRST_VIEW,
};
use std::ops::Deref;
use std::sync::Arc;

pub use ssidb_core::node_address;

/// View id every test cluster starts in.
pub const TEST_VIEW: ViewId = FIRST_VIEW;

/// A cluster of in-process nodes.
#[derive(Debug)]
pub struct TestCluster {
    inner: LocalCluster,
}

impl Deref for TestCluster {
    type Target = LocalCluster;

    fn deref(&self) -> &LocalCluster {
        &self.inner
    }
}

impl TestCluster {
    /// Starts building a cluster.
    pub fn builder() -> TestClusterBuilder {
        TestClusterBuilder::default()
    }

    /// Two nodes with `x` on `n0` and `y` on `n1`, default configuration.
    pub fn two_node() -> Self {
        Self::two_node_with(CoreConfig::default())
    }

    /// Two nodes with `x` and `z` on `n0` and `y` on `n1`.
    pub fn two_node_with(config: CoreConfig) -> Self {
        Self::builder()
            .nodes(2)
            .config(config)
            .place("x", &[0])
            .place("z", &[0])
            .place("y", &[1])
            .build()
    }

    /// A vector of the cluster's view.
    pub fn version(&self, counters: &[i64]) -> DistributedVersion {
        DistributedVersion::new(TEST_VIEW, counters.to_vec())
    }

    /// Commits the given puts in one transaction coordinated on node
    /// `coordinator`.
    pub fn commit_writes(
        &self,
        coordinator: usize,
        writes: &[(&str, &str)],
    ) -> CoreResult<DistributedVersion> {
        let coordinator = self.coordinator(coordinator);
        let mut tx = coordinator.begin()?;
        for (key, value) in writes {
            coordinator.write(&mut tx, Key::from(*key), value.as_bytes().to_vec())?;
        }
        coordinator.commit(&mut tx)
    }

    /// Newest committed value of `key` on its primary owner.
    pub fn read_latest(&self, key: &str) -> Option<Value> {
        self.inner
            .read_latest(&Key::from(key))
            .expect("key has an owner")
    }

    /// Cluster-wide snapshot floor.
    pub fn min_snapshot(&self) -> DistributedVersion {
        self.inner.min_snapshot().expect("every member reachable")
    }

    /// Runs garbage collection on every node. Returns the total reclaimed.
    pub fn collect_garbage(&self) -> usize {
        self.inner.collect_garbage().expect("every member reachable")
    }
}

/// Builder for [`TestCluster`].
#[derive(Debug, Default)]
pub struct TestClusterBuilder {
    inner: LocalClusterBuilder,
}

impl TestClusterBuilder {
    /// Sets the number of nodes.
    #[must_use]
    pub fn nodes(self, nodes: usize) -> Self {
        Self {
            inner: self.inner.nodes(nodes),
        }
    }

    /// Sets the configuration of every node.
    #[must_use]
    pub fn config(self, config: CoreConfig) -> Self {
        Self {
            inner: self.inner.config(config),
        }
    }

    /// Places `key` on the given nodes, primary first.
    #[must_use]
    pub fn place(self, key: &str, owners: &[usize]) -> Self {
        Self {
            inner: self.inner.place(key, owners),
        }
    }

    /// Installs `sink` on every node.
    #[must_use]
    pub fn sink(self, sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            inner: self.inner.sink(sink),
        }
    }

    /// Builds the cluster.
    pub fn build(self) -> TestCluster {
        TestCluster {
            inner: self.inner.build().expect("valid test cluster"),
        }
    }
}

/// Outcome a [`RecordingSink`] was told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    /// `commit` was called.
    Commit(GlobalTxId),
    /// `rollback` was called.
    Rollback(GlobalTxId),
}

/// A sink that remembers every call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, oldest first.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Number of commits seen for `tx`.
    pub fn commits_of(&self, tx: GlobalTxId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| **event == SinkEvent::Commit(tx))
            .count()
    }
}

impl PersistenceSink for RecordingSink {
    fn commit(&self, tx: GlobalTxId) -> Result<(), SinkError> {
        self.events.lock().push(SinkEvent::Commit(tx));
        Ok(())
    }

    fn rollback(&self, tx: GlobalTxId) -> Result<(), SinkError> {
        self.events.lock().push(SinkEvent::Rollback(tx));
        Ok(())
    }
}

/// A sink that rejects everything.
#[derive(Debug, Default)]
pub struct FailingSink;

impl PersistenceSink for FailingSink {
    fn commit(&self, _tx: GlobalTxId) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("disk on fire".into()))
    }

    fn rollback(&self, tx: GlobalTxId) -> Result<(), SinkError> {
        Err(SinkError::Rejected {
            tx,
            message: "read-only store".into(),
        })
    }
}
