//! In-process clusters.
//!
//! A [`LocalCluster`] wires a set of [`NodeEngine`]s to one
//! [`LoopbackTransport`] and puts a [`Coordinator`] in front of each node.
//! Node `i` is addressed as `n{i}` and every node starts in
//! [`FIRST_VIEW`].

use crate::config::CoreConfig;
use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::gc::{GarbageCollector, GcWorker};
use crate::node::{now_millis, NodeEngine};
use crate::ownership::ExplicitOwnership;
use crate::sink::PersistenceSink;
use crate::stats::StatsSnapshot;
use crate::total_order::TotalOrderSequencer;
use crate::transport::LoopbackTransport;
use crate::types::{Key, NodeAddress, Value, ViewId};
use crate::version::{ClusterSnapshot, DistributedVersion, ViewRegistry};
use std::sync::Arc;

/// View id every local cluster starts in.
pub const FIRST_VIEW: ViewId = ViewId::new(1);

/// Address of node `index`.
pub fn node_address(index: usize) -> NodeAddress {
    NodeAddress::new(format!("n{index}"))
}

/// A cluster of in-process nodes.
pub struct LocalCluster {
    views: Arc<ViewRegistry>,
    transport: Arc<LoopbackTransport>,
    sequencer: Arc<TotalOrderSequencer>,
    nodes: Vec<Arc<NodeEngine>>,
    coordinators: Vec<Coordinator>,
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl LocalCluster {
    /// Starts building a cluster.
    pub fn builder() -> LocalClusterBuilder {
        LocalClusterBuilder::default()
    }

    /// Shared view history.
    pub fn views(&self) -> &Arc<ViewRegistry> {
        &self.views
    }

    /// Transport connecting every node.
    pub fn transport(&self) -> &Arc<LoopbackTransport> {
        &self.transport
    }

    /// Sequencer shared by every coordinator.
    pub fn sequencer(&self) -> &Arc<TotalOrderSequencer> {
        &self.sequencer
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the cluster has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Engine of node `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn node(&self, index: usize) -> &Arc<NodeEngine> {
        &self.nodes[index]
    }

    /// Every engine.
    pub fn nodes(&self) -> &[Arc<NodeEngine>] {
        &self.nodes
    }

    /// Coordinator on node `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn coordinator(&self, index: usize) -> &Coordinator {
        &self.coordinators[index]
    }

    /// A collector for node `index`.
    pub fn garbage_collector(&self, index: usize) -> GarbageCollector {
        GarbageCollector::new(Arc::clone(&self.nodes[index]), self.transport.clone())
    }

    /// Cluster-wide snapshot floor, as every member reports it.
    pub fn min_snapshot(&self) -> CoreResult<DistributedVersion> {
        match self.nodes.first() {
            Some(node) => {
                GarbageCollector::new(Arc::clone(node), self.transport.clone()).cluster_floor()
            }
            None => Err(CoreError::invalid_operation("cluster has no nodes")),
        }
    }

    /// Runs one collection round on every node behind one floor. Returns
    /// the total reclaimed.
    pub fn collect_garbage(&self) -> CoreResult<usize> {
        let floor = self.min_snapshot()?;
        let now = now_millis();
        Ok(self
            .nodes
            .iter()
            .map(|node| node.purge_expired(now) + node.collect_garbage(&floor))
            .sum())
    }

    /// Starts a background collector on every node at the configured
    /// interval.
    pub fn start_gc(&self) -> CoreResult<Vec<GcWorker>> {
        (0..self.nodes.len())
            .map(|index| self.garbage_collector(index).start_configured())
            .collect()
    }

    /// Newest committed value of `key` on its primary owner, bypassing
    /// transactions.
    pub fn read_latest(&self, key: &Key) -> CoreResult<Option<Value>> {
        let view = self.views.current()?;
        let node = self
            .nodes
            .first()
            .ok_or_else(|| CoreError::invalid_operation("cluster has no nodes"))?;
        let owner = node
            .ownership()
            .primary_owner(key, &view)
            .and_then(|owner| self.nodes.get(owner))
            .ok_or_else(|| CoreError::invalid_operation(format!("no owner for key {key}")))?;
        Ok(owner.container().read(key, None, now_millis()).into_value())
    }

    /// Sum of every node's statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.nodes
            .iter()
            .map(|node| node.stats().snapshot())
            .fold(StatsSnapshot::default(), |sum, snap| sum + snap)
    }
}

/// Builder for [`LocalCluster`].
pub struct LocalClusterBuilder {
    nodes: usize,
    config: CoreConfig,
    placement: Vec<(String, Vec<usize>)>,
    sink: Option<Arc<dyn PersistenceSink>>,
}

impl std::fmt::Debug for LocalClusterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalClusterBuilder")
            .field("nodes", &self.nodes)
            .field("config", &self.config)
            .field("placement", &self.placement)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for LocalClusterBuilder {
    fn default() -> Self {
        Self {
            nodes: 2,
            config: CoreConfig::default(),
            placement: Vec::new(),
            sink: None,
        }
    }
}

impl LocalClusterBuilder {
    /// Sets the number of nodes.
    #[must_use]
    pub fn nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes.max(1);
        self
    }

    /// Sets the configuration of every node.
    #[must_use]
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Places `key` on the given nodes, primary first. Unplaced keys are
    /// hashed onto one node.
    #[must_use]
    pub fn place(mut self, key: &str, owners: &[usize]) -> Self {
        self.placement.push((key.to_string(), owners.to_vec()));
        self
    }

    /// Installs `sink` on every node.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the cluster.
    pub fn build(self) -> CoreResult<LocalCluster> {
        let members: Vec<NodeAddress> = (0..self.nodes).map(node_address).collect();
        let views = Arc::new(ViewRegistry::with_view(ClusterSnapshot::new(
            FIRST_VIEW,
            members.clone(),
        )));

        let mut ownership = ExplicitOwnership::default();
        for (key, owners) in &self.placement {
            if let Some(owner) = owners.iter().find(|owner| **owner >= self.nodes) {
                return Err(CoreError::invalid_operation(format!(
                    "key {key} placed on n{owner} outside a {}-node cluster",
                    self.nodes
                )));
            }
            let names: Vec<String> = owners.iter().map(|index| format!("n{index}")).collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            ownership = ownership.place(key.as_str(), &names);
        }
        let ownership = Arc::new(ownership);

        let transport = Arc::new(LoopbackTransport::new());
        let sequencer = Arc::new(TotalOrderSequencer::new());
        let mut nodes = Vec::with_capacity(members.len());
        for address in members {
            let mut node = NodeEngine::new(
                self.config.clone(),
                address,
                Arc::clone(&views),
                ownership.clone(),
            )?;
            if let Some(sink) = &self.sink {
                node = node.with_sink(Arc::clone(sink));
            }
            let node = Arc::new(node);
            transport.register(Arc::clone(&node));
            nodes.push(node);
        }
        let coordinators = nodes
            .iter()
            .map(|node| {
                Coordinator::new(Arc::clone(node), transport.clone())
                    .with_sequencer(Arc::clone(&sequencer))
            })
            .collect();

        tracing::debug!(nodes = nodes.len(), "local cluster built");
        Ok(LocalCluster {
            views,
            transport,
            sequencer,
            nodes,
            coordinators,
        })
    }
}
