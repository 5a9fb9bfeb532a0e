//! Garbage collection driver.
//!
//! Versions and traces can only be reclaimed behind the oldest snapshot any
//! member still hands out, so each round first asks every member of the
//! current view for its snapshot floor, folds them with a component-wise
//! minimum and only then collects locally. A round that cannot reach some
//! member reclaims nothing.
//!
//! [`GcWorker`] runs rounds on a background thread every
//! [`CoreConfig::gc_interval`](crate::config::CoreConfig).

use crate::error::{CoreError, CoreResult};
use crate::messages::SnapshotFloorRequest;
use crate::node::{now_millis, NodeEngine};
use crate::transport::ClusterTransport;
use crate::version::DistributedVersion;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What one collection round reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Versions, traces and log records reclaimed behind the floor.
    pub reclaimed: usize,
    /// Versions dropped because their lifespan elapsed.
    pub expired: usize,
}

/// Collects garbage on one node using the cluster-wide snapshot floor.
#[derive(Clone)]
pub struct GarbageCollector {
    node: Arc<NodeEngine>,
    transport: Arc<dyn ClusterTransport>,
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("node", self.node.address())
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    /// Creates a collector for `node`.
    pub fn new(node: Arc<NodeEngine>, transport: Arc<dyn ClusterTransport>) -> Self {
        Self { node, transport }
    }

    /// Component-wise minimum of every member's snapshot floor.
    pub fn cluster_floor(&self) -> CoreResult<DistributedVersion> {
        let view = self.node.view()?;
        let request = SnapshotFloorRequest {
            from: self.node.address().clone(),
        };
        let floors = view
            .members()
            .iter()
            .map(|member| {
                if member == self.node.address() {
                    self.node.snapshot_floor(&request)
                } else {
                    self.transport
                        .snapshot_floor(member, &request)
                        .into_result(member)
                }
            })
            .collect::<CoreResult<Vec<_>>>()?;
        DistributedVersion::merge_min(&floors)
    }

    /// Runs one round: expiry first, then collection behind the floor.
    pub fn run_once(&self) -> CoreResult<GcReport> {
        let expired = self.node.purge_expired(now_millis());
        let floor = self.cluster_floor()?;
        let reclaimed = self.node.collect_garbage(&floor);
        Ok(GcReport { reclaimed, expired })
    }

    /// Starts a background worker running a round every `interval`.
    pub fn start(self, interval: Duration) -> CoreResult<GcWorker> {
        let (stop, stopped) = mpsc::channel::<()>();
        let name = format!("ssidb-gc-{}", self.node.address());
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match self.run_once() {
                        Ok(report) => tracing::debug!(
                            node = %self.node.address(),
                            reclaimed = report.reclaimed,
                            expired = report.expired,
                            "gc round finished"
                        ),
                        Err(err) => tracing::warn!(
                            node = %self.node.address(),
                            error = %err,
                            "gc round skipped"
                        ),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|err| CoreError::invalid_operation(format!("failed to spawn gc worker: {err}")))?;
        Ok(GcWorker {
            stop: Some(stop),
            worker: Some(worker),
        })
    }

    /// Starts a worker at the node's configured interval.
    pub fn start_configured(self) -> CoreResult<GcWorker> {
        let interval = self.node.config().gc_interval;
        self.start(interval)
    }
}

/// Handle to a background collection thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct GcWorker {
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl GcWorker {
    /// Stops the worker and waits for the current round to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("gc worker panicked");
            }
        }
    }
}

impl Drop for GcWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::coordinator::Coordinator;
    use crate::ownership::ExplicitOwnership;
    use crate::transport::LoopbackTransport;
    use crate::types::{Key, NodeAddress, ViewId};
    use crate::version::{ClusterSnapshot, ViewRegistry};

    const VIEW: ViewId = ViewId::new(1);

    fn cluster(config: CoreConfig) -> (Arc<LoopbackTransport>, Vec<Coordinator>) {
        let members = vec![NodeAddress::from("n0"), NodeAddress::from("n1")];
        let views = Arc::new(ViewRegistry::with_view(ClusterSnapshot::new(
            VIEW,
            members.clone(),
        )));
        let ownership = Arc::new(
            ExplicitOwnership::default()
                .place("x", &["n0"])
                .place("y", &["n1"]),
        );
        let transport = Arc::new(LoopbackTransport::new());
        let coordinators = members
            .into_iter()
            .map(|address| {
                let node = Arc::new(
                    NodeEngine::new(config.clone(), address, Arc::clone(&views), ownership.clone())
                        .unwrap(),
                );
                transport.register(Arc::clone(&node));
                Coordinator::new(node, transport.clone())
            })
            .collect();
        (transport, coordinators)
    }

    fn write_xy(coordinator: &Coordinator, value: u8) {
        let mut tx = coordinator.begin().unwrap();
        coordinator.write(&mut tx, Key::from("x"), vec![value]).unwrap();
        coordinator.write(&mut tx, Key::from("y"), vec![value]).unwrap();
        coordinator.commit(&mut tx).unwrap();
    }

    #[test]
    fn floor_follows_live_snapshots_on_every_member() {
        let (transport, coordinators) = cluster(CoreConfig::default());
        write_xy(&coordinators[0], 1);
        let mut reader = coordinators[1].begin().unwrap();
        write_xy(&coordinators[0], 2);
        write_xy(&coordinators[0], 3);

        let gc = GarbageCollector::new(Arc::clone(coordinators[0].node()), transport.clone());
        assert_eq!(gc.cluster_floor().unwrap(), *reader.begin_version());

        let x = Key::from("x");
        assert_eq!(gc.run_once().unwrap().reclaimed, 0);
        assert_eq!(coordinators[0].node().container().history(&x).len(), 3);

        coordinators[1].rollback(&mut reader).unwrap();
        assert!(gc.run_once().unwrap().reclaimed > 0);
        let history = coordinators[0].node().container().history(&x);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, Some(vec![3]));
    }

    #[test]
    fn unreachable_member_skips_the_round() {
        let (transport, coordinators) = cluster(CoreConfig::default());
        write_xy(&coordinators[0], 1);
        write_xy(&coordinators[0], 2);
        transport.set_down(&NodeAddress::from("n1"), true);

        let gc = GarbageCollector::new(Arc::clone(coordinators[0].node()), transport.clone());
        assert!(gc.run_once().is_err());
        assert_eq!(
            coordinators[0].node().container().history(&Key::from("x")).len(),
            2
        );
    }

    #[test]
    fn worker_runs_until_shut_down() {
        let config = CoreConfig::default().gc_interval(Duration::from_millis(5));
        let (transport, coordinators) = cluster(config);
        for value in 1..=3 {
            write_xy(&coordinators[0], value);
        }

        let node = Arc::clone(coordinators[0].node());
        let worker = GarbageCollector::new(Arc::clone(&node), transport.clone())
            .start_configured()
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while node.stats().snapshot().gc_runs == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.shutdown();

        assert!(node.stats().snapshot().gc_runs >= 1);
        assert_eq!(node.container().history(&Key::from("x")).len(), 2);
    }
}
