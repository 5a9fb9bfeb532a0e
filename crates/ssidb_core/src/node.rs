//! One node's participant in the commit protocol.
//!
//! [`NodeEngine`] owns the node's data container, commit log and commit
//! queue and answers the four protocol calls: snapshot reads, prepares,
//! commits and rollbacks.
//!
//! ## Locking
//!
//! - `apply_lock` is held shared while a read computes its window and looks
//!   up the chain, and exclusively while a commit is applied or garbage is
//!   collected, so a reader never sees half a commit.
//! - `prepare_lock` serializes validation with the trace and queue updates
//!   that follow it; it also remembers the last total-order sequence.
//! - The commit queue has its own lock; waiting for the head of the queue
//!   happens outside every other lock.

use crate::chain::SlotId;
use crate::commit_log::{CommitLog, LogPosition};
use crate::config::CoreConfig;
use crate::container::DataContainer;
use crate::error::{CoreError, CoreResult};
use crate::messages::{
    CommitRequest, PrepareRequest, PrepareVote, ReadRequest, ReadResponse, RollbackRequest,
    SnapshotFloorRequest,
};
use crate::ownership::KeyOwnership;
use crate::scheduler::{CommitScheduler, QueueState};
use crate::sink::{NoopSink, PersistenceSink};
use crate::stats::NodeStats;
use crate::transaction::Modification;
use crate::types::{GlobalTxId, Key, NodeAddress};
use crate::validation::{ValidationRequest, Validator};
use crate::version::{
    ClusterSnapshot, DistributedVersion, Version, VersionGenerator, VersionScheme, ViewRegistry,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Debug)]
struct Participant {
    phase: QueueState,
    modifications: Vec<Modification>,
    traces: Vec<(Key, SlotId)>,
    read_only: bool,
}

/// A cluster member's share of the store and protocol.
pub struct NodeEngine {
    config: CoreConfig,
    address: NodeAddress,
    node_index: usize,
    generator: VersionGenerator,
    ownership: Arc<dyn KeyOwnership>,
    sink: Arc<dyn PersistenceSink>,
    container: DataContainer,
    log: CommitLog,
    scheduler: CommitScheduler,
    validator: Validator,
    stats: NodeStats,
    apply_lock: RwLock<()>,
    prepare_lock: Mutex<Option<u64>>,
    participants: Mutex<HashMap<GlobalTxId, Participant>>,
    snapshots: Mutex<HashMap<GlobalTxId, DistributedVersion>>,
    /// Log position each live reader is pinned at on this node.
    pins: Mutex<HashMap<GlobalTxId, LogPosition>>,
}

impl std::fmt::Debug for NodeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEngine")
            .field("address", &self.address)
            .field("node_index", &self.node_index)
            .field("validation_mode", &self.config.validation_mode)
            .field("ordering_mode", &self.config.ordering_mode)
            .finish_non_exhaustive()
    }
}

impl NodeEngine {
    /// Creates the engine of `address`, which must be a member of the
    /// current view in `views`.
    pub fn new(
        config: CoreConfig,
        address: NodeAddress,
        views: Arc<ViewRegistry>,
        ownership: Arc<dyn KeyOwnership>,
    ) -> CoreResult<Self> {
        let generator = VersionGenerator::new(VersionScheme::Distributed, address.clone(), views);
        let view = generator.current_view()?;
        let node_index = generator.local_index()?;
        Ok(Self {
            container: DataContainer::new(config.concurrency_level),
            log: CommitLog::new(view.view_id(), view.len(), node_index),
            scheduler: CommitScheduler::new(),
            validator: Validator::new(config.validation_mode, node_index),
            stats: NodeStats::new(),
            sink: Arc::new(NoopSink),
            apply_lock: RwLock::new(()),
            prepare_lock: Mutex::new(None),
            participants: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            pins: Mutex::new(HashMap::new()),
            config,
            address,
            node_index,
            generator,
            ownership,
        })
    }

    /// Replaces the persistence sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the node's address.
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Returns the node's coordinate in the current view.
    pub fn node_index(&self) -> usize {
        self.node_index
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Returns the version generator.
    pub fn generator(&self) -> &VersionGenerator {
        &self.generator
    }

    /// Returns the key placement.
    pub fn ownership(&self) -> &Arc<dyn KeyOwnership> {
        &self.ownership
    }

    /// Returns the data container.
    pub fn container(&self) -> &DataContainer {
        &self.container
    }

    /// Returns the commit log.
    pub fn log(&self) -> &CommitLog {
        &self.log
    }

    /// Returns the commit queue.
    pub fn scheduler(&self) -> &CommitScheduler {
        &self.scheduler
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Returns the current view.
    pub fn view(&self) -> CoreResult<Arc<ClusterSnapshot>> {
        self.generator.current_view()
    }

    /// Merge of every commit applied here.
    pub fn current_vector(&self) -> DistributedVersion {
        self.log.current_vector()
    }

    /// True if this node owns `key`.
    pub fn is_owner(&self, key: &Key) -> CoreResult<bool> {
        let view = self.view()?;
        Ok(self.ownership.is_owner(key, &view, self.node_index))
    }

    fn record(&self, update: impl FnOnce(&NodeStats)) {
        if self.config.stats_enabled {
            update(&self.stats);
        }
    }

    pub(crate) fn record_abort(&self, err: &CoreError) {
        if let Some(reason) = err.abort_reason() {
            self.record(|stats| stats.record_abort(reason));
        }
    }

    /// Tracks the begin snapshot of a live transaction coordinated here.
    pub fn register_snapshot(&self, tx: GlobalTxId, begin: DistributedVersion) {
        self.snapshots.lock().insert(tx, begin);
    }

    /// Stops tracking a finished transaction.
    pub fn release_snapshot(&self, tx: GlobalTxId) {
        self.snapshots.lock().remove(&tx);
    }

    /// Component-wise minimum of the live snapshots coordinated here.
    pub fn min_active_snapshot(&self) -> Option<DistributedVersion> {
        let snapshots = self.snapshots.lock();
        DistributedVersion::merge_min(snapshots.values()).ok()
    }

    /// Oldest live snapshot coordinated here, or the current vector when
    /// nothing is live.
    pub fn snapshot_floor(&self, request: &SnapshotFloorRequest) -> CoreResult<DistributedVersion> {
        let floor = self
            .min_active_snapshot()
            .unwrap_or_else(|| self.current_vector());
        tracing::trace!(node = %self.address, from = %request.from, floor = %floor, "reported snapshot floor");
        Ok(floor)
    }

    /// Oldest log position a live reader is pinned at here.
    pub fn oldest_pin(&self) -> Option<LogPosition> {
        self.pins.lock().values().min().copied()
    }

    fn release_pin(&self, tx: GlobalTxId) {
        self.pins.lock().remove(&tx);
    }

    /// Serves a snapshot read of a locally owned key.
    pub fn read(&self, request: &ReadRequest) -> CoreResult<ReadResponse> {
        if !self.is_owner(&request.key)? {
            return Err(CoreError::invalid_operation(format!(
                "{} does not own key {}",
                self.address, request.key
            )));
        }

        let (snapshot, entry) = {
            let _apply = self.apply_lock.read();
            let snapshot = self.log.read_window(
                &request.tx_version,
                &request.read_from,
                request.from_write_tx,
            )?;
            let entry = self
                .container
                .read(&request.key, Some(&snapshot.window), now_millis());
            self.pins.lock().entry(request.tx).or_insert(snapshot.position);
            (snapshot, entry)
        };

        self.record(NodeStats::record_read);
        tracing::trace!(
            node = %self.address,
            tx = %request.tx,
            key = %request.key,
            position = %snapshot.position,
            "snapshot read"
        );
        Ok(ReadResponse {
            node_index: self.node_index,
            state: entry.state,
            most_recent: entry.most_recent,
            has_outgoing_edge: entry.has_outgoing_edge,
            snapshot: snapshot.vector,
            position: snapshot.position,
        })
    }

    /// Validates the locally owned part of a transaction and votes.
    pub fn prepare(&self, request: &PrepareRequest) -> CoreResult<PrepareVote> {
        let view = self.view()?;
        if request.tx_version.view_id() != view.view_id() {
            return Err(CoreError::incompatible_view(
                view.view_id().to_string(),
                request.tx_version.view_id().to_string(),
            ));
        }
        let owned = |key: &Key| self.ownership.is_owner(key, &view, self.node_index);
        let reads: Vec<Key> = request
            .reads
            .iter()
            .filter(|key| owned(*key))
            .cloned()
            .collect();
        let modifications: Vec<Modification> = request
            .modifications
            .iter()
            .filter(|modification| owned(modification.key()))
            .cloned()
            .collect();
        let writes: Vec<Key> = modifications.iter().map(|m| m.key().clone()).collect();
        let read_only = modifications.is_empty();

        let mut last_sequence = self.prepare_lock.lock();
        if self.config.is_total_order() {
            let sequence = request.total_order_sequence.ok_or_else(|| {
                CoreError::invalid_operation("total-order prepare without a sequence")
            })?;
            if last_sequence.is_some_and(|last| sequence <= last) {
                return Err(CoreError::invalid_operation(format!(
                    "prepare sequence {sequence} delivered out of order"
                )));
            }
            *last_sequence = Some(sequence);
        }

        self.participants.lock().insert(
            request.tx,
            Participant {
                phase: QueueState::Preparing,
                modifications,
                traces: Vec::new(),
                read_only,
            },
        );

        let validation = ValidationRequest {
            tx: request.tx,
            tx_version: &request.tx_version,
            begin_version: &request.begin_version,
            read_from: &request.read_from,
            reads: &reads,
            writes: &writes,
        };
        let outcome = match self.validator.validate(&self.container, &validation) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.participants.lock().remove(&request.tx);
                self.record_abort(&err);
                tracing::warn!(node = %self.address, tx = %request.tx, error = %err, "prepare rejected");
                return Err(err);
            }
        };

        let read_scalar = request
            .read_from
            .get(&self.node_index)
            .map_or(request.tx_version.get(self.node_index), |pin| pin.version);
        for key in &reads {
            self.container.mark_visible_read(key, read_scalar);
        }

        let scalar = if read_only {
            self.scheduler.prepare_read_only_transaction(request.tx)
        } else {
            self.scheduler.prepare_transaction(request.tx)
        };
        let local = request.tx_version.get(self.node_index).max(scalar);
        let version = request.tx_version.with(self.node_index, local);

        let traces: Vec<(Key, SlotId)> = writes
            .iter()
            .map(|key| {
                let slot = self.container.append_trace(
                    key,
                    request.tx,
                    version.clone(),
                    outcome.has_outgoing_edge,
                );
                (key.clone(), slot)
            })
            .collect();
        if let Some(participant) = self.participants.lock().get_mut(&request.tx) {
            participant.phase = QueueState::Prepared;
            participant.traces = traces;
        }
        drop(last_sequence);

        self.record(NodeStats::record_prepare);
        tracing::debug!(
            node = %self.address,
            tx = %request.tx,
            vote = %version,
            incoming = outcome.has_incoming_edge,
            outgoing = outcome.has_outgoing_edge,
            deps = %outcome.computed_deps,
            "prepared"
        );
        Ok(PrepareVote {
            node: self.address.clone(),
            node_index: self.node_index,
            version,
            has_incoming_edge: outcome.has_incoming_edge,
            has_outgoing_edge: outcome.has_outgoing_edge,
            computed_deps: outcome.computed_deps,
            read_only,
        })
    }

    /// Applies a prepared transaction once every predecessor in the commit
    /// queue is done.
    pub fn commit(&self, request: &CommitRequest) -> CoreResult<()> {
        self.release_pin(request.tx);
        let participant = self
            .participants
            .lock()
            .remove(&request.tx)
            .ok_or(CoreError::UnknownTransaction { tx: request.tx })?;
        debug_assert_eq!(participant.phase, QueueState::Prepared);

        let scalar = request.commit_version.get(self.node_index);
        let ticket = match self
            .scheduler
            .commit_transaction(request.tx, scalar)
            .and_then(|()| self.scheduler.await_until_ready(request.tx))
        {
            Ok(ticket) => ticket,
            Err(err) => {
                self.retract(&participant);
                return Err(err);
            }
        };
        if ticket.waited {
            self.record(NodeStats::record_queue_wait);
        }

        let applied = if participant.read_only {
            None
        } else if let Err(err) = self.apply(&participant, request, ticket.position) {
            tracing::error!(
                node = %self.address,
                tx = %request.tx,
                error = %err,
                "applying commit failed, rolling back"
            );
            self.scheduler.rollback_transaction(request.tx);
            self.retract(&participant);
            self.notify_sink_rollback(request.tx);
            let key = participant.modifications.first().map(|m| m.key().clone());
            let err = CoreError::commit_failed(key, Vec::new());
            self.record_abort(&err);
            return Err(err);
        } else {
            Some(ticket.position)
        };

        self.scheduler.mark_committed(request.tx, applied);
        self.record(|stats| stats.record_commit(participant.read_only));
        tracing::debug!(
            node = %self.address,
            tx = %request.tx,
            commit = %request.commit_version,
            position = ?applied,
            "committed"
        );

        if let Err(err) = self.sink.commit(request.tx) {
            self.record(NodeStats::record_sink_failure);
            tracing::warn!(node = %self.address, tx = %request.tx, error = %err, "persistence sink commit failed");
        }
        Ok(())
    }

    fn apply(
        &self,
        participant: &Participant,
        request: &CommitRequest,
        position: LogPosition,
    ) -> CoreResult<()> {
        let commit = request
            .commit_version
            .with(self.node_index, position.version);
        let entry_version = self.generator.convert_to_write(
            &Version::Distributed(commit),
            position.sub_version,
            Some(&request.computed_deps),
        )?;

        // Everything that can refuse the commit is checked before anything
        // changes, so a failed apply leaves no trace.
        let _apply = self.apply_lock.write();
        self.log
            .check_append(position, &request.commit_version)?;
        for modification in &participant.modifications {
            self.container
                .check_write(modification.key(), &entry_version)?;
        }

        let now = now_millis();
        for modification in &participant.modifications {
            match modification {
                Modification::Put {
                    key,
                    value,
                    lifespan_ms,
                } => {
                    self.container.write(
                        key,
                        Some(value.clone()),
                        Some(entry_version.clone()),
                        request.has_outgoing_edge,
                        lifespan_ms.map(|lifespan| now.saturating_add(lifespan)),
                    )?;
                }
                Modification::Remove { key } => {
                    self.container.remove(
                        key,
                        Some(entry_version.clone()),
                        request.has_outgoing_edge,
                    )?;
                }
            }
        }
        for (key, slot) in &participant.traces {
            self.container.finalize_trace(
                key,
                *slot,
                request.commit_version.clone(),
                request.has_outgoing_edge,
                position,
            );
        }
        self.log.append(position, request.commit_version.clone())?;
        self.record(|stats| stats.record_writes(participant.modifications.len() as u64));
        Ok(())
    }

    fn retract(&self, participant: &Participant) {
        for (key, slot) in &participant.traces {
            self.container.retract_trace(key, *slot);
        }
    }

    fn notify_sink_rollback(&self, tx: GlobalTxId) {
        if let Err(err) = self.sink.rollback(tx) {
            self.record(NodeStats::record_sink_failure);
            tracing::warn!(node = %self.address, tx = %tx, error = %err, "persistence sink rollback failed");
        }
    }

    /// Forgets a transaction. Rolling back an unknown or already finished
    /// transaction is a no-op.
    pub fn rollback(&self, request: &RollbackRequest) -> CoreResult<()> {
        self.release_pin(request.tx);
        let participant = self.participants.lock().remove(&request.tx);
        let queued = self.scheduler.rollback_transaction(request.tx).is_some();
        if let Some(participant) = &participant {
            self.retract(participant);
        }
        if participant.is_some() || queued {
            self.record(NodeStats::record_rollback);
            self.notify_sink_rollback(request.tx);
            tracing::debug!(node = %self.address, tx = %request.tx, "rolled back");
        }
        Ok(())
    }

    /// Reclaims versions, traces and log records no live snapshot can
    /// reach. `min` is the cluster-wide minimum live snapshot.
    ///
    /// The horizon never passes the oldest position a live reader is
    /// pinned at here.
    pub fn collect_garbage(&self, min: &DistributedVersion) -> usize {
        let _apply = self.apply_lock.write();
        let horizon = match self.oldest_pin() {
            Some(pin) => self.log.gc_horizon(min).min(pin),
            None => self.log.gc_horizon(min),
        };
        let reclaimed =
            self.container
                .garbage_collect(horizon, min, self.node_index)
                + self.log.gc(horizon);
        self.record(|stats| stats.record_gc(reclaimed as u64));
        tracing::debug!(node = %self.address, horizon = %horizon, min = %min, reclaimed, "collected garbage");
        reclaimed
    }

    /// Drops versions whose lifespan elapsed by `now`.
    pub fn purge_expired(&self, now: u64) -> usize {
        let _apply = self.apply_lock.write();
        let purged = self.container.purge_expired(now);
        self.record(|stats| stats.record_expired(purged as u64));
        purged
    }

    /// Number of transactions prepared here and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.participants.lock().len()
    }
}
