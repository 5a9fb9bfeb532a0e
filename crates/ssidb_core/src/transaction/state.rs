//! Transaction state.

use crate::commit_log::LogPosition;
use crate::error::{CoreError, CoreResult};
use crate::messages::PrepareVote;
use crate::types::{GlobalTxId, Key, NodeAddress, Value};
use crate::version::DistributedVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Prepare has been sent to the participants.
    Preparing,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or update a value.
    Put {
        /// New payload.
        value: Value,
        /// Optional time to live, counted from commit.
        lifespan: Option<Duration>,
    },
    /// Remove the key.
    Remove,
}

/// A write as shipped to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modification {
    /// Insert or update a value.
    Put {
        /// Target key.
        key: Key,
        /// New payload.
        value: Value,
        /// Time to live in milliseconds.
        lifespan_ms: Option<u64>,
    },
    /// Remove the key.
    Remove {
        /// Target key.
        key: Key,
    },
}

impl Modification {
    /// The target key.
    pub fn key(&self) -> &Key {
        match self {
            Self::Put { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// An in-flight transaction.
///
/// Reads observe a snapshot that starts at `begin_version` and is widened
/// as nodes are read from; writes are buffered until commit.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: GlobalTxId,
    coordinator: NodeAddress,
    state: TransactionState,
    begin_version: DistributedVersion,
    tx_version: DistributedVersion,
    /// Node coordinate -> log position read from on that node.
    read_from: BTreeMap<usize, LogPosition>,
    read_set: BTreeSet<Key>,
    writes: BTreeMap<Key, WriteOp>,
    has_incoming_edge: bool,
    has_outgoing_edge: bool,
    computed_deps: DistributedVersion,
    /// Votes collected by a prepare that has not been merged yet.
    votes: Option<Vec<PrepareVote>>,
    commit_version: Option<DistributedVersion>,
}

impl Transaction {
    /// Creates a transaction starting at `begin_version`.
    pub(crate) fn new(
        id: GlobalTxId,
        coordinator: NodeAddress,
        begin_version: DistributedVersion,
    ) -> Self {
        let computed_deps =
            DistributedVersion::unbounded(begin_version.view_id(), begin_version.len());
        Self {
            id,
            coordinator,
            state: TransactionState::Active,
            tx_version: begin_version.clone(),
            begin_version,
            read_from: BTreeMap::new(),
            read_set: BTreeSet::new(),
            writes: BTreeMap::new(),
            has_incoming_edge: false,
            has_outgoing_edge: false,
            computed_deps,
            votes: None,
            commit_version: None,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> GlobalTxId {
        self.id
    }

    /// Returns the coordinating node.
    #[must_use]
    pub fn coordinator(&self) -> &NodeAddress {
        &self.coordinator
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// True if nothing was written.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Snapshot the transaction started from.
    pub fn begin_version(&self) -> &DistributedVersion {
        &self.begin_version
    }

    /// Working version: the begin version merged with every snapshot read.
    pub fn tx_version(&self) -> &DistributedVersion {
        &self.tx_version
    }

    /// Positions read from, by node coordinate.
    pub fn read_from(&self) -> &BTreeMap<usize, LogPosition> {
        &self.read_from
    }

    /// True if the transaction already read on node `index`.
    pub fn has_read_on(&self, index: usize) -> bool {
        self.read_from.contains_key(&index)
    }

    /// Keys read from the store.
    pub fn read_set(&self) -> &BTreeSet<Key> {
        &self.read_set
    }

    /// Buffered writes.
    pub fn writes(&self) -> &BTreeMap<Key, WriteOp> {
        &self.writes
    }

    /// Gets a pending write for a key.
    #[must_use]
    pub fn pending_write(&self, key: &Key) -> Option<&WriteOp> {
        self.writes.get(key)
    }

    /// Buffered writes in wire form.
    pub fn modifications(&self) -> Vec<Modification> {
        self.writes
            .iter()
            .map(|(key, op)| match op {
                WriteOp::Put { value, lifespan } => Modification::Put {
                    key: key.clone(),
                    value: value.clone(),
                    lifespan_ms: lifespan.map(|l| u64::try_from(l.as_millis()).unwrap_or(u64::MAX)),
                },
                WriteOp::Remove => Modification::Remove { key: key.clone() },
            })
            .collect()
    }

    /// Whether some participant found a concurrent reader of a written key.
    pub fn has_incoming_edge(&self) -> bool {
        self.has_incoming_edge
    }

    /// Whether some participant found a concurrent writer of a read key.
    pub fn has_outgoing_edge(&self) -> bool {
        self.has_outgoing_edge
    }

    /// Component-wise minimum of the creators this transaction depends on.
    pub fn computed_deps(&self) -> &DistributedVersion {
        &self.computed_deps
    }

    /// Final commit vector, once committed.
    pub fn commit_version(&self) -> Option<&DistributedVersion> {
        self.commit_version.as_ref()
    }

    /// Records a put.
    pub fn put(&mut self, key: Key, value: Value, lifespan: Option<Duration>) -> CoreResult<()> {
        self.ensure_active()?;
        self.writes.insert(key, WriteOp::Put { value, lifespan });
        Ok(())
    }

    /// Records a removal.
    pub fn remove(&mut self, key: Key) -> CoreResult<()> {
        self.ensure_active()?;
        self.writes.insert(key, WriteOp::Remove);
        Ok(())
    }

    /// Records a read served by the store.
    pub(crate) fn record_read(&mut self, key: Key) {
        // Reads of own writes never reach the store.
        if !self.writes.contains_key(&key) {
            self.read_set.insert(key);
        }
    }

    /// Pins node `index` at `position` and widens the working version.
    pub(crate) fn record_snapshot(
        &mut self,
        index: usize,
        position: LogPosition,
        vector: &DistributedVersion,
    ) -> CoreResult<()> {
        self.tx_version = DistributedVersion::merge_max([&self.tx_version, vector])?;
        self.read_from.entry(index).or_insert(position);
        Ok(())
    }

    /// Stores the merged outcome of the prepare votes.
    pub(crate) fn record_dependencies(
        &mut self,
        has_incoming_edge: bool,
        has_outgoing_edge: bool,
        computed_deps: DistributedVersion,
    ) {
        self.has_incoming_edge = has_incoming_edge;
        self.has_outgoing_edge = has_outgoing_edge;
        self.computed_deps = computed_deps;
    }

    /// Keeps the votes of a finished prepare round.
    pub(crate) fn record_votes(&mut self, votes: Vec<PrepareVote>) {
        self.votes = Some(votes);
    }

    /// Takes the votes kept by [`Transaction::record_votes`].
    pub(crate) fn take_votes(&mut self) -> Option<Vec<PrepareVote>> {
        self.votes.take()
    }

    pub(crate) fn mark_preparing(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Preparing;
        Ok(())
    }

    pub(crate) fn mark_committed(&mut self, commit_version: DistributedVersion) {
        self.commit_version = Some(commit_version);
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.votes = None;
        self.state = TransactionState::Aborted;
    }

    /// Ensures the transaction is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Preparing => {
                Err(CoreError::invalid_operation("transaction is preparing"))
            }
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(CoreError::invalid_operation("transaction already aborted"))
            }
        }
    }
}
