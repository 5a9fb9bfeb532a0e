//! Per-key trace of the transactions that wrote the key.
//!
//! A record is appended provisionally when a writer prepares, so concurrent
//! validators can see it before it commits. Commit finalizes the record with
//! the writer's commit vector and local log position; rollback retracts it.

use super::arena::{Arena, SlotId};
use crate::commit_log::LogPosition;
use crate::types::GlobalTxId;
use crate::version::DistributedVersion;

/// One writer of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    tx: GlobalTxId,
    creator: DistributedVersion,
    has_outgoing_edge: bool,
    position: Option<LogPosition>,
}

impl CommitRecord {
    /// The writing transaction.
    pub fn tx(&self) -> GlobalTxId {
        self.tx
    }

    /// Creator vector. Provisional records carry the prepare vote's version.
    pub fn creator(&self) -> &DistributedVersion {
        &self.creator
    }

    /// Whether the writer had an outgoing dependency edge.
    pub fn has_outgoing_edge(&self) -> bool {
        self.has_outgoing_edge
    }

    /// Local commit position, once finalized.
    pub fn position(&self) -> Option<LogPosition> {
        self.position
    }

    /// True until the writer commits.
    pub fn is_provisional(&self) -> bool {
        self.position.is_none()
    }

    /// True if the creator's `node` coordinate is strictly after `version`'s.
    pub fn is_more_recent_than(&self, version: Option<&DistributedVersion>, node: usize) -> bool {
        version.is_some_and(|v| self.creator.get(node) > v.get(node))
    }

    /// True if the creator's `node` coordinate is strictly before
    /// `version`'s, or there is nothing to compare against.
    pub fn is_older_than(&self, version: Option<&DistributedVersion>, node: usize) -> bool {
        version.map_or(true, |v| self.creator.get(node) < v.get(node))
    }
}

/// Commit trace of one key, newest first.
#[derive(Debug, Default)]
pub struct TraceChain {
    arena: Arena<CommitRecord>,
}

impl TraceChain {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True if no record exists.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Iterates records newest first.
    ///
    /// Finalized records are not necessarily in commit order because
    /// prepares and commits interleave; consumers scan the whole chain.
    pub fn iter(&self) -> impl Iterator<Item = &CommitRecord> {
        self.arena.iter().map(|(record, _)| record)
    }

    /// Appends a provisional record and returns its slot.
    pub fn append(
        &mut self,
        tx: GlobalTxId,
        creator: DistributedVersion,
        has_outgoing_edge: bool,
    ) -> SlotId {
        self.arena.push_front(CommitRecord {
            tx,
            creator,
            has_outgoing_edge,
            position: None,
        })
    }

    /// Finalizes a provisional record. Returns false if the slot is gone.
    pub fn finalize(
        &mut self,
        slot: SlotId,
        creator: DistributedVersion,
        has_outgoing_edge: bool,
        position: LogPosition,
    ) -> bool {
        match self.arena.get_mut(slot) {
            Some(record) => {
                record.creator = creator;
                record.has_outgoing_edge = has_outgoing_edge;
                record.position = Some(position);
                true
            }
            None => false,
        }
    }

    /// Removes a record. Returns false if the slot is gone.
    pub fn retract(&mut self, slot: SlotId) -> bool {
        self.arena.remove(slot).is_some()
    }

    /// True if `tx` still has a record here.
    pub fn contains_tx(&self, tx: GlobalTxId) -> bool {
        self.iter().any(|record| record.tx == tx)
    }

    /// Records whose creator is strictly after `version` on `node`, newest
    /// first.
    pub fn records_newer_than<'a>(
        &'a self,
        version: &'a DistributedVersion,
        node: usize,
    ) -> impl Iterator<Item = &'a CommitRecord> + 'a {
        self.iter()
            .filter(move |record| record.is_more_recent_than(Some(version), node))
    }

    /// The finalized record applied last on this node.
    pub fn most_recent(&self) -> Option<&CommitRecord> {
        self.iter()
            .filter_map(|record| record.position.map(|position| (position, record)))
            .max_by_key(|(position, _)| *position)
            .map(|(_, record)| record)
    }

    /// Drops finalized records committed at or before `horizon` whose
    /// creator is older than `min` on `node`. Returns how many were freed.
    pub fn gc(&mut self, horizon: LogPosition, min: &DistributedVersion, node: usize) -> usize {
        self.arena.retain(|record| {
            let settled = record.position.is_some_and(|position| position <= horizon);
            !(settled && record.is_older_than(Some(min), node))
        })
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.arena.clear();
    }
}
