//! Per-node commit queue.
//!
//! Transactions are applied to the data container strictly in queue order.
//! A transaction joins the queue at prepare with a provisional scalar, moves
//! to its final position when the commit version arrives, and is released by
//! [`CommitScheduler::await_until_ready`] once every entry ahead of it has
//! committed or rolled back.

mod entry;

pub use entry::{QueueEntry, QueueState};

use crate::commit_log::LogPosition;
use crate::error::{CoreError, CoreResult};
use crate::types::GlobalTxId;
use entry::QueueKey;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};

/// Result of waiting for the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyTicket {
    /// Log position the transaction's writes are applied at.
    pub position: LogPosition,
    /// True if the caller had to park.
    pub waited: bool,
}

#[derive(Debug, Default)]
struct Inner {
    queue: BTreeMap<QueueKey, QueueEntry>,
    index: HashMap<GlobalTxId, QueueKey>,
    last_prepared: i64,
    last_applied: LogPosition,
    clock: u64,
}

impl Inner {
    fn register(&mut self, tx: GlobalTxId, version: i64, read_only: bool) {
        if let Some(key) = self.index.remove(&tx) {
            self.queue.remove(&key);
        }
        self.clock += 1;
        let entry = QueueEntry {
            tx,
            version,
            clock: self.clock,
            state: QueueState::Prepared,
            read_only,
        };
        let key = entry.key();
        self.index.insert(tx, key);
        self.queue.insert(key, entry);
    }

    fn take(&mut self, tx: GlobalTxId) -> Option<QueueEntry> {
        let key = self.index.remove(&tx)?;
        self.queue.remove(&key)
    }
}

/// Orders application of commits on one node.
#[derive(Debug, Default)]
pub struct CommitScheduler {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl CommitScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a writer and returns its freshly incremented prepare
    /// scalar.
    pub fn prepare_transaction(&self, tx: GlobalTxId) -> i64 {
        let mut inner = self.inner.lock();
        inner.last_prepared += 1;
        let version = inner.last_prepared;
        inner.register(tx, version, false);
        tracing::trace!(tx = %tx, version, "prepared writer");
        version
    }

    /// Registers a transaction with nothing to write here, at the current
    /// scalar.
    pub fn prepare_read_only_transaction(&self, tx: GlobalTxId) -> i64 {
        let mut inner = self.inner.lock();
        let version = inner.last_prepared;
        inner.register(tx, version, true);
        tracing::trace!(tx = %tx, version, "prepared read-only");
        version
    }

    /// Moves a prepared transaction to its final position.
    pub fn commit_transaction(&self, tx: GlobalTxId, version: i64) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let mut entry = inner
            .take(tx)
            .ok_or(CoreError::UnknownTransaction { tx })?;
        entry.version = version;
        entry.state = QueueState::Queued;
        let key = entry.key();
        inner.index.insert(tx, key);
        inner.queue.insert(key, entry);
        inner.last_prepared = inner.last_prepared.max(version);
        tracing::trace!(tx = %tx, version, "queued for commit");
        self.ready.notify_all();
        Ok(())
    }

    /// Parks until `tx` is queued at the head, then marks it ready.
    ///
    /// Fails with `UnknownTransaction` if the entry disappears while
    /// waiting, which happens when it is rolled back concurrently.
    pub fn await_until_ready(&self, tx: GlobalTxId) -> CoreResult<ReadyTicket> {
        let mut inner = self.inner.lock();
        let mut waited = false;
        loop {
            let key = *inner
                .index
                .get(&tx)
                .ok_or(CoreError::UnknownTransaction { tx })?;
            let at_head = inner.queue.keys().next() == Some(&key);
            let last = inner.last_applied;
            if let Some(entry) = inner.queue.get_mut(&key) {
                if at_head && entry.state == QueueState::Queued {
                    entry.state = QueueState::Ready;
                    let version = entry.version;
                    let sub_version = if version == last.version {
                        last.sub_version + 1
                    } else {
                        0
                    };
                    return Ok(ReadyTicket {
                        position: LogPosition::new(version, sub_version),
                        waited,
                    });
                }
            }
            waited = true;
            self.ready.wait(&mut inner);
        }
    }

    /// Removes a ready transaction and returns its final entry. `applied`
    /// is the position its writes were applied at, if it wrote anything here.
    pub fn mark_committed(
        &self,
        tx: GlobalTxId,
        applied: Option<LogPosition>,
    ) -> Option<QueueEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.take(tx).map(|mut entry| {
            entry.state = QueueState::Committed;
            entry
        });
        if let Some(position) = applied {
            inner.last_applied = position;
        }
        self.ready.notify_all();
        entry
    }

    /// Removes a transaction at any state before committed.
    pub fn rollback_transaction(&self, tx: GlobalTxId) -> Option<QueueEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.take(tx).map(|mut entry| {
            entry.state = QueueState::Aborted;
            entry
        });
        if entry.is_some() {
            tracing::trace!(tx = %tx, "left commit queue");
            self.ready.notify_all();
        }
        entry
    }

    /// Last scalar handed out or committed.
    pub fn last_prepared(&self) -> i64 {
        self.inner.lock().last_prepared
    }

    /// Position of the last applied writer.
    pub fn last_applied(&self) -> LogPosition {
        self.inner.lock().last_applied
    }

    /// State of `tx`, if queued.
    pub fn state_of(&self, tx: GlobalTxId) -> Option<QueueState> {
        let inner = self.inner.lock();
        let key = inner.index.get(&tx)?;
        inner.queue.get(key).map(|entry| entry.state)
    }

    /// Queue contents in application order.
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.inner.lock().queue.values().cloned().collect()
    }

    /// Number of queued transactions.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
