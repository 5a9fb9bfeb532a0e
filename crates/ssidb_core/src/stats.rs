//! Node statistics.
//!
//! Counters are relaxed atomics and can be read while transactions are in
//! flight. [`NodeStats::snapshot`] returns a plain copy suitable for
//! reporting.

use crate::error::AbortReason;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Node statistics and metrics.
#[derive(Debug, Default)]
pub struct NodeStats {
    reads: AtomicU64,
    writes: AtomicU64,
    prepares: AtomicU64,
    commits: AtomicU64,
    read_only_commits: AtomicU64,
    rollbacks: AtomicU64,

    aborts_validation: AtomicU64,
    aborts_cycle: AtomicU64,
    aborts_remote: AtomicU64,
    aborts_commit: AtomicU64,

    queue_waits: AtomicU64,
    gc_runs: AtomicU64,
    versions_reclaimed: AtomicU64,
    entries_expired: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time copy of [`NodeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Snapshot reads served.
    pub reads: u64,
    /// Writes applied to the data container.
    pub writes: u64,
    /// Prepares that passed validation.
    pub prepares: u64,
    /// Transactions committed with local writes.
    pub commits: u64,
    /// Transactions committed without local writes.
    pub read_only_commits: u64,
    /// Rollbacks processed.
    pub rollbacks: u64,
    /// Aborts caused by stale reads.
    pub aborts_validation: u64,
    /// Aborts caused by dependency cycles.
    pub aborts_cycle: u64,
    /// Aborts caused by failing participants.
    pub aborts_remote: u64,
    /// Aborts caused by commit application failures.
    pub aborts_commit: u64,
    /// Times a commit parked waiting for earlier transactions.
    pub queue_waits: u64,
    /// Garbage collection passes.
    pub gc_runs: u64,
    /// Version and trace slots reclaimed.
    pub versions_reclaimed: u64,
    /// Entries dropped because their lifespan elapsed.
    pub entries_expired: u64,
    /// Persistence sink calls that failed.
    pub sink_failures: u64,
}

impl StatsSnapshot {
    /// Total aborts of every kind.
    pub fn aborts(&self) -> u64 {
        self.aborts_validation + self.aborts_cycle + self.aborts_remote + self.aborts_commit
    }
}

impl std::ops::Add for StatsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            reads: self.reads + rhs.reads,
            writes: self.writes + rhs.writes,
            prepares: self.prepares + rhs.prepares,
            commits: self.commits + rhs.commits,
            read_only_commits: self.read_only_commits + rhs.read_only_commits,
            rollbacks: self.rollbacks + rhs.rollbacks,
            aborts_validation: self.aborts_validation + rhs.aborts_validation,
            aborts_cycle: self.aborts_cycle + rhs.aborts_cycle,
            aborts_remote: self.aborts_remote + rhs.aborts_remote,
            aborts_commit: self.aborts_commit + rhs.aborts_commit,
            queue_waits: self.queue_waits + rhs.queue_waits,
            gc_runs: self.gc_runs + rhs.gc_runs,
            versions_reclaimed: self.versions_reclaimed + rhs.versions_reclaimed,
            entries_expired: self.entries_expired + rhs.entries_expired,
            sink_failures: self.sink_failures + rhs.sink_failures,
        }
    }
}

impl NodeStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writes(&self, count: u64) {
        self.writes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_prepare(&self) {
        self.prepares.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, read_only: bool) {
        if read_only {
            self.read_only_commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an abort by reason.
    pub fn record_abort(&self, reason: &AbortReason) {
        let counter = match reason {
            AbortReason::ValidationFailure => &self.aborts_validation,
            AbortReason::CycleDetected => &self.aborts_cycle,
            AbortReason::RemoteParticipantFailure { .. } => &self.aborts_remote,
            AbortReason::CommitFailed { .. } => &self.aborts_commit,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_wait(&self) {
        self.queue_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc(&self, reclaimed: u64) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.versions_reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
    }

    pub(crate) fn record_expired(&self, count: u64) {
        self.entries_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of snapshot reads served.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of committed transactions with local writes.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the total number of aborts.
    pub fn aborts(&self) -> u64 {
        self.snapshot().aborts()
    }

    /// Returns a copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            prepares: self.prepares.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            read_only_commits: self.read_only_commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            aborts_validation: self.aborts_validation.load(Ordering::Relaxed),
            aborts_cycle: self.aborts_cycle.load(Ordering::Relaxed),
            aborts_remote: self.aborts_remote.load(Ordering::Relaxed),
            aborts_commit: self.aborts_commit.load(Ordering::Relaxed),
            queue_waits: self.queue_waits.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            versions_reclaimed: self.versions_reclaimed.load(Ordering::Relaxed),
            entries_expired: self.entries_expired.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}
