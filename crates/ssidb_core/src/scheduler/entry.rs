//! Commit queue entries.

use crate::types::GlobalTxId;
use std::fmt;

/// Lifecycle of a queued transaction on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Validation in progress; not yet in the queue.
    Preparing,
    /// Voted; waiting for the final commit version.
    Prepared,
    /// Final version known; waiting for predecessors.
    Queued,
    /// At the head of the queue and being applied.
    Ready,
    /// Applied and removed from the queue.
    Committed,
    /// Rolled back and removed from the queue.
    Aborted,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Queued => "queued",
            Self::Ready => "ready",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Tie-breaker among entries sharing a scalar.
///
/// Prepared entries sort before queued ones at the same scalar: their final
/// version can only grow, so anything queued at that scalar must wait for
/// them. Queued entries at one scalar sort by transaction id, which every
/// node agrees on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Slot {
    Prepared { clock: u64 },
    Queued { tx: GlobalTxId },
}

pub(crate) type QueueKey = (i64, Slot);

/// One transaction in the commit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// The transaction.
    pub tx: GlobalTxId,
    /// Local scalar: the prepare scalar until queued, then the commit scalar.
    pub version: i64,
    /// Registration order on this node.
    pub clock: u64,
    /// Current state.
    pub state: QueueState,
    /// True if the transaction writes nothing on this node.
    pub read_only: bool,
}

impl QueueEntry {
    pub(crate) fn key(&self) -> QueueKey {
        let slot = match self.state {
            QueueState::Preparing | QueueState::Prepared => Slot::Prepared { clock: self.clock },
            _ => Slot::Queued { tx: self.tx },
        };
        (self.version, slot)
    }
}
