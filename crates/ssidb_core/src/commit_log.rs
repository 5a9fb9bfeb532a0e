//! Per-node history of applied commit vectors.
//!
//! Every transaction that writes on a node appends one record when its
//! writes are applied. The log answers two questions: what the node's current
//! vector is, and which prefix of its history a given reader may observe.

use crate::error::{CoreError, CoreResult};
use crate::types::ViewId;
use crate::version::{DistributedVersion, ReadWindowVersion};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position of an applied commit in a node's history.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogPosition {
    /// Local commit scalar.
    pub version: i64,
    /// Order among commits sharing the scalar.
    pub sub_version: u32,
}

impl LogPosition {
    /// Position of the genesis record.
    pub const GENESIS: Self = Self::new(0, 0);

    /// Creates a position.
    pub const fn new(version: i64, sub_version: u32) -> Self {
        Self {
            version,
            sub_version,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.version, self.sub_version)
    }
}

#[derive(Debug, Clone)]
struct LogRecord {
    position: LogPosition,
    vector: DistributedVersion,
}

/// What a reader may observe on one node.
#[derive(Debug, Clone)]
pub struct ReadSnapshot {
    /// Window handed to the version chains.
    pub window: ReadWindowVersion,
    /// Commit vector of the newest visible record.
    pub vector: DistributedVersion,
    /// Position of the newest visible record.
    pub position: LogPosition,
}

#[derive(Debug)]
struct LogState {
    records: Vec<LogRecord>,
    current: DistributedVersion,
}

/// Applied commits of one node, oldest first.
#[derive(Debug)]
pub struct CommitLog {
    node_index: usize,
    state: RwLock<LogState>,
}

impl CommitLog {
    /// Creates a log holding only the all-zero genesis record.
    pub fn new(view_id: ViewId, members: usize, node_index: usize) -> Self {
        let genesis = DistributedVersion::zero(view_id, members);
        Self {
            node_index,
            state: RwLock::new(LogState {
                records: vec![LogRecord {
                    position: LogPosition::GENESIS,
                    vector: genesis.clone(),
                }],
                current: genesis,
            }),
        }
    }

    /// Coordinate of the owning node.
    pub fn node_index(&self) -> usize {
        self.node_index
    }

    /// Merge of every commit vector applied so far.
    pub fn current_vector(&self) -> DistributedVersion {
        self.state.read().current.clone()
    }

    /// Position of the newest record.
    pub fn last_position(&self) -> LogPosition {
        self.state
            .read()
            .records
            .last()
            .map_or(LogPosition::GENESIS, |record| record.position)
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// True if no record is retained.
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Records an applied commit.
    ///
    /// Positions must increase; the commit scheduler guarantees it.
    pub fn append(&self, position: LogPosition, vector: DistributedVersion) -> CoreResult<()> {
        let mut state = self.state.write();
        Self::check(&state, position, &vector)?;
        let current = DistributedVersion::merge_max([&state.current, &vector])?;
        state.current = current;
        state.records.push(LogRecord { position, vector });
        Ok(())
    }

    /// Fails if [`CommitLog::append`] would refuse the record.
    pub fn check_append(&self, position: LogPosition, vector: &DistributedVersion) -> CoreResult<()> {
        Self::check(&self.state.read(), position, vector)
    }

    fn check(state: &LogState, position: LogPosition, vector: &DistributedVersion) -> CoreResult<()> {
        if vector.view_id() != state.current.view_id() || vector.len() != state.current.len() {
            return Err(CoreError::incompatible_view(
                state.current.view_id().to_string(),
                vector.view_id().to_string(),
            ));
        }
        match state.records.last() {
            Some(last) if position <= last.position => Err(CoreError::invalid_operation(format!(
                "commit position {position} does not follow {}",
                last.position
            ))),
            _ => Ok(()),
        }
    }

    /// Computes what a transaction may read here.
    ///
    /// The newest record at or before this node's pin in `read_from` whose
    /// vector does not exceed `tx_version` on any other node already read
    /// from is the snapshot. Older records that fail the same test are hidden
    /// from the reader.
    pub fn read_window(
        &self,
        tx_version: &DistributedVersion,
        read_from: &BTreeMap<usize, LogPosition>,
        from_write_tx: bool,
    ) -> CoreResult<ReadSnapshot> {
        let node = self.node_index;
        let pin = read_from.get(&node).copied();
        let visible = |record: &LogRecord| {
            pin.map_or(true, |pin| record.position <= pin)
                && read_from
                    .keys()
                    .filter(|index| **index != node)
                    .all(|index| record.vector.get(*index) <= tx_version.get(*index))
        };

        let state = self.state.read();
        let newest = state
            .records
            .iter()
            .rev()
            .find(|record| visible(*record))
            .ok_or_else(|| {
                CoreError::missing_version(format!("no visible commit for snapshot {tx_version}"))
            })?;

        let bound = newest.position.version;
        let mut window =
            ReadWindowVersion::new(newest.vector.view_id(), node, bound, from_write_tx);
        for record in &state.records {
            if record.position.version > bound {
                break;
            }
            if !visible(record) {
                window.hide(record.position.version, record.position.sub_version);
            }
        }

        tracing::trace!(
            node,
            bound,
            hidden = window.hidden_len(),
            "computed read window"
        );
        Ok(ReadSnapshot {
            window,
            vector: newest.vector.clone(),
            position: newest.position,
        })
    }

    /// Newest position every current and future reader can still see, given
    /// the minimum snapshot `min` of all live transactions.
    ///
    /// A record qualifies while it and every older record commit strictly
    /// below `min` on this node and do not exceed `min` elsewhere.
    pub fn gc_horizon(&self, min: &DistributedVersion) -> LogPosition {
        let node = self.node_index;
        let state = self.state.read();
        let mut horizon = state
            .records
            .first()
            .map_or(LogPosition::GENESIS, |record| record.position);
        for record in state.records.iter().skip(1) {
            let settled = record.position.version < min.get(node)
                && (0..record.vector.len())
                    .filter(|index| *index != node)
                    .all(|index| record.vector.get(index) <= min.get(index));
            if !settled {
                break;
            }
            horizon = record.position;
        }
        horizon
    }

    /// Drops records older than `horizon`. Returns how many were dropped.
    pub fn gc(&self, horizon: LogPosition) -> usize {
        let mut state = self.state.write();
        let before = state.records.len();
        let keep_from = state
            .records
            .iter()
            .position(|record| record.position >= horizon)
            .unwrap_or(before.saturating_sub(1));
        state.records.drain(..keep_from);
        before - state.records.len()
    }
}
