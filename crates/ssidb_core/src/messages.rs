//! Protocol messages exchanged between coordinators and participants.
//!
//! Every message derives serde traits; the encoding is up to the transport.

use crate::commit_log::LogPosition;
use crate::container::EntryState;
use crate::error::{AbortReason, CoreError, CoreResult};
use crate::transaction::Modification;
use crate::types::{GlobalTxId, Key, NodeAddress};
use crate::version::DistributedVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot read of one key on its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Reading transaction.
    pub tx: GlobalTxId,
    /// Key to read.
    pub key: Key,
    /// The reader's working version.
    pub tx_version: DistributedVersion,
    /// Positions the reader is pinned at.
    pub read_from: BTreeMap<usize, LogPosition>,
    /// True if the reader has buffered writes.
    pub from_write_tx: bool,
}

/// Result of a [`ReadRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// Coordinate of the node that served the read.
    pub node_index: usize,
    /// What the read resolved to.
    pub state: EntryState,
    /// True if no newer version of the key exists.
    pub most_recent: bool,
    /// Outgoing edge flag of the value's creator.
    pub has_outgoing_edge: bool,
    /// Commit vector of the snapshot read.
    pub snapshot: DistributedVersion,
    /// Log position of the snapshot read.
    pub position: LogPosition,
}

/// Prepare request sent to every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    /// Preparing transaction.
    pub tx: GlobalTxId,
    /// Coordinating node.
    pub coordinator: NodeAddress,
    /// Working version.
    pub tx_version: DistributedVersion,
    /// Begin snapshot.
    pub begin_version: DistributedVersion,
    /// Positions read from.
    pub read_from: BTreeMap<usize, LogPosition>,
    /// Every key read.
    pub reads: Vec<Key>,
    /// Every buffered write.
    pub modifications: Vec<Modification>,
    /// Delivery sequence under total-order prepares.
    pub total_order_sequence: Option<u64>,
}

/// A participant's answer to a prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareVote {
    /// Voting node.
    pub node: NodeAddress,
    /// Voting node's coordinate.
    pub node_index: usize,
    /// Proposed version: the working version with the node's prepare scalar.
    pub version: DistributedVersion,
    /// A concurrent reader missed a local write.
    pub has_incoming_edge: bool,
    /// A local read missed a concurrent write.
    pub has_outgoing_edge: bool,
    /// Dependency vector found locally.
    pub computed_deps: DistributedVersion,
    /// True if the transaction writes nothing on this node.
    pub read_only: bool,
}

/// Commit decision sent to every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Committing transaction.
    pub tx: GlobalTxId,
    /// Final commit vector.
    pub commit_version: DistributedVersion,
    /// Merged dependency vector, stamped as the values' creation vector.
    pub computed_deps: DistributedVersion,
    /// Merged outgoing edge flag.
    pub has_outgoing_edge: bool,
}

/// Rollback sent to every participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    /// Transaction to roll back.
    pub tx: GlobalTxId,
}

/// Asks a member for the oldest snapshot still live among the transactions
/// it coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFloorRequest {
    /// Node collecting the floors.
    pub from: NodeAddress,
}

/// Outcome of one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response<T> {
    /// The call succeeded.
    Success(T),
    /// The participant aborted the transaction.
    Aborted {
        /// Why.
        reason: AbortReason,
        /// Offending key, when known.
        key: Option<Key>,
    },
    /// The participant failed with an error.
    Exception(String),
    /// The participant did not answer.
    Unsuccessful,
}

impl<T> Response<T> {
    /// Wraps a participant's local result.
    pub fn from_result(result: CoreResult<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(CoreError::TransactionAborted { reason, key }) => Self::Aborted { reason, key },
            Err(err) => Self::Exception(err.to_string()),
        }
    }

    /// Unwraps the response of `node`. Aborts are passed through; failures
    /// become `RemoteParticipantFailure`.
    pub fn into_result(self, node: &NodeAddress) -> CoreResult<T> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Aborted { reason, key } => Err(CoreError::aborted(reason, key)),
            Self::Exception(message) => Err(CoreError::remote_failure(node.clone(), message)),
            Self::Unsuccessful => Err(CoreError::remote_failure(
                node.clone(),
                "no response from participant",
            )),
        }
    }

    /// True for [`Response::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
