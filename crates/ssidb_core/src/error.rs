//! Error types for SSIDB core.

use crate::types::{GlobalTxId, Key, NodeAddress, ViewId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a transaction was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// A value the transaction read has been overwritten since its snapshot.
    ValidationFailure,
    /// The transaction would close a dependency cycle (dangerous structure).
    CycleDetected,
    /// A participant answered the prepare with an error or refused it.
    RemoteParticipantFailure {
        /// The participant that failed.
        node: NodeAddress,
        /// Message reported by the participant.
        message: String,
    },
    /// Applying the commit failed on a participant.
    CommitFailed {
        /// Participants that had already applied the commit.
        applied: Vec<NodeAddress>,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailure => f.write_str("validation failure"),
            Self::CycleDetected => f.write_str("dependency cycle detected"),
            Self::RemoteParticipantFailure { node, message } => {
                write!(f, "participant {node} failed: {message}")
            }
            Self::CommitFailed { applied } if applied.is_empty() => {
                f.write_str("commit application failed")
            }
            Self::CommitFailed { applied } => {
                f.write_str("commit application failed, already applied on ")?;
                for (index, node) in applied.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{node}")?;
                }
                Ok(())
            }
        }
    }
}

fn on_key(key: &Option<Key>) -> String {
    key.as_ref()
        .map(|key| format!(" on key {key}"))
        .unwrap_or_default()
}

/// Errors that can occur in SSIDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transaction was aborted. This is the only error a well-formed
    /// transaction is expected to observe.
    #[error("transaction aborted: {reason}{}", on_key(.key))]
    TransactionAborted {
        /// Reason for abort.
        reason: AbortReason,
        /// The key that triggered the abort, when known.
        key: Option<Key>,
    },

    /// A version was required but absent.
    #[error("missing version: {context}")]
    MissingVersion {
        /// Where the version was expected.
        context: String,
    },

    /// Versions from different cluster views or of different kinds were mixed.
    #[error("incompatible versions: expected {expected}, found {found}")]
    IncompatibleView {
        /// The version shape that was expected.
        expected: String,
        /// The version shape that was found.
        found: String,
    },

    /// A cluster view id is not known to the registry.
    #[error("unknown cluster view {view_id}")]
    UnknownView {
        /// The missing view.
        view_id: ViewId,
    },

    /// A participant was asked about a transaction it never prepared.
    #[error("unknown transaction {tx}")]
    UnknownTransaction {
        /// The transaction id.
        tx: GlobalTxId,
    },

    /// A message could not be carried by the transport.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an abort error.
    pub fn aborted(reason: AbortReason, key: Option<Key>) -> Self {
        Self::TransactionAborted { reason, key }
    }

    /// Creates a validation failure abort.
    pub fn validation_failure(key: Option<Key>) -> Self {
        Self::aborted(AbortReason::ValidationFailure, key)
    }

    /// Creates a cycle detected abort.
    pub fn cycle_detected(key: Option<Key>) -> Self {
        Self::aborted(AbortReason::CycleDetected, key)
    }

    /// Creates a remote participant failure abort.
    pub fn remote_failure(node: NodeAddress, message: impl Into<String>) -> Self {
        Self::aborted(
            AbortReason::RemoteParticipantFailure {
                node,
                message: message.into(),
            },
            None,
        )
    }

    /// Creates a commit failure abort. `applied` lists the participants
    /// that kept the commit.
    pub fn commit_failed(key: Option<Key>, applied: Vec<NodeAddress>) -> Self {
        Self::aborted(AbortReason::CommitFailed { applied }, key)
    }

    /// Creates a missing version error.
    pub fn missing_version(context: impl Into<String>) -> Self {
        Self::MissingVersion {
            context: context.into(),
        }
    }

    /// Creates an incompatible view error.
    pub fn incompatible_view(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::IncompatibleView {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error is a transaction abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::TransactionAborted { .. })
    }

    /// Returns the abort reason, if this error is an abort.
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Self::TransactionAborted { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_message_includes_key() {
        let err = CoreError::cycle_detected(Some(Key::from("x")));
        assert_eq!(
            err.to_string(),
            "transaction aborted: dependency cycle detected on key x"
        );
        assert!(err.is_abort());
        assert_eq!(err.abort_reason(), Some(&AbortReason::CycleDetected));
    }

    #[test]
    fn abort_message_without_key() {
        let err = CoreError::remote_failure(NodeAddress::from("n1"), "boom");
        assert_eq!(
            err.to_string(),
            "transaction aborted: participant n1 failed: boom"
        );
    }

    #[test]
    fn partial_commit_names_applied_nodes() {
        let err = CoreError::commit_failed(
            Some(Key::from("y")),
            vec![NodeAddress::from("n0"), NodeAddress::from("n2")],
        );
        assert_eq!(
            err.to_string(),
            "transaction aborted: commit application failed, already applied on n0, n2 on key y"
        );
        assert_eq!(
            CoreError::commit_failed(None, Vec::new()).to_string(),
            "transaction aborted: commit application failed"
        );
    }

    #[test]
    fn non_abort_errors() {
        let err = CoreError::missing_version("put");
        assert!(!err.is_abort());
        assert!(err.abort_reason().is_none());
    }
}
