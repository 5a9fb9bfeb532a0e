//! Secondary persistence notified after in-memory commit or rollback.

use crate::types::GlobalTxId;
use std::fmt;
use thiserror::Error;

/// Errors reported by a persistence sink. They are logged and never reach
/// the transaction.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink cannot be reached.
    #[error("persistence sink unavailable: {0}")]
    Unavailable(String),

    /// The sink refused the transaction.
    #[error("persistence sink rejected {tx}: {message}")]
    Rejected {
        /// The transaction.
        tx: GlobalTxId,
        /// Reason given by the sink.
        message: String,
    },
}

/// Best-effort store told about transaction outcomes.
pub trait PersistenceSink: Send + Sync + fmt::Debug {
    /// Called after `tx` committed in memory.
    fn commit(&self, tx: GlobalTxId) -> Result<(), SinkError>;

    /// Called after `tx` rolled back.
    fn rollback(&self, tx: GlobalTxId) -> Result<(), SinkError>;
}

/// A sink that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl PersistenceSink for NoopSink {
    fn commit(&self, _tx: GlobalTxId) -> Result<(), SinkError> {
        Ok(())
    }

    fn rollback(&self, _tx: GlobalTxId) -> Result<(), SinkError> {
        Ok(())
    }
}
