//! Prepare-time validation.
//!
//! [`Validator`] checks the locally owned part of a transaction's read and
//! write sets against the data container. In SSI mode it reports
//! dependency edges and the dependency vector; in plain mode it only
//! rejects stale reads.

use crate::chain::CommitRecord;
use crate::commit_log::LogPosition;
use crate::config::ValidationMode;
use crate::container::DataContainer;
use crate::error::{CoreError, CoreResult};
use crate::types::{GlobalTxId, Key};
use crate::version::DistributedVersion;
use std::collections::BTreeMap;

/// The locally owned slice of a transaction under validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    /// The transaction.
    pub tx: GlobalTxId,
    /// Working version at prepare.
    pub tx_version: &'a DistributedVersion,
    /// Begin snapshot.
    pub begin_version: &'a DistributedVersion,
    /// Positions read from, by node coordinate.
    pub read_from: &'a BTreeMap<usize, LogPosition>,
    /// Locally owned keys the transaction read.
    pub reads: &'a [Key],
    /// Locally owned keys the transaction writes.
    pub writes: &'a [Key],
}

/// Edges and dependencies found on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// A concurrent reader missed one of the writes.
    pub has_incoming_edge: bool,
    /// One of the reads missed a concurrent write.
    pub has_outgoing_edge: bool,
    /// Component-wise minimum of the missed writers' creators; unbounded if
    /// none was found.
    pub computed_deps: DistributedVersion,
}

/// Validates prepares for one node.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    mode: ValidationMode,
    node_index: usize,
}

impl Validator {
    /// Creates a validator for the node at `node_index`.
    pub fn new(mode: ValidationMode, node_index: usize) -> Self {
        Self { mode, node_index }
    }

    /// Returns the validation mode.
    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validates `request` against `container`.
    pub fn validate(
        &self,
        container: &DataContainer,
        request: &ValidationRequest<'_>,
    ) -> CoreResult<ValidationOutcome> {
        let unbounded = DistributedVersion::unbounded(
            request.tx_version.view_id(),
            request.tx_version.len(),
        );
        match self.mode {
            ValidationMode::Plain => {
                self.validate_plain(container, request)?;
                Ok(ValidationOutcome {
                    has_incoming_edge: false,
                    has_outgoing_edge: false,
                    computed_deps: unbounded,
                })
            }
            ValidationMode::Ssi => {
                let (has_outgoing_edge, computed_deps) =
                    self.validate_read_set(container, request, unbounded)?;
                let has_incoming_edge = self.validate_write_set(container, request);
                if has_incoming_edge && has_outgoing_edge {
                    tracing::debug!(tx = %request.tx, node = self.node_index, "both dependency edges on one node");
                    return Err(CoreError::cycle_detected(None));
                }
                Ok(ValidationOutcome {
                    has_incoming_edge,
                    has_outgoing_edge,
                    computed_deps,
                })
            }
        }
    }

    /// True if `record` belongs to a writer the transaction did not observe.
    fn is_unseen(&self, record: &CommitRecord, request: &ValidationRequest<'_>) -> bool {
        if record.tx() == request.tx {
            return false;
        }
        match (record.position(), request.read_from.get(&self.node_index)) {
            (None, _) => true,
            (Some(position), Some(pin)) => position > *pin,
            (Some(_), None) => record.is_more_recent_than(Some(request.tx_version), self.node_index),
        }
    }

    fn validate_read_set(
        &self,
        container: &DataContainer,
        request: &ValidationRequest<'_>,
        mut deps: DistributedVersion,
    ) -> CoreResult<(bool, DistributedVersion)> {
        let mut outgoing = false;
        for key in request.reads {
            let unseen: Vec<CommitRecord> = container
                .with_trace(key, |trace| {
                    trace
                        .iter()
                        .filter(|record| self.is_unseen(record, request))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            for record in unseen {
                if record.has_outgoing_edge() {
                    tracing::debug!(tx = %request.tx, key = %key, writer = %record.tx(), "unseen writer already has an outgoing edge");
                    return Err(CoreError::cycle_detected(Some(key.clone())));
                }
                outgoing = true;
                deps = DistributedVersion::merge_min([&deps, record.creator()])?;
            }
        }
        Ok((outgoing, deps))
    }

    fn validate_write_set(&self, container: &DataContainer, request: &ValidationRequest<'_>) -> bool {
        let begin = request.begin_version.get(self.node_index);
        request.writes.iter().any(|key| {
            if container.was_read_since(key, begin) {
                tracing::debug!(tx = %request.tx, key = %key, "written key was read concurrently");
                return true;
            }
            container
                .with_trace(key, |trace| trace.iter().any(|record| self.is_unseen(record, request)))
                .unwrap_or(false)
        })
    }

    fn validate_plain(&self, container: &DataContainer, request: &ValidationRequest<'_>) -> CoreResult<()> {
        let pin = request.read_from.get(&self.node_index).copied();
        let bound = request.tx_version.get(self.node_index);
        for key in request.reads {
            let stale_head = container
                .with_chain(key, |chain| {
                    chain.head().is_some_and(|head| match pin {
                        Some(pin) => head.position() > pin,
                        None => head.version.version() > bound,
                    })
                })
                .unwrap_or(false);
            let in_flight = container
                .with_trace(key, |trace| {
                    trace
                        .iter()
                        .any(|record| record.is_provisional() && record.tx() != request.tx)
                })
                .unwrap_or(false);
            if stale_head || in_flight {
                tracing::debug!(tx = %request.tx, key = %key, stale_head, in_flight, "read is stale");
                return Err(CoreError::validation_failure(Some(key.clone())));
            }
        }
        Ok(())
    }
}
