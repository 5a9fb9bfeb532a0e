//! The window of versions a reader may observe on one node.

use crate::types::ViewId;
use std::collections::BTreeSet;

/// Upper bound of what a transaction may read on one node.
///
/// Commits at or below `bound` are visible unless they appear in the hidden
/// set: those were applied locally before the bound but depend on state the
/// reader has already observed to be older elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWindowVersion {
    view_id: ViewId,
    node_index: usize,
    bound: i64,
    from_write_tx: bool,
    hidden: BTreeSet<(i64, u32)>,
}

impl ReadWindowVersion {
    /// Creates a window with nothing hidden.
    pub fn new(view_id: ViewId, node_index: usize, bound: i64, from_write_tx: bool) -> Self {
        Self {
            view_id,
            node_index,
            bound,
            from_write_tx,
            hidden: BTreeSet::new(),
        }
    }

    /// Hides one committed `(version, sub_version)` pair.
    pub fn hide(&mut self, version: i64, sub_version: u32) {
        self.hidden.insert((version, sub_version));
    }

    /// Returns true if the pair is hidden from this reader.
    pub fn contains(&self, version: i64, sub_version: u32) -> bool {
        self.hidden.contains(&(version, sub_version))
    }

    /// Returns the view id.
    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Returns the coordinate of the node this window applies to.
    pub fn node_index(&self) -> usize {
        self.node_index
    }

    /// Returns the local scalar bound.
    pub fn bound(&self) -> i64 {
        self.bound
    }

    /// Returns true if the reader has buffered writes.
    pub fn is_from_write_tx(&self) -> bool {
        self.from_write_tx
    }

    /// Returns the number of hidden pairs.
    pub fn hidden_len(&self) -> usize {
        self.hidden.len()
    }
}
