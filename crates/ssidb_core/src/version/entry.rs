//! Versions stamped on stored values.

use super::{DistributedVersion, ReadWindowVersion, ReplicatedVersion, VersionOrdering};
use crate::error::{CoreError, CoreResult};
use crate::types::ViewId;
use std::fmt;
use std::sync::Arc;

/// The version a value was committed with on its owner node.
///
/// `version` is the owner's local commit scalar and orders the version chain.
/// `sub_version` separates transactions committed at the same scalar.
/// `creation` is the creating transaction's creation vector; it differs from
/// the commit vector when the transaction was serialized before transactions
/// it did not observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCreationVersion {
    view_id: ViewId,
    node_index: usize,
    version: i64,
    sub_version: u32,
    creation: Arc<[i64]>,
}

impl EntryCreationVersion {
    /// Creates an entry version.
    pub fn new(
        view_id: ViewId,
        node_index: usize,
        version: i64,
        sub_version: u32,
        creation: impl Into<Arc<[i64]>>,
    ) -> Self {
        Self {
            view_id,
            node_index,
            version,
            sub_version,
            creation: creation.into(),
        }
    }

    /// Returns the view id.
    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Returns the coordinate of the node that stored the value.
    pub fn node_index(&self) -> usize {
        self.node_index
    }

    /// Returns the local commit scalar.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns the sub-version.
    pub fn sub_version(&self) -> u32 {
        self.sub_version
    }

    /// Returns the creation vector.
    pub fn creation(&self) -> &[i64] {
        &self.creation
    }

    /// Returns the creation vector's coordinate for the storing node.
    pub fn local_creation(&self) -> i64 {
        self.creation
            .get(self.node_index)
            .copied()
            .unwrap_or(self.version)
    }

    /// Returns the creation vector as a distributed version.
    pub fn creation_version(&self) -> DistributedVersion {
        DistributedVersion::new(self.view_id, self.creation.to_vec())
    }

    /// Scalar first, then sub-version.
    pub fn compare_entry(&self, other: &Self) -> VersionOrdering {
        VersionOrdering::of_scalars(self.version, other.version)
            .then_with(|| VersionOrdering::of_ord(self.sub_version.cmp(&other.sub_version)))
    }

    /// Compares against a reader's window.
    ///
    /// A hidden pair is reported as `After` so lookups skip it. Write
    /// transactions are positioned by the creation vector, read-only ones by
    /// the commit scalar.
    pub fn compare_read(&self, window: &ReadWindowVersion) -> VersionOrdering {
        if window.contains(self.version, self.sub_version) {
            return VersionOrdering::After;
        }
        if window.is_from_write_tx() {
            VersionOrdering::of_scalars(self.local_creation(), window.bound())
        } else {
            VersionOrdering::of_scalars(self.version, window.bound())
        }
    }

    /// Compares the storing node's creation coordinate, then view ids.
    pub fn compare_distributed(&self, other: &DistributedVersion) -> VersionOrdering {
        VersionOrdering::of_scalars(self.local_creation(), other.get(self.node_index))
            .then_with(|| VersionOrdering::of_ord(self.view_id.cmp(&other.view_id())))
    }

    /// Compares the commit scalar with a replicated counter, then view ids.
    pub fn compare_replicated(&self, other: &ReplicatedVersion) -> VersionOrdering {
        VersionOrdering::of_scalars(self.version, other.counter())
            .then_with(|| VersionOrdering::of_ord(self.view_id.cmp(&other.view_id())))
    }

    /// Fails unless both versions belong to the same view.
    pub fn check_view(&self, view_id: ViewId) -> CoreResult<()> {
        if self.view_id != view_id {
            return Err(CoreError::incompatible_view(
                self.view_id.to_string(),
                view_id.to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for EntryCreationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{:?}", self.version, self.sub_version, self.creation)
    }
}
