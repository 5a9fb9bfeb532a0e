//! Version algebra.
//!
//! Versions come in four shapes:
//!
//! - [`ReplicatedVersion`]: one counter, used when every node stores every key
//! - [`DistributedVersion`]: one counter per member of a cluster view
//! - [`EntryCreationVersion`]: the version stamped on a stored value
//! - [`ReadWindowVersion`]: the bound a reader may observe on one node
//!
//! [`Version`] wraps all four so mixed comparisons can be dispatched in one
//! place; the engine itself works on the concrete types.

mod cluster;
mod distributed;
mod entry;
mod generator;
mod ordering;
mod read;
mod replicated;

pub use cluster::{ClusterSnapshot, ViewRegistry};
pub use distributed::DistributedVersion;
pub use entry::EntryCreationVersion;
pub use generator::{VersionGenerator, VersionScheme};
pub use ordering::VersionOrdering;
pub use read::ReadWindowVersion;
pub use replicated::ReplicatedVersion;

use crate::error::{CoreError, CoreResult};
use crate::types::ViewId;

/// Marker for an unknown coordinate.
pub const NON_EXISTING: i64 = -1;

/// Any version shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    /// Fully replicated counter.
    Replicated(ReplicatedVersion),
    /// Per-node vector.
    Distributed(DistributedVersion),
    /// Version stamped on a value.
    EntryCreation(EntryCreationVersion),
    /// Reader bound.
    ReadWindow(ReadWindowVersion),
}

impl Version {
    /// Short name of the shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Replicated(_) => "replicated",
            Self::Distributed(_) => "distributed",
            Self::EntryCreation(_) => "entry",
            Self::ReadWindow(_) => "read-window",
        }
    }

    /// Returns the view the version belongs to.
    pub fn view_id(&self) -> ViewId {
        match self {
            Self::Replicated(v) => v.view_id(),
            Self::Distributed(v) => v.view_id(),
            Self::EntryCreation(v) => v.view_id(),
            Self::ReadWindow(v) => v.view_id(),
        }
    }

    /// Compares two versions of compatible shapes.
    pub fn compare(&self, other: &Self) -> CoreResult<VersionOrdering> {
        match (self, other) {
            (Self::Replicated(a), Self::Replicated(b)) => Ok(a.compare(b)),
            (Self::Distributed(a), Self::Distributed(b)) => a.compare(b),
            (Self::EntryCreation(a), Self::EntryCreation(b)) => Ok(a.compare_entry(b)),
            (Self::EntryCreation(a), Self::ReadWindow(b)) => Ok(a.compare_read(b)),
            (Self::ReadWindow(a), Self::EntryCreation(b)) => Ok(b.compare_read(a).reverse()),
            (Self::EntryCreation(a), Self::Distributed(b)) => Ok(a.compare_distributed(b)),
            (Self::Distributed(a), Self::EntryCreation(b)) => {
                Ok(b.compare_distributed(a).reverse())
            }
            (Self::EntryCreation(a), Self::Replicated(b)) => Ok(a.compare_replicated(b)),
            (Self::Replicated(a), Self::EntryCreation(b)) => Ok(b.compare_replicated(a).reverse()),
            _ => Err(CoreError::incompatible_view(self.kind(), other.kind())),
        }
    }

    /// True if `self` is older than or equal to `other`.
    pub fn is_older_or_equal(&self, other: &Self) -> CoreResult<bool> {
        Ok(self.compare(other)?.is_older_or_equal())
    }
}

impl From<ReplicatedVersion> for Version {
    fn from(value: ReplicatedVersion) -> Self {
        Self::Replicated(value)
    }
}

impl From<DistributedVersion> for Version {
    fn from(value: DistributedVersion) -> Self {
        Self::Distributed(value)
    }
}

impl From<EntryCreationVersion> for Version {
    fn from(value: EntryCreationVersion) -> Self {
        Self::EntryCreation(value)
    }
}

impl From<ReadWindowVersion> for Version {
    fn from(value: ReadWindowVersion) -> Self {
        Self::ReadWindow(value)
    }
}
