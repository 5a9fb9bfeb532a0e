//! Scalar versions for fully replicated clusters.

use super::{VersionOrdering, NON_EXISTING};
use crate::error::{CoreError, CoreResult};
use crate::types::ViewId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single commit counter shared by every replica, tagged with the view it
/// was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicatedVersion {
    view_id: ViewId,
    counter: i64,
}

impl ReplicatedVersion {
    /// Creates a version.
    pub const fn new(view_id: ViewId, counter: i64) -> Self {
        Self { view_id, counter }
    }

    /// Returns the view id.
    pub const fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Returns the counter.
    pub const fn counter(&self) -> i64 {
        self.counter
    }

    /// Compares counters, breaking ties by view id.
    pub fn compare(&self, other: &Self) -> VersionOrdering {
        VersionOrdering::of_scalars(self.counter, other.counter)
            .then_with(|| VersionOrdering::of_ord(self.view_id.cmp(&other.view_id)))
    }

    /// Largest counter, stamped with `view_id`.
    pub fn merge_max(view_id: ViewId, versions: &[Self]) -> CoreResult<Self> {
        if versions.is_empty() {
            return Err(CoreError::missing_version("merge of an empty version set"));
        }
        let max = versions
            .iter()
            .map(|v| v.counter)
            .max()
            .unwrap_or(NON_EXISTING);
        Ok(Self::new(view_id, max))
    }

    /// Smallest known counter, stamped with `view_id`. An empty input or an
    /// input of unknown counters yields [`NON_EXISTING`].
    pub fn merge_min(view_id: ViewId, versions: &[Self]) -> Self {
        let mut min = NON_EXISTING;
        for version in versions {
            if min == NON_EXISTING {
                min = version.counter;
            } else if version.counter != NON_EXISTING {
                min = min.min(version.counter);
            }
        }
        Self::new(view_id, min)
    }
}

impl fmt::Display for ReplicatedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.view_id)
    }
}
