//! Vector versions for partitioned clusters.

use super::{VersionOrdering, NON_EXISTING};
use crate::error::{CoreError, CoreResult};
use crate::types::ViewId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One counter per member of a cluster view.
///
/// Coordinate `i` counts the commits applied by member `i` of the view the
/// version belongs to. [`NON_EXISTING`] marks a coordinate that is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributedVersion {
    view_id: ViewId,
    counters: Vec<i64>,
}

impl DistributedVersion {
    /// Creates a version from explicit counters.
    pub fn new(view_id: ViewId, counters: Vec<i64>) -> Self {
        Self { view_id, counters }
    }

    /// The all-zero version of a view with `members` nodes.
    pub fn zero(view_id: ViewId, members: usize) -> Self {
        Self::new(view_id, vec![0; members])
    }

    /// A version with every coordinate at `i64::MAX`, the identity of
    /// [`merge_min`](Self::merge_min).
    pub fn unbounded(view_id: ViewId, members: usize) -> Self {
        Self::new(view_id, vec![i64::MAX; members])
    }

    /// Returns the view id.
    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Returns the counters in coordinate order.
    pub fn counters(&self) -> &[i64] {
        &self.counters
    }

    /// Returns the number of coordinates.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns true if the version has no coordinates.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Returns the counter at `index`, or [`NON_EXISTING`] if out of range.
    pub fn get(&self, index: usize) -> i64 {
        self.counters.get(index).copied().unwrap_or(NON_EXISTING)
    }

    /// Returns a copy with coordinate `index` set to `value`.
    #[must_use]
    pub fn with(&self, index: usize, value: i64) -> Self {
        let mut counters = self.counters.clone();
        if let Some(slot) = counters.get_mut(index) {
            *slot = value;
        }
        Self::new(self.view_id, counters)
    }

    /// Returns true while every coordinate is still `i64::MAX`, meaning no
    /// dependency has been folded in yet.
    pub fn is_unbounded(&self) -> bool {
        self.counters.iter().all(|c| *c == i64::MAX)
    }

    fn check_compatible(&self, other: &Self) -> CoreResult<()> {
        if self.view_id != other.view_id || self.counters.len() != other.counters.len() {
            return Err(CoreError::incompatible_view(
                format!("{} with {} coordinates", self.view_id, self.counters.len()),
                format!("{} with {} coordinates", other.view_id, other.counters.len()),
            ));
        }
        Ok(())
    }

    /// Compares coordinate by coordinate, skipping unknown coordinates.
    pub fn compare(&self, other: &Self) -> CoreResult<VersionOrdering> {
        self.check_compatible(other)?;

        let (mut before, mut equal, mut after) = (false, false, false);
        for (mine, theirs) in self.counters.iter().zip(&other.counters) {
            if *mine == NON_EXISTING || *theirs == NON_EXISTING {
                continue;
            }
            match VersionOrdering::of_scalars(*mine, *theirs) {
                VersionOrdering::Before => before = true,
                VersionOrdering::Equal => equal = true,
                _ => after = true,
            }
            if before && after {
                return Ok(VersionOrdering::Conflicting);
            }
        }

        Ok(match (before, equal, after) {
            (_, true, true) => VersionOrdering::AfterOrEqual,
            (true, true, _) => VersionOrdering::BeforeOrEqual,
            (false, true, false) => VersionOrdering::Equal,
            (true, false, _) => VersionOrdering::Before,
            (false, false, true) => VersionOrdering::After,
            (false, false, false) => VersionOrdering::BeforeOrEqual,
        })
    }

    /// Component-wise maximum. All inputs must share a view.
    pub fn merge_max<'a>(versions: impl IntoIterator<Item = &'a Self>) -> CoreResult<Self> {
        Self::merge_with(versions, |a, b| a.max(b))
    }

    /// Component-wise minimum, ignoring unknown coordinates.
    pub fn merge_min<'a>(versions: impl IntoIterator<Item = &'a Self>) -> CoreResult<Self> {
        Self::merge_with(versions, |a, b| {
            if a == NON_EXISTING {
                b
            } else if b == NON_EXISTING {
                a
            } else {
                a.min(b)
            }
        })
    }

    fn merge_with<'a>(
        versions: impl IntoIterator<Item = &'a Self>,
        combine: impl Fn(i64, i64) -> i64,
    ) -> CoreResult<Self> {
        let mut versions = versions.into_iter();
        let first = versions
            .next()
            .ok_or_else(|| CoreError::missing_version("merge of an empty version set"))?;
        let mut merged = first.clone();
        for version in versions {
            merged.check_compatible(version)?;
            for (slot, other) in merged.counters.iter_mut().zip(&version.counters) {
                *slot = combine(*slot, *other);
            }
        }
        Ok(merged)
    }

    /// Raises every write owner's coordinate to the largest value among the
    /// write owners. Other coordinates keep their merged value.
    #[must_use]
    pub fn commit_version(&self, write_owners: &[usize]) -> Self {
        let max = write_owners
            .iter()
            .map(|index| self.get(*index))
            .max()
            .unwrap_or(NON_EXISTING);
        let mut counters = self.counters.clone();
        for index in write_owners {
            if let Some(slot) = counters.get_mut(*index) {
                *slot = max;
            }
        }
        Self::new(self.view_id, counters)
    }
}

impl fmt::Display for DistributedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, counter) in self.counters.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            if *counter == i64::MAX {
                f.write_str("*")?;
            } else {
                write!(f, "{counter}")?;
            }
        }
        f.write_str("]")
    }
}
