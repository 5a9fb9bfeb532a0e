//! Comparison results between versions.

use super::NON_EXISTING;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Result of comparing two versions.
///
/// Vector versions are only partially ordered, so besides the usual
/// before/equal/after there are mixed and conflicting outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionOrdering {
    /// Strictly older.
    Before,
    /// Identical.
    Equal,
    /// Strictly newer.
    After,
    /// Older on some coordinates, equal on the rest.
    BeforeOrEqual,
    /// Newer on some coordinates, equal on the rest.
    AfterOrEqual,
    /// Older on some coordinates and newer on others.
    Conflicting,
}

impl VersionOrdering {
    /// Compares two scalar counters. An unknown left side sorts first, an
    /// unknown right side sorts last.
    pub fn of_scalars(left: i64, right: i64) -> Self {
        if left == NON_EXISTING {
            Self::Before
        } else if right == NON_EXISTING {
            Self::After
        } else {
            Self::of_ord(left.cmp(&right))
        }
    }

    /// Converts a total ordering.
    pub fn of_ord(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Before,
            Ordering::Equal => Self::Equal,
            Ordering::Greater => Self::After,
        }
    }

    /// Falls through to `tie_break` when this result is `Equal`.
    #[must_use]
    pub fn then_with(self, tie_break: impl FnOnce() -> Self) -> Self {
        match self {
            Self::Equal => tie_break(),
            other => other,
        }
    }

    /// True for `Before`, `Equal` and `BeforeOrEqual`.
    pub fn is_older_or_equal(self) -> bool {
        matches!(self, Self::Before | Self::Equal | Self::BeforeOrEqual)
    }

    /// True only for a strict `After`.
    pub fn is_after(self) -> bool {
        self == Self::After
    }

    /// Swaps the roles of the compared versions.
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            Self::BeforeOrEqual => Self::AfterOrEqual,
            Self::AfterOrEqual => Self::BeforeOrEqual,
            other => other,
        }
    }
}
