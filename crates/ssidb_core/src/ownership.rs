//! Key placement.
//!
//! Ownership maps a key to the coordinates of the members that store it in
//! a given view. The first owner is the primary and serves reads.

use crate::types::{Key, NodeAddress};
use crate::version::ClusterSnapshot;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Decides which members own a key.
pub trait KeyOwnership: Send + Sync + fmt::Debug {
    /// Coordinates of the owners of `key` in `view`, primary first.
    fn owners(&self, key: &Key, view: &ClusterSnapshot) -> Vec<usize>;

    /// Coordinate of the primary owner.
    fn primary_owner(&self, key: &Key, view: &ClusterSnapshot) -> Option<usize> {
        self.owners(key, view).first().copied()
    }

    /// True if member `index` owns `key`.
    fn is_owner(&self, key: &Key, view: &ClusterSnapshot, index: usize) -> bool {
        self.owners(key, view).contains(&index)
    }
}

/// Places a key on `num_owners` consecutive members starting at a position
/// derived from the key's SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashOwnership {
    num_owners: usize,
}

impl HashOwnership {
    /// Creates a placement with `num_owners` copies of every key.
    pub fn new(num_owners: usize) -> Self {
        Self {
            num_owners: num_owners.max(1),
        }
    }

    /// Number of copies per key.
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    fn start(key: &Key, members: usize) -> usize {
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % members as u64) as usize
    }
}

impl Default for HashOwnership {
    fn default() -> Self {
        Self::new(1)
    }
}

impl KeyOwnership for HashOwnership {
    fn owners(&self, key: &Key, view: &ClusterSnapshot) -> Vec<usize> {
        let members = view.len();
        if members == 0 {
            return Vec::new();
        }
        let start = Self::start(key, members);
        (0..self.num_owners.min(members))
            .map(|offset| (start + offset) % members)
            .collect()
    }
}

/// Fixed placement for chosen keys, hashing everything else.
#[derive(Debug, Clone, Default)]
pub struct ExplicitOwnership {
    placement: HashMap<Key, Vec<NodeAddress>>,
    fallback: HashOwnership,
}

impl ExplicitOwnership {
    /// Creates a placement that hashes unplaced keys with `fallback`.
    pub fn new(fallback: HashOwnership) -> Self {
        Self {
            placement: HashMap::new(),
            fallback,
        }
    }

    /// Places `key` on `owners`, primary first.
    #[must_use]
    pub fn place(mut self, key: impl Into<Key>, owners: &[&str]) -> Self {
        self.placement.insert(
            key.into(),
            owners.iter().map(|owner| NodeAddress::from(*owner)).collect(),
        );
        self
    }
}

impl KeyOwnership for ExplicitOwnership {
    fn owners(&self, key: &Key, view: &ClusterSnapshot) -> Vec<usize> {
        let placed: Vec<usize> = self
            .placement
            .get(key)
            .map(|owners| owners.iter().filter_map(|owner| view.index_of(owner)).collect())
            .unwrap_or_default();
        if placed.is_empty() {
            self.fallback.owners(key, view)
        } else {
            placed
        }
    }
}
