//! Cluster views and their history.

use crate::error::{CoreError, CoreResult};
use crate::types::{NodeAddress, ViewId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable ordered membership of one cluster view.
///
/// A member's position in `members` is its coordinate in every
/// [`DistributedVersion`](super::DistributedVersion) of that view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSnapshot {
    view_id: ViewId,
    members: Vec<NodeAddress>,
}

impl ClusterSnapshot {
    /// Creates a snapshot for a view.
    pub fn new(view_id: ViewId, members: Vec<NodeAddress>) -> Self {
        Self { view_id, members }
    }

    /// Returns the view id.
    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Returns the members in coordinate order.
    pub fn members(&self) -> &[NodeAddress] {
        &self.members
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the view has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the coordinate of `address`, if it is a member.
    pub fn index_of(&self, address: &NodeAddress) -> Option<usize> {
        self.members.iter().position(|member| member == address)
    }

    /// Returns the member at `index`.
    pub fn member(&self, index: usize) -> Option<&NodeAddress> {
        self.members.get(index)
    }
}

/// History of installed cluster views.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: RwLock<BTreeMap<ViewId, Arc<ClusterSnapshot>>>,
}

impl ViewRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with one installed view.
    pub fn with_view(snapshot: ClusterSnapshot) -> Self {
        let registry = Self::new();
        registry.install(snapshot);
        registry
    }

    /// Installs a view. Views older than or equal to the current one are
    /// ignored; returns whether the view was installed.
    pub fn install(&self, snapshot: ClusterSnapshot) -> bool {
        let mut views = self.views.write();
        if let Some((current, _)) = views.last_key_value() {
            if *current >= snapshot.view_id() {
                return false;
            }
        }
        tracing::debug!(view = %snapshot.view_id(), members = snapshot.len(), "installing cluster view");
        views.insert(snapshot.view_id(), Arc::new(snapshot));
        true
    }

    /// Returns the most recent view.
    pub fn current(&self) -> CoreResult<Arc<ClusterSnapshot>> {
        self.views
            .read()
            .last_key_value()
            .map(|(_, snapshot)| Arc::clone(snapshot))
            .ok_or_else(|| CoreError::invalid_operation("no cluster view installed"))
    }

    /// Returns the view with the given id.
    pub fn get(&self, view_id: ViewId) -> CoreResult<Arc<ClusterSnapshot>> {
        self.views
            .read()
            .get(&view_id)
            .cloned()
            .ok_or(CoreError::UnknownView { view_id })
    }

    /// Drops views older than `min_view`. The current view is always kept.
    /// Returns the number of views dropped.
    pub fn gc_below(&self, min_view: ViewId) -> usize {
        let mut views = self.views.write();
        let Some(current) = views.last_key_value().map(|(id, _)| *id) else {
            return 0;
        };
        let keep_from = min_view.min(current);
        let before = views.len();
        views.retain(|id, _| *id >= keep_from);
        before - views.len()
    }

    /// Returns the number of views retained.
    pub fn len(&self) -> usize {
        self.views.read().len()
    }

    /// Returns true if no view was ever installed.
    pub fn is_empty(&self) -> bool {
        self.views.read().is_empty()
    }
}
