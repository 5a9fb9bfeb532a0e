//! Version generation and merging.

use super::{
    ClusterSnapshot, DistributedVersion, EntryCreationVersion, ReadWindowVersion,
    ReplicatedVersion, Version, ViewRegistry,
};
use crate::error::{CoreError, CoreResult};
use crate::types::NodeAddress;
use std::sync::Arc;

/// Which family of versions a generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionScheme {
    /// Single counter, every node owns every key.
    Replicated,
    /// Vector with one counter per member.
    Distributed,
}

/// Produces and combines versions for one node.
///
/// The generator always stamps new versions with the current view from the
/// shared [`ViewRegistry`].
#[derive(Debug, Clone)]
pub struct VersionGenerator {
    scheme: VersionScheme,
    local: NodeAddress,
    views: Arc<ViewRegistry>,
}

impl VersionGenerator {
    /// Creates a generator for `local`.
    pub fn new(scheme: VersionScheme, local: NodeAddress, views: Arc<ViewRegistry>) -> Self {
        Self {
            scheme,
            local,
            views,
        }
    }

    /// Returns the scheme.
    pub fn scheme(&self) -> VersionScheme {
        self.scheme
    }

    /// Returns the view registry.
    pub fn views(&self) -> &Arc<ViewRegistry> {
        &self.views
    }

    /// Returns the current view.
    pub fn current_view(&self) -> CoreResult<Arc<ClusterSnapshot>> {
        self.views.current()
    }

    /// Returns this node's coordinate in the current view.
    pub fn local_index(&self) -> CoreResult<usize> {
        let view = self.current_view()?;
        view.index_of(&self.local).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "{} is not a member of {}",
                self.local,
                view.view_id()
            ))
        })
    }

    /// Version zero of the current view.
    pub fn generate(&self) -> CoreResult<Version> {
        let view = self.current_view()?;
        Ok(match self.scheme {
            VersionScheme::Replicated => ReplicatedVersion::new(view.view_id(), 0).into(),
            VersionScheme::Distributed => {
                DistributedVersion::zero(view.view_id(), view.len()).into()
            }
        })
    }

    /// Bumps this node's coordinate.
    pub fn increment(&self, version: &Version) -> CoreResult<Version> {
        let view = self.current_view()?;
        match version {
            Version::Replicated(v) => {
                Ok(ReplicatedVersion::new(view.view_id(), v.counter() + 1).into())
            }
            Version::Distributed(v) => {
                let index = self.local_index()?;
                Ok(v.with(index, v.get(index) + 1).into())
            }
            other => Err(CoreError::incompatible_view(
                "replicated or distributed",
                other.kind(),
            )),
        }
    }

    /// Component-wise maximum of versions of the generator's scheme.
    pub fn merge_max(&self, versions: &[Version]) -> CoreResult<Version> {
        match self.scheme {
            VersionScheme::Replicated => {
                let view = self.current_view()?;
                let scalars = self.replicated(versions)?;
                Ok(ReplicatedVersion::merge_max(view.view_id(), &scalars)?.into())
            }
            VersionScheme::Distributed => {
                let vectors = self.distributed(versions)?;
                Ok(DistributedVersion::merge_max(vectors)?.into())
            }
        }
    }

    /// Component-wise minimum of versions of the generator's scheme,
    /// ignoring unknown coordinates.
    pub fn merge_min(&self, versions: &[Version]) -> CoreResult<Version> {
        match self.scheme {
            VersionScheme::Replicated => {
                let view = self.current_view()?;
                let scalars = self.replicated(versions)?;
                Ok(ReplicatedVersion::merge_min(view.view_id(), &scalars).into())
            }
            VersionScheme::Distributed => {
                let vectors = self.distributed(versions)?;
                Ok(DistributedVersion::merge_min(vectors)?.into())
            }
        }
    }

    /// Commit version from the merged prepare version and the coordinates of
    /// the nodes that own written keys.
    pub fn calculate_commit_version(
        &self,
        merged: Option<&Version>,
        write_owners: &[usize],
    ) -> CoreResult<Version> {
        match merged {
            None => Err(CoreError::missing_version("merged prepare version")),
            Some(Version::Replicated(v)) => Ok((*v).into()),
            Some(Version::Distributed(v)) => Ok(v.commit_version(write_owners).into()),
            Some(other) => Err(CoreError::incompatible_view(
                "replicated or distributed",
                other.kind(),
            )),
        }
    }

    /// The version stamped on a value committed at `version`.
    ///
    /// `creation` defaults to the commit version itself.
    pub fn convert_to_write(
        &self,
        version: &Version,
        sub_version: u32,
        creation: Option<&DistributedVersion>,
    ) -> CoreResult<EntryCreationVersion> {
        let index = self.local_index()?;
        match version {
            Version::Replicated(v) => Ok(EntryCreationVersion::new(
                v.view_id(),
                0,
                v.counter(),
                sub_version,
                vec![v.counter()],
            )),
            Version::Distributed(v) => {
                let creation = creation.unwrap_or(v);
                Ok(EntryCreationVersion::new(
                    v.view_id(),
                    index,
                    v.get(index),
                    sub_version,
                    creation.counters().to_vec(),
                ))
            }
            other => Err(CoreError::incompatible_view(
                "replicated or distributed",
                other.kind(),
            )),
        }
    }

    /// A read window bounded by this node's coordinate of `version`.
    pub fn convert_to_read(
        &self,
        version: &Version,
        from_write_tx: bool,
    ) -> CoreResult<ReadWindowVersion> {
        match version {
            Version::Replicated(v) => Ok(ReadWindowVersion::new(
                v.view_id(),
                0,
                v.counter(),
                from_write_tx,
            )),
            Version::Distributed(v) => {
                let index = self.local_index()?;
                Ok(ReadWindowVersion::new(
                    v.view_id(),
                    index,
                    v.get(index),
                    from_write_tx,
                ))
            }
            other => Err(CoreError::incompatible_view(
                "replicated or distributed",
                other.kind(),
            )),
        }
    }

    /// Re-stamps a version onto the current view, mapping coordinates by
    /// member address. Members unknown to the old view become unknown.
    pub fn updated_version(&self, version: &DistributedVersion) -> CoreResult<DistributedVersion> {
        let current = self.current_view()?;
        if current.view_id() == version.view_id() {
            return Ok(version.clone());
        }
        let old = self.views.get(version.view_id())?;
        let counters = current
            .members()
            .iter()
            .map(|member| {
                old.index_of(member)
                    .map_or(super::NON_EXISTING, |index| version.get(index))
            })
            .collect();
        Ok(DistributedVersion::new(current.view_id(), counters))
    }

    fn replicated(&self, versions: &[Version]) -> CoreResult<Vec<ReplicatedVersion>> {
        versions
            .iter()
            .map(|version| match version {
                Version::Replicated(v) => Ok(*v),
                other => Err(CoreError::incompatible_view("replicated", other.kind())),
            })
            .collect()
    }

    fn distributed<'a>(&self, versions: &'a [Version]) -> CoreResult<Vec<&'a DistributedVersion>> {
        versions
            .iter()
            .map(|version| match version {
                Version::Distributed(v) => Ok(v),
                other => Err(CoreError::incompatible_view("distributed", other.kind())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ViewId;

    fn generator(scheme: VersionScheme) -> VersionGenerator {
        let view = ClusterSnapshot::new(
            ViewId::new(1),
            vec![NodeAddress::from("a"), NodeAddress::from("b")],
        );
        VersionGenerator::new(
            scheme,
            NodeAddress::from("b"),
            Arc::new(ViewRegistry::with_view(view)),
        )
    }

    fn dist(counters: &[i64]) -> Version {
        DistributedVersion::new(ViewId::new(1), counters.to_vec()).into()
    }

    #[test]
    fn generate_and_increment_distributed() {
        let gen = generator(VersionScheme::Distributed);
        let zero = gen.generate().unwrap();
        assert_eq!(zero, dist(&[0, 0]));
        assert_eq!(gen.increment(&zero).unwrap(), dist(&[0, 1]));
    }

    #[test]
    fn generate_and_increment_replicated() {
        let gen = generator(VersionScheme::Replicated);
        let zero = gen.generate().unwrap();
        let one = gen.increment(&zero).unwrap();
        assert_eq!(one, ReplicatedVersion::new(ViewId::new(1), 1).into());
    }

    #[test]
    fn merges_dispatch_on_scheme() {
        let gen = generator(VersionScheme::Distributed);
        let merged = gen.merge_max(&[dist(&[1, 4]), dist(&[3, 2])]).unwrap();
        assert_eq!(merged, dist(&[3, 4]));
        let min = gen.merge_min(&[dist(&[1, 4]), dist(&[3, 2])]).unwrap();
        assert_eq!(min, dist(&[1, 2]));

        let repl: Version = ReplicatedVersion::new(ViewId::new(1), 1).into();
        assert!(gen.merge_max(&[dist(&[1, 4]), repl]).is_err());
    }

    #[test]
    fn commit_version_requires_merged_input() {
        let gen = generator(VersionScheme::Distributed);
        assert!(matches!(
            gen.calculate_commit_version(None, &[0]),
            Err(CoreError::MissingVersion { .. })
        ));
        let commit = gen
            .calculate_commit_version(Some(&dist(&[2, 5])), &[0, 1])
            .unwrap();
        assert_eq!(commit, dist(&[5, 5]));
    }

    #[test]
    fn convert_uses_local_coordinate() {
        let gen = generator(VersionScheme::Distributed);
        let entry = gen.convert_to_write(&dist(&[2, 5]), 1, None).unwrap();
        assert_eq!(entry.version(), 5);
        assert_eq!(entry.node_index(), 1);
        assert_eq!(entry.creation(), &[2, 5]);

        let read = gen.convert_to_read(&dist(&[2, 5]), true).unwrap();
        assert_eq!(read.bound(), 5);
        assert!(read.is_from_write_tx());
    }

    #[test]
    fn updated_version_maps_members() {
        let gen = generator(VersionScheme::Distributed);
        let old = DistributedVersion::new(ViewId::new(1), vec![4, 7]);
        gen.views().install(ClusterSnapshot::new(
            ViewId::new(2),
            vec![
                NodeAddress::from("b"),
                NodeAddress::from("c"),
                NodeAddress::from("a"),
            ],
        ));
        let updated = gen.updated_version(&old).unwrap();
        assert_eq!(updated.view_id(), ViewId::new(2));
        assert_eq!(updated.counters(), &[7, super::super::NON_EXISTING, 4]);
    }
}
