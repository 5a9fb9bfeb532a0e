//! Keyed store of version chains and commit traces.
//!
//! Keys are spread over a fixed number of shards, each a
//! `RwLock<HashMap<Key, Arc<KeyEntry>>>`. A shard lock is held only to find
//! or create the entry; chain access then goes through the entry's own
//! locks.

use crate::chain::{AppendOutcome, CommitRecord, SlotId, TraceChain, VersionChain, VersionedBody};
use crate::commit_log::LogPosition;
use crate::error::{CoreError, CoreResult};
use crate::types::{GlobalTxId, Key, Value};
use crate::version::{DistributedVersion, EntryCreationVersion, ReadWindowVersion, NON_EXISTING};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Everything stored for one key.
#[derive(Debug)]
pub struct KeyEntry {
    chain: RwLock<VersionChain>,
    trace: RwLock<TraceChain>,
    visible_read: AtomicI64,
}

impl Default for KeyEntry {
    fn default() -> Self {
        Self {
            chain: RwLock::new(VersionChain::new()),
            trace: RwLock::new(TraceChain::new()),
            visible_read: AtomicI64::new(NON_EXISTING),
        }
    }
}

impl KeyEntry {
    /// Highest local scalar at which the key has been read by a
    /// transaction that reached prepare.
    pub fn visible_read(&self) -> i64 {
        self.visible_read.load(Ordering::Acquire)
    }
}

/// What a read resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// A live value.
    Value(Value),
    /// The visible version is a removal.
    Removed,
    /// The key was never written.
    NeverExisted,
    /// The key exists but every version is newer than the snapshot.
    BelowSnapshot,
    /// The visible version's lifespan has elapsed.
    Expired,
}

impl EntryState {
    /// The value, if the state is a live one.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// A read result. Absence is always reported through [`EntryState`].
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The key read.
    pub key: Key,
    /// Resolved state.
    pub state: EntryState,
    /// Version of the matched body.
    pub version: Option<EntryCreationVersion>,
    /// True if no newer version exists.
    pub most_recent: bool,
    /// Version just newer than the match.
    pub next_version: Option<EntryCreationVersion>,
    /// Outgoing edge flag of the matched body's creator.
    pub has_outgoing_edge: bool,
}

impl CacheEntry {
    /// The value, if the read found a live one.
    pub fn value(&self) -> Option<&Value> {
        match &self.state {
            EntryState::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Consumes the entry and returns its value.
    pub fn into_value(self) -> Option<Value> {
        self.state.into_value()
    }
}

/// Sharded map from key to [`KeyEntry`].
#[derive(Debug)]
pub struct DataContainer {
    shards: Vec<RwLock<HashMap<Key, Arc<KeyEntry>>>>,
}

impl DataContainer {
    /// Creates a container with `concurrency_level` shards.
    pub fn new(concurrency_level: usize) -> Self {
        let shards = (0..concurrency_level.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, key: &Key) -> &RwLock<HashMap<Key, Arc<KeyEntry>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Looks up the entry of `key`.
    pub fn entry(&self, key: &Key) -> Option<Arc<KeyEntry>> {
        self.shard(key).read().get(key).cloned()
    }

    fn entry_or_insert(&self, key: &Key) -> Arc<KeyEntry> {
        if let Some(entry) = self.entry(key) {
            return entry;
        }
        self.shard(key)
            .write()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn entries(&self) -> Vec<(Key, Arc<KeyEntry>)> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Reads `key` through `window`; `None` reads the newest version.
    pub fn read(&self, key: &Key, window: Option<&ReadWindowVersion>, now: u64) -> CacheEntry {
        let Some(entry) = self.entry(key) else {
            return Self::absent(key, EntryState::NeverExisted);
        };
        let (empty, lookup) = {
            let chain = entry.chain.read();
            (chain.is_empty(), chain.lookup(window))
        };
        let Some(body) = lookup.body.as_ref() else {
            let state = if empty {
                EntryState::NeverExisted
            } else {
                EntryState::BelowSnapshot
            };
            return CacheEntry {
                next_version: lookup.next_version,
                ..Self::absent(key, state)
            };
        };

        let state = match &body.value {
            _ if body.is_expired(now) => EntryState::Expired,
            Some(value) => EntryState::Value(value.clone()),
            None => EntryState::Removed,
        };
        CacheEntry {
            key: key.clone(),
            state,
            version: Some(body.version.clone()),
            most_recent: lookup.most_recent,
            has_outgoing_edge: body.has_outgoing_edge,
            next_version: lookup.next_version,
        }
    }

    fn absent(key: &Key, state: EntryState) -> CacheEntry {
        CacheEntry {
            key: key.clone(),
            most_recent: state == EntryState::NeverExisted,
            state,
            version: None,
            next_version: None,
            has_outgoing_edge: false,
        }
    }

    /// Stores a committed value. `value` of `None` stores a removal.
    pub fn write(
        &self,
        key: &Key,
        value: Option<Value>,
        version: Option<EntryCreationVersion>,
        has_outgoing_edge: bool,
        expires_at: Option<u64>,
    ) -> CoreResult<AppendOutcome> {
        let version = version
            .ok_or_else(|| CoreError::missing_version(format!("write of key {key}")))?;
        let body = VersionedBody::new(value, version)
            .with_outgoing_edge(has_outgoing_edge)
            .with_expiry(expires_at);
        let entry = self.entry_or_insert(key);
        let mut chain = entry.chain.write();
        let outcome = chain.append(body)?;
        tracing::trace!(key = %key, chain = %chain, "appended version");
        Ok(outcome)
    }

    /// Fails if a write of `key` at `version` would be refused by its chain.
    /// Nothing is stored.
    pub fn check_write(&self, key: &Key, version: &EntryCreationVersion) -> CoreResult<()> {
        match self.entry(key) {
            Some(entry) => entry.chain.read().check_append(version).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Stores a removal.
    pub fn remove(
        &self,
        key: &Key,
        version: Option<EntryCreationVersion>,
        has_outgoing_edge: bool,
    ) -> CoreResult<AppendOutcome> {
        self.write(key, None, version, has_outgoing_edge, None)
    }

    /// Raises the key's visible-read watermark to `version`.
    pub fn mark_visible_read(&self, key: &Key, version: i64) {
        self.entry_or_insert(key)
            .visible_read
            .fetch_max(version, Ordering::AcqRel);
    }

    /// True if the key was read at or after `version`.
    pub fn was_read_since(&self, key: &Key, version: i64) -> bool {
        self.entry(key)
            .is_some_and(|entry| entry.visible_read() >= version)
    }

    /// Runs `f` over the key's version chain.
    pub fn with_chain<R>(&self, key: &Key, f: impl FnOnce(&VersionChain) -> R) -> Option<R> {
        self.entry(key).map(|entry| f(&*entry.chain.read()))
    }

    /// Runs `f` over the key's commit trace.
    pub fn with_trace<R>(&self, key: &Key, f: impl FnOnce(&TraceChain) -> R) -> Option<R> {
        self.entry(key).map(|entry| f(&*entry.trace.read()))
    }

    /// Appends a provisional trace record for `tx`.
    pub fn append_trace(
        &self,
        key: &Key,
        tx: GlobalTxId,
        creator: DistributedVersion,
        has_outgoing_edge: bool,
    ) -> SlotId {
        self.entry_or_insert(key)
            .trace
            .write()
            .append(tx, creator, has_outgoing_edge)
    }

    /// Finalizes a provisional trace record.
    pub fn finalize_trace(
        &self,
        key: &Key,
        slot: SlotId,
        creator: DistributedVersion,
        has_outgoing_edge: bool,
        position: LogPosition,
    ) -> bool {
        self.entry(key).is_some_and(|entry| {
            entry
                .trace
                .write()
                .finalize(slot, creator, has_outgoing_edge, position)
        })
    }

    /// The last finalized trace record of `key`.
    pub fn most_recent_trace(&self, key: &Key) -> Option<CommitRecord> {
        self.with_trace(key, |trace| trace.most_recent().cloned())
            .flatten()
    }

    /// Removes a provisional trace record.
    pub fn retract_trace(&self, key: &Key, slot: SlotId) -> bool {
        self.entry(key)
            .is_some_and(|entry| entry.trace.write().retract(slot))
    }

    /// True if a live value of `key` is visible through `window`.
    pub fn contains_key(&self, key: &Key, window: Option<&ReadWindowVersion>) -> bool {
        self.with_chain(key, |chain| chain.contains(window))
            .unwrap_or(false)
    }

    /// Number of keys with a live value visible through `window`.
    pub fn size(&self, window: Option<&ReadWindowVersion>) -> usize {
        self.entries()
            .iter()
            .filter(|(_, entry)| entry.chain.read().contains(window))
            .count()
    }

    /// All keys ever written or traced.
    pub fn keys(&self) -> Vec<Key> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    /// Versions of `key`, newest first.
    pub fn history(&self, key: &Key) -> Vec<VersionedBody> {
        self.with_chain(key, |chain| chain.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops expired versions everywhere. Returns how many were dropped.
    pub fn purge_expired(&self, now: u64) -> usize {
        self.entries()
            .iter()
            .map(|(_, entry)| entry.chain.write().purge_expired(now))
            .sum()
    }

    /// Collects both chains of every key behind `horizon`.
    ///
    /// `min` is the cluster-wide minimum live snapshot and `node` the local
    /// coordinate. Returns the number of reclaimed slots.
    pub fn garbage_collect(
        &self,
        horizon: LogPosition,
        min: &DistributedVersion,
        node: usize,
    ) -> usize {
        self.entries()
            .iter()
            .map(|(key, entry)| {
                let versions = entry.chain.write().gc(horizon);
                let traces = entry.trace.write().gc(horizon, min, node);
                if versions + traces > 0 {
                    tracing::trace!(key = %key, versions, traces, "reclaimed slots");
                }
                versions + traces
            })
            .sum()
    }

    /// Drops every key.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ViewId;

    const VIEW: ViewId = ViewId::new(1);

    fn version(v: i64) -> Option<EntryCreationVersion> {
        Some(EntryCreationVersion::new(VIEW, 0, v, 0, vec![v, 0]))
    }

    fn window(bound: i64) -> ReadWindowVersion {
        ReadWindowVersion::new(VIEW, 0, bound, false)
    }

    #[test]
    fn write_requires_version() {
        let container = DataContainer::new(4);
        let err = container
            .write(&Key::from("k"), Some(b"v".to_vec()), None, false, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingVersion { .. }));
    }

    #[test]
    fn check_write_refuses_versions_behind_the_head() {
        let container = DataContainer::new(2);
        let key = Key::from("k");
        let older = version(1).unwrap();
        assert!(container.check_write(&key, &older).is_ok());

        container
            .write(&key, Some(b"v".to_vec()), version(2), false, None)
            .unwrap();
        assert!(container.check_write(&key, &older).is_err());
        assert!(container.check_write(&key, &version(2).unwrap()).is_ok());
        assert_eq!(container.history(&key).len(), 1);
    }

    #[test]
    fn read_distinguishes_absence() {
        let container = DataContainer::new(4);
        let key = Key::from("k");
        assert_eq!(
            container.read(&key, None, 0).state,
            EntryState::NeverExisted
        );

        container
            .write(&key, Some(b"v".to_vec()), version(2), false, Some(100))
            .unwrap();
        assert_eq!(
            container.read(&key, Some(&window(1)), 0).state,
            EntryState::BelowSnapshot
        );
        assert_eq!(
            container.read(&key, Some(&window(2)), 0).value(),
            Some(&b"v".to_vec())
        );
        assert_eq!(container.read(&key, None, 100).state, EntryState::Expired);

        container.remove(&key, version(3), false).unwrap();
        let removed = container.read(&key, None, 0);
        assert_eq!(removed.state, EntryState::Removed);
        assert!(removed.most_recent);
    }

    #[test]
    fn stale_reads_report_next_version() {
        let container = DataContainer::new(1);
        let key = Key::from("k");
        container
            .write(&key, Some(b"a".to_vec()), version(1), false, None)
            .unwrap();
        container
            .write(&key, Some(b"b".to_vec()), version(2), true, None)
            .unwrap();

        let stale = container.read(&key, Some(&window(1)), 0);
        assert!(!stale.most_recent);
        assert_eq!(stale.next_version.unwrap().version(), 2);
        assert!(!stale.has_outgoing_edge);

        let fresh = container.read(&key, Some(&window(5)), 0);
        assert!(fresh.most_recent);
        assert!(fresh.has_outgoing_edge);
    }

    #[test]
    fn visible_read_watermark_is_monotonic() {
        let container = DataContainer::new(2);
        let key = Key::from("k");
        assert!(!container.was_read_since(&key, 0));

        container.mark_visible_read(&key, 5);
        container.mark_visible_read(&key, 3);
        assert!(container.was_read_since(&key, 5));
        assert!(!container.was_read_since(&key, 6));
        assert_eq!(container.entry(&key).unwrap().visible_read(), 5);
    }

    #[test]
    fn size_counts_visible_live_keys() {
        let container = DataContainer::new(3);
        for (index, name) in ["a", "b", "c"].iter().enumerate() {
            let v = index as i64 + 1;
            container
                .write(&Key::from(*name), Some(vec![1]), version(v), false, None)
                .unwrap();
        }
        container.remove(&Key::from("a"), version(4), false).unwrap();

        assert_eq!(container.size(Some(&window(2))), 2);
        assert_eq!(container.size(None), 2);
        assert!(container.contains_key(&Key::from("c"), None));
        assert!(!container.contains_key(&Key::from("a"), None));
        assert_eq!(container.keys().len(), 3);
    }

    #[test]
    fn garbage_collect_spans_both_chains() {
        let container = DataContainer::new(2);
        let key = Key::from("k");
        let tx = GlobalTxId::new();
        for v in 1..=3 {
            container
                .write(&key, Some(vec![v as u8]), version(v), false, None)
                .unwrap();
            let slot =
                container.append_trace(&key, tx, DistributedVersion::new(VIEW, vec![v, 0]), false);
            assert!(container.finalize_trace(
                &key,
                slot,
                DistributedVersion::new(VIEW, vec![v, 0]),
                false,
                LogPosition::new(v, 0),
            ));
        }

        let min = DistributedVersion::new(VIEW, vec![3, 0]);
        assert_eq!(container.garbage_collect(LogPosition::new(2, 0), &min, 0), 3);
        assert_eq!(container.history(&key).len(), 2);
        assert_eq!(container.with_trace(&key, TraceChain::len), Some(1));
        assert_eq!(
            container.most_recent_trace(&key).and_then(|record| record.position()),
            Some(LogPosition::new(3, 0))
        );
        assert!(container.most_recent_trace(&Key::from("absent")).is_none());
    }
}
