//! Newest-first history of one key's committed values.

use super::arena::Arena;
use crate::commit_log::LogPosition;
use crate::error::{CoreError, CoreResult};
use crate::types::Value;
use crate::version::{EntryCreationVersion, ReadWindowVersion, VersionOrdering};
use std::fmt;

/// One committed value of a key. `value` is `None` for a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBody {
    /// The payload, or `None` for a tombstone.
    pub value: Option<Value>,
    /// Version the value was committed with.
    pub version: EntryCreationVersion,
    /// Whether the creating transaction had an outgoing dependency edge.
    pub has_outgoing_edge: bool,
    /// Wall-clock expiry in milliseconds since the Unix epoch.
    pub expires_at: Option<u64>,
}

impl VersionedBody {
    /// Creates a body for a live value.
    pub fn new(value: Option<Value>, version: EntryCreationVersion) -> Self {
        Self {
            value,
            version,
            has_outgoing_edge: false,
            expires_at: None,
        }
    }

    /// Sets the outgoing edge flag.
    #[must_use]
    pub fn with_outgoing_edge(mut self, outgoing: bool) -> Self {
        self.has_outgoing_edge = outgoing;
        self
    }

    /// Sets the expiry time.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: Option<u64>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// True for a removal.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// True once `now` has reached the expiry time.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Local commit position of the body.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.version.version(), self.version.sub_version())
    }
}

/// Result of a chain lookup.
#[derive(Debug, Clone, Default)]
pub struct ChainLookup {
    /// The matched body, if any version was visible.
    pub body: Option<VersionedBody>,
    /// True if the match is the newest version of the key.
    pub most_recent: bool,
    /// Version of the body just newer than the match.
    pub next_version: Option<EntryCreationVersion>,
}

impl ChainLookup {
    /// True if some version was visible.
    pub fn found(&self) -> bool {
        self.body.is_some()
    }

    /// Outgoing edge flag of the matched body.
    pub fn has_outgoing_edge(&self) -> bool {
        self.body.as_ref().is_some_and(|body| body.has_outgoing_edge)
    }
}

/// Where an appended body ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Became the new head.
    Head,
    /// Matched the head's version and was merged into it.
    Reincarnated,
}

/// Version chain of one key, newest first.
///
/// Callers serialize mutation; lookups only need shared access.
#[derive(Debug, Default)]
pub struct VersionChain {
    arena: Arena<VersionedBody>,
}

impl VersionChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked versions.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True if the chain holds no version.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Newest version.
    pub fn head(&self) -> Option<&VersionedBody> {
        self.arena.head().and_then(|id| self.arena.get(id))
    }

    /// Iterates versions newest first.
    pub fn iter(&self) -> impl Iterator<Item = &VersionedBody> {
        self.arena.iter().map(|(body, _)| body)
    }

    /// Finds the newest version visible through `window`, or the head when
    /// no window is given.
    pub fn lookup(&self, window: Option<&ReadWindowVersion>) -> ChainLookup {
        let Some(window) = window else {
            return ChainLookup {
                body: self.head().cloned(),
                most_recent: true,
                next_version: None,
            };
        };

        let mut newer: Option<&VersionedBody> = None;
        for (body, _) in self.arena.iter() {
            if body.version.compare_read(window).is_older_or_equal() {
                return ChainLookup {
                    body: Some(body.clone()),
                    most_recent: newer.is_none(),
                    next_version: newer.map(|n| n.version.clone()),
                };
            }
            newer = Some(body);
        }
        ChainLookup {
            body: None,
            most_recent: false,
            next_version: newer.map(|n| n.version.clone()),
        }
    }

    /// True if a live value is visible through `window`.
    pub fn contains(&self, window: Option<&ReadWindowVersion>) -> bool {
        self.lookup(window)
            .body
            .is_some_and(|body| !body.is_tombstone())
    }

    /// Links `body` as the new head.
    ///
    /// Commits are applied in order, so a body older than the head is a
    /// protocol violation. A body equal to the head leaves the head as it
    /// is.
    pub fn append(&mut self, body: VersionedBody) -> CoreResult<AppendOutcome> {
        let outcome = self.check_append(&body.version)?;
        if outcome == AppendOutcome::Reincarnated {
            if let Some(head) = self.arena.head().and_then(|id| self.arena.get(id)) {
                if head.value != body.value {
                    tracing::error!(
                        version = %body.version,
                        "reincarnated version carries a different payload, keeping the head"
                    );
                }
            }
            return Ok(outcome);
        }
        self.arena.push_front(body);
        Ok(outcome)
    }

    /// Tells where a body at `version` would land without linking it.
    pub fn check_append(&self, version: &EntryCreationVersion) -> CoreResult<AppendOutcome> {
        let Some(head_id) = self.arena.head() else {
            return Ok(AppendOutcome::Head);
        };
        let head = self
            .arena
            .get(head_id)
            .ok_or_else(|| CoreError::invalid_operation("version chain head is stale"))?;
        match version.compare_entry(&head.version) {
            VersionOrdering::Equal => Ok(AppendOutcome::Reincarnated),
            VersionOrdering::Before => Err(CoreError::invalid_operation(format!(
                "version {version} is older than head {}",
                head.version
            ))),
            _ => Ok(AppendOutcome::Head),
        }
    }

    /// Drops every version older than the newest one at or below `horizon`.
    /// The head is never dropped. Returns the number of freed versions.
    pub fn gc(&mut self, horizon: LogPosition) -> usize {
        let kept = self
            .arena
            .iter()
            .find(|(body, _)| body.position() <= horizon)
            .map(|(body, id)| (id, body.position()));
        match kept {
            Some((id, position)) => self
                .arena
                .truncate_after(id, |older| older.position() < position),
            None => 0,
        }
    }

    /// Drops expired versions. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        self.arena.retain(|body| !body.is_expired(now))
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.arena.clear();
    }
}

impl fmt::Display for VersionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, body) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(" -> ")?;
            }
            match &body.value {
                Some(value) => write!(f, "{}({}b)", body.version, value.len())?,
                None => write!(f, "{}(removed)", body.version)?,
            }
        }
        f.write_str("]")
    }
}
