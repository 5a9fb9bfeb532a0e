//! Slot arena backing the per-key chains.
//!
//! A chain is a singly linked list, newest first, whose nodes live in a
//! `Vec` of slots. Links are [`SlotId`]s carrying a generation so a slot that
//! was freed and reused can never be reached through a stale id.

use std::fmt;

/// Generational index of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot:{}#{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    older: Option<SlotId>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Newest-first linked list stored in reusable slots.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<SlotId>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing is linked.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots on the free list.
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Id of the newest value.
    pub fn head(&self) -> Option<SlotId> {
        self.head
    }

    fn node(&self, id: SlotId) -> Option<&Node<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: SlotId) -> Option<&mut Node<T>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Returns the value behind `id`, if the id is still live.
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.node(id).map(|node| &node.value)
    }

    /// Returns the value behind `id` mutably.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.node_mut(id).map(|node| &mut node.value)
    }

    /// Returns the next older id.
    pub fn older(&self, id: SlotId) -> Option<SlotId> {
        self.node(id).and_then(|node| node.older)
    }

    fn alloc(&mut self, value: T, older: Option<SlotId>) -> SlotId {
        let node = Some(Node { value, older });
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = node;
            SlotId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                node,
            });
            SlotId {
                index,
                generation: 0,
            }
        }
    }

    fn release(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(node.value)
    }

    /// Links a new newest value.
    pub fn push_front(&mut self, value: T) -> SlotId {
        let id = self.alloc(value, self.head);
        self.head = Some(id);
        id
    }

    /// Links `value` directly behind `newer`. Returns `None` if `newer` is
    /// stale.
    pub fn insert_after(&mut self, newer: SlotId, value: T) -> Option<SlotId> {
        let older = self.node(newer)?.older;
        let id = self.alloc(value, older);
        if let Some(node) = self.node_mut(newer) {
            node.older = Some(id);
        }
        Some(id)
    }

    /// Iterates newest first.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            arena: self,
            next: self.head,
        }
    }

    /// Unlinks and frees the value behind `id`.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let older = self.node(id)?.older;
        if self.head == Some(id) {
            self.head = older;
        } else {
            let newer = self
                .iter()
                .map(|(_, candidate)| candidate)
                .find(|candidate| self.older(*candidate) == Some(id))?;
            if let Some(node) = self.node_mut(newer) {
                node.older = older;
            }
        }
        self.release(id)
    }

    /// Keeps only values for which `keep` returns true. Returns how many
    /// were freed.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let doomed: Vec<SlotId> = self
            .iter()
            .filter(|(value, _)| !keep(*value))
            .map(|(_, id)| id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.remove(id))
            .count()
    }

    /// Detaches every value older than `newest_kept` and frees it.
    ///
    /// Each detached value is first checked with `reclaimable`; if any check
    /// fails the chain is left untouched and zero is returned.
    pub fn truncate_after(
        &mut self,
        newest_kept: SlotId,
        mut reclaimable: impl FnMut(&T) -> bool,
    ) -> usize {
        let mut tail = Vec::new();
        let mut cursor = self.older(newest_kept);
        while let Some(id) = cursor {
            let Some(value) = self.get(id) else { break };
            if !reclaimable(value) {
                tracing::warn!(slot = %id, "refusing to reclaim a version that is still reachable");
                return 0;
            }
            tail.push(id);
            cursor = self.older(id);
        }
        if let Some(node) = self.node_mut(newest_kept) {
            node.older = None;
        }
        tail.into_iter().filter_map(|id| self.release(id)).count()
    }

    /// Unlinks and frees everything.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.len = 0;
    }
}

/// Newest-first iterator over `(value, id)` pairs.
pub struct Iter<'a, T> {
    arena: &'a Arena<T>,
    next: Option<SlotId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (&'a T, SlotId);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.arena.node(id)?;
        self.next = node.older;
        Some((&node.value, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(arena: &Arena<u32>) -> Vec<u32> {
        arena.iter().map(|(v, _)| *v).collect()
    }

    #[test]
    fn push_and_iterate_newest_first() {
        let mut arena = Arena::new();
        arena.push_front(1);
        arena.push_front(2);
        arena.push_front(3);
        assert_eq!(values(&arena), vec![3, 2, 1]);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn insert_after_links_in_between() {
        let mut arena = Arena::new();
        arena.push_front(1);
        let three = arena.push_front(3);
        arena.insert_after(three, 2).unwrap();
        assert_eq!(values(&arena), vec![3, 2, 1]);
    }

    #[test]
    fn freed_slots_are_reused_with_new_generation() {
        let mut arena = Arena::new();
        let old = arena.push_front(1);
        assert_eq!(arena.remove(old), Some(1));
        assert!(arena.get(old).is_none());

        let reused = arena.push_front(2);
        assert_ne!(old, reused);
        assert!(arena.get(old).is_none());
        assert_eq!(arena.get(reused), Some(&2));
    }

    #[test]
    fn remove_from_middle() {
        let mut arena = Arena::new();
        arena.push_front(1);
        let two = arena.push_front(2);
        arena.push_front(3);
        arena.remove(two);
        assert_eq!(values(&arena), vec![3, 1]);
    }

    #[test]
    fn truncate_frees_tail() {
        let mut arena = Arena::new();
        arena.push_front(1);
        arena.push_front(2);
        let three = arena.push_front(3);
        arena.push_front(4);

        assert_eq!(arena.truncate_after(three, |v| *v < 3), 2);
        assert_eq!(values(&arena), vec![4, 3]);
        assert_eq!(arena.free_slots(), 2);
    }

    #[test]
    fn truncate_refuses_when_verification_fails() {
        let mut arena = Arena::new();
        arena.push_front(1);
        let two = arena.push_front(2);
        assert_eq!(arena.truncate_after(two, |_| false), 0);
        assert_eq!(values(&arena), vec![2, 1]);
    }

    #[test]
    fn retain_filters() {
        let mut arena = Arena::new();
        for v in 1..=6 {
            arena.push_front(v);
        }
        assert_eq!(arena.retain(|v| v % 2 == 0), 3);
        assert_eq!(values(&arena), vec![6, 4, 2]);
    }
}
