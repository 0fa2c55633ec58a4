//! Fixed-size slot arrays and the cursor used to drain one of them.

use std::collections::VecDeque;

use crate::mapper::SlotMapper;
use crate::tree::{NodeId, RbTree};

/// Collision chain for one slot.
pub(crate) struct Bucket<K, V> {
    pub(crate) entries: usize,
    pub(crate) chain: RbTree<K, V>,
}

impl<K, V> Bucket<K, V> {
    fn new() -> Self {
        Self {
            entries: 0,
            chain: RbTree::new(),
        }
    }
}

/// A fixed number of lazily allocated buckets.
pub(crate) struct Table<K, V> {
    slots: Vec<Option<Bucket<K, V>>>,
    entries: usize,
}

impl<K, V> Table<K, V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            entries: 0,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn entries(&self) -> usize {
        self.entries
    }

    #[inline]
    pub(crate) fn bucket(&self, slot: usize) -> Option<&Bucket<K, V>> {
        self.slots[slot].as_ref()
    }

    #[inline]
    pub(crate) fn bucket_entries(&self, slot: usize) -> usize {
        self.bucket(slot).map_or(0, |b| b.entries)
    }

    #[inline]
    pub(crate) fn slot_of<M: SlotMapper<K>>(&self, mapper: &M, key: &K) -> usize {
        let capacity = self.capacity();
        mapper.map(key, capacity) % capacity
    }

    pub(crate) fn insert(&mut self, slot: usize, key: K, value: V, stamp: u64) -> NodeId
    where
        K: Ord,
    {
        let bucket = self.slots[slot].get_or_insert_with(Bucket::new);
        let id = bucket.chain.insert_stamped(key, value, stamp);
        bucket.entries += 1;
        self.entries += 1;
        id
    }

    /// Remove a node located in `slot`. `None` if the slot has no bucket.
    pub(crate) fn remove(&mut self, slot: usize, id: NodeId) -> Option<(K, V)> {
        let bucket = self.slots[slot].as_mut()?;
        let removed = bucket.chain.remove(id);
        bucket.entries -= 1;
        self.entries -= 1;
        Some(removed)
    }

    /// Remove whichever node is cheapest to take out of `slot` (its root),
    /// along with its stamp.
    pub(crate) fn pop(&mut self, slot: usize) -> Option<(K, V, u64)> {
        let bucket = self.slots[slot].as_mut()?;
        let root = bucket.chain.root()?;
        let stamp = bucket.chain.stamp(root);
        let (key, value) = bucket.chain.remove(root);
        bucket.entries -= 1;
        self.entries -= 1;
        Some((key, value, stamp))
    }
}

/// Progress of an in-flight drain of the previous table.
///
/// `pending` holds slot indices, not buckets: it never owns anything and is
/// cleared whenever a new resize starts.
#[derive(Debug, Default)]
pub(crate) struct DrainCursor {
    scan_index: usize,
    pending: VecDeque<usize>,
}

impl DrainCursor {
    pub(crate) fn reset(&mut self) {
        self.scan_index = 0;
        self.pending.clear();
    }

    /// Walk up to `span` slots forward from the scan position, queueing every
    /// non-empty bucket. Returns the number of slots visited.
    pub(crate) fn scan<K, V>(&mut self, table: &Table<K, V>, span: usize) -> usize {
        let start = self.scan_index;
        let end = start.saturating_add(span).min(table.capacity());
        for slot in start..end {
            if table.bucket_entries(slot) > 0 {
                self.pending.push_back(slot);
            }
        }
        self.scan_index = end;
        end - start
    }

    /// First queued slot that still holds entries. Slots emptied by deletes
    /// since they were queued are dropped.
    pub(crate) fn head<K, V>(&mut self, table: &Table<K, V>) -> Option<usize> {
        while let Some(&slot) = self.pending.front() {
            if table.bucket_entries(slot) > 0 {
                return Some(slot);
            }
            self.pending.pop_front();
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn is_exhausted<K, V>(&self, table: &Table<K, V>) -> bool {
        self.pending.is_empty() && self.scan_index >= table.capacity()
    }
}
