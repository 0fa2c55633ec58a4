//! # rbhash
//!
//! A hash table that resizes incrementally instead of rehashing everything at
//! once, with red-black trees as collision chains.
//!
//! When the load factor crosses a threshold the live table is demoted to a
//! "previous" table and a fresh one is allocated. Every later insert or delete
//! then migrates a small, bounded number of entries across, so no single call
//! pays for reorganizing the whole table. Lookups consult both tables while a
//! drain is in progress.
//!
//! ## Example
//!
//! ```rust
//! use rbhash::{Config, DynamicHashTable, Error};
//!
//! let mut table: DynamicHashTable<u64, &str, _> = DynamicHashTable::with_config(
//!     |k: &u64, _size: usize| *k as usize,
//!     Config::default(),
//! )
//! .unwrap();
//!
//! table.insert(1, "one").unwrap();
//! table.insert(2, "two").unwrap();
//!
//! assert_eq!(table.search(&1), Ok(&"one"));
//! assert!(table.exists(&2));
//! assert_eq!(table.insert(1, "uno"), Err(Error::DuplicateKey));
//! assert_eq!(table.delete(&2), Ok("two"));
//! assert_eq!(table.search(&2), Err(Error::KeyNotFound));
//! ```

use std::cell::Cell;
use std::fmt;
use std::mem;

use tracing::{debug, trace};

mod config;
mod error;
pub mod mapper;
mod table;
pub mod tree;

pub use config::Config;
pub use error::{Error, Result};
pub use mapper::{Fibonacci, Hashed, KeyOnly, SlotMapper};
pub use tree::{NodeId, RbTree};

use table::{DrainCursor, Table};

// =============================================================================
// Lookup cache
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Which {
    Current,
    Previous,
}

/// Where a key was last found. Only meaningful until the next mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    table: Which,
    slot: usize,
    node: NodeId,
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters describing resize activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Number of times the table grew.
    pub expansions: u64,
    /// Number of times the table shrank.
    pub contractions: u64,
    /// Entries moved from a previous table into the current one.
    pub migrated: u64,
    /// Previous-table slots visited while looking for entries to move.
    pub slots_scanned: u64,
    /// Largest amount of work (slots visited + entries moved) done by the
    /// displacement step of a single call.
    pub max_step_work: usize,
    /// Widest scan span any displacement step has used. A single step does
    /// at most `migrations_per_step * (span + 1)` work.
    pub max_span: usize,
}

// =============================================================================
// DynamicHashTable
// =============================================================================

/// A hash table whose collision chains are red-black trees and whose resizes
/// are spread over subsequent calls.
///
/// Not thread safe: every call, including [`search`](Self::search), may touch
/// internal state. Wrap it in a lock to share it.
pub struct DynamicHashTable<K, V, M = Hashed> {
    mapper: M,
    config: Config,

    // === Tables ===
    current: Table<K, V>,
    /// Present only while a resize is being drained.
    previous: Option<Table<K, V>>,

    // === Drain state ===
    /// Entries in `previous` when the resize started.
    drain_threshold: usize,
    cursor: DrainCursor,

    cache: Cell<Option<Location>>,
    next_stamp: u64,
    stats: TableStats,
}

impl<K: Ord, V, M: SlotMapper<K>> DynamicHashTable<K, V, M> {
    /// Create a table with the default [`Config`].
    pub fn new(mapper: M) -> Self {
        let config = Config::default();
        Self::build(mapper, config)
    }

    pub fn with_config(mapper: M, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(mapper, config))
    }

    fn build(mapper: M, config: Config) -> Self {
        let current = Table::with_capacity(config.capacity_floor());
        Self {
            mapper,
            config,
            current,
            previous: None,
            drain_threshold: 0,
            cursor: DrainCursor::default(),
            cache: Cell::new(None),
            next_stamp: 0,
            stats: TableStats::default(),
        }
    }

    /// Number of entries across both tables.
    #[inline]
    pub fn len(&self) -> usize {
        self.current.entries() + self.previous.as_ref().map_or(0, Table::entries)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count of the live table.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.current.capacity()
    }

    /// Slot count of the table being drained, if a resize is in progress.
    #[inline]
    pub fn previous_capacity(&self) -> Option<usize> {
        self.previous.as_ref().map(Table::capacity)
    }

    #[inline]
    pub fn is_draining(&self) -> bool {
        self.previous.is_some()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> TableStats {
        self.stats
    }

    // ===== Public operations =====

    /// Insert `key` with `value`.
    ///
    /// Fails with [`Error::DuplicateKey`] if duplicates are disallowed and the
    /// key is present in either table; nothing is modified in that case.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if !self.config.allow_duplicates && self.locate(&key).is_some() {
            return Err(Error::DuplicateKey);
        }
        self.cache.set(None);

        // Resizing an empty table does not start a drain, so keep going until
        // the new entry fits.
        while self.should_expand() {
            self.resize(true);
        }

        let slot = self.current.slot_of(&self.mapper, &key);
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.current.insert(slot, key, value, stamp);

        self.displace();
        Ok(())
    }

    /// Value stored under `key`. With duplicates, the first inserted one.
    pub fn search(&self, key: &K) -> Result<&V> {
        let loc = self.locate(key).ok_or(Error::KeyNotFound)?;
        Ok(self.value_at(loc))
    }

    pub fn exists(&self, key: &K) -> bool {
        self.locate(key).is_some()
    }

    /// Remove `key` and return its value. With duplicates, removes the
    /// first inserted entry, the same one [`search`](Self::search) returns.
    pub fn delete(&mut self, key: &K) -> Result<V> {
        let loc = self.locate(key).ok_or(Error::KeyNotFound)?;
        self.cache.set(None);

        let table = match loc.table {
            Which::Current => Some(&mut self.current),
            Which::Previous => self.previous.as_mut(),
        };
        let (_, value) = table
            .and_then(|t| t.remove(loc.slot, loc.node))
            .ok_or(Error::KeyNotFound)?;

        if self.should_contract() {
            self.resize(false);
        }

        self.displace();
        Ok(value)
    }

    // ===== Lookup =====

    fn table(&self, which: Which) -> Option<&Table<K, V>> {
        match which {
            Which::Current => Some(&self.current),
            Which::Previous => self.previous.as_ref(),
        }
    }

    fn find_in(&self, which: Which, key: &K) -> Option<Location> {
        let table = self.table(which)?;
        let slot = table.slot_of(&self.mapper, key);
        let node = table.bucket(slot)?.chain.search(key).ok()?;
        Some(Location {
            table: which,
            slot,
            node,
        })
    }

    fn bucket_at(&self, loc: Location) -> Option<&RbTree<K, V>> {
        Some(&self.table(loc.table)?.bucket(loc.slot)?.chain)
    }

    fn value_at(&self, loc: Location) -> &V {
        self.bucket_at(loc)
            .expect("location refers to an allocated bucket")
            .value(loc.node)
    }

    fn stamp_at(&self, loc: Location) -> u64 {
        self.bucket_at(loc)
            .expect("location refers to an allocated bucket")
            .stamp(loc.node)
    }

    fn cached(&self, key: &K) -> Option<Location> {
        let loc = self.cache.get()?;
        let chain = self.bucket_at(loc)?;
        (chain.key(loc.node) == key).then_some(loc)
    }

    /// Find the entry `search` would return for `key`, remembering it.
    fn locate(&self, key: &K) -> Option<Location> {
        if let Some(loc) = self.cached(key) {
            return Some(loc);
        }

        let found = if self.config.allow_duplicates {
            // Either table may hold the oldest copy: displacement moves old
            // entries into the current table after newer ones were inserted.
            match (
                self.find_in(Which::Current, key),
                self.find_in(Which::Previous, key),
            ) {
                (Some(c), Some(p)) => Some(if self.stamp_at(p) < self.stamp_at(c) { p } else { c }),
                (c, p) => c.or(p),
            }
        } else {
            self.find_in(Which::Current, key)
                .or_else(|| self.find_in(Which::Previous, key))
        };

        if found.is_some() {
            self.cache.set(found);
        }
        found
    }

    // ===== Resizing =====

    fn should_expand(&self) -> bool {
        let load = (self.current.entries() + 1) as f64 / self.current.capacity() as f64;
        if load <= self.config.load_factor {
            return false;
        }
        if self.is_draining() {
            trace!(load, "expansion deferred until the drain completes");
            return false;
        }
        true
    }

    fn should_contract(&self) -> bool {
        let capacity = self.current.capacity();
        let threshold = capacity as f64 * self.config.load_factor_low();
        if self.current.entries() as f64 >= threshold {
            return false;
        }
        let floor = self.config.capacity_floor();
        if capacity < floor.saturating_mul(self.config.resize_factor) {
            return false;
        }
        if self.is_draining() {
            trace!(capacity, "contraction deferred until the drain completes");
            return false;
        }
        true
    }

    /// Demote the current table to previous and allocate a new current one.
    fn resize(&mut self, expand: bool) {
        debug_assert!(self.previous.is_none(), "resize while draining");

        let old_capacity = self.current.capacity();
        let rf = self.config.resize_factor;
        let new_capacity = if expand {
            old_capacity.saturating_mul(rf)
        } else {
            old_capacity.div_ceil(rf)
        }
        .max(self.config.capacity_floor());

        let old = mem::replace(&mut self.current, Table::with_capacity(new_capacity));
        self.drain_threshold = old.entries();
        self.cursor.reset();
        self.cache.set(None);
        if expand {
            self.stats.expansions += 1;
        } else {
            self.stats.contractions += 1;
        }

        debug!(
            expand,
            old_capacity,
            new_capacity,
            drain_threshold = self.drain_threshold,
            "resizing table"
        );

        self.previous = (old.entries() > 0).then_some(old);
    }

    /// Move a bounded number of entries from the previous table into the
    /// current one, releasing the previous table once it is empty.
    fn displace(&mut self) {
        let Some(prev) = self.previous.as_mut() else {
            return;
        };
        self.cache.set(None);

        let span = prev.capacity().div_ceil(self.drain_threshold.max(1));
        let mut work = 0usize;

        for _ in 0..self.config.migrations_per_step() {
            if prev.entries() == 0 {
                break;
            }
            let slot = match self.cursor.head(prev) {
                Some(slot) => slot,
                None => {
                    let scanned = self.cursor.scan(prev, span);
                    work += scanned;
                    self.stats.slots_scanned += scanned as u64;
                    match self.cursor.head(prev) {
                        Some(slot) => slot,
                        None => continue,
                    }
                }
            };

            let Some((key, value, stamp)) = prev.pop(slot) else {
                continue;
            };
            let dest = self.current.slot_of(&self.mapper, &key);
            self.current.insert(dest, key, value, stamp);
            work += 1;
            self.stats.migrated += 1;
        }

        debug_assert!(work <= self.config.migrations_per_step() * (span + 1));
        self.stats.max_step_work = self.stats.max_step_work.max(work);
        self.stats.max_span = self.stats.max_span.max(span);

        if prev.entries() == 0 {
            debug!(
                capacity = self.current.capacity(),
                entries = self.current.entries(),
                "drain complete"
            );
            self.previous = None;
            self.cursor.reset();
        }
    }
}

impl<K, V, F> DynamicHashTable<K, V, KeyOnly<F>>
where
    K: Ord,
    F: Fn(&K) -> usize,
{
    /// Create a table from a mapping function that ignores the table size.
    pub fn with_key_fn(f: F, config: Config) -> Result<Self> {
        Self::with_config(KeyOnly(f), config)
    }
}

impl<K, V> Default for DynamicHashTable<K, V>
where
    K: Ord + std::hash::Hash,
{
    fn default() -> Self {
        Self::new(Hashed::default())
    }
}

impl<K, V, M> fmt::Debug for DynamicHashTable<K, V, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicHashTable")
            .field("entries", &self.current.entries())
            .field("capacity", &self.current.capacity())
            .field(
                "previous",
                &self.previous.as_ref().map(|p| (p.entries(), p.capacity())),
            )
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}


#[cfg(test)]
impl<K, V, M> DynamicHashTable<K, V, M>
where
    K: Ord + fmt::Debug,
    M: SlotMapper<K>,
{
    /// Panic unless every bucket tree, counter and slot placement is
    /// consistent.
    pub(crate) fn validate(&self) {
        let tables = [Some(&self.current), self.previous.as_ref()];
        for table in tables.into_iter().flatten() {
            let mut total = 0;
            for slot in 0..table.capacity() {
                let Some(bucket) = table.bucket(slot) else {
                    continue;
                };
                if let Err(e) = bucket.chain.check() {
                    panic!("bucket {slot}: {e}");
                }
                assert_eq!(bucket.entries, bucket.chain.len(), "bucket {slot} count");
                for (key, _) in bucket.chain.iter() {
                    assert_eq!(table.slot_of(&self.mapper, key), slot, "{key:?} misplaced");
                }
                total += bucket.entries;
            }
            assert_eq!(total, table.entries(), "table entry count");
        }

        if let Some(prev) = &self.previous {
            assert!(prev.entries() > 0, "empty previous table was not released");
        }
        let load = self.current.entries() as f64 / self.current.capacity() as f64;
        if !self.is_draining() {
            assert!(
                load <= self.config.load_factor,
                "steady table over its load factor: {load}"
            );
        }
    }
}

#[cfg(test)]
mod proptests;
