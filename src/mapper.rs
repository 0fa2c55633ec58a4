//! Key to slot mapping functions.
//!
//! A mapper receives the key and the size of the table it is being placed
//! into. Its output does not need to be bounded: the table reduces it modulo
//! its capacity.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

/// Maps a key to a slot index for a table of `table_size` slots.
pub trait SlotMapper<K> {
    fn map(&self, key: &K, table_size: usize) -> usize;
}

impl<K, F> SlotMapper<K> for F
where
    F: Fn(&K, usize) -> usize,
{
    #[inline]
    fn map(&self, key: &K, table_size: usize) -> usize {
        self(key, table_size)
    }
}

/// Adapts a mapper that ignores the table size.
#[derive(Debug, Clone, Copy)]
pub struct KeyOnly<F>(pub F);

impl<K, F> SlotMapper<K> for KeyOnly<F>
where
    F: Fn(&K) -> usize,
{
    #[inline]
    fn map(&self, key: &K, _table_size: usize) -> usize {
        (self.0)(key)
    }
}

/// Maps keys through a [`BuildHasher`].
#[derive(Debug, Clone, Default)]
pub struct Hashed<S = RandomState> {
    build_hasher: S,
}

impl<S> Hashed<S> {
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }
}

impl<K, S> SlotMapper<K> for Hashed<S>
where
    K: Hash,
    S: BuildHasher,
{
    #[inline]
    fn map(&self, key: &K, _table_size: usize) -> usize {
        self.build_hasher.hash_one(key) as usize
    }
}

/// Multiplicative hashing for integer keys, tuned to the table size.
///
/// The key is multiplied by 2^64 divided by the golden ratio and the
/// product's high bits are scaled onto `0..table_size`, so consecutive keys
/// spread evenly regardless of whether the size is a power of two.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fibonacci;

impl Fibonacci {
    /// 2^64 / 1.618033988749894848204586834
    const MULTIPLIER: u64 = 11400714819323198486;

    #[inline]
    fn spread(key: u64, table_size: usize) -> usize {
        let h = key.wrapping_mul(Self::MULTIPLIER);
        ((u128::from(h) * table_size as u128) >> 64) as usize
    }
}

macro_rules! fibonacci_for {
    ($($t:ty),*) => {
        $(
            impl SlotMapper<$t> for Fibonacci {
                #[inline]
                fn map(&self, key: &$t, table_size: usize) -> usize {
                    Self::spread(*key as u64, table_size)
                }
            }
        )*
    };
}

fibonacci_for!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
