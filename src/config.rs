use crate::error::{Error, Result};

const DEFAULT_INITIAL_CAPACITY: usize = 1;
const DEFAULT_LOAD_FACTOR: f64 = 1.0;
const DEFAULT_RESIZE_FACTOR: usize = 2;

/// Configuration for a [`DynamicHashTable`](crate::DynamicHashTable).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Number of slots allocated up front. Also the floor below which the
    /// table never contracts. Zero is accepted and treated as one slot.
    pub initial_capacity: usize,
    /// Maximum `entries / capacity` ratio before the table expands.
    pub load_factor: f64,
    /// Growth multiplier on expansion and divisor on contraction.
    pub resize_factor: usize,
    /// Whether inserting an already present key is accepted.
    pub allow_duplicates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            resize_factor: DEFAULT_RESIZE_FACTOR,
            allow_duplicates: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.load_factor.is_finite() || self.load_factor <= 0.0 {
            return Err(Error::InvalidConfiguration {
                reason: format!(
                    "load factor must be finite and positive, got {}",
                    self.load_factor
                ),
            });
        }
        // The displacement step count divides by `resize_factor - 1`.
        if self.resize_factor < 2 {
            return Err(Error::InvalidConfiguration {
                reason: format!(
                    "resize factor must be at least 2, got {}",
                    self.resize_factor
                ),
            });
        }
        Ok(())
    }

    /// Smallest capacity the table will ever use.
    #[inline]
    pub(crate) fn capacity_floor(&self) -> usize {
        self.initial_capacity.max(1)
    }

    /// Load factor below which the table contracts.
    #[inline]
    pub(crate) fn load_factor_low(&self) -> f64 {
        let rf = self.resize_factor as f64;
        self.load_factor / (rf * rf)
    }

    /// Upper bound on entries migrated per displacement step.
    #[inline]
    pub(crate) fn migrations_per_step(&self) -> usize {
        2usize.div_ceil(self.resize_factor - 1)
    }
}
