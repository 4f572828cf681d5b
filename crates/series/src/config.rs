//! Series configuration and flags.

use crate::error::{Result, SeriesError};
use std::fmt;

/// Default capacity of the first block allocated by a series.
pub const DEFAULT_INITIAL_BLOCK_CAPACITY: usize = 16;

/// Default maximum block capacity. Blocks at this size are rolled over
/// into a block source instead of growing.
pub const DEFAULT_MAX_BLOCK_CAPACITY: usize = 4096;

/// Default number of busy spins before a waiting thread yields the CPU.
pub const DEFAULT_SPIN_BEFORE_YIELD: u32 = 64;

/// Ordering discipline of the keys in a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum KeySorting {
    /// No ordering guarantee; searches fall back to linear scans.
    NotSorted = 0,
    /// Non-decreasing keys (duplicates allowed).
    Weak = 1,
    /// Strictly increasing keys.
    #[default]
    Strong = 2,
}

impl KeySorting {
    /// Returns true if binary search may be used.
    pub fn is_sorted(self) -> bool {
        !matches!(self, KeySorting::NotSorted)
    }

    /// Short name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            KeySorting::NotSorted => "not-sorted",
            KeySorting::Weak => "weak",
            KeySorting::Strong => "strong",
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => KeySorting::NotSorted,
            1 => KeySorting::Weak,
            _ => KeySorting::Strong,
        }
    }
}

impl fmt::Display for KeySorting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What kind of writes a series accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Mutability {
    /// No writes.
    ReadOnly = 0,
    /// Tail appends only.
    #[default]
    AppendOnly = 1,
    /// Tail appends and value replacement of existing keys.
    Mutable = 2,
}

impl Mutability {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Mutability::ReadOnly,
            1 => Mutability::AppendOnly,
            _ => Mutability::Mutable,
        }
    }
}

/// Packed flags word of a series: mutability in bits 0..2, key sorting in bits 2..4.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SeriesFlags(u8);

impl SeriesFlags {
    /// Creates a flags word from its parts.
    pub fn new(mutability: Mutability, sorting: KeySorting) -> Self {
        Self((mutability as u8) | ((sorting as u8) << 2))
    }

    /// Creates flags from a raw byte.
    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// Returns the raw byte.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the mutability part.
    pub fn mutability(self) -> Mutability {
        Mutability::from_bits(self.0)
    }

    /// Returns the key sorting part.
    pub fn key_sorting(self) -> KeySorting {
        KeySorting::from_bits(self.0 >> 2)
    }

    /// Returns a copy with a different mutability.
    pub fn with_mutability(self, mutability: Mutability) -> Self {
        Self::new(mutability, self.key_sorting())
    }
}

impl fmt::Debug for SeriesFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesFlags")
            .field("mutability", &self.mutability())
            .field("key_sorting", &self.key_sorting())
            .finish()
    }
}

/// Configuration for a series.
#[derive(Debug, Clone)]
pub struct SeriesConfig {
    /// Capacity of the first block allocated on the first append.
    ///
    /// Default: 16 rows.
    pub initial_block_capacity: usize,

    /// Capacity at which a block stops growing and is rolled over into a
    /// block source.
    ///
    /// Default: 4096 rows.
    pub max_block_capacity: usize,

    /// Key ordering enforced on append and relied upon by search.
    pub key_sorting: KeySorting,

    /// Writes accepted by the series.
    pub mutability: Mutability,

    /// Enables invariant checks on block registration and cursor moves.
    ///
    /// Default: on in debug builds, off in release builds.
    pub additional_correctness_checks: bool,

    /// Busy spins before the lock or a retrying reader yields the CPU.
    pub spin_before_yield: u32,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            initial_block_capacity: DEFAULT_INITIAL_BLOCK_CAPACITY,
            max_block_capacity: DEFAULT_MAX_BLOCK_CAPACITY,
            key_sorting: KeySorting::default(),
            mutability: Mutability::default(),
            additional_correctness_checks: cfg!(debug_assertions),
            spin_before_yield: DEFAULT_SPIN_BEFORE_YIELD,
        }
    }
}

impl SeriesConfig {
    /// Sets the capacity of the first block.
    pub fn with_initial_block_capacity(mut self, capacity: usize) -> Self {
        self.initial_block_capacity = capacity;
        self
    }

    /// Sets the maximum block capacity.
    pub fn with_max_block_capacity(mut self, capacity: usize) -> Self {
        self.max_block_capacity = capacity;
        self
    }

    /// Sets the key sorting discipline.
    pub fn with_key_sorting(mut self, sorting: KeySorting) -> Self {
        self.key_sorting = sorting;
        self
    }

    /// Sets the mutability.
    pub fn with_mutability(mut self, mutability: Mutability) -> Self {
        self.mutability = mutability;
        self
    }

    /// Turns invariant checks on or off.
    pub fn with_correctness_checks(mut self, enabled: bool) -> Self {
        self.additional_correctness_checks = enabled;
        self
    }

    /// Sets the spin count before yielding.
    pub fn with_spin_before_yield(mut self, spins: u32) -> Self {
        self.spin_before_yield = spins;
        self
    }

    /// Returns the packed flags for this configuration.
    pub fn flags(&self) -> SeriesFlags {
        SeriesFlags::new(self.mutability, self.key_sorting)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidConfig` if a block capacity is zero or the
    /// initial capacity exceeds the maximum.
    pub fn validate(&self) -> Result<()> {
        if self.initial_block_capacity == 0 {
            return Err(SeriesError::InvalidConfig(
                "initial_block_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_block_capacity < self.initial_block_capacity {
            return Err(SeriesError::InvalidConfig(format!(
                "max_block_capacity ({}) is below initial_block_capacity ({})",
                self.max_block_capacity, self.initial_block_capacity
            )));
        }
        Ok(())
    }
}
