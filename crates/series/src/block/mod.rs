//! Block - capacity-bounded run of sorted rows.
//!
//! A block stores keys and values in two parallel arrays of write-once slots.
//! Rows `[0, row_count)` are published: the writer fills slot `row_count` and
//! then bumps `row_count` with a release store, so a reader that observes a
//! row count with an acquire load can read every row below it.
//!
//! Published rows are never rewritten. Growing a block or replacing a value
//! produces a new block; the old one stays valid for readers still holding it.
//!
//! ```text
//!            row_count            capacity
//!                │                   │
//! keys   [k0 k1 k2 k3 __ __ __ __]   │
//! values [v0 v1 v2 v3 __ __ __ __] ──┘
//! ```

pub mod source;

pub use source::{BlockSource, RowPosition};

use crate::comparer::KeyComparer;
use crate::config::KeySorting;
use crate::error::{fail_fast, FaultKind, Result, SeriesError};
use crate::lookup::Lookup;
use crate::memory::{MemoryProvider, Unbounded};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// A contiguous run of rows with parallel key and value storage.
pub struct Block<K, V> {
    keys: Box<[OnceLock<K>]>,
    values: Box<[OnceLock<V>]>,
    row_count: AtomicUsize,
    memory: Arc<dyn MemoryProvider>,
}

impl<K, V> Block<K, V> {
    /// Creates the zero-capacity block a series starts with.
    ///
    /// It holds no rows and rejects every append.
    pub fn empty() -> Self {
        Self {
            keys: Box::new([]),
            values: Box::new([]),
            row_count: AtomicUsize::new(0),
            memory: Arc::new(Unbounded),
        }
    }

    /// Allocates an empty block able to hold `capacity` rows.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::CapacityExhausted` if the provider refuses the
    /// rows or the allocation itself fails.
    pub fn allocate(capacity: usize, memory: Arc<dyn MemoryProvider>) -> Result<Self> {
        memory.rent(capacity)?;

        let slots = alloc_slots::<K>(capacity)
            .and_then(|keys| alloc_slots::<V>(capacity).map(|values| (keys, values)));
        match slots {
            Ok((keys, values)) => Ok(Self {
                keys,
                values,
                row_count: AtomicUsize::new(0),
                memory,
            }),
            Err(err) => {
                memory.give_back(capacity);
                Err(err)
            }
        }
    }

    /// Number of rows the block can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Number of published rows.
    #[inline]
    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::Acquire)
    }

    /// Returns true if no row is published.
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Returns true if no spare row is left.
    pub fn is_full(&self) -> bool {
        self.row_count() >= self.capacity()
    }

    /// Returns true for the zero-capacity starting block.
    pub fn is_sentinel(&self) -> bool {
        self.capacity() == 0
    }

    /// Returns the key at `index`, if published.
    pub fn key_at(&self, index: usize) -> Option<&K> {
        if index < self.row_count() {
            Some(self.published_key(index))
        } else {
            None
        }
    }

    /// Returns the row at `index`, if published.
    pub fn row_at(&self, index: usize) -> Option<(&K, &V)> {
        if index < self.row_count() {
            Some((self.published_key(index), self.published_value(index)))
        } else {
            None
        }
    }

    /// First published key.
    pub fn first_key(&self) -> Option<&K> {
        self.key_at(0)
    }

    /// Last published key.
    pub fn last_key(&self) -> Option<&K> {
        self.row_count()
            .checked_sub(1)
            .map(|last| self.published_key(last))
    }

    /// Iterates over the rows published when the iterator was created.
    pub fn rows(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let count = self.row_count();
        (0..count).map(move |i| (self.published_key(i), self.published_value(i)))
    }

    /// Appends a row into the next free slot.
    ///
    /// Must only be called by the series writer holding the write lock.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::BlockFull` if the block has no spare row.
    pub fn append(&self, key: K, value: V) -> Result<()> {
        let index = self.row_count.load(Ordering::Relaxed);
        if index >= self.capacity() {
            return Err(SeriesError::BlockFull {
                capacity: self.capacity(),
            });
        }

        if self.keys[index].set(key).is_err() || self.values[index].set(value).is_err() {
            fail_fast(
                FaultKind::InvariantViolation,
                format_args!("row {index} written twice"),
            );
        }
        self.row_count.store(index + 1, Ordering::Release);
        Ok(())
    }

    /// Binary search for `key`.
    ///
    /// Returns `Ok(index)` of the last row whose key equals `key`, or
    /// `Err(insertion_index)` where the key would be inserted to keep order.
    pub fn search_key<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        cmp: &C,
    ) -> std::result::Result<usize, usize> {
        let upper = self.partition_point(self.row_count(), |k| {
            cmp.compare(k, key) != CmpOrdering::Greater
        });
        match upper.checked_sub(1) {
            Some(last) if cmp.compare(self.published_key(last), key) == CmpOrdering::Equal => {
                Ok(last)
            }
            _ => Err(upper),
        }
    }

    /// Finds the row satisfying `lookup` relative to `key`.
    ///
    /// Sorted blocks use [`search_key`](Self::search_key) and resolve misses
    /// from the insertion point. Unsorted blocks are scanned linearly.
    pub fn lookup_key<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        lookup: Lookup,
        cmp: &C,
        sorting: KeySorting,
    ) -> Option<usize> {
        if !sorting.is_sorted() {
            return self.lookup_linear(key, lookup, cmp);
        }

        let count = self.row_count();
        match self.search_key(key, cmp) {
            Ok(last_equal) => match lookup {
                Lookup::EQ | Lookup::LE => Some(last_equal),
                Lookup::GE => Some(self.first_equal(key, last_equal, cmp, sorting)),
                Lookup::LT => self.first_equal(key, last_equal, cmp, sorting).checked_sub(1),
                Lookup::GT => (last_equal + 1 < count).then_some(last_equal + 1),
            },
            Err(insertion) => match lookup {
                Lookup::EQ => None,
                Lookup::LT | Lookup::LE => insertion.checked_sub(1),
                Lookup::GE | Lookup::GT => (insertion < count).then_some(insertion),
            },
        }
    }

    /// Checks that published keys follow `sorting`.
    pub fn is_ordered<C: KeyComparer<K> + ?Sized>(&self, cmp: &C, sorting: KeySorting) -> bool {
        let count = self.row_count();
        (1..count).all(|i| {
            let order = cmp.compare(self.published_key(i - 1), self.published_key(i));
            match sorting {
                KeySorting::Strong => order == CmpOrdering::Less,
                KeySorting::Weak => order != CmpOrdering::Greater,
                KeySorting::NotSorted => true,
            }
        })
    }

    fn first_equal<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        last_equal: usize,
        cmp: &C,
        sorting: KeySorting,
    ) -> usize {
        if sorting == KeySorting::Strong {
            return last_equal;
        }
        self.partition_point(last_equal, |k| cmp.compare(k, key) == CmpOrdering::Less)
    }

    // Latest row wins between equal candidates.
    fn lookup_linear<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        lookup: Lookup,
        cmp: &C,
    ) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, (candidate, _)) in self.rows().enumerate() {
            let order = cmp.compare(candidate, key);
            let qualifies = match lookup {
                Lookup::EQ => order == CmpOrdering::Equal,
                Lookup::LT => order == CmpOrdering::Less,
                Lookup::LE => order != CmpOrdering::Greater,
                Lookup::GE => order != CmpOrdering::Less,
                Lookup::GT => order == CmpOrdering::Greater,
            };
            if !qualifies {
                continue;
            }
            let closer = match best {
                None => true,
                Some(b) => {
                    let versus_best = cmp.compare(candidate, self.published_key(b));
                    if lookup.is_forward() {
                        versus_best != CmpOrdering::Greater
                    } else {
                        versus_best != CmpOrdering::Less
                    }
                }
            };
            if closer {
                best = Some(i);
            }
        }
        best
    }

    // Index of the first row in [0, end) for which `pred` is false.
    fn partition_point(&self, end: usize, pred: impl Fn(&K) -> bool) -> usize {
        let (mut lo, mut hi) = (0, end);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.published_key(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn published_key(&self, index: usize) -> &K {
        match self.keys[index].get() {
            Some(key) => key,
            None => fail_fast(
                FaultKind::InvariantViolation,
                format_args!("published key slot {index} is empty"),
            ),
        }
    }

    fn published_value(&self, index: usize) -> &V {
        match self.values[index].get() {
            Some(value) => value,
            None => fail_fast(
                FaultKind::InvariantViolation,
                format_args!("published value slot {index} is empty"),
            ),
        }
    }
}

impl<K: Clone, V: Clone> Block<K, V> {
    /// Produces a larger copy of this block.
    ///
    /// The new capacity is the next power of two above the current one, or
    /// `min_capacity` if larger, clamped to `limit`.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::CapacityExhausted` if the target would not add
    /// room, overflows, or cannot be allocated. The block is left untouched.
    pub fn grow(&self, min_capacity: usize, limit: usize) -> Result<Self> {
        let doubled = self
            .capacity()
            .checked_add(1)
            .and_then(usize::checked_next_power_of_two)
            .ok_or(SeriesError::CapacityExhausted {
                requested: usize::MAX,
            })?;
        let target = doubled.max(min_capacity).min(limit);
        if target <= self.row_count() {
            return Err(SeriesError::CapacityExhausted { requested: target });
        }

        let grown = Self::allocate(target, Arc::clone(&self.memory))?;
        for (key, value) in self.rows() {
            grown.append(key.clone(), value.clone())?;
        }
        Ok(grown)
    }

    /// Produces a copy of this block with the value at `index` replaced.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::KeyNotFound` if `index` is not published, or
    /// `SeriesError::CapacityExhausted` if the copy cannot be allocated.
    pub fn with_value_replaced(&self, index: usize, value: V) -> Result<Self> {
        if index >= self.row_count() {
            return Err(SeriesError::KeyNotFound);
        }

        let copy = Self::allocate(self.capacity(), Arc::clone(&self.memory))?;
        let mut replacement = Some(value);
        for (i, (key, current)) in self.rows().enumerate() {
            let value = match replacement.take() {
                Some(new_value) if i == index => new_value,
                other => {
                    replacement = other;
                    current.clone()
                }
            };
            copy.append(key.clone(), value)?;
        }
        Ok(copy)
    }
}

impl<K, V> Drop for Block<K, V> {
    fn drop(&mut self) {
        self.memory.give_back(self.capacity());
    }
}

impl<K, V> fmt::Debug for Block<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("row_count", &self.row_count())
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn alloc_slots<T>(capacity: usize) -> Result<Box<[OnceLock<T>]>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(capacity)
        .map_err(|_| SeriesError::CapacityExhausted {
            requested: capacity,
        })?;
    slots.resize_with(capacity, OnceLock::new);
    Ok(slots.into_boxed_slice())
}
