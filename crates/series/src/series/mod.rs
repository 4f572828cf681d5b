//! Series - block-indexed ordered key/value container.
//!
//! A series starts with a zero-capacity sentinel block. The first append
//! allocates a leaf block, which doubles on demand until it reaches
//! `max_block_capacity`. After that, full blocks are retired into a
//! [`BlockSource`] and appends go to a fresh tail block. A tail left below
//! the maximum by a refused growth keeps trying to grow on later appends.
//!
//! ```text
//! sentinel ──append──▶ Leaf(block) ──grow──▶ Leaf(bigger block)
//!                                   │
//!                                   └─full at max──▶ Indexed(BlockSource)
//! ```
//!
//! # Concurrency
//!
//! One writer at a time holds the series lock. Readers never block: they run
//! against the currently published data and retry if a write overlapped (see
//! `sync.rs`). Replaced data is reclaimed through `crossbeam-epoch` once no
//! pinned reader can still see it.

mod cursor;
mod sync;

pub use cursor::SeriesCursor;

use crate::block::source::follows;
use crate::block::{Block, BlockSource, RowPosition};
use crate::codec::SeriesCodec;
use crate::comparer::{KeyComparer, OrdComparer};
use crate::config::{KeySorting, Mutability, SeriesConfig, SeriesFlags};
use crate::error::{fail_fast, FaultKind, Result, SeriesError};
use crate::lookup::Lookup;
use crate::memory::{MemoryProvider, Unbounded};
use crate::subscribe::{SeriesSubscriber, SubscriberRegistry, Subscription};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use sync::VersionState;
use tracing::{debug, error, trace, warn};

/// Bound shared by series keys and values.
///
/// Reads clone rows out of the series, and replaced storage may be dropped on
/// whichever thread reclaims it.
pub trait SeriesItem: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> SeriesItem for T {}

/// Storage currently published by a series.
pub(crate) enum SeriesData<K, V> {
    /// A single block, possibly the empty sentinel.
    Leaf(Arc<Block<K, V>>),
    /// Several blocks behind an index.
    Indexed(BlockSource<K, V>),
}

impl<K, V> SeriesData<K, V> {
    /// Block receiving appends.
    pub(crate) fn tail(&self) -> &Arc<Block<K, V>> {
        match self {
            SeriesData::Leaf(block) => block,
            SeriesData::Indexed(source) => source.tail(),
        }
    }

    pub(crate) fn row_count(&self) -> usize {
        match self {
            SeriesData::Leaf(block) => block.row_count(),
            SeriesData::Indexed(source) => source.row_count(),
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<(&K, &V)> {
        match self {
            SeriesData::Leaf(block) => block.row_at(index),
            SeriesData::Indexed(source) => source.locate(index).and_then(|p| source.row_at(p)),
        }
    }

    pub(crate) fn find<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        lookup: Lookup,
        cmp: &C,
        sorting: KeySorting,
    ) -> Option<RowPosition> {
        match self {
            SeriesData::Leaf(block) => block
                .lookup_key(key, lookup, cmp, sorting)
                .map(|row| RowPosition { block: 0, row }),
            SeriesData::Indexed(source) => source.find(key, lookup, cmp, sorting),
        }
    }

    pub(crate) fn absolute_index(&self, position: RowPosition) -> usize {
        match self {
            SeriesData::Leaf(_) => position.row,
            SeriesData::Indexed(source) => source.absolute_index(position),
        }
    }

    fn row_at(&self, position: RowPosition) -> Option<(&K, &V)> {
        match self {
            SeriesData::Leaf(block) => block.row_at(position.row),
            SeriesData::Indexed(source) => source.row_at(position),
        }
    }
}

/// Counters describing the write and read activity of a series.
#[derive(Debug, Default)]
pub struct SeriesStats {
    /// Rows appended.
    pub appends: AtomicU64,
    /// Values replaced in place by `set`.
    pub replacements: AtomicU64,
    /// Writes rejected with an error.
    pub rejected: AtomicU64,
    /// Tail block growths.
    pub grows: AtomicU64,
    /// Block rollovers into the block source.
    pub rollovers: AtomicU64,
    /// Optimistic reads that had to be repeated.
    pub read_retries: AtomicU64,
}

impl SeriesStats {
    /// Gets the number of appended rows.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }

    /// Gets the number of replaced values.
    pub fn replacements(&self) -> u64 {
        self.replacements.load(Ordering::Relaxed)
    }

    /// Gets the number of rejected writes.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Gets the number of tail block growths.
    pub fn grows(&self) -> u64 {
        self.grows.load(Ordering::Relaxed)
    }

    /// Gets the number of rollovers.
    pub fn rollovers(&self) -> u64 {
        self.rollovers.load(Ordering::Relaxed)
    }

    /// Gets the number of read retries.
    pub fn read_retries(&self) -> u64 {
        self.read_retries.load(Ordering::Relaxed)
    }
}

/// Append-ordered key/value series with lock-free readers.
///
/// # Example
///
/// ```rust,ignore
/// use alopex_series::{Lookup, Series};
///
/// let series: Series<i64, f64> = Series::new();
/// series.append(1, 0.5)?;
/// series.append(2, 0.75)?;
///
/// assert_eq!(series.find(&2, Lookup::EQ), Some((2, 0.75)));
/// assert_eq!(series.find(&5, Lookup::LE), Some((2, 0.75)));
/// ```
pub struct Series<K, V, C = OrdComparer> {
    data: Atomic<SeriesData<K, V>>,
    state: VersionState,
    flags: AtomicU8,
    config: SeriesConfig,
    comparer: C,
    memory: Arc<dyn MemoryProvider>,
    subscribers: Arc<SubscriberRegistry>,
    stats: SeriesStats,
}

impl<K: Ord, V> Series<K, V, OrdComparer> {
    /// Creates an empty series with the default configuration.
    pub fn new() -> Self {
        Self::from_parts(SeriesConfig::default(), OrdComparer, Arc::new(Unbounded))
    }

    /// Creates an empty series with `config`, ordered by `K: Ord`.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidConfig` if the configuration is invalid.
    pub fn with_config(config: SeriesConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, OrdComparer, Arc::new(Unbounded)))
    }
}

impl<K: Ord, V> Default for Series<K, V, OrdComparer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> Series<K, V, C> {
    /// Creates an empty series ordered by `comparer`.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidConfig` if the configuration is invalid.
    pub fn with_comparer(config: SeriesConfig, comparer: C) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, comparer, Arc::new(Unbounded)))
    }

    /// Creates an empty series whose blocks rent rows from `memory`.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidConfig` if the configuration is invalid.
    pub fn with_memory_provider(
        config: SeriesConfig,
        comparer: C,
        memory: Arc<dyn MemoryProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, comparer, memory))
    }

    fn from_parts(config: SeriesConfig, comparer: C, memory: Arc<dyn MemoryProvider>) -> Self {
        Self {
            data: Atomic::new(SeriesData::Leaf(Arc::new(Block::empty()))),
            state: VersionState::new(),
            flags: AtomicU8::new(config.flags().as_u8()),
            config,
            comparer,
            memory,
            subscribers: Arc::new(SubscriberRegistry::new()),
            stats: SeriesStats::default(),
        }
    }

    /// Configuration the series was created with.
    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    /// Comparer ordering the keys.
    pub fn comparer(&self) -> &C {
        &self.comparer
    }

    /// Current flags.
    pub fn flags(&self) -> SeriesFlags {
        SeriesFlags::from_u8(self.flags.load(Ordering::Acquire))
    }

    /// Key sorting discipline.
    pub fn key_sorting(&self) -> KeySorting {
        self.flags().key_sorting()
    }

    /// Current mutability.
    pub fn mutability(&self) -> Mutability {
        self.flags().mutability()
    }

    /// Returns true once the series no longer accepts writes.
    pub fn is_completed(&self) -> bool {
        self.mutability() == Mutability::ReadOnly
    }

    /// Last committed version. Every successful write increments it by one.
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    /// Activity counters.
    pub fn stats(&self) -> &SeriesStats {
        &self.stats
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Registers `subscriber` for update and completion notifications.
    pub fn subscribe(&self, subscriber: Arc<dyn SeriesSubscriber>) -> Subscription {
        Subscription::register(&self.subscribers, subscriber)
    }

    /// Runs `read` against a consistent snapshot of the data.
    pub(crate) fn read<T>(&self, mut read: impl FnMut(&SeriesData<K, V>) -> T) -> T {
        let (result, retries) = self.state.read(self.config.spin_before_yield, || {
            let guard = epoch::pin();
            read(self.load(&guard))
        });
        if retries > 0 {
            self.stats.read_retries.fetch_add(retries, Ordering::Relaxed);
            trace!("Series read retried {} times", retries);
        }
        result
    }

    fn load<'g>(&self, guard: &'g Guard) -> &'g SeriesData<K, V> {
        let shared = self.data.load(Ordering::Acquire, guard);
        // SAFETY: `data` always holds a value, and replaced values are only
        // destroyed after every guard pinned before the replacement is gone.
        unsafe { shared.deref() }
    }
}

impl<K: SeriesItem, V: SeriesItem, C: KeyComparer<K>> Series<K, V, C> {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.read(|data| data.row_count())
    }

    /// Returns true if the series has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the row satisfying `lookup` relative to `key`.
    ///
    /// EQ and LE resolve duplicates to the most recent row, GE to the oldest.
    pub fn find(&self, key: &K, lookup: Lookup) -> Option<(K, V)> {
        self.find_indexed(key, lookup).map(|(_, k, v)| (k, v))
    }

    /// Like [`find`](Self::find), also returning the absolute row index.
    pub fn find_indexed(&self, key: &K, lookup: Lookup) -> Option<(usize, K, V)> {
        let sorting = self.key_sorting();
        self.read(|data| {
            let position = data.find(key, lookup, &self.comparer, sorting)?;
            let (k, v) = data.row_at(position)?;
            Some((data.absolute_index(position), k.clone(), v.clone()))
        })
    }

    /// Resolves the block that would hold the answer to `lookup`.
    ///
    /// Returns the block's index key and the block itself.
    pub fn try_find_block_at(&self, key: &K, lookup: Lookup) -> Option<(K, Arc<Block<K, V>>)> {
        self.read(|data| match data {
            SeriesData::Leaf(block) => {
                let first = block.first_key()?;
                let order = self.comparer.compare(first, key);
                let qualifies = match lookup {
                    Lookup::LT | Lookup::GE => order == CmpOrdering::Less,
                    Lookup::EQ | Lookup::LE | Lookup::GT => order != CmpOrdering::Greater,
                };
                (qualifies || lookup.is_forward()).then(|| (first.clone(), Arc::clone(block)))
            }
            SeriesData::Indexed(source) => source
                .try_find_at(key, lookup, &self.comparer)
                .map(|(_, index_key, block)| (index_key.clone(), Arc::clone(block))),
        })
    }

    /// Returns the row at absolute `index`.
    pub fn get_at(&self, index: usize) -> Option<(K, V)> {
        self.read(|data| data.get(index).map(|(k, v)| (k.clone(), v.clone())))
    }

    /// First row.
    pub fn first(&self) -> Option<(K, V)> {
        self.get_at(0)
    }

    /// Last row.
    pub fn last(&self) -> Option<(K, V)> {
        self.read(|data| {
            let last = data.row_count().checked_sub(1)?;
            data.get(last).map(|(k, v)| (k.clone(), v.clone()))
        })
    }

    /// Rows with `from <= key <= to`, in row order.
    pub fn range(&self, from: &K, to: &K) -> Vec<(K, V)> {
        if self.comparer.compare(from, to) == CmpOrdering::Greater {
            return Vec::new();
        }

        let sorting = self.key_sorting();
        let within = |key: &K| {
            self.comparer.compare(key, from) != CmpOrdering::Less
                && self.comparer.compare(key, to) != CmpOrdering::Greater
        };
        self.read(|data| {
            let count = data.row_count();
            let mut rows = Vec::new();
            if !sorting.is_sorted() {
                for index in 0..count {
                    if let Some((k, v)) = data.get(index).filter(|(k, _)| within(k)) {
                        rows.push((k.clone(), v.clone()));
                    }
                }
                return rows;
            }

            let Some(start) = data.find(from, Lookup::GE, &self.comparer, sorting) else {
                return rows;
            };
            for index in data.absolute_index(start)..count {
                match data.get(index) {
                    Some((k, v)) if within(k) => rows.push((k.clone(), v.clone())),
                    _ => break,
                }
            }
            rows
        })
    }

    /// Copies every row out of the series.
    pub fn to_vec(&self) -> Vec<(K, V)> {
        self.read(|data| {
            (0..data.row_count())
                .filter_map(|index| data.get(index).map(|(k, v)| (k.clone(), v.clone())))
                .collect()
        })
    }

    /// Returns a cursor over this series, positioned before the first row.
    pub fn cursor(&self) -> SeriesCursor<'_, K, V, C> {
        SeriesCursor::new(self)
    }

    /// Appends a row at the end of the series.
    ///
    /// # Errors
    ///
    /// - `SeriesError::ReadOnly` if the series is completed or read-only.
    /// - `SeriesError::OrderingViolation` if `key` breaks the key sorting.
    /// - `SeriesError::CapacityExhausted` if no block could take the row.
    ///
    /// On error the series is unchanged.
    pub fn append(&self, key: K, value: V) -> Result<()> {
        self.write(|| self.append_locked(key, value))
    }

    /// Appends a row, returning false instead of an error.
    pub fn try_append(&self, key: K, value: V) -> bool {
        self.append(key, value).is_ok()
    }

    /// Replaces the value of an existing key, or appends a new last key.
    ///
    /// # Errors
    ///
    /// - `SeriesError::NotMutable` unless the series is `Mutable`.
    /// - `SeriesError::ReadOnly` if the series is completed.
    /// - Any append error when `key` is not present.
    pub fn set(&self, key: K, value: V) -> Result<()> {
        self.write(|| self.set_locked(key, value))
    }

    /// Makes the series read-only and notifies subscribers.
    ///
    /// Completing an already completed series does nothing.
    pub fn complete(&self) {
        let guard = self.state.begin_write(self.config.spin_before_yield);
        let flags = self.flags();
        if flags.mutability() == Mutability::ReadOnly {
            return;
        }
        self.flags.store(
            flags.with_mutability(Mutability::ReadOnly).as_u8(),
            Ordering::Release,
        );
        let version = guard.commit();
        debug!("Series completed at version {}", version);
        self.subscribers.notify_complete();
    }

    /// Serializes all rows with `codec`.
    pub fn encode_with<S: SeriesCodec<K, V>>(&self, codec: &S) -> Result<Vec<u8>> {
        codec.encode(&self.to_vec())
    }

    /// Builds a series from bytes produced by `codec`.
    ///
    /// Rows go through the regular append path, so the decoded keys must
    /// respect `config.key_sorting`. The series ends up with
    /// `config.mutability`.
    pub fn decode_with<S: SeriesCodec<K, V>>(
        codec: &S,
        bytes: &[u8],
        config: SeriesConfig,
        comparer: C,
    ) -> Result<Self> {
        let rows = codec.decode(bytes)?;
        let mutability = config.mutability;
        let series =
            Self::with_comparer(config.with_mutability(Mutability::AppendOnly), comparer)?;
        for (key, value) in rows {
            series.append(key, value)?;
        }
        series.flags.store(
            series.flags().with_mutability(mutability).as_u8(),
            Ordering::Release,
        );
        Ok(series)
    }

    // Commits and notifies on success; an error drops the guard, which rolls back.
    fn write(&self, op: impl FnOnce() -> Result<()>) -> Result<()> {
        let guard = self.state.begin_write(self.config.spin_before_yield);
        match op() {
            Ok(()) => {
                let version = guard.commit();
                self.subscribers.notify_update(version);
                Ok(())
            }
            Err(err) => {
                drop(guard);
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    fn set_locked(&self, key: K, value: V) -> Result<()> {
        let flags = self.flags();
        match flags.mutability() {
            Mutability::ReadOnly => return Err(SeriesError::ReadOnly),
            Mutability::AppendOnly => return Err(SeriesError::NotMutable),
            Mutability::Mutable => {}
        }

        let guard = epoch::pin();
        let data = self.load(&guard);
        let Some(position) = data.find(&key, Lookup::EQ, &self.comparer, flags.key_sorting())
        else {
            return self.append_locked(key, value);
        };

        let next = match data {
            SeriesData::Leaf(block) => {
                SeriesData::Leaf(Arc::new(block.with_value_replaced(position.row, value)?))
            }
            SeriesData::Indexed(source) => {
                let Some((_, block)) = source.try_get_at(position.block) else {
                    fail_fast(
                        FaultKind::InvariantViolation,
                        format_args!("found row in missing block {}", position.block),
                    );
                };
                let replaced = Arc::new(block.with_value_replaced(position.row, value)?);
                SeriesData::Indexed(source.with_block_replaced(position.block, replaced))
            }
        };
        self.publish(next, &guard);
        self.stats.replacements.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn append_locked(&self, key: K, value: V) -> Result<()> {
        self.append_row(key, value)?;
        self.stats.appends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn append_row(&self, key: K, value: V) -> Result<()> {
        let flags = self.flags();
        if flags.mutability() == Mutability::ReadOnly {
            return Err(SeriesError::ReadOnly);
        }

        let guard = epoch::pin();
        let data = self.load(&guard);
        let tail = data.tail();
        let sorting = flags.key_sorting();
        if let Some(last) = tail.last_key() {
            if !follows(last, &key, &self.comparer, sorting) {
                return Err(SeriesError::OrderingViolation {
                    row: data.row_count(),
                    sorting: sorting.name(),
                });
            }
        }

        if !tail.is_full() {
            return tail.append(key, value);
        }

        let limit = self.config.max_block_capacity;
        if !tail.is_sentinel() && tail.capacity() < limit {
            match tail.grow(0, limit) {
                Ok(grown) => {
                    grown.append(key, value)?;
                    debug!(
                        "Grew series block from {} to {} rows",
                        tail.capacity(),
                        grown.capacity()
                    );
                    let grown = Arc::new(grown);
                    let next = match data {
                        SeriesData::Leaf(_) => SeriesData::Leaf(grown),
                        SeriesData::Indexed(source) => {
                            let source = source.with_tail_grown(grown);
                            if self.config.additional_correctness_checks {
                                if let Err(detail) = source.verify(&self.comparer, sorting) {
                                    fail_fast(FaultKind::InvariantViolation, detail);
                                }
                            }
                            SeriesData::Indexed(source)
                        }
                    };
                    self.publish(next, &guard);
                    self.stats.grows.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err) => warn!("Block growth failed, rolling over instead: {}", err),
            }
        }

        self.roll_over(data, key, value, &guard)
    }

    fn roll_over(&self, data: &SeriesData<K, V>, key: K, value: V, guard: &Guard) -> Result<()> {
        let tail = data.tail();
        if tail.is_sentinel() {
            let block = self.allocate_block(self.config.initial_block_capacity)?;
            block.append(key, value)?;
            self.publish(SeriesData::Leaf(Arc::new(block)), guard);
            return Ok(());
        }

        let block = self.allocate_block(tail.capacity())?;
        let index_key = key.clone();
        block.append(key, value)?;
        let block = Arc::new(block);

        let sorting = self.key_sorting();
        let cmp = &self.comparer;
        let registered = match data {
            SeriesData::Leaf(leaf) => {
                let Some(first) = leaf.first_key() else {
                    fail_fast(FaultKind::InvariantViolation, "full leaf block has no rows");
                };
                BlockSource::new(first.clone(), Arc::clone(leaf), cmp)
                    .and_then(|source| source.add_last(index_key, block, cmp, sorting))
            }
            SeriesData::Indexed(source) => source.add_last(index_key, block, cmp, sorting),
        };
        let source = match registered {
            Ok(source) => source,
            Err(err) => fail_fast(FaultKind::InvariantViolation, err),
        };

        if self.config.additional_correctness_checks {
            if let Err(detail) = source.verify(cmp, sorting) {
                fail_fast(FaultKind::InvariantViolation, detail);
            }
        }

        debug!(
            "Rolled series over to block {} ({} rows)",
            source.block_count(),
            source.row_count()
        );
        self.publish(SeriesData::Indexed(source), guard);
        self.stats.rollovers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn allocate_block(&self, capacity: usize) -> Result<Block<K, V>> {
        Block::allocate(capacity, Arc::clone(&self.memory)).map_err(|err| {
            error!("Series growth failed at {} rows: {}", capacity, err);
            err
        })
    }

    // Caller holds the write lock.
    fn publish(&self, next: SeriesData<K, V>, guard: &Guard) {
        let previous = self.data.swap(Owned::new(next), Ordering::AcqRel, guard);
        // SAFETY: `previous` is no longer reachable through `data`; readers that
        // loaded it are pinned and keep it alive until their guards drop.
        unsafe { guard.defer_destroy(previous) };
    }
}

impl<K, V, C> Drop for Series<K, V, C> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent readers of `data`.
        unsafe {
            let data = self.data.load(Ordering::Relaxed, epoch::unprotected());
            if !data.is_null() {
                drop(data.into_owned());
            }
        }
    }
}

impl<K, V, C> fmt::Debug for Series<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Series")
            .field("version", &self.version())
            .field("flags", &self.flags())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
