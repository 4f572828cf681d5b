//! BlockSource - ordered index over many blocks.
//!
//! A block source maps the first key of every block to the block itself and
//! stitches the blocks into one logical row sequence:
//!
//! ```text
//! index key:   0        4096       8192
//!              │         │          │
//! blocks:   [0..4095] [4096..8191] [8192..8203 ____]
//! offsets:     0        4096       8192
//! ```
//!
//! Sources are immutable snapshots. [`BlockSource::add_last`] returns a new
//! source that shares every existing block, so a reader holding the previous
//! snapshot keeps a consistent view.
//!
//! # Directional resolution
//!
//! The candidate block is the last block whose first key is `<= key` for
//! EQ/LE/GT and `< key` for LT/GE. A GE/GT query can then miss at the end of
//! that block when the key falls between two blocks; the search rolls forward
//! once to the next block, whose first row always satisfies the query because
//! every registered block is non-empty and starts after the candidate.

use crate::block::Block;
use crate::comparer::KeyComparer;
use crate::config::KeySorting;
use crate::error::{Result, SeriesError};
use crate::lookup::Lookup;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::Arc;

/// Location of a row: block index within the source and row within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPosition {
    /// Index of the block (always 0 for a single-block series).
    pub block: usize,
    /// Row index inside the block.
    pub row: usize,
}

struct BlockEntry<K, V> {
    key: K,
    block: Arc<Block<K, V>>,
}

impl<K: Clone, V> Clone for BlockEntry<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            block: Arc::clone(&self.block),
        }
    }
}

/// Ordered index of `(first key, block)` entries.
pub struct BlockSource<K, V> {
    entries: Vec<BlockEntry<K, V>>,
    /// Absolute row index of the first row of each block.
    offsets: Vec<usize>,
    /// Shared capacity of every block, or 0 if block sizes vary.
    constant_block_length: usize,
}

impl<K, V> BlockSource<K, V> {
    /// Creates a source seeded with a single non-empty block.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidBlock` if the block is empty or `key` is
    /// not its first key.
    pub fn new<C: KeyComparer<K> + ?Sized>(
        key: K,
        block: Arc<Block<K, V>>,
        cmp: &C,
    ) -> Result<Self> {
        check_entry(&key, &block, cmp)?;
        let constant_block_length = block.capacity();
        Ok(Self {
            entries: vec![BlockEntry { key, block }],
            offsets: vec![0],
            constant_block_length,
        })
    }

    /// Number of registered blocks.
    pub fn block_count(&self) -> usize {
        self.entries.len()
    }

    /// Shared block capacity enabling division-based positioning, or 0.
    pub fn constant_block_length(&self) -> usize {
        self.constant_block_length
    }

    /// Total number of published rows across all blocks.
    pub fn row_count(&self) -> usize {
        match (self.offsets.last(), self.entries.last()) {
            (Some(offset), Some(tail)) => offset + tail.block.row_count(),
            _ => 0,
        }
    }

    /// The last registered block, which receives appends.
    pub fn tail(&self) -> &Arc<Block<K, V>> {
        // Sources are never empty: `new` seeds one entry and entries are never removed.
        &self.entries[self.entries.len() - 1].block
    }

    /// Direct positional lookup of a registered block.
    pub fn try_get_at(&self, source_index: usize) -> Option<(&K, &Arc<Block<K, V>>)> {
        self.entries
            .get(source_index)
            .map(|entry| (&entry.key, &entry.block))
    }

    /// Returns the block registered after `block_index`.
    pub fn try_get_next_block(&self, block_index: usize) -> Option<&Arc<Block<K, V>>> {
        self.entries.get(block_index + 1).map(|entry| &entry.block)
    }

    /// Absolute row index of a position.
    pub fn absolute_index(&self, position: RowPosition) -> usize {
        self.offsets[position.block] + position.row
    }

    /// Resolves an absolute row index to its block and row.
    ///
    /// Uses division when all blocks share one capacity, otherwise a binary
    /// search over block offsets.
    pub fn locate(&self, index: usize) -> Option<RowPosition> {
        if index >= self.row_count() {
            return None;
        }

        let position = if self.constant_block_length > 0 {
            RowPosition {
                block: index / self.constant_block_length,
                row: index % self.constant_block_length,
            }
        } else {
            let block = self.offsets.partition_point(|&offset| offset <= index) - 1;
            RowPosition {
                block,
                row: index - self.offsets[block],
            }
        };
        Some(position)
    }

    /// Returns the row at a position.
    pub fn row_at(&self, position: RowPosition) -> Option<(&K, &V)> {
        self.entries
            .get(position.block)
            .and_then(|entry| entry.block.row_at(position.row))
    }

    /// Finds the block whose key range should contain the answer for `lookup`.
    ///
    /// Returns the block index, its index key and the block.
    pub fn try_find_at<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        lookup: Lookup,
        cmp: &C,
    ) -> Option<(usize, &K, &Arc<Block<K, V>>)> {
        let resolve_before = matches!(lookup, Lookup::LT | Lookup::GE);
        let past = self.entries.partition_point(|entry| {
            let order = cmp.compare(&entry.key, key);
            if resolve_before {
                order == CmpOrdering::Less
            } else {
                order != CmpOrdering::Greater
            }
        });

        let index = match past.checked_sub(1) {
            Some(index) => index,
            // Every block starts after the key: only forward lookups can still match.
            None if lookup.is_forward() => 0,
            None => return None,
        };
        let entry = &self.entries[index];
        Some((index, &entry.key, &entry.block))
    }

    /// Finds the row satisfying `lookup` relative to `key`.
    pub fn find<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        lookup: Lookup,
        cmp: &C,
        sorting: KeySorting,
    ) -> Option<RowPosition> {
        if !sorting.is_sorted() {
            return self.find_unsorted(key, lookup, cmp);
        }

        let (mut index, _, _) = self.try_find_at(key, lookup, cmp)?;
        let mut roll_forward = lookup.is_forward();
        loop {
            let block = &self.entries[index].block;
            match block.lookup_key(key, lookup, cmp, sorting) {
                Some(row) => return Some(RowPosition { block: index, row }),
                None if roll_forward && index + 1 < self.entries.len() => {
                    roll_forward = false;
                    index += 1;
                }
                None => return None,
            }
        }
    }

    // Per-block linear candidates, then the closest across blocks; later rows win ties.
    fn find_unsorted<C: KeyComparer<K> + ?Sized>(
        &self,
        key: &K,
        lookup: Lookup,
        cmp: &C,
    ) -> Option<RowPosition> {
        let mut best: Option<(RowPosition, &K)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let Some(row) = entry
                .block
                .lookup_key(key, lookup, cmp, KeySorting::NotSorted)
            else {
                continue;
            };
            let Some(candidate) = entry.block.key_at(row) else {
                continue;
            };
            let closer = match best {
                None => true,
                Some((_, best_key)) => {
                    let order = cmp.compare(candidate, best_key);
                    if lookup.is_forward() {
                        order != CmpOrdering::Greater
                    } else {
                        order != CmpOrdering::Less
                    }
                }
            };
            if closer {
                best = Some((RowPosition { block: index, row }, candidate));
            }
        }
        best.map(|(position, _)| position)
    }

    /// Checks every structural invariant of the source.
    ///
    /// Returns a description of the first violation found.
    pub fn verify<C: KeyComparer<K> + ?Sized>(
        &self,
        cmp: &C,
        sorting: KeySorting,
    ) -> std::result::Result<(), String> {
        let mut expected_offset = 0;
        for (index, entry) in self.entries.iter().enumerate() {
            check_entry(&entry.key, &entry.block, cmp)
                .map_err(|err| format!("block {index}: {err}"))?;
            if self.offsets[index] != expected_offset {
                return Err(format!(
                    "block {index}: offset {} != {expected_offset}",
                    self.offsets[index]
                ));
            }
            if self.constant_block_length > 0
                && entry.block.capacity() != self.constant_block_length
            {
                return Err(format!(
                    "block {index}: capacity {} != constant length {}",
                    entry.block.capacity(),
                    self.constant_block_length
                ));
            }
            if !entry.block.is_ordered(cmp, sorting) {
                return Err(format!("block {index}: rows out of order"));
            }
            if index > 0 {
                let previous = &self.entries[index - 1].block;
                if let Some(last) = previous.last_key() {
                    if !follows(last, &entry.key, cmp, sorting) {
                        return Err(format!("block {index}: overlaps previous block"));
                    }
                }
            }
            expected_offset += entry.block.row_count();
        }
        Ok(())
    }
}

impl<K: Clone, V> BlockSource<K, V> {
    /// Returns a new source with `block` registered as the tail.
    ///
    /// The current tail is considered retired: its row count is frozen into
    /// the offsets of the new snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidBlock` if the block is empty, `key` is not
    /// its first key, or `key` does not follow the current tail.
    pub fn add_last<C: KeyComparer<K> + ?Sized>(
        &self,
        key: K,
        block: Arc<Block<K, V>>,
        cmp: &C,
        sorting: KeySorting,
    ) -> Result<Self> {
        check_entry(&key, &block, cmp)?;

        let tail = self.tail();
        if let Some(last) = tail.last_key() {
            if !follows(last, &key, cmp, sorting) {
                return Err(SeriesError::InvalidBlock(format!(
                    "first key does not follow the tail under {sorting} sorting"
                )));
            }
        }

        let retired_rows = tail.row_count();
        let constant_block_length = if self.constant_block_length > 0
            && retired_rows == self.constant_block_length
            && block.capacity() == self.constant_block_length
        {
            self.constant_block_length
        } else {
            0
        };

        let mut offsets = self.offsets.clone();
        let tail_offset = offsets.last().copied().unwrap_or(0);
        offsets.push(tail_offset + retired_rows);

        let mut entries = self.entries.clone();
        entries.push(BlockEntry { key, block });

        Ok(Self {
            entries,
            offsets,
            constant_block_length,
        })
    }

    /// Returns a new source with the block at `block_index` replaced.
    ///
    /// The replacement must hold the same keys; only values may differ.
    pub fn with_block_replaced(&self, block_index: usize, block: Arc<Block<K, V>>) -> Self {
        let mut entries = self.entries.clone();
        entries[block_index].block = block;
        Self {
            entries,
            offsets: self.offsets.clone(),
            constant_block_length: self.constant_block_length,
        }
    }

    /// Returns a new source with the tail swapped for a larger copy of itself.
    ///
    /// Division-based positioning is dropped when the capacity changes.
    pub fn with_tail_grown(&self, block: Arc<Block<K, V>>) -> Self {
        let constant_block_length = if block.capacity() == self.constant_block_length {
            self.constant_block_length
        } else {
            0
        };
        let mut entries = self.entries.clone();
        if let Some(tail) = entries.last_mut() {
            tail.block = block;
        }
        Self {
            entries,
            offsets: self.offsets.clone(),
            constant_block_length,
        }
    }
}

impl<K, V> fmt::Debug for BlockSource<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockSource")
            .field("block_count", &self.block_count())
            .field("row_count", &self.row_count())
            .field("constant_block_length", &self.constant_block_length)
            .finish()
    }
}

fn check_entry<K, V, C: KeyComparer<K> + ?Sized>(
    key: &K,
    block: &Block<K, V>,
    cmp: &C,
) -> Result<()> {
    match block.first_key() {
        None => Err(SeriesError::InvalidBlock("block is empty".to_string())),
        Some(first) if cmp.compare(key, first) != CmpOrdering::Equal => Err(
            SeriesError::InvalidBlock("index key differs from the block's first key".to_string()),
        ),
        Some(_) => Ok(()),
    }
}

/// Returns true if `next` may follow `previous` under `sorting`.
pub(crate) fn follows<K, C: KeyComparer<K> + ?Sized>(
    previous: &K,
    next: &K,
    cmp: &C,
    sorting: KeySorting,
) -> bool {
    let order = cmp.compare(previous, next);
    match sorting {
        KeySorting::Strong => order == CmpOrdering::Less,
        KeySorting::Weak => order != CmpOrdering::Greater,
        KeySorting::NotSorted => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::OrdComparer;
    use crate::memory::Unbounded;

    fn block(keys: &[i64], capacity: usize) -> Arc<Block<i64, i64>> {
        let block = Block::allocate(capacity, Arc::new(Unbounded)).unwrap();
        for &k in keys {
            block.append(k, k * 10).unwrap();
        }
        Arc::new(block)
    }

    fn source(blocks: &[&[i64]], capacity: usize) -> BlockSource<i64, i64> {
        let mut iter = blocks.iter();
        let first = iter.next().unwrap();
        let mut source = BlockSource::new(first[0], block(first, capacity), &OrdComparer).unwrap();
        for keys in iter {
            source = source
                .add_last(keys[0], block(keys, capacity), &OrdComparer, KeySorting::Strong)
                .unwrap();
        }
        source
    }

    fn key_at(source: &BlockSource<i64, i64>, position: Option<RowPosition>) -> Option<i64> {
        position.and_then(|p| source.row_at(p)).map(|(k, _)| *k)
    }

    #[test]
    fn test_find_exact_across_blocks() {
        let source = source(&[&[1, 3, 5], &[7, 9, 11], &[13, 15]], 3);
        for key in [1, 5, 7, 11, 13, 15] {
            let found = source.find(&key, Lookup::EQ, &OrdComparer, KeySorting::Strong);
            assert_eq!(key_at(&source, found), Some(key));
        }
        assert_eq!(
            source.find(&6, Lookup::EQ, &OrdComparer, KeySorting::Strong),
            None
        );
    }

    #[test]
    fn test_find_rolls_forward_between_blocks() {
        let source = source(&[&[1, 3, 5], &[7, 9, 11]], 3);
        let find = |key, lookup| key_at(&source, source.find(&key, lookup, &OrdComparer, KeySorting::Strong));

        // 6 falls between the blocks: GE/GT resolve into the next block.
        assert_eq!(find(6, Lookup::GE), Some(7));
        assert_eq!(find(6, Lookup::GT), Some(7));
        assert_eq!(find(5, Lookup::GT), Some(7));
        assert_eq!(find(6, Lookup::LE), Some(5));
        assert_eq!(find(7, Lookup::LT), Some(5));
        assert_eq!(find(0, Lookup::GE), Some(1));
        assert_eq!(find(0, Lookup::LE), None);
        assert_eq!(find(11, Lookup::GT), None);
        assert_eq!(find(12, Lookup::GE), None);
    }

    #[test]
    fn test_weak_duplicates_across_boundary() {
        let first = block(&[1, 2, 2], 3);
        let second = block(&[2, 2, 3], 3);
        let source = BlockSource::new(1, first, &OrdComparer)
            .unwrap()
            .add_last(2, second, &OrdComparer, KeySorting::Weak)
            .unwrap();

        let find = |lookup| source.find(&2, lookup, &OrdComparer, KeySorting::Weak);
        assert_eq!(find(Lookup::EQ), Some(RowPosition { block: 1, row: 1 }));
        assert_eq!(find(Lookup::GE), Some(RowPosition { block: 0, row: 1 }));
        assert_eq!(find(Lookup::LT), Some(RowPosition { block: 0, row: 0 }));
        assert_eq!(find(Lookup::GT), Some(RowPosition { block: 1, row: 2 }));
    }

    #[test]
    fn test_add_last_rejects_bad_entries() {
        let source = source(&[&[1, 2, 3]], 3);

        let empty = Arc::new(Block::allocate(3, Arc::new(Unbounded)).unwrap());
        assert!(matches!(
            source.add_last(4, empty, &OrdComparer, KeySorting::Strong),
            Err(SeriesError::InvalidBlock(_))
        ));
        assert!(matches!(
            source.add_last(5, block(&[4, 5], 3), &OrdComparer, KeySorting::Strong),
            Err(SeriesError::InvalidBlock(_))
        ));
        assert!(matches!(
            source.add_last(3, block(&[3, 4], 3), &OrdComparer, KeySorting::Strong),
            Err(SeriesError::InvalidBlock(_))
        ));
        assert!(source
            .add_last(3, block(&[3, 4], 3), &OrdComparer, KeySorting::Weak)
            .is_ok());
    }

    #[test]
    fn test_locate_constant_length() {
        let source = source(&[&[0, 1, 2, 3], &[4, 5, 6, 7], &[8, 9]], 4);
        assert_eq!(source.constant_block_length(), 4);
        assert_eq!(source.row_count(), 10);
        assert_eq!(source.locate(5), Some(RowPosition { block: 1, row: 1 }));
        assert_eq!(source.locate(9), Some(RowPosition { block: 2, row: 1 }));
        assert_eq!(source.locate(10), None);
    }

    #[test]
    fn test_locate_variable_length() {
        let first = block(&[0, 1], 2);
        let source = BlockSource::new(0, first, &OrdComparer)
            .unwrap()
            .add_last(2, block(&[2, 3, 4], 4), &OrdComparer, KeySorting::Strong)
            .unwrap()
            .add_last(5, block(&[5], 4), &OrdComparer, KeySorting::Strong)
            .unwrap();

        assert_eq!(source.constant_block_length(), 0);
        for index in 0..6 {
            let position = source.locate(index).unwrap();
            assert_eq!(source.absolute_index(position), index);
            assert_eq!(source.row_at(position).map(|(k, _)| *k), Some(index as i64));
        }
    }

    #[test]
    fn test_snapshots_are_independent() {
        let before = source(&[&[1, 2]], 2);
        let after = before
            .add_last(3, block(&[3], 2), &OrdComparer, KeySorting::Strong)
            .unwrap();
        assert_eq!(before.block_count(), 1);
        assert_eq!(after.block_count(), 2);
        assert!(Arc::ptr_eq(
            before.try_get_at(0).unwrap().1,
            after.try_get_at(0).unwrap().1
        ));
        assert!(after.try_get_next_block(0).is_some());
        assert!(after.try_get_next_block(1).is_none());
    }

    #[test]
    fn test_find_unsorted() {
        let first = block(&[5, 1], 2);
        let source = BlockSource::new(5, first, &OrdComparer)
            .unwrap()
            .add_last(9, block(&[9, 3], 2), &OrdComparer, KeySorting::NotSorted)
            .unwrap();

        let find = |key, lookup| key_at(&source, source.find(&key, lookup, &OrdComparer, KeySorting::NotSorted));
        assert_eq!(find(3, Lookup::EQ), Some(3));
        assert_eq!(find(4, Lookup::LE), Some(3));
        assert_eq!(find(4, Lookup::GE), Some(5));
        assert_eq!(find(9, Lookup::GT), None);
    }

    #[test]
    fn test_tail_grown_drops_constant_length() {
        let source = source(&[&[0, 1, 2, 3], &[4, 5, 6, 7]], 4);
        let tail = source.tail();
        let grown = Arc::new(tail.grow(0, 8).unwrap());
        grown.append(8, 80).unwrap();

        let grown = source.with_tail_grown(grown);
        assert_eq!(source.constant_block_length(), 4);
        assert_eq!(grown.constant_block_length(), 0);
        assert_eq!(grown.block_count(), 2);
        assert_eq!(grown.row_count(), 9);
        assert_eq!(grown.tail().capacity(), 8);
        assert_eq!(grown.locate(8), Some(RowPosition { block: 1, row: 4 }));
        assert!(grown.verify(&OrdComparer, KeySorting::Strong).is_ok());

        let next = grown
            .add_last(9, block(&[9], 8), &OrdComparer, KeySorting::Strong)
            .unwrap();
        assert_eq!(next.constant_block_length(), 0);
        assert_eq!(next.locate(9), Some(RowPosition { block: 2, row: 0 }));
    }

    #[test]
    fn test_verify() {
        let source = source(&[&[1, 2], &[3, 4]], 2);
        assert!(source.verify(&OrdComparer, KeySorting::Strong).is_ok());
    }
}
