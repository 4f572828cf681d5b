//! Positional navigation over a series.

use super::{Series, SeriesItem};
use crate::comparer::KeyComparer;
use crate::lookup::Lookup;
use std::fmt;

/// Cursor over the rows of a [`Series`].
///
/// The cursor remembers an absolute row index. Rows are only ever appended,
/// so an index stays valid while the series grows underneath the cursor. A
/// failed move leaves the cursor where it was.
pub struct SeriesCursor<'a, K, V, C> {
    series: &'a Series<K, V, C>,
    position: Option<usize>,
    current: Option<(K, V)>,
}

impl<'a, K, V, C> SeriesCursor<'a, K, V, C> {
    /// Creates an unpositioned cursor.
    pub fn new(series: &'a Series<K, V, C>) -> Self {
        Self {
            series,
            position: None,
            current: None,
        }
    }

    /// The series this cursor walks.
    pub fn series(&self) -> &'a Series<K, V, C> {
        self.series
    }

    /// Absolute index of the current row.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Current key.
    pub fn key(&self) -> Option<&K> {
        self.current.as_ref().map(|(k, _)| k)
    }

    /// Current value.
    pub fn value(&self) -> Option<&V> {
        self.current.as_ref().map(|(_, v)| v)
    }

    /// Current row.
    pub fn current(&self) -> Option<(&K, &V)> {
        self.current.as_ref().map(|(k, v)| (k, v))
    }

    /// Forgets the current position.
    pub fn reset(&mut self) {
        self.position = None;
        self.current = None;
    }
}

impl<K: SeriesItem, V: SeriesItem, C: KeyComparer<K>> SeriesCursor<'_, K, V, C> {
    /// Moves to the first row.
    pub fn move_first(&mut self) -> bool {
        self.move_to(0)
    }

    /// Moves to the last row.
    pub fn move_last(&mut self) -> bool {
        match self.series.len().checked_sub(1) {
            Some(last) => self.move_to(last),
            None => false,
        }
    }

    /// Moves one row forward. An unpositioned cursor moves to the first row.
    pub fn move_next(&mut self) -> bool {
        match self.position {
            Some(position) => self.move_to(position + 1),
            None => self.move_first(),
        }
    }

    /// Moves one row back. An unpositioned cursor moves to the last row.
    pub fn move_previous(&mut self) -> bool {
        match self.position {
            Some(0) => false,
            Some(position) => self.move_to(position - 1),
            None => self.move_last(),
        }
    }

    /// Moves to the row satisfying `lookup` relative to `key`.
    pub fn move_at(&mut self, key: &K, lookup: Lookup) -> bool {
        match self.series.find_indexed(key, lookup) {
            Some((index, k, v)) => {
                self.position = Some(index);
                self.current = Some((k, v));
                true
            }
            None => false,
        }
    }

    /// Moves to the row at absolute `index`.
    pub fn move_to(&mut self, index: usize) -> bool {
        match self.series.get_at(index) {
            Some(row) => {
                self.position = Some(index);
                self.current = Some(row);
                true
            }
            None => false,
        }
    }
}

impl<K: Clone, V: Clone, C> Clone for SeriesCursor<'_, K, V, C> {
    fn clone(&self) -> Self {
        Self {
            series: self.series,
            position: self.position,
            current: self.current.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for SeriesCursor<'_, K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesCursor")
            .field("position", &self.position)
            .field("current", &self.current)
            .finish()
    }
}
