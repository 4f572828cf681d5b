//! Sliding windows over a series.
//!
//! A [`SpanCursor`] drives two [`SeriesCursor`]s, `left` and `right`, that
//! bound a span of rows. A [`SpanOp`] decides after every move whether the
//! span must shrink, is valid, or must expand, and keeps an online aggregate
//! of the rows inside it.
//!
//! ```text
//!            left            right
//!             │                │
//! rows:  ... [r3   r4   r5   r6]  r7  ...
//!                               └── move_next: admit r7, then settle
//! ```
//!
//! Settling after a move loops on [`SpanOp::expand`]: `Shrink` retracts the
//! left row and advances `left`; `Expand` moves `left` back and admits the
//! row; `Valid` stops. Expanding past the first row of the series asks the
//! operator whether the incomplete span is acceptable.

pub mod online;
pub mod span;

pub use online::{AsF64, OnlineOp, SumAvg, SumAvgOp};
pub use span::{SpanOpCount, SpanOpWidth};

use crate::comparer::KeyComparer;
use crate::error::{fail_fast, FaultKind};
use crate::lookup::Lookup;
use crate::series::{Series, SeriesCursor, SeriesItem};
use std::fmt;

/// Decision of a span operator about the current span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanAdjust {
    /// Too wide: retract from the left.
    Shrink,
    /// The span is valid.
    Valid,
    /// Too narrow: extend to the left.
    Expand,
}

/// State machine deciding the shape of a span and aggregating its rows.
///
/// An operator is owned by exactly one [`SpanCursor`].
pub trait SpanOp<K: SeriesItem, V: SeriesItem> {
    /// Materialized aggregate.
    type Output;

    /// Minimum number of rows in a valid span.
    fn min_width(&self) -> usize;

    /// Returns true if the span can only move forward.
    fn is_forward_only(&self) -> bool {
        false
    }

    /// Classifies the span `[left, right]`.
    fn expand<C: KeyComparer<K>>(
        &mut self,
        left: &SeriesCursor<'_, K, V, C>,
        right: &SeriesCursor<'_, K, V, C>,
    ) -> SpanAdjust;

    /// Admits the row under `right` after the right boundary advanced.
    fn add_new_right<C: KeyComparer<K>>(&mut self, right: &SeriesCursor<'_, K, V, C>);

    /// Admits the row under `left` after the left boundary moved back.
    fn add_new_left<C: KeyComparer<K>>(&mut self, left: &SeriesCursor<'_, K, V, C>);

    /// Retracts the row under `left` and moves it forward.
    fn remove_and_move_next_left<C: KeyComparer<K>>(
        &mut self,
        left: &mut SeriesCursor<'_, K, V, C>,
    ) -> bool;

    /// Retracts the row under `right` and moves it back.
    fn remove_and_move_previous_right<C: KeyComparer<K>>(
        &mut self,
        right: &mut SeriesCursor<'_, K, V, C>,
    ) -> bool;

    /// Called when the span asked to expand but `left` is at the first row.
    ///
    /// Returns true if the span is valid anyway.
    fn expand_exhausted(&mut self) -> bool;

    /// Current aggregate.
    fn result(&self) -> Self::Output;

    /// Clears the aggregate and any decision state.
    fn reset(&mut self);
}

/// Cursor over the valid spans of a series.
///
/// ```rust,ignore
/// let op = SpanOpCount::new(5, false, SumAvgOp::new())?;
/// let mut window = SpanCursor::new(&series, op);
/// while window.move_next() {
///     let sum = window.result().map(|r| r.sum);
/// }
/// ```
pub struct SpanCursor<'a, K, V, C, S> {
    left: SeriesCursor<'a, K, V, C>,
    right: SeriesCursor<'a, K, V, C>,
    op: S,
    valid: bool,
    checks: bool,
}

impl<'a, K, V, C, S> SpanCursor<'a, K, V, C, S>
where
    K: SeriesItem,
    V: SeriesItem,
    C: KeyComparer<K>,
    S: SpanOp<K, V>,
{
    /// Creates an unpositioned span cursor.
    pub fn new(series: &'a Series<K, V, C>, op: S) -> Self {
        Self {
            left: series.cursor(),
            right: series.cursor(),
            op,
            valid: false,
            checks: series.config().additional_correctness_checks,
        }
    }

    /// Returns true if the cursor is on a valid span.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Key of the right boundary, which identifies the span.
    pub fn current_key(&self) -> Option<&K> {
        self.valid.then(|| self.right.key()).flatten()
    }

    /// Aggregate of the current span.
    pub fn result(&self) -> Option<S::Output> {
        self.valid.then(|| self.op.result())
    }

    /// Right boundary key and aggregate.
    pub fn current(&self) -> Option<(K, S::Output)> {
        let key = self.current_key()?.clone();
        Some((key, self.op.result()))
    }

    /// Absolute row indexes `(left, right)` of the span.
    pub fn bounds(&self) -> Option<(usize, usize)> {
        if !self.valid {
            return None;
        }
        Some((self.left.position()?, self.right.position()?))
    }

    /// Left boundary cursor.
    pub fn left(&self) -> &SeriesCursor<'a, K, V, C> {
        &self.left
    }

    /// Right boundary cursor.
    pub fn right(&self) -> &SeriesCursor<'a, K, V, C> {
        &self.right
    }

    /// Forgets the position and clears the aggregate.
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.op.reset();
        self.valid = false;
    }

    /// Moves to the first valid span.
    pub fn move_first(&mut self) -> bool {
        self.reset();
        let first_right = self.op.min_width().saturating_sub(1);
        if !self.right.move_to(first_right) {
            return false;
        }
        self.seed_forward()
    }

    /// Moves to the span ending at the last row.
    pub fn move_last(&mut self) -> bool {
        self.reset();
        if !self.right.move_last() {
            return false;
        }
        self.seed_here()
    }

    /// Moves to the span whose right boundary satisfies `lookup` for `key`.
    ///
    /// GE and GT keep moving right until a valid span is found.
    pub fn move_at(&mut self, key: &K, lookup: Lookup) -> bool {
        self.reset();
        if !self.right.move_at(key, lookup) {
            return false;
        }
        if lookup.is_forward() {
            self.seed_forward()
        } else {
            self.seed_here()
        }
    }

    /// Advances the right boundary to the next valid span.
    ///
    /// An unpositioned cursor moves to the first span. If no later span is
    /// valid the cursor stays where it was.
    pub fn move_next(&mut self) -> bool {
        let Some(saved) = self.right.position() else {
            return self.move_first();
        };

        loop {
            if !self.right.move_next() {
                if self.right.position() != Some(saved) {
                    self.reposition(saved);
                }
                return false;
            }
            self.op.add_new_right(&self.right);
            if self.settle() {
                self.valid = true;
                return true;
            }
        }
    }

    /// Moves the right boundary back one row.
    ///
    /// Not available for forward-only operators. If the previous span is not
    /// valid the cursor stays where it was.
    pub fn move_previous(&mut self) -> bool {
        if self.op.is_forward_only() {
            return false;
        }
        let Some(saved) = self.right.position() else {
            return self.move_last();
        };
        if saved == 0 {
            return false;
        }

        if !self.op.remove_and_move_previous_right(&mut self.right) {
            fail_fast(
                FaultKind::StructuralMoveFailure,
                format_args!("right boundary could not move back from row {saved}"),
            );
        }
        if self.right.position() < self.left.position() {
            // The span was a single row; restart it at the new right boundary.
            self.left = self.right.clone();
            self.op.add_new_right(&self.right);
        }

        if self.settle() {
            self.try_expand_eager();
            self.valid = true;
            true
        } else {
            self.reposition(saved);
            false
        }
    }

    // Right is positioned and nothing is admitted yet.
    fn seed_here(&mut self) -> bool {
        self.left = self.right.clone();
        self.op.add_new_right(&self.right);
        if self.settle() {
            self.on_valid_seed();
            true
        } else {
            self.reset();
            false
        }
    }

    fn seed_forward(&mut self) -> bool {
        self.left = self.right.clone();
        self.op.add_new_right(&self.right);
        loop {
            if self.settle() {
                self.on_valid_seed();
                return true;
            }
            if !self.right.move_next() {
                self.reset();
                return false;
            }
            self.op.add_new_right(&self.right);
        }
    }

    fn on_valid_seed(&mut self) {
        if self.left.position() == self.right.position() {
            self.try_expand_eager();
        }
        self.valid = true;
    }

    fn reposition(&mut self, index: usize) {
        self.reset();
        if self.right.move_to(index) {
            self.seed_here();
        }
    }

    // Returns whether the span ended up valid.
    fn settle(&mut self) -> bool {
        loop {
            match self.op.expand(&self.left, &self.right) {
                SpanAdjust::Valid => return true,
                SpanAdjust::Shrink => {
                    if !self.op.remove_and_move_next_left(&mut self.left) {
                        fail_fast(
                            FaultKind::StructuralMoveFailure,
                            "left boundary could not move forward while shrinking",
                        );
                    }
                    if self.checks && self.left.position() > self.right.position() {
                        fail_fast(
                            FaultKind::InvariantViolation,
                            "left boundary passed the right boundary",
                        );
                    }
                }
                SpanAdjust::Expand => {
                    if self.left.move_previous() {
                        self.op.add_new_left(&self.left);
                    } else {
                        return self.op.expand_exhausted();
                    }
                }
            }
        }
    }

    // Extends the left boundary while the span stays valid.
    fn try_expand_eager(&mut self) {
        loop {
            let mut candidate = self.left.clone();
            if !candidate.move_previous() {
                return;
            }
            self.op.add_new_left(&candidate);
            if self.op.expand(&candidate, &self.right) == SpanAdjust::Valid {
                self.left = candidate;
                continue;
            }
            if !self.op.remove_and_move_next_left(&mut candidate) {
                fail_fast(
                    FaultKind::StructuralMoveFailure,
                    "candidate could not return to the left boundary",
                );
            }
            return;
        }
    }
}

impl<K, V, C, S> Clone for SpanCursor<'_, K, V, C, S>
where
    K: SeriesItem,
    V: SeriesItem,
    C: KeyComparer<K>,
    S: SpanOp<K, V> + Clone,
{
    /// Builds a fresh operator from the same configuration and positions it
    /// on the same right boundary.
    fn clone(&self) -> Self {
        let mut op = self.op.clone();
        op.reset();
        let mut cloned = Self {
            left: self.left.clone(),
            right: self.right.clone(),
            op,
            valid: false,
            checks: self.checks,
        };
        match self.right.position() {
            Some(index) if self.valid => cloned.reposition(index),
            _ => cloned.reset(),
        }
        cloned
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C, S> fmt::Debug for SpanCursor<'_, K, V, C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanCursor")
            .field("left", &self.left)
            .field("right", &self.right)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}
