//! Count-bounded and width-bounded span operators.

use super::online::OnlineOp;
use super::{SpanAdjust, SpanOp};
use crate::comparer::{KeyComparer, KeyDistance};
use crate::error::{Result, SeriesError};
use crate::lookup::Lookup;
use crate::series::{SeriesCursor, SeriesItem};

fn span_len<K, V, C>(left: &SeriesCursor<'_, K, V, C>, right: &SeriesCursor<'_, K, V, C>) -> usize {
    match (left.position(), right.position()) {
        (Some(l), Some(r)) if l <= r => r - l + 1,
        _ => 0,
    }
}

/// Span of exactly `width` rows ending at the right cursor.
///
/// With `allow_incomplete`, spans at the start of the series that cannot
/// reach `width` rows are reported as valid.
#[derive(Debug, Clone)]
pub struct SpanOpCount<O> {
    width: usize,
    allow_incomplete: bool,
    online: O,
}

impl<O> SpanOpCount<O> {
    /// Creates a count-bounded span.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidConfig` if `width` is zero.
    pub fn new(width: usize, allow_incomplete: bool, online: O) -> Result<Self> {
        if width == 0 {
            return Err(SeriesError::InvalidConfig(
                "span width must be at least one row".to_string(),
            ));
        }
        Ok(Self {
            width,
            allow_incomplete,
            online,
        })
    }

    /// Configured number of rows.
    pub fn width(&self) -> usize {
        self.width
    }
}

impl<K, V, O> SpanOp<K, V> for SpanOpCount<O>
where
    K: SeriesItem,
    V: SeriesItem,
    O: OnlineOp<V>,
{
    type Output = O::Output;

    fn min_width(&self) -> usize {
        if self.allow_incomplete {
            1
        } else {
            self.width
        }
    }

    fn expand<C: KeyComparer<K>>(
        &mut self,
        left: &SeriesCursor<'_, K, V, C>,
        right: &SeriesCursor<'_, K, V, C>,
    ) -> SpanAdjust {
        match span_len(left, right).cmp(&self.width) {
            std::cmp::Ordering::Less => SpanAdjust::Expand,
            std::cmp::Ordering::Equal => SpanAdjust::Valid,
            std::cmp::Ordering::Greater => SpanAdjust::Shrink,
        }
    }

    fn add_new_right<C: KeyComparer<K>>(&mut self, right: &SeriesCursor<'_, K, V, C>) {
        if let Some(value) = right.value() {
            self.online.add(value);
        }
    }

    fn add_new_left<C: KeyComparer<K>>(&mut self, left: &SeriesCursor<'_, K, V, C>) {
        if let Some(value) = left.value() {
            self.online.add(value);
        }
    }

    fn remove_and_move_next_left<C: KeyComparer<K>>(
        &mut self,
        left: &mut SeriesCursor<'_, K, V, C>,
    ) -> bool {
        if let Some(value) = left.value() {
            self.online.remove(value);
        }
        left.move_next()
    }

    fn remove_and_move_previous_right<C: KeyComparer<K>>(
        &mut self,
        right: &mut SeriesCursor<'_, K, V, C>,
    ) -> bool {
        if let Some(value) = right.value() {
            self.online.remove(value);
        }
        right.move_previous()
    }

    fn expand_exhausted(&mut self) -> bool {
        self.allow_incomplete
    }

    fn result(&self) -> O::Output {
        self.online.result()
    }

    fn reset(&mut self) {
        self.online.reset();
    }
}

/// Span bounded by the key distance between its boundaries.
///
/// `lookup` picks the boundary semantics for `d = right.key - left.key`:
///
/// | lookup | valid span                         |
/// |--------|------------------------------------|
/// | LE     | widest span with `d <= width`      |
/// | LT     | widest span with `d < width`       |
/// | GE     | narrowest span with `d >= width`   |
/// | GT     | narrowest span with `d > width`    |
#[derive(Debug, Clone)]
pub struct SpanOpWidth<O> {
    width: f64,
    lookup: Lookup,
    allow_incomplete: bool,
    last: SpanAdjust,
    online: O,
}

impl<O> SpanOpWidth<O> {
    /// Creates a width-bounded span.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::InvalidConfig` for a negative or NaN width, a
    /// zero width with LT (no span could be valid), or an EQ lookup.
    pub fn new(width: f64, lookup: Lookup, allow_incomplete: bool, online: O) -> Result<Self> {
        if width.is_nan() || width < 0.0 {
            return Err(SeriesError::InvalidConfig(format!(
                "span width must be a non-negative number, got {width}"
            )));
        }
        match lookup {
            Lookup::EQ => {
                return Err(SeriesError::InvalidConfig(
                    "width span needs a directional lookup".to_string(),
                ))
            }
            Lookup::LT if width == 0.0 => {
                return Err(SeriesError::InvalidConfig(
                    "zero width with LT admits no span".to_string(),
                ))
            }
            _ => {}
        }
        Ok(Self {
            width,
            lookup,
            allow_incomplete,
            last: SpanAdjust::Valid,
            online,
        })
    }

    /// Configured key distance.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Boundary semantics.
    pub fn lookup(&self) -> Lookup {
        self.lookup
    }

    fn fits(&self, distance: f64) -> bool {
        match self.lookup {
            Lookup::LT => distance < self.width,
            Lookup::LE | Lookup::EQ => distance <= self.width,
            Lookup::GE => distance >= self.width,
            Lookup::GT => distance > self.width,
        }
    }
}

impl<K, V, O> SpanOp<K, V> for SpanOpWidth<O>
where
    K: SeriesItem + KeyDistance,
    V: SeriesItem,
    O: OnlineOp<V>,
{
    type Output = O::Output;

    fn min_width(&self) -> usize {
        1
    }

    fn expand<C: KeyComparer<K>>(
        &mut self,
        left: &SeriesCursor<'_, K, V, C>,
        right: &SeriesCursor<'_, K, V, C>,
    ) -> SpanAdjust {
        let (Some(left_key), Some(right_key)) = (left.key(), right.key()) else {
            return SpanAdjust::Expand;
        };
        let fits = self.fits(right_key.distance_from(left_key));

        if self.lookup.is_backward() {
            return if fits {
                SpanAdjust::Valid
            } else {
                SpanAdjust::Shrink
            };
        }

        // GE/GT: step towards the narrowest span that still reaches the width.
        let decision = if !fits {
            SpanAdjust::Expand
        } else if self.last == SpanAdjust::Expand || span_len(left, right) == 1 {
            SpanAdjust::Valid
        } else {
            SpanAdjust::Shrink
        };
        self.last = decision;
        decision
    }

    fn add_new_right<C: KeyComparer<K>>(&mut self, right: &SeriesCursor<'_, K, V, C>) {
        if let Some(value) = right.value() {
            self.online.add(value);
        }
    }

    fn add_new_left<C: KeyComparer<K>>(&mut self, left: &SeriesCursor<'_, K, V, C>) {
        if let Some(value) = left.value() {
            self.online.add(value);
        }
    }

    fn remove_and_move_next_left<C: KeyComparer<K>>(
        &mut self,
        left: &mut SeriesCursor<'_, K, V, C>,
    ) -> bool {
        if let Some(value) = left.value() {
            self.online.remove(value);
        }
        left.move_next()
    }

    fn remove_and_move_previous_right<C: KeyComparer<K>>(
        &mut self,
        right: &mut SeriesCursor<'_, K, V, C>,
    ) -> bool {
        if let Some(value) = right.value() {
            self.online.remove(value);
        }
        right.move_previous()
    }

    fn expand_exhausted(&mut self) -> bool {
        self.last = SpanAdjust::Valid;
        self.lookup.is_backward() || self.allow_incomplete
    }

    fn result(&self) -> O::Output {
        self.online.result()
    }

    fn reset(&mut self) {
        self.last = SpanAdjust::Valid;
        self.online.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::online::SumAvgOp;

    #[test]
    fn test_count_rejects_zero_width() {
        assert!(SpanOpCount::new(0, false, SumAvgOp::new()).is_err());
        assert_eq!(SpanOpCount::new(3, true, SumAvgOp::new()).unwrap().width(), 3);
    }

    #[test]
    fn test_width_validation() {
        assert!(SpanOpWidth::new(0.0, Lookup::LT, false, SumAvgOp::new()).is_err());
        assert!(SpanOpWidth::new(-1.0, Lookup::LE, false, SumAvgOp::new()).is_err());
        assert!(SpanOpWidth::new(f64::NAN, Lookup::GE, false, SumAvgOp::new()).is_err());
        assert!(SpanOpWidth::new(1.0, Lookup::EQ, false, SumAvgOp::new()).is_err());
        assert!(SpanOpWidth::new(0.0, Lookup::LE, false, SumAvgOp::new()).is_ok());
        assert!(SpanOpWidth::new(0.0, Lookup::GE, false, SumAvgOp::new()).is_ok());
    }

    #[test]
    fn test_width_fits() {
        let le = SpanOpWidth::new(2.0, Lookup::LE, false, SumAvgOp::new()).unwrap();
        assert!(le.fits(2.0) && !le.fits(2.5));
        let lt = SpanOpWidth::new(2.0, Lookup::LT, false, SumAvgOp::new()).unwrap();
        assert!(!lt.fits(2.0) && lt.fits(1.9));
        let ge = SpanOpWidth::new(2.0, Lookup::GE, false, SumAvgOp::new()).unwrap();
        assert!(ge.fits(2.0) && !ge.fits(1.0));
        let gt = SpanOpWidth::new(2.0, Lookup::GT, false, SumAvgOp::new()).unwrap();
        assert!(!gt.fits(2.0) && gt.fits(3.0));
    }
}
