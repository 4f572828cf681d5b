//! Online aggregates maintained incrementally as rows enter and leave a span.

/// Aggregate that supports both adding and retracting a value.
pub trait OnlineOp<V> {
    /// Materialized aggregate.
    type Output;

    /// Admits a value into the aggregate.
    fn add(&mut self, value: &V);

    /// Retracts a previously admitted value.
    fn remove(&mut self, value: &V);

    /// Number of values currently admitted.
    fn count(&self) -> usize;

    /// Current aggregate.
    fn result(&self) -> Self::Output;

    /// Clears all state.
    fn reset(&mut self);
}

/// Numeric view of a value for floating point aggregates.
pub trait AsF64 {
    /// Returns the value as `f64`.
    fn as_f64(&self) -> f64;
}

macro_rules! impl_as_f64 {
    ($($t:ty),*) => {
        $(
            impl AsF64 for $t {
                #[inline]
                fn as_f64(&self) -> f64 {
                    *self as f64
                }
            }
        )*
    };
}

impl_as_f64!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

/// Count and sum of the admitted values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SumAvg {
    /// Number of values.
    pub count: usize,
    /// Sum of the values.
    pub sum: f64,
}

impl SumAvg {
    /// Arithmetic mean, or `None` for an empty span.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Moving sum and average.
#[derive(Debug, Clone, Default)]
pub struct SumAvgOp {
    count: usize,
    sum: f64,
}

impl SumAvgOp {
    /// Creates an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<V: AsF64> OnlineOp<V> for SumAvgOp {
    type Output = SumAvg;

    fn add(&mut self, value: &V) {
        self.count += 1;
        self.sum += value.as_f64();
    }

    fn remove(&mut self, value: &V) {
        self.count -= 1;
        // Exact zero once empty, so rounding residue does not leak into the next span.
        if self.count == 0 {
            self.sum = 0.0;
        } else {
            self.sum -= value.as_f64();
        }
    }

    fn count(&self) -> usize {
        self.count
    }

    fn result(&self) -> SumAvg {
        SumAvg {
            count: self.count,
            sum: self.sum,
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.sum = 0.0;
    }
}
