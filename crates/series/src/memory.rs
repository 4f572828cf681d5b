//! Row memory providers.
//!
//! Blocks rent row capacity from a [`MemoryProvider`] before allocating and
//! give it back when dropped. The provider decides whether a request can be
//! satisfied; the series treats a refusal as a recoverable growth failure.

use crate::error::{Result, SeriesError};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of row capacity for block storage.
pub trait MemoryProvider: Send + Sync + fmt::Debug {
    /// Reserves capacity for `rows` rows.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError::CapacityExhausted` if the rows cannot be provided.
    fn rent(&self, rows: usize) -> Result<()>;

    /// Returns capacity previously obtained with [`rent`](Self::rent).
    fn give_back(&self, rows: usize);
}

/// Provider without a limit; only real allocation failures are reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl MemoryProvider for Unbounded {
    fn rent(&self, _rows: usize) -> Result<()> {
        Ok(())
    }

    fn give_back(&self, _rows: usize) {}
}

/// Provider with a fixed row budget shared by every block that uses it.
#[derive(Debug)]
pub struct Budgeted {
    limit: usize,
    rented: AtomicUsize,
}

impl Budgeted {
    /// Creates a provider that hands out at most `limit` rows at a time.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            rented: AtomicUsize::new(0),
        }
    }

    /// Rows currently rented.
    pub fn rented(&self) -> usize {
        self.rented.load(Ordering::Relaxed)
    }

    /// Rows still available.
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.rented())
    }
}

impl MemoryProvider for Budgeted {
    fn rent(&self, rows: usize) -> Result<()> {
        let mut current = self.rented.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(rows) {
                Some(next) if next <= self.limit => next,
                _ => return Err(SeriesError::CapacityExhausted { requested: rows }),
            };
            match self.rented.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn give_back(&self, rows: usize) {
        self.rented.fetch_sub(rows, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budgeted_rent_and_give_back() {
        let provider = Budgeted::new(10);
        provider.rent(6).unwrap();
        assert_eq!(provider.available(), 4);

        let err = provider.rent(5).unwrap_err();
        assert_eq!(err, SeriesError::CapacityExhausted { requested: 5 });
        assert_eq!(provider.rented(), 6);

        provider.give_back(6);
        assert_eq!(provider.rented(), 0);
        provider.rent(10).unwrap();
    }

    #[test]
    fn test_budgeted_overflow_is_refused() {
        let provider = Budgeted::new(usize::MAX);
        provider.rent(1).unwrap();
        assert!(provider.rent(usize::MAX).is_err());
    }
}
