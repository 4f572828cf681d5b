//! Error and Result types for series operations.
//!
//! Recoverable failures (ordering, capacity, mutability, codec) are returned as
//! [`SeriesError`]. Broken invariants are not: they go through [`fail_fast`],
//! which logs and panics, because continuing would hand out wrong answers over
//! an ordered series.

use std::fmt;
use thiserror::Error;
use tracing::error;

/// A convenience `Result` type for series operations.
pub type Result<T> = std::result::Result<T, SeriesError>;

/// The error type for series operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeriesError {
    /// The appended key does not respect the series key sorting.
    #[error("Ordering violation: key at row {row} is not after the last key under {sorting} sorting")]
    OrderingViolation {
        /// Row index the key would have occupied.
        row: usize,
        /// Name of the sorting discipline that rejected the key.
        sorting: &'static str,
    },

    /// A block could not be allocated or grown to the requested capacity.
    #[error("Capacity exhausted: cannot provide {requested} rows")]
    CapacityExhausted {
        /// Number of rows that were requested.
        requested: usize,
    },

    /// The block has no spare row for an in-place append.
    #[error("Block is full ({capacity} rows)")]
    BlockFull {
        /// Capacity of the full block.
        capacity: usize,
    },

    /// The series is read-only (completed or created read-only).
    #[error("Series is read-only")]
    ReadOnly,

    /// The operation requires a `Mutable` series.
    #[error("Series is not mutable")]
    NotMutable,

    /// The key is not present in the series.
    #[error("Key not found")]
    KeyNotFound,

    /// A block source entry was rejected.
    #[error("Invalid block source entry: {0}")]
    InvalidBlock(String),

    /// Configuration values are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Encoding or decoding through a codec failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Frame checksum does not match the payload.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },
}

/// Class of unrecoverable fault reported through [`fail_fast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A structural invariant of a block or block source does not hold.
    InvariantViolation,
    /// A cursor that had to move could not.
    StructuralMoveFailure,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::InvariantViolation => f.write_str("invariant violation"),
            FaultKind::StructuralMoveFailure => f.write_str("structural move failure"),
        }
    }
}

/// Logs and aborts the current operation by panicking.
///
/// Used for faults where the series can no longer be trusted to produce
/// correct results.
#[cold]
#[track_caller]
pub fn fail_fast(kind: FaultKind, detail: impl fmt::Display) -> ! {
    error!(%kind, %detail, "fatal series fault");
    panic!("{kind}: {detail}");
}
