//! Alopex Series - block-indexed ordered series container
//!
//! This crate provides an append-oriented, ordered key/value series for time
//! series and other monotonic data. Rows live in fixed-capacity blocks that
//! are indexed by their first key, so lookups are two binary searches.
//!
//! # Components
//!
//! - [`Series`]: The container. Single writer, lock-free optimistic readers.
//! - [`SeriesCursor`]: Positional navigation over a series.
//! - [`SpanCursor`]: Sliding windows driven by a [`SpanOp`] with an online aggregate.
//! - [`BlockSource`]: Copy-on-write index of retired blocks.
//! - [`GorillaCodec`]: Framed Gorilla compression for `(i64, f64)` series.
//!
//! # Example
//!
//! ```rust
//! use alopex_series::{Lookup, Series, SeriesConfig, SpanCursor, SpanOpCount, SumAvgOp};
//!
//! let series: Series<i64, f64> = Series::with_config(
//!     SeriesConfig::default().with_initial_block_capacity(4),
//! )?;
//! for i in 0..100 {
//!     series.append(i, i as f64)?;
//! }
//!
//! assert_eq!(series.find(&50, Lookup::EQ), Some((50, 50.0)));
//!
//! let op = SpanOpCount::new(5, false, SumAvgOp::new())?;
//! let mut window = SpanCursor::new(&series, op);
//! assert!(window.move_at(&10, Lookup::EQ));
//! assert_eq!(window.result().map(|r| r.sum), Some(40.0));
//! # Ok::<(), alopex_series::SeriesError>(())
//! ```

#![deny(missing_docs)]

pub mod block;
pub mod codec;
pub mod comparer;
pub mod config;
pub mod error;
pub mod lookup;
pub mod memory;
pub mod series;
pub mod slots;
pub mod subscribe;
pub mod window;

pub use block::{Block, BlockSource, RowPosition};
pub use codec::{GorillaCodec, SeriesCodec};
pub use comparer::{FnComparer, KeyComparer, KeyDistance, OrdComparer};
pub use config::{KeySorting, Mutability, SeriesConfig, SeriesFlags};
pub use error::{fail_fast, FaultKind, Result, SeriesError};
pub use lookup::Lookup;
pub use memory::{Budgeted, MemoryProvider, Unbounded};
pub use series::{Series, SeriesCursor, SeriesItem, SeriesStats};
pub use slots::SlotHandle;
pub use subscribe::{SeriesSubscriber, Subscription};
pub use window::{
    AsF64, OnlineOp, SpanAdjust, SpanCursor, SpanOp, SpanOpCount, SpanOpWidth, SumAvg, SumAvgOp,
};
