//! Injected row serialization.
//!
//! A series does not own a wire format. Callers hand a [`SeriesCodec`] to
//! [`Series::encode_with`](crate::Series::encode_with) and
//! [`Series::decode_with`](crate::Series::decode_with).

pub mod gorilla;

pub use gorilla::GorillaCodec;

use crate::error::Result;

/// Converts series rows to bytes and back.
pub trait SeriesCodec<K, V> {
    /// Encodes rows in series order.
    fn encode(&self, rows: &[(K, V)]) -> Result<Vec<u8>>;

    /// Decodes rows produced by [`encode`](Self::encode).
    fn decode(&self, bytes: &[u8]) -> Result<Vec<(K, V)>>;
}
