//! Gorilla compression for `(i64, f64)` series.
//!
//! Keys are encoded as delta-of-delta, values as XOR against the previous
//! value:
//!
//! | key delta-of-delta | bits                 |
//! |--------------------|----------------------|
//! | `0`                | `'0'`                |
//! | `[-63, 64]`        | `'10'` + 7           |
//! | `[-255, 256]`      | `'110'` + 9          |
//! | `[-2047, 2048]`    | `'1110'` + 12        |
//! | otherwise          | `'1111'` + 64        |
//!
//! | value XOR          | bits                                          |
//! |--------------------|-----------------------------------------------|
//! | `0`                | `'0'`                                         |
//! | inside last window | `'10'` + meaningful bits                      |
//! | new window         | `'11'` + 5 leading + 6 length + meaningful    |
//!
//! The first key and value are written as 64 raw bits. Key arithmetic wraps,
//! so any `i64` sequence survives the trip.
//!
//! # Frame Layout
//!
//! All integers are little-endian.
//!
//! ```text
//! Offset  Size  Field
//! 0x00    4     magic ("ASER")
//! 0x04    2     format version
//! 0x06    4     row count
//! 0x0A    4     key stream length in bits
//! 0x0E    4     value stream length in bits
//! 0x12    N     key stream (ceil(key_bits / 8) bytes)
//! ...     M     value stream (ceil(value_bits / 8) bytes)
//! ...     4     CRC32 over every preceding byte
//! ```

use super::SeriesCodec;
use crate::error::{Result, SeriesError};
use bitvec::prelude::*;

/// Frame magic.
pub const MAGIC: [u8; 4] = *b"ASER";

/// Current frame format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_SIZE: usize = 18;
const FOOTER_SIZE: usize = 4;

/// Codec for float series keyed by `i64` timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct GorillaCodec;

impl GorillaCodec {
    /// Creates the codec.
    pub fn new() -> Self {
        Self
    }
}

impl SeriesCodec<i64, f64> for GorillaCodec {
    fn encode(&self, rows: &[(i64, f64)]) -> Result<Vec<u8>> {
        let count = u32::try_from(rows.len())
            .map_err(|_| SeriesError::Codec(format!("too many rows: {}", rows.len())))?;

        let mut keys = BitWriter::new();
        let mut values = BitWriter::new();
        let mut key_encoder = KeyEncoder::default();
        let mut value_encoder = ValueEncoder::default();
        for &(key, value) in rows {
            key_encoder.encode(key, &mut keys);
            value_encoder.encode(value, &mut values);
        }

        let key_bits = keys.bit_len()?;
        let value_bits = values.bit_len()?;
        let key_bytes = keys.into_bytes();
        let value_bytes = values.into_bytes();

        let mut buf =
            Vec::with_capacity(HEADER_SIZE + key_bytes.len() + value_bytes.len() + FOOTER_SIZE);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&key_bits.to_le_bytes());
        buf.extend_from_slice(&value_bits.to_le_bytes());
        buf.extend_from_slice(&key_bytes);
        buf.extend_from_slice(&value_bytes);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<(i64, f64)>> {
        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(SeriesError::Codec(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }

        let (body, footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
        let expected = read_u32(footer, 0)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        let actual = hasher.finalize();
        if expected != actual {
            return Err(SeriesError::ChecksumMismatch { expected, actual });
        }

        if body[0..4] != MAGIC {
            return Err(SeriesError::Codec("bad frame magic".to_string()));
        }
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version != FORMAT_VERSION {
            return Err(SeriesError::Codec(format!(
                "unsupported frame version {version}"
            )));
        }
        let count = read_u32(body, 0x06)? as usize;
        let key_bits = read_u32(body, 0x0A)? as usize;
        let value_bits = read_u32(body, 0x0E)? as usize;

        let key_len = key_bits.div_ceil(8);
        let value_len = value_bits.div_ceil(8);
        if HEADER_SIZE + key_len + value_len != body.len() {
            return Err(SeriesError::Codec(format!(
                "stream lengths {key_len}+{value_len} do not match frame body of {} bytes",
                body.len() - HEADER_SIZE
            )));
        }
        let key_stream = &body[HEADER_SIZE..HEADER_SIZE + key_len];
        let value_stream = &body[HEADER_SIZE + key_len..];

        let mut keys = BitReader::new(&key_stream.view_bits::<Msb0>()[..key_bits]);
        let mut values = BitReader::new(&value_stream.view_bits::<Msb0>()[..value_bits]);
        let mut key_decoder = KeyDecoder::default();
        let mut value_decoder = ValueDecoder::default();

        let mut rows = Vec::with_capacity(count.min(key_bits));
        for _ in 0..count {
            let key = key_decoder.decode(&mut keys)?;
            let value = value_decoder.decode(&mut values)?;
            rows.push((key, value));
        }
        if !keys.is_exhausted() || !values.is_exhausted() {
            return Err(SeriesError::Codec(
                "trailing bits after the last row".to_string(),
            ));
        }
        Ok(rows)
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    buf.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| SeriesError::Codec(format!("truncated field at offset {offset:#x}")))
}

struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bits: BitVec::new(),
        }
    }

    fn write_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Writes the low `width` bits of `value`, most significant first.
    fn write_bits(&mut self, value: u64, width: u32) {
        for i in (0..width).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    fn bit_len(&self) -> Result<u32> {
        u32::try_from(self.bits.len())
            .map_err(|_| SeriesError::Codec(format!("stream of {} bits", self.bits.len())))
    }

    fn into_bytes(mut self) -> Vec<u8> {
        // Pad explicitly so the trailing byte carries no stale bits.
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
        self.bits.into_vec()
    }
}

struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bits: &'a BitSlice<u8, Msb0>) -> Self {
        Self { bits, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<bool> {
        let bit = self
            .bits
            .get(self.pos)
            .map(|b| *b)
            .ok_or_else(|| SeriesError::Codec(format!("stream truncated at bit {}", self.pos)))?;
        self.pos += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, width: u32) -> Result<u64> {
        let end = self.pos + width as usize;
        if end > self.bits.len() {
            return Err(SeriesError::Codec(format!(
                "stream truncated: need {width} bits at bit {}",
                self.pos
            )));
        }
        let value = self.bits[self.pos..end]
            .iter()
            .fold(0u64, |acc, bit| (acc << 1) | u64::from(*bit));
        self.pos = end;
        Ok(value)
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bits.len()
    }
}

/// Delta-of-delta buckets: (prefix, prefix width, payload width, bias).
const KEY_BUCKETS: [(u64, u32, u32, i64); 3] = [
    (0b10, 2, 7, 63),
    (0b110, 3, 9, 255),
    (0b1110, 4, 12, 2047),
];

#[derive(Default)]
struct KeyEncoder {
    prev: Option<(i64, i64)>,
}

impl KeyEncoder {
    fn encode(&mut self, key: i64, out: &mut BitWriter) {
        let Some((prev_key, prev_delta)) = self.prev else {
            out.write_bits(key as u64, 64);
            self.prev = Some((key, 0));
            return;
        };

        let delta = key.wrapping_sub(prev_key);
        let dod = delta.wrapping_sub(prev_delta);
        self.prev = Some((key, delta));

        if dod == 0 {
            out.write_bit(false);
            return;
        }
        for (prefix, prefix_width, width, bias) in KEY_BUCKETS {
            if (-bias..=bias + 1).contains(&dod) {
                out.write_bits(prefix, prefix_width);
                out.write_bits((dod + bias) as u64, width);
                return;
            }
        }
        out.write_bits(0b1111, 4);
        out.write_bits(dod as u64, 64);
    }
}

#[derive(Default)]
struct KeyDecoder {
    prev: Option<(i64, i64)>,
}

impl KeyDecoder {
    fn decode(&mut self, input: &mut BitReader<'_>) -> Result<i64> {
        let Some((prev_key, prev_delta)) = self.prev else {
            let key = input.read_bits(64)? as i64;
            self.prev = Some((key, 0));
            return Ok(key);
        };

        let mut ones = 0;
        while ones < 4 && input.read_bit()? {
            ones += 1;
        }
        let dod = match ones {
            0 => 0,
            4 => input.read_bits(64)? as i64,
            n => {
                let (_, _, width, bias) = KEY_BUCKETS[n - 1];
                input.read_bits(width)? as i64 - bias
            }
        };

        let delta = prev_delta.wrapping_add(dod);
        let key = prev_key.wrapping_add(delta);
        self.prev = Some((key, delta));
        Ok(key)
    }
}

#[derive(Default)]
struct ValueEncoder {
    prev: Option<u64>,
    window: Option<(u32, u32)>,
}

impl ValueEncoder {
    fn encode(&mut self, value: f64, out: &mut BitWriter) {
        let bits = value.to_bits();
        let Some(prev) = self.prev.replace(bits) else {
            out.write_bits(bits, 64);
            return;
        };

        let xor = bits ^ prev;
        if xor == 0 {
            out.write_bit(false);
            return;
        }
        out.write_bit(true);

        // Leading zeros fit a 5-bit field; the window absorbs the excess.
        let leading = xor.leading_zeros().min(31);
        let trailing = xor.trailing_zeros();

        if let Some((prev_leading, prev_trailing)) = self.window {
            if leading >= prev_leading && trailing >= prev_trailing {
                let meaningful = 64 - prev_leading - prev_trailing;
                out.write_bit(false);
                out.write_bits(xor >> prev_trailing, meaningful);
                return;
            }
        }

        let meaningful = 64 - leading - trailing;
        out.write_bit(true);
        out.write_bits(u64::from(leading), 5);
        // 64 meaningful bits are stored as 0.
        out.write_bits(u64::from(meaningful & 0x3F), 6);
        out.write_bits(xor >> trailing, meaningful);
        self.window = Some((leading, trailing));
    }
}

#[derive(Default)]
struct ValueDecoder {
    prev: Option<u64>,
    window: Option<(u32, u32)>,
}

impl ValueDecoder {
    fn decode(&mut self, input: &mut BitReader<'_>) -> Result<f64> {
        let Some(prev) = self.prev else {
            let bits = input.read_bits(64)?;
            self.prev = Some(bits);
            return Ok(f64::from_bits(bits));
        };

        if !input.read_bit()? {
            return Ok(f64::from_bits(prev));
        }

        let (leading, trailing) = if input.read_bit()? {
            let leading = input.read_bits(5)? as u32;
            let meaningful = match input.read_bits(6)? as u32 {
                0 => 64,
                n => n,
            };
            if leading + meaningful > 64 {
                return Err(SeriesError::Codec(format!(
                    "value window {leading}+{meaningful} exceeds 64 bits"
                )));
            }
            let window = (leading, 64 - leading - meaningful);
            self.window = Some(window);
            window
        } else {
            self.window.ok_or_else(|| {
                SeriesError::Codec("value reuses a window before one was set".to_string())
            })?
        };

        let meaningful = 64 - leading - trailing;
        let xor = input.read_bits(meaningful)? << trailing;
        let bits = prev ^ xor;
        self.prev = Some(bits);
        Ok(f64::from_bits(bits))
    }
}
