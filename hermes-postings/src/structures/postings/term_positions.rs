//! Per-document token offsets of one term
//!
//! Offsets are 1-based and strictly increasing. Encoding on a bit stream:
//!
//! ```text
//! tf == 1:  gamma(offset)
//! tf  > 1:  gamma(skip_bits) gamma(first) gamma(gap_2) ... gamma(gap_tf)
//! ```
//!
//! `skip_bits` is the length of everything after it, so readers that only
//! need tf can jump over the offsets without decoding them.

use std::cell::Cell;
use std::fmt;

use super::posting_common::MAX_TF;
use crate::error::{Error, Result, invariant};
use crate::structures::bitio::{BitReader, BitWriter, gamma_len};

/// Token offsets of one term in one document
///
/// The backing vector is reused across [`set`](Self::set) and
/// [`decode_into`](Self::decode_into) calls, so its capacity may exceed `tf`.
#[derive(Clone, Default)]
pub struct TermPositions {
    positions: Vec<u32>,
    tf: u16,
    /// Memoized length in bits of the offsets body; reset by every mutation.
    encoded_size: Cell<Option<u32>>,
}

impl TermPositions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a full offsets slice; tf is the slice length.
    pub fn from_positions(positions: &[u32]) -> Result<Self> {
        let tf = u16::try_from(positions.len())
            .ok()
            .filter(|&tf| tf <= MAX_TF)
            .ok_or_else(|| invariant(format!("{} positions exceed max tf", positions.len())))?;
        let mut tp = Self::new();
        tp.set(positions, tf)?;
        Ok(tp)
    }

    /// Replace the contents with the first `tf` offsets of `positions`.
    pub fn set(&mut self, positions: &[u32], tf: u16) -> Result<()> {
        if positions.len() < tf as usize {
            return Err(invariant(format!(
                "tf {} exceeds the {} offsets supplied",
                tf,
                positions.len()
            )));
        }
        self.positions.clear();
        self.positions.extend_from_slice(&positions[..tf as usize]);
        self.tf = tf;
        self.encoded_size.set(None);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.tf = 0;
        self.encoded_size.set(None);
    }

    #[inline]
    pub fn positions(&self) -> &[u32] {
        &self.positions[..self.tf as usize]
    }

    #[inline]
    pub fn tf(&self) -> u16 {
        self.tf
    }

    fn validate(&self) -> Result<()> {
        if self.tf == 0 {
            return Err(invariant("cannot encode an empty position list"));
        }
        let positions = self.positions();
        if positions[0] == 0 {
            return Err(invariant("token offsets are 1-based, got 0"));
        }
        for w in positions.windows(2) {
            if w[1] <= w[0] {
                return Err(invariant(format!(
                    "positions must be strictly increasing: {} followed by {}",
                    w[0], w[1]
                )));
            }
        }
        Ok(())
    }

    /// Bits taken by the offsets themselves (the value of the skip header
    /// when tf > 1). Computed on first use and cached.
    pub fn encoded_size(&self) -> Result<u32> {
        if let Some(size) = self.encoded_size.get() {
            return Ok(size);
        }
        self.validate()?;
        let positions = self.positions();
        let mut bits = gamma_len(positions[0]);
        for w in positions.windows(2) {
            bits += gamma_len(w[1] - w[0]);
        }
        self.encoded_size.set(Some(bits));
        Ok(bits)
    }

    /// Total bits [`encode`](Self::encode) appends, including the skip header.
    pub fn total_encoded_len(&self) -> Result<u64> {
        let body = self.encoded_size()?;
        if self.tf == 1 {
            Ok(body as u64)
        } else {
            Ok(gamma_len(body) as u64 + body as u64)
        }
    }

    pub fn encode(&self, writer: &mut BitWriter) -> Result<()> {
        let body = self.encoded_size()?;
        let positions = self.positions();
        if self.tf > 1 {
            writer.write_gamma(body)?;
        }
        writer.write_gamma(positions[0])?;
        for w in positions.windows(2) {
            writer.write_gamma(w[1] - w[0])?;
        }
        Ok(())
    }

    /// Decode `tf` offsets from `reader` into this (reused) value.
    pub fn decode_into(&mut self, reader: &mut BitReader<'_>, tf: u16) -> Result<()> {
        if tf == 0 {
            return Err(invariant("cannot decode positions for tf 0"));
        }
        self.positions.clear();
        self.positions.reserve(tf as usize);

        let body_len = if tf > 1 {
            Some(reader.read_gamma()?)
        } else {
            None
        };
        let start = reader.bit_position();

        let mut pos = reader.read_gamma()?;
        self.positions.push(pos);
        for _ in 1..tf {
            let gap = reader.read_gamma()?;
            pos = pos.checked_add(gap).ok_or_else(|| {
                Error::Corruption(format!("position overflow after offset {pos}"))
            })?;
            self.positions.push(pos);
        }
        self.tf = tf;

        let consumed = (reader.bit_position() - start) as u32;
        if let Some(expected) = body_len
            && expected != consumed
        {
            return Err(Error::Corruption(format!(
                "position block declared {expected} bits but decoded {consumed}"
            )));
        }
        self.encoded_size.set(Some(consumed));
        Ok(())
    }

    pub fn decode(reader: &mut BitReader<'_>, tf: u16) -> Result<Self> {
        let mut tp = Self::new();
        tp.decode_into(reader, tf)?;
        Ok(tp)
    }

    /// Move `reader` past an encoded position list without decoding it
    /// (a single gamma value when tf == 1).
    pub fn skip(reader: &mut BitReader<'_>, tf: u16) -> Result<()> {
        match tf {
            0 => Err(invariant("cannot skip positions for tf 0")),
            1 => {
                reader.read_gamma()?;
                Ok(())
            }
            _ => {
                let body = reader.read_gamma()?;
                reader.skip_bits(body as u64)?;
                Ok(())
            }
        }
    }
}

impl PartialEq for TermPositions {
    fn eq(&self, other: &Self) -> bool {
        self.positions() == other.positions()
    }
}

impl Eq for TermPositions {}

impl fmt::Debug for TermPositions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermPositions")
            .field("tf", &self.tf)
            .field("positions", &self.positions())
            .finish()
    }
}
