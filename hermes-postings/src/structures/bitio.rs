//! Bit-level reader/writer for Gamma, Golomb-Rice, unary and fixed-width codes
//!
//! Bits are packed least significant first within each byte. The writer keeps
//! at most 7 pending bits in its accumulator between calls; `pad_and_flush`
//! rounds the stream up to a byte boundary.
//!
//! Code shapes (all for n >= 1):
//! - unary(n): `n - 1` one bits followed by a zero bit
//! - gamma(n): unary(floor(log2 n) + 1), then the low floor(log2 n) bits of n
//! - golomb(n, m): unary(q + 1), then r in ceil(log2 m) bits,
//!   where q = (n - 1) / m and r = (n - 1) % m

use std::io;

use crate::error::{Result, invariant};

/// Largest unary value the reader accepts before declaring the stream corrupt.
const MAX_UNARY: u32 = 1 << 31;

/// Number of bits in `n`'s binary representation (0 for 0).
#[inline]
pub fn bits_needed(n: u32) -> u8 {
    (32 - n.leading_zeros()) as u8
}

/// ceil(log2 m) for m >= 1
#[inline]
pub fn ceil_log2(m: u32) -> u8 {
    if m <= 1 { 0 } else { bits_needed(m - 1) }
}

/// Encoded length of gamma(n) in bits.
#[inline]
pub fn gamma_len(n: u32) -> u32 {
    debug_assert!(n >= 1);
    2 * (bits_needed(n) as u32) - 1
}

/// Growable bit sink backed by a `Vec<u8>`
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    output: Vec<u8>,
    buffer: u64,
    bits_in_buffer: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            output: Vec::with_capacity(bytes),
            buffer: 0,
            bits_in_buffer: 0,
        }
    }

    #[inline]
    fn push_bits(&mut self, value: u32, num_bits: u8) {
        debug_assert!(num_bits <= 32);
        if num_bits == 0 {
            return;
        }
        let masked = (value as u64) & ((1u64 << num_bits) - 1);
        self.buffer |= masked << self.bits_in_buffer;
        self.bits_in_buffer += num_bits;

        while self.bits_in_buffer >= 8 {
            self.output.push(self.buffer as u8);
            self.buffer >>= 8;
            self.bits_in_buffer -= 8;
        }
    }

    /// Write `value` using exactly `num_bits` bits (at most 32).
    pub fn write_binary(&mut self, num_bits: u8, value: u32) -> Result<()> {
        if num_bits > 32 {
            return Err(invariant(format!("binary code width {num_bits} exceeds 32 bits")));
        }
        if num_bits < 32 && (value >> num_bits) != 0 {
            return Err(invariant(format!(
                "value {value} does not fit in {num_bits} bits"
            )));
        }
        self.push_bits(value, num_bits);
        Ok(())
    }

    pub fn write_unary(&mut self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(invariant("unary code of 0"));
        }
        let mut ones = n - 1;
        while ones >= 32 {
            self.push_bits(u32::MAX, 32);
            ones -= 32;
        }
        // `ones` one bits and the terminating zero in a single push
        let ones = ones as u8;
        self.push_bits(((1u64 << ones) - 1) as u32, ones + 1);
        Ok(())
    }

    pub fn write_gamma(&mut self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(invariant("gamma code of 0"));
        }
        let nbits = bits_needed(n);
        self.write_unary(nbits as u32)?;
        self.push_bits(n, nbits - 1);
        Ok(())
    }

    pub fn write_golomb(&mut self, n: u32, m: u32) -> Result<()> {
        if n == 0 {
            return Err(invariant("golomb code of 0"));
        }
        if m == 0 {
            return Err(invariant("golomb parameter must be >= 1"));
        }
        let q = (n - 1) / m;
        let r = (n - 1) % m;
        self.write_unary(q + 1)?;
        self.push_bits(r, ceil_log2(m));
        Ok(())
    }

    /// Total bits written so far, including pending bits.
    #[inline]
    pub fn bit_position(&self) -> u64 {
        self.output.len() as u64 * 8 + self.bits_in_buffer as u64
    }

    /// Complete bytes written so far.
    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.output.len()
    }

    /// Pending bits in the partially filled trailing byte.
    #[inline]
    pub fn bit_offset(&self) -> u8 {
        self.bits_in_buffer
    }

    /// Round up to the next byte boundary, zero-filling the pad bits.
    pub fn pad_and_flush(&mut self) {
        if self.bits_in_buffer > 0 {
            self.output.push(self.buffer as u8);
            self.buffer = 0;
            self.bits_in_buffer = 0;
        }
    }

    /// Bytes flushed so far. Pending bits are only visible after
    /// [`pad_and_flush`](Self::pad_and_flush).
    pub fn bytes(&self) -> &[u8] {
        &self.output
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.pad_and_flush();
        self.output
    }

    pub fn clear(&mut self) {
        self.output.clear();
        self.buffer = 0;
        self.bits_in_buffer = 0;
    }
}

/// Forward-only bit cursor over a borrowed byte slice
///
/// Copying a reader snapshots its position, which is how lookahead is done.
#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    fn eof() -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, "Not enough bits")
    }

    #[inline]
    pub fn bit_position(&self) -> u64 {
        self.byte_pos as u64 * 8 + self.bit_pos as u64
    }

    #[inline]
    pub fn remaining_bits(&self) -> u64 {
        self.data.len() as u64 * 8 - self.bit_position()
    }

    /// Read a fixed-width value of `num_bits` bits (at most 32).
    pub fn read_binary(&mut self, num_bits: u8) -> io::Result<u32> {
        debug_assert!(num_bits <= 32);
        if num_bits == 0 {
            return Ok(0);
        }

        let mut result: u64 = 0;
        let mut bits_read: u8 = 0;

        while bits_read < num_bits {
            if self.byte_pos >= self.data.len() {
                return Err(Self::eof());
            }

            let bits_available = 8 - self.bit_pos;
            let bits_to_read = (num_bits - bits_read).min(bits_available);
            let mask = if bits_to_read >= 8 {
                0xFF
            } else {
                (1u8 << bits_to_read) - 1
            };
            let bits = (self.data[self.byte_pos] >> self.bit_pos) & mask;

            result |= (bits as u64) << bits_read;
            bits_read += bits_to_read;
            self.bit_pos += bits_to_read;

            if self.bit_pos >= 8 {
                self.byte_pos += 1;
                self.bit_pos = 0;
            }
        }

        Ok(result as u32)
    }

    pub fn read_unary(&mut self) -> io::Result<u32> {
        let mut ones = 0u32;
        loop {
            if self.byte_pos >= self.data.len() {
                return Err(Self::eof());
            }
            let byte = self.data[self.byte_pos] >> self.bit_pos;
            let available = 8 - self.bit_pos;
            // trailing ones of the unread part of this byte
            let run = (!byte).trailing_zeros().min(available as u32) as u8;
            ones += run as u32;
            if ones > MAX_UNARY {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unary run too long",
                ));
            }
            if run < available {
                // consume the run and its terminating zero
                self.bit_pos += run + 1;
                if self.bit_pos >= 8 {
                    self.byte_pos += 1;
                    self.bit_pos = 0;
                }
                return Ok(ones + 1);
            }
            self.byte_pos += 1;
            self.bit_pos = 0;
        }
    }

    pub fn read_gamma(&mut self) -> io::Result<u32> {
        let nbits = self.read_unary()?;
        if nbits > 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("gamma code length {nbits} exceeds 32 bits"),
            ));
        }
        let low = self.read_binary((nbits - 1) as u8)?;
        Ok((1u32 << (nbits - 1)) | low)
    }

    pub fn read_golomb(&mut self, m: u32) -> io::Result<u32> {
        debug_assert!(m >= 1);
        let q = self.read_unary()? - 1;
        let r = self.read_binary(ceil_log2(m))?;
        q.checked_mul(m)
            .and_then(|v| v.checked_add(r))
            .and_then(|v| v.checked_add(1))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "golomb value overflow"))
    }

    /// Advance the cursor by `num_bits` without decoding.
    pub fn skip_bits(&mut self, num_bits: u64) -> io::Result<()> {
        if num_bits > self.remaining_bits() {
            return Err(Self::eof());
        }
        let target = self.bit_position() + num_bits;
        self.byte_pos = (target / 8) as usize;
        self.bit_pos = (target % 8) as u8;
        Ok(())
    }
}
