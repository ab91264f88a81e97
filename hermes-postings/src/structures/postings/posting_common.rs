//! Shared primitives for postings lists
//!
//! - Variable-length integer encoding (varint) for list headers
//! - Golomb parameter derivation
//! - Block and term-frequency constants

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Block size for the PForDelta backend
pub const BLOCK_SIZE: usize = 128;

/// Largest term frequency a posting can carry.
pub const MAX_TF: u16 = i16::MAX as u16;

/// Golomb-Rice optimum for a geometric gap distribution with success
/// probability `df / collection_size`: `ceil(0.69 * N / df)`.
///
/// Always at least 1, including when either count is 0.
pub fn golomb_param(collection_size: u32, df: u32) -> u32 {
    if collection_size == 0 || df == 0 {
        return 1;
    }
    let m = (0.69f64 * collection_size as f64 / df as f64).ceil();
    (m as u32).max(1)
}

/// Write variable-length integer (1-10 bytes)
///
/// Uses continuation bit encoding: 7 bits of data per byte,
/// high bit indicates more bytes follow.
#[inline]
pub fn write_vint<W: Write + ?Sized>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            writer.write_u8(byte)?;
            return Ok(());
        } else {
            writer.write_u8(byte | 0x80)?;
        }
    }
}

/// Read variable-length integer
#[inline]
pub fn read_vint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long",
            ));
        }
    }
}

/// Read a varint that must fit in 32 bits
pub fn read_vint_u32<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let value = read_vint(reader)?;
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("varint {value} overflows u32"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golomb_param() {
        assert_eq!(golomb_param(1000, 9), 77);
        assert_eq!(golomb_param(1000, 7), 99);
        assert_eq!(golomb_param(100, 7), 10);
        assert_eq!(golomb_param(10, 10), 1);
        // dense lists still get a usable parameter
        assert_eq!(golomb_param(5, 1000), 1);
        assert_eq!(golomb_param(0, 10), 1);
        assert_eq!(golomb_param(1000, 0), 1);
        assert_eq!(golomb_param(7, 3), 2);
        assert_eq!(golomb_param(u32::MAX, 1), 2_963_527_434);
    }

    #[test]
    fn test_vint_roundtrip() {
        let values = [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX];
        let mut buf = Vec::new();
        for &v in &values {
            write_vint(&mut buf, v).unwrap();
        }
        let mut reader = &buf[..];
        for &v in &values {
            assert_eq!(read_vint(&mut reader).unwrap(), v);
        }
        assert!(reader.is_empty());
    }

    #[test]
    fn test_vint_u32_overflow() {
        let mut buf = Vec::new();
        write_vint(&mut buf, u32::MAX as u64 + 1).unwrap();
        assert!(read_vint_u32(&mut &buf[..]).is_err());
    }
}
