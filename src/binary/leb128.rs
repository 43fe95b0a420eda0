//! ULEB128/SLEB128 decoding for the Wasm integer widths.
//!
//! The byte count per integer is capped at `ceil(bits / 7)`; exceeding the cap
//! or carrying significant bits past the target width is an error.

use super::{cursor::Cursor, DecodeError, Result};

/// Decode an unsigned LEB128 as u32 (max 5 bytes).
pub fn read_uleb_u32(cur: &mut Cursor) -> Result<u32> {
    read_uleb(cur, 32).map(|v| v as u32)
}

/// Decode an unsigned LEB128 as u64 (max 10 bytes).
pub fn read_uleb_u64(cur: &mut Cursor) -> Result<u64> {
    read_uleb(cur, 64)
}

/// Decode a signed LEB128 as i32 (max 5 bytes).
pub fn read_sleb_i32(cur: &mut Cursor) -> Result<i32> {
    read_sleb(cur, 32).map(|v| v as i32)
}

/// Decode a signed LEB128 as i64 (max 10 bytes).
pub fn read_sleb_i64(cur: &mut Cursor) -> Result<i64> {
    read_sleb(cur, 64)
}

fn max_bytes(bits: u8) -> u8 {
    (bits + 6) / 7
}

fn read_uleb(cur: &mut Cursor, bits: u8) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let limit = max_bytes(bits);

    for _ in 0..limit {
        let byte = cur.read_u8()?;
        let low = (byte & 0x7F) as u64;
        if shift >= 64 || (low << shift) >> shift != low {
            return Err(DecodeError::LebOverflow {
                target_bits: bits,
                offset: cur.offset(),
            });
        }
        result |= low << shift;

        if byte & 0x80 == 0 {
            if bits < 64 && (result >> bits) != 0 {
                return Err(DecodeError::LebOverflow {
                    target_bits: bits,
                    offset: cur.offset(),
                });
            }
            return Ok(result);
        }
        shift += 7;
    }

    Err(DecodeError::LebTooManyBytes {
        limit,
        offset: cur.offset(),
    })
}

fn read_sleb(cur: &mut Cursor, bits: u8) -> Result<i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let limit = max_bytes(bits);

    for _ in 0..limit {
        let byte = cur.read_u8()?;
        let low = (byte & 0x7F) as i64;
        if shift < 64 {
            result |= low << shift;
        }
        shift += 7;

        if byte & 0x80 == 0 {
            // Sign extend when the sign bit of the final byte is set and the
            // encoding stopped short of the full width.
            if byte & 0x40 != 0 && shift < 64 {
                result |= !0i64 << shift;
            }
            if bits < 64 {
                let min = -(1i64 << (bits - 1));
                let max = (1i64 << (bits - 1)) - 1;
                if result < min || result > max {
                    return Err(DecodeError::LebOverflow {
                        target_bits: bits,
                        offset: cur.offset(),
                    });
                }
            }
            return Ok(result);
        }
    }

    Err(DecodeError::LebTooManyBytes {
        limit,
        offset: cur.offset(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::cursor::Cursor;

    #[test]
    fn uleb32_basic() {
        let mut c = Cursor::new(&[0xE5, 0x8E, 0x26]); // 624485
        assert_eq!(read_uleb_u32(&mut c).unwrap(), 624485);
    }

    #[test]
    fn sleb32_basic() {
        let mut c = Cursor::new(&[0x9B, 0xF1, 0x59]); // -624485
        assert_eq!(read_sleb_i32(&mut c).unwrap(), -624485);
    }

    #[test]
    fn sleb64_min() {
        // i64::MIN = 10-byte encoding ending in 0x7F
        let mut c = Cursor::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7F]);
        assert_eq!(read_sleb_i64(&mut c).unwrap(), i64::MIN);
    }

    #[test]
    fn uleb32_overflow() {
        let bytes = [0xFFu8; 6];
        let mut c = Cursor::new(&bytes);
        let err = read_uleb_u32(&mut c).unwrap_err();
        match err {
            DecodeError::LebTooManyBytes { .. } | DecodeError::LebOverflow { .. } => {}
            e => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn uleb32_unused_bits_rejected() {
        // 5th byte carries bits 28..34; anything above bit 31 must be zero.
        let mut c = Cursor::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
        assert!(read_uleb_u32(&mut c).is_err());
        let mut c = Cursor::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(read_uleb_u32(&mut c).unwrap(), u32::MAX);
    }
}
