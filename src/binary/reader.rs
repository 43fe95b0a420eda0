//! Higher-level binary helpers: length-prefixed vectors and UTF-8 names.

use super::{cursor::Cursor, leb128, DecodeError, Result};

/// Read a length-prefixed vector of raw bytes (u32 length via ULEB128).
pub fn read_len_prefixed_bytes(cur: &mut Cursor) -> Result<Vec<u8>> {
    let len = leb128::read_uleb_u32(cur)? as usize;
    Ok(cur.read_bytes(len)?.to_vec())
}

/// Read a UTF-8 name (length-prefixed bytes, must be valid Unicode).
pub fn read_name(cur: &mut Cursor) -> Result<String> {
    let bytes = read_len_prefixed_bytes(cur)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 {
        offset: cur.offset(),
    })
}

/// Read a vector of T using the provided element reader closure.
pub fn read_vec<T, F>(cur: &mut Cursor, mut elem: F) -> Result<Vec<T>>
where
    F: FnMut(&mut Cursor) -> Result<T>,
{
    let len = leb128::read_uleb_u32(cur)? as usize;
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        out.push(elem(cur)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_name_ok() {
        let data = [0x03, b'f', b'o', b'o'];
        let mut c = Cursor::new(&data);
        assert_eq!(read_name(&mut c).unwrap(), "foo");
    }

    #[test]
    fn read_name_rejects_invalid_utf8() {
        let data = [0x02, 0xC3, 0x28];
        let mut c = Cursor::new(&data);
        assert!(matches!(
            read_name(&mut c),
            Err(DecodeError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn read_vec_of_bytes() {
        let data = [0x02, 0xAA, 0xBB];
        let mut c = Cursor::new(&data);
        let v = read_vec(&mut c, |c| c.read_u8()).unwrap();
        assert_eq!(v, vec![0xAA, 0xBB]);
    }
}
