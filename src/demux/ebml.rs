//! EBML primitives over byte slices
//!
//! Readers return `Ok(None)` when the slice ends before the value does, so the
//! demuxer can wait for more input instead of failing. Widths:
//! - IDs keep their length marker and are at most 4 bytes
//! - sizes drop the marker and are at most 8 bytes; all data bits set means
//!   "unknown size"

/// Sentinel for an element whose size is not declared.
pub const UNKNOWN_SIZE: u64 = u64::MAX;

/// An element header: ID, payload size and how many bytes the header took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    pub size: u64,
    pub header_len: usize,
}

impl ElementHeader {
    pub fn is_unknown_size(&self) -> bool {
        self.size == UNKNOWN_SIZE
    }
}

/// Number of bytes in a vint, from its first byte.
fn vint_width(first: u8, max: usize) -> Result<usize, String> {
    let width = first.leading_zeros() as usize + 1;
    if first == 0 || width > max {
        return Err(format!("invalid vint lead byte 0x{:02X}", first));
    }
    Ok(width)
}

pub fn read_id(buf: &[u8]) -> Result<Option<(u32, usize)>, String> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let width = vint_width(first, 4)?;
    if buf.len() < width {
        return Ok(None);
    }
    let id = buf[..width]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32);
    Ok(Some((id, width)))
}

pub fn read_size(buf: &[u8]) -> Result<Option<(u64, usize)>, String> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let width = vint_width(first, 8)?;
    if buf.len() < width {
        return Ok(None);
    }
    let mask = 0xFFu8.checked_shr(width as u32).unwrap_or(0);
    let value = buf[1..width]
        .iter()
        .fold((first & mask) as u64, |acc, &b| (acc << 8) | b as u64);

    let all_ones = (1u64 << (7 * width)) - 1;
    if value == all_ones {
        return Ok(Some((UNKNOWN_SIZE, width)));
    }
    Ok(Some((value, width)))
}

pub fn read_header(buf: &[u8]) -> Result<Option<ElementHeader>, String> {
    let Some((id, id_len)) = read_id(buf)? else {
        return Ok(None);
    };
    let Some((size, size_len)) = read_size(&buf[id_len..])? else {
        return Ok(None);
    };
    Ok(Some(ElementHeader {
        id,
        size,
        header_len: id_len + size_len,
    }))
}

/// Big-endian unsigned integer; an empty payload reads as 0.
pub fn read_uint(data: &[u8]) -> Result<u64, String> {
    if data.len() > 8 {
        return Err(format!("uint of {} bytes", data.len()));
    }
    Ok(data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

pub fn read_float(data: &[u8]) -> Result<f64, String> {
    match data.len() {
        0 => Ok(0.0),
        4 => Ok(f32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(data);
            Ok(f64::from_be_bytes(raw))
        }
        n => Err(format!("float of {} bytes", n)),
    }
}

/// ASCII/UTF-8 string with trailing NUL padding removed.
pub fn read_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ids() {
        assert_eq!(read_id(&[0xA3]).unwrap(), Some((0xA3, 1)));
        assert_eq!(read_id(&[0x42, 0x82]).unwrap(), Some((0x4282, 2)));
        assert_eq!(
            read_id(&[0x1A, 0x45, 0xDF, 0xA3]).unwrap(),
            Some((0x1A45DFA3, 4))
        );
        assert_eq!(read_id(&[0x1A, 0x45]).unwrap(), None);
        assert!(read_id(&[0x00]).is_err());
        // 5-byte IDs do not exist
        assert!(read_id(&[0x08, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_read_sizes() {
        assert_eq!(read_size(&[0x81]).unwrap(), Some((1, 1)));
        assert_eq!(read_size(&[0x40, 0x02]).unwrap(), Some((2, 2)));
        assert_eq!(read_size(&[0x10, 0x00, 0x01, 0x00]).unwrap(), Some((256, 4)));
        assert_eq!(read_size(&[0x40]).unwrap(), None);
    }

    #[test]
    fn test_unknown_size_sentinel() {
        assert_eq!(read_size(&[0xFF]).unwrap(), Some((UNKNOWN_SIZE, 1)));
        assert_eq!(
            read_size(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            Some((UNKNOWN_SIZE, 8))
        );
    }

    #[test]
    fn test_read_header() {
        let header = read_header(&[0x1F, 0x43, 0xB6, 0x75, 0x84]).unwrap().unwrap();
        assert_eq!(header.id, 0x1F43B675);
        assert_eq!(header.size, 4);
        assert_eq!(header.header_len, 5);
        assert_eq!(read_header(&[0x1F, 0x43, 0xB6, 0x75]).unwrap(), None);
    }

    #[test]
    fn test_values() {
        assert_eq!(read_uint(&[0x0F, 0x42, 0x40]).unwrap(), 1_000_000);
        assert_eq!(read_uint(&[]).unwrap(), 0);
        assert!(read_uint(&[0; 9]).is_err());
        assert_eq!(read_float(&1234.5f64.to_be_bytes()).unwrap(), 1234.5);
        assert_eq!(read_float(&2.5f32.to_be_bytes()).unwrap(), 2.5);
        assert_eq!(read_string(b"webm\0\0"), "webm");
    }
}
