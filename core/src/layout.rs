// Bounds-checked little-endian field access for control-request buffers.

use crate::error::{Result, SectorScanError};
use byteorder::{ByteOrder, LittleEndian};

fn field<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    structure: &'static str,
) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            SectorScanError::decode(
                structure,
                format!(
                    "{}-byte field at offset {} exceeds buffer of {} bytes",
                    len,
                    offset,
                    buf.len()
                ),
            )
        })
}

pub(crate) fn read_u32(buf: &[u8], offset: usize, structure: &'static str) -> Result<u32> {
    Ok(LittleEndian::read_u32(field(buf, offset, 4, structure)?))
}

pub(crate) fn read_u64(buf: &[u8], offset: usize, structure: &'static str) -> Result<u64> {
    Ok(LittleEndian::read_u64(field(buf, offset, 8, structure)?))
}

/// Reads a NUL-terminated UTF-16LE string that must end before `limit`.
/// A string running into `limit` without a terminator is accepted as-is.
pub(crate) fn read_wide_string(
    buf: &[u8],
    offset: usize,
    limit: usize,
    structure: &'static str,
) -> Result<String> {
    let limit = limit.min(buf.len());
    if offset > limit {
        return Err(SectorScanError::decode(
            structure,
            format!("string offset {} beyond record end {}", offset, limit),
        ));
    }

    let units: Vec<u16> = buf[offset..limit]
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|&unit| unit != 0)
        .collect();

    Ok(String::from_utf16_lossy(&units))
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    LittleEndian::write_u64(&mut buf[offset..offset + 8], value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_fields() {
        let buf = [0x01, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x02, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(read_u32(&buf, 0, "test").unwrap(), 1);
        assert_eq!(read_u32(&buf, 4, "test").unwrap(), u32::MAX);
        assert_eq!(read_u64(&buf, 8, "test").unwrap(), 2);
    }

    #[test]
    fn test_read_past_end_is_rejected() {
        let buf = [0u8; 6];
        assert!(matches!(
            read_u32(&buf, 4, "test"),
            Err(SectorScanError::Decode { .. })
        ));
        assert!(read_u64(&buf, usize::MAX - 2, "test").is_err());
    }

    #[test]
    fn test_wide_string() {
        let mut buf = Vec::new();
        for unit in "\\$MFT".encode_utf16() {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        buf.extend_from_slice(&[0, 0, b'x', 0]);
        assert_eq!(read_wide_string(&buf, 0, buf.len(), "test").unwrap(), "\\$MFT");

        // Unterminated string stops at the limit
        assert_eq!(read_wide_string(&buf, 0, 4, "test").unwrap(), "\\$");
    }
}
