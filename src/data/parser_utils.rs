//! Shared winnow-based parsing utilities used by the byte cursor and the table parsers.

use winnow::Parser;
use winnow::binary::le_i32;
use winnow::error::ContextError;
use winnow::token::take;

/// Common result type for winnow parsers.
pub type WResult<T> = Result<T, winnow::error::ErrMode<ContextError>>;

/// Package tag found at the start of every `.uasset` and at the end of every `.uexp`.
pub const PACKAGE_TAG: u32 = 0x9E2A83C1;

/// Parse a 16-byte GUID.
pub fn parse_guid(input: &mut &[u8]) -> WResult<[u8; 16]> {
    let bytes = take(16usize).parse_next(input)?;
    let mut guid = [0u8; 16];
    guid.copy_from_slice(bytes);
    Ok(guid)
}

/// Parse a raw FName pair: (name table index, instance number).
pub fn parse_name_pair(input: &mut &[u8]) -> WResult<(i32, i32)> {
    let index = le_i32.parse_next(input)?;
    let number = le_i32.parse_next(input)?;
    Ok((index, number))
}

/// Number of payload bytes an FString with the given length prefix occupies.
///
/// Positive lengths count 1-byte characters, negative lengths count UTF-16
/// code units. Both include the NUL terminator.
pub fn fstring_payload_len(len: i32) -> usize {
    if len >= 0 {
        len as usize
    } else {
        len.unsigned_abs() as usize * 2
    }
}

/// Decode the payload of a narrow FString (terminator already removed).
///
/// Narrow strings are Latin-1, so every byte maps to exactly one `char`.
pub fn decode_narrow(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Decode the payload of a wide FString (terminator already removed).
pub fn decode_wide(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Whether a string can be stored narrow without loss.
pub fn fits_narrow(s: &str) -> bool {
    s.chars().all(|c| (c as u32) <= 0xFF)
}
