//! Bytes after the last export payload.
//!
//! The payload region ends with a copy of the package tag. Anything between
//! the last export and that footer is kept as-is; some tools store a short
//! enciphered note there.

use rootcause::Report;
use tracing::debug;

use crate::data::parser_utils::PACKAGE_TAG;
use crate::error::{AssetError, AssetResult, truncated};

const NOTE_KEY: &[u8; 32] = b"F-JaNcRfUjXn2r5u8x/A?D(G+KbPeSgV";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadTail {
    /// Uninterpreted bytes between the last export and the footer.
    pub data: Vec<u8>,
}

impl PayloadTail {
    /// Split `region[start..]` into tail bytes and the 4-byte footer.
    pub fn parse(region: &[u8], start: usize) -> AssetResult<Self> {
        let have = region.len().saturating_sub(start);
        if have < 4 {
            return Err(truncated(start, 4, have));
        }
        let footer_at = region.len() - 4;
        let mut footer = [0u8; 4];
        footer.copy_from_slice(&region[footer_at..]);
        let found = u32::from_le_bytes(footer);
        if found != PACKAGE_TAG {
            return Err(Report::new(AssetError::InvalidMagic {
                expected: PACKAGE_TAG,
                found,
            })
            .attach(format!("payload footer at 0x{footer_at:X}")));
        }
        let data = region[start..footer_at].to_vec();
        if !data.is_empty() {
            debug!(len = data.len(), "payload region carries tail bytes");
        }
        Ok(Self { data })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&PACKAGE_TAG.to_le_bytes());
    }

    /// Serialized length including the footer.
    pub fn len(&self) -> usize {
        self.data.len() + 4
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The embedded note, if the tail deciphers to valid UTF-8.
    pub fn note(&self) -> Option<String> {
        decipher_note(&self.data)
    }

    /// Replace the tail with `text` enciphered. An empty string clears it.
    pub fn set_note(&mut self, text: &str) {
        self.data = encipher_note(text);
    }
}

/// Chained XOR: each output byte mixes the input, the previous output and
/// the repeating key.
pub fn encipher_note(text: &str) -> Vec<u8> {
    let mut prev = 0u8;
    text.bytes()
        .zip(NOTE_KEY.iter().cycle())
        .map(|(b, k)| {
            prev ^= b ^ k;
            prev
        })
        .collect()
}

pub fn decipher_note(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return Some(String::new());
    }
    let mut prev = 0u8;
    let plain: Vec<u8> = data
        .iter()
        .zip(NOTE_KEY.iter().cycle())
        .map(|(&e, k)| {
            let p = e ^ prev ^ k;
            prev = e;
            p
        })
        .collect();
    String::from_utf8(plain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_cipher_known_bytes() {
        // 'A' ^ 'F' = 0x07, then 'B' ^ 0x07 ^ '-' = 0x68
        assert_eq!(encipher_note("AB"), vec![0x07, 0x68]);
        assert_eq!(decipher_note(&[0x07, 0x68]).as_deref(), Some("AB"));
    }

    #[test]
    fn test_note_longer_than_key() {
        let text = "a note that is comfortably longer than the thirty-two byte key";
        assert_eq!(decipher_note(&encipher_note(text)).as_deref(), Some(text));
    }

    #[test]
    fn test_tail_parse_and_footer() {
        let mut region = vec![0xAAu8; 8];
        region.extend_from_slice(&encipher_note("hi"));
        region.extend_from_slice(&PACKAGE_TAG.to_le_bytes());
        let tail = PayloadTail::parse(&region, 8).unwrap();
        assert_eq!(tail.note().as_deref(), Some("hi"));
        let mut out = region[..8].to_vec();
        tail.write(&mut out);
        assert_eq!(out, region);
    }

    #[test]
    fn test_bad_footer() {
        let region = [0u8; 6];
        let err = PayloadTail::parse(&region, 0).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::InvalidMagic { .. }));
        let err = PayloadTail::parse(&region, 4).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::TruncatedInput { .. }));
    }
}
