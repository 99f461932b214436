//! Name table and `FName` tokens.
//!
//! Each package carries its own table; an `FName` is an index into it plus an
//! instance number. Two names compare equal when their resolved text and
//! instance number match, regardless of which table slot they came from.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::trace;

use crate::Rc;
use crate::data::{ByteReader, ByteWriter, FString};
use crate::error::{AssetResult, TableKind, dangling};

/// The sentinel name that terminates property lists.
pub const NONE: &str = "None";

/// Interned name token.
#[derive(Debug, Clone)]
pub struct FName {
    index: i32,
    number: i32,
    text: Rc<str>,
}

impl FName {
    /// Name table slot this token was read from or interned into.
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Serialized instance number; `0` means no suffix, `n` displays as `_{n-1}`.
    pub fn number(&self) -> i32 {
        self.number
    }

    /// Resolved text without the instance suffix.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_none(&self) -> bool {
        self.number == 0 && &*self.text == NONE
    }

    /// Same text, different instance number.
    pub fn with_number(&self, number: i32) -> Self {
        Self {
            number,
            ..self.clone()
        }
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_name_pair(self.index, self.number);
    }
}

impl PartialEq for FName {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.text == other.text
    }
}

impl Eq for FName {}

impl Hash for FName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
        self.number.hash(state);
    }
}

impl PartialEq<str> for FName {
    fn eq(&self, other: &str) -> bool {
        self.number == 0 && &*self.text == other
    }
}

impl PartialEq<&str> for FName {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl fmt::Display for FName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.number > 0 {
            write!(f, "{}_{}", self.text, self.number - 1)
        } else {
            f.write_str(&self.text)
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One name table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub text: FString,
    /// Non-case-preserving hash (u16) followed by case-preserving hash (u16),
    /// kept as stored so existing rows round-trip unchanged.
    pub hash: [u8; 4],
}

impl NameEntry {
    /// New entry with freshly computed hashes.
    pub fn new(text: &str) -> Self {
        Self {
            text: FString::new(text),
            hash: name_hash(text),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NameTable {
    entries: Vec<NameEntry>,
    texts: Vec<Rc<str>>,
    lookup: HashMap<String, usize>,
}

impl NameTable {
    pub fn parse(reader: &mut ByteReader<'_>, count: usize) -> AssetResult<Self> {
        let mut table = Self::default();
        for _ in 0..count {
            let text = reader.read_fstring()?;
            let hash = reader.read_array::<4>()?;
            table.push(NameEntry { text, hash });
        }
        trace!(count, "parsed name table");
        Ok(table)
    }

    pub fn write(&self, w: &mut ByteWriter) {
        for entry in &self.entries {
            w.write_fstring(&entry.text);
            w.write_bytes(&entry.hash);
        }
    }

    fn push(&mut self, entry: NameEntry) -> usize {
        let index = self.entries.len();
        self.lookup
            .entry(entry.text.value.clone())
            .or_insert(index);
        self.texts.push(Rc::from(entry.text.value.as_str()));
        self.entries.push(entry);
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[NameEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&NameEntry> {
        self.entries.get(index)
    }

    /// Text at `index`, or `DanglingReference`.
    pub fn text(&self, index: i32) -> AssetResult<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.texts.get(i))
            .map(|t| &**t)
            .ok_or_else(|| dangling(TableKind::Name, index as i64, self.len()))
    }

    /// First slot holding exactly `text`.
    pub fn find(&self, text: &str) -> Option<usize> {
        self.lookup.get(text).copied()
    }

    pub fn resolve(&self, index: i32, number: i32) -> AssetResult<FName> {
        let text = usize::try_from(index)
            .ok()
            .and_then(|i| self.texts.get(i))
            .ok_or_else(|| dangling(TableKind::Name, index as i64, self.len()))?;
        Ok(FName {
            index,
            number,
            text: text.clone(),
        })
    }

    /// Read an (index, number) pair and resolve it.
    pub fn read_fname(&self, reader: &mut ByteReader<'_>) -> AssetResult<FName> {
        let (index, number) = reader.read_name_pair()?;
        self.resolve(index, number)
    }

    /// Existing token for `text`, if the table has it.
    pub fn fname(&self, text: &str) -> Option<FName> {
        let index = self.find(text)?;
        Some(FName {
            index: index as i32,
            number: 0,
            text: self.texts[index].clone(),
        })
    }

    /// Token for `text`, appending a new row with computed hashes if needed.
    pub fn intern(&mut self, text: &str) -> FName {
        if let Some(name) = self.fname(text) {
            return name;
        }
        let index = self.push(NameEntry::new(text));
        trace!(index, text, "interned new name");
        FName {
            index: index as i32,
            number: 0,
            text: self.texts[index].clone(),
        }
    }

    /// Re-resolve a token that may come from another table into this one.
    pub fn rebind(&mut self, name: &FName) -> FName {
        self.intern(name.text()).with_number(name.number())
    }
}

const fn deprecated_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static DEPRECATED_CRC_TABLE: [u32; 256] = deprecated_crc_table();
static CRC32_TABLE: [u32; 256] = crc32_table();

/// Case-insensitive hash used for the non-case-preserving half of a name row.
pub fn strihash_deprecated(text: &str) -> u32 {
    let wide = !text.is_ascii();
    let mut hash = 0u32;
    let mut step = |b: u32| {
        hash = ((hash >> 8) & 0x00FF_FFFF) ^ DEPRECATED_CRC_TABLE[((hash ^ b) & 0xFF) as usize];
    };
    for ch in text.chars() {
        let ch = ch.to_ascii_uppercase() as u32;
        step(ch & 0xFF);
        if wide {
            step((ch >> 8) & 0xFF);
        }
    }
    hash
}

/// CRC32 over each character widened to 32 bits.
pub fn str_crc32(text: &str) -> u32 {
    let mut crc = !0u32;
    for ch in text.chars() {
        let mut c = ch as u32;
        for _ in 0..4 {
            crc = (crc >> 8) ^ CRC32_TABLE[((crc ^ c) & 0xFF) as usize];
            c >>= 8;
        }
    }
    !crc
}

/// Serialized hash pair for a name row.
pub fn name_hash(text: &str) -> [u8; 4] {
    let non_case = (strihash_deprecated(text) & 0xFFFF) as u16;
    let case = (str_crc32(text) & 0xFFFF) as u16;
    let mut out = [0u8; 4];
    out[..2].copy_from_slice(&non_case.to_le_bytes());
    out[2..].copy_from_slice(&case.to_le_bytes());
    out
}
