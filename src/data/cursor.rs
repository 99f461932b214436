//! Position-tracking little-endian reader.
//!
//! Every read advances the cursor by exactly the decoded size. Any read that
//! would run past the end of the buffer fails with `TruncatedInput` and
//! leaves the cursor where it was.

use winnow::Parser;
use winnow::binary::{le_f32, le_f64, le_i8, le_i16, le_i32, le_i64, le_u8, le_u16, le_u32, le_u64};
use winnow::token::take;

use crate::data::parser_utils::{
    WResult, decode_narrow, decode_wide, fstring_payload_len, parse_guid, parse_name_pair,
};
use crate::error::{AssetResult, malformed, truncated};

/// A string read from the stream together with the encoding it was stored in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FString {
    pub value: String,
    /// Stored as UTF-16 rather than Latin-1.
    pub wide: bool,
}

impl FString {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let wide = !value.is_ascii();
        Self { value, wide }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for FString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    input: &'a [u8],
}

macro_rules! read_primitive {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $parser:ident, $size:expr) => {
        $(#[$doc])*
        pub fn $name(&mut self) -> AssetResult<$ty> {
            let offset = self.position();
            let have = self.remaining();
            let result: WResult<$ty> = $parser.parse_next(&mut self.input);
            result.map_err(|_| truncated(offset, $size, have))
        }
    };
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, input: data }
    }

    /// Reader over `data` positioned at `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> AssetResult<Self> {
        let mut reader = Self::new(data);
        reader.seek(pos)?;
        Ok(reader)
    }

    pub fn position(&self) -> usize {
        self.data.len() - self.input.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    pub fn is_at_end(&self) -> bool {
        self.input.is_empty()
    }

    /// The whole underlying buffer.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Bytes not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        self.input
    }

    pub fn seek(&mut self, pos: usize) -> AssetResult<()> {
        if pos > self.data.len() {
            return Err(truncated(pos, 0, self.data.len()));
        }
        self.input = &self.data[pos..];
        Ok(())
    }

    /// Fail with `TruncatedInput` unless `need` more bytes are available.
    pub fn ensure(&self, need: usize) -> AssetResult<()> {
        if need > self.remaining() {
            Err(truncated(self.position(), need, self.remaining()))
        } else {
            Ok(())
        }
    }

    read_primitive!(read_u8, u8, le_u8, 1);
    read_primitive!(read_i8, i8, le_i8, 1);
    read_primitive!(read_u16, u16, le_u16, 2);
    read_primitive!(read_i16, i16, le_i16, 2);
    read_primitive!(read_u32, u32, le_u32, 4);
    read_primitive!(read_i32, i32, le_i32, 4);
    read_primitive!(read_u64, u64, le_u64, 8);
    read_primitive!(read_i64, i64, le_i64, 8);
    read_primitive!(read_f32, f32, le_f32, 4);
    read_primitive!(read_f64, f64, le_f64, 8);
    read_primitive!(
        /// Read a 16-byte GUID.
        read_guid,
        [u8; 16],
        parse_guid,
        16
    );
    read_primitive!(
        /// Read a raw (index, number) name pair without resolving it.
        read_name_pair,
        (i32, i32),
        parse_name_pair,
        8
    );

    pub fn read_bytes(&mut self, n: usize) -> AssetResult<&'a [u8]> {
        let offset = self.position();
        let have = self.remaining();
        let result: WResult<&'a [u8]> = take(n).parse_next(&mut self.input);
        result.map_err(|_| truncated(offset, n, have))
    }

    pub fn read_array<const N: usize>(&mut self) -> AssetResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// A 32-bit boolean. Values other than 0 and 1 are rejected so that
    /// re-encoding stays byte-identical.
    pub fn read_bool32(&mut self) -> AssetResult<bool> {
        let offset = self.position();
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(malformed(offset, format!("expected 32-bit bool, found {other}"))),
        }
    }

    pub fn read_bool8(&mut self) -> AssetResult<bool> {
        let offset = self.position();
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(malformed(offset, format!("expected 8-bit bool, found {other}"))),
        }
    }

    /// Read an element count and check that at least `min_elem_size` bytes
    /// per element remain, so corrupt counts cannot trigger huge allocations.
    pub fn read_count(&mut self, min_elem_size: usize) -> AssetResult<usize> {
        let offset = self.position();
        let count = self.read_i32()?;
        if count < 0 {
            return Err(malformed(offset, format!("negative element count {count}")));
        }
        let count = count as usize;
        self.ensure(count.saturating_mul(min_elem_size))?;
        Ok(count)
    }

    pub fn read_vec<T>(
        &mut self,
        count: usize,
        mut f: impl FnMut(&mut Self) -> AssetResult<T>,
    ) -> AssetResult<Vec<T>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(f(self)?);
        }
        Ok(out)
    }

    /// Count-prefixed array.
    pub fn read_counted<T>(
        &mut self,
        min_elem_size: usize,
        f: impl FnMut(&mut Self) -> AssetResult<T>,
    ) -> AssetResult<Vec<T>> {
        let count = self.read_count(min_elem_size)?;
        self.read_vec(count, f)
    }

    pub fn read_u16_array(&mut self) -> AssetResult<Vec<u16>> {
        self.read_counted(2, Self::read_u16)
    }

    pub fn read_i32_array(&mut self) -> AssetResult<Vec<i32>> {
        self.read_counted(4, Self::read_i32)
    }

    pub fn read_u32_array(&mut self) -> AssetResult<Vec<u32>> {
        self.read_counted(4, Self::read_u32)
    }

    pub fn read_f32_array<const N: usize>(&mut self) -> AssetResult<[f32; N]> {
        let mut out = [0f32; N];
        for v in out.iter_mut() {
            *v = self.read_f32()?;
        }
        Ok(out)
    }

    /// Length-prefixed string: positive = Latin-1, negative = UTF-16, both
    /// NUL terminated; zero = empty.
    pub fn read_fstring(&mut self) -> AssetResult<FString> {
        let len = self.read_i32()?;
        if len == 0 {
            return Ok(FString::default());
        }
        let start = self.position();
        let payload = self.read_bytes(fstring_payload_len(len))?;
        let wide = len < 0;
        let terminator: &[u8] = if wide { &[0, 0] } else { &[0] };
        let Some(text) = payload.strip_suffix(terminator) else {
            return Err(malformed(start, "string is missing its NUL terminator"));
        };
        let value = if wide {
            decode_wide(text)
        } else {
            decode_narrow(text)
        };
        Ok(FString { value, wide })
    }
}
