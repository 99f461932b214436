//! Growable little-endian writer with back-patching.
//!
//! Sizes and offsets that are only known after a block has been written are
//! reserved with a placeholder and patched once the block is complete.

use byteorder::{ByteOrder, LE, WriteBytesExt};

use crate::data::cursor::FString;
use crate::data::parser_utils::fits_narrow;

#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

macro_rules! write_primitive {
    ($name:ident, $ty:ty, $method:ident) => {
        pub fn $name(&mut self, v: $ty) {
            // Writes into a Vec<u8> cannot fail.
            let _ = self.buf.$method::<LE>(v);
        }
    };
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    write_primitive!(write_u16, u16, write_u16);
    write_primitive!(write_i16, i16, write_i16);
    write_primitive!(write_u32, u32, write_u32);
    write_primitive!(write_i32, i32, write_i32);
    write_primitive!(write_u64, u64, write_u64);
    write_primitive!(write_i64, i64, write_i64);
    write_primitive!(write_f32, f32, write_f32);
    write_primitive!(write_f64, f64, write_f64);

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn write_bool32(&mut self, v: bool) {
        self.write_u32(v as u32);
    }

    pub fn write_bool8(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_guid(&mut self, guid: &[u8; 16]) {
        self.write_bytes(guid);
    }

    pub fn write_name_pair(&mut self, index: i32, number: i32) {
        self.write_i32(index);
        self.write_i32(number);
    }

    pub fn write_count(&mut self, count: usize) {
        self.write_i32(count as i32);
    }

    pub fn write_u16_array(&mut self, values: &[u16]) {
        self.write_count(values.len());
        values.iter().for_each(|v| self.write_u16(*v));
    }

    pub fn write_i32_array(&mut self, values: &[i32]) {
        self.write_count(values.len());
        values.iter().for_each(|v| self.write_i32(*v));
    }

    pub fn write_u32_array(&mut self, values: &[u32]) {
        self.write_count(values.len());
        values.iter().for_each(|v| self.write_u32(*v));
    }

    pub fn write_f32_slice(&mut self, values: &[f32]) {
        values.iter().for_each(|v| self.write_f32(*v));
    }

    /// Write a string in the encoding it was read with, falling back to
    /// UTF-16 when the text no longer fits Latin-1.
    pub fn write_fstring(&mut self, s: &FString) {
        self.write_string_encoded(&s.value, s.wide || !fits_narrow(&s.value));
    }

    /// Write a new string: ASCII stays narrow, anything else goes UTF-16.
    pub fn write_str(&mut self, s: &str) {
        self.write_string_encoded(s, !s.is_ascii());
    }

    fn write_string_encoded(&mut self, s: &str, wide: bool) {
        if s.is_empty() {
            self.write_i32(0);
        } else if wide {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.write_i32(-((units.len() + 1) as i32));
            units.iter().for_each(|u| self.write_u16(*u));
            self.write_u16(0);
        } else {
            self.write_i32((s.chars().count() + 1) as i32);
            s.chars().for_each(|c| self.write_u8(c as u32 as u8));
            self.write_u8(0);
        }
    }

    /// Reserve a u32 slot to be patched later; returns its position.
    pub fn reserve_u32(&mut self) -> usize {
        let pos = self.position();
        self.write_u32(0);
        pos
    }

    pub fn reserve_i64(&mut self) -> usize {
        let pos = self.position();
        self.write_i64(0);
        pos
    }

    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        LE::write_u32(&mut self.buf[pos..pos + 4], v);
    }

    pub fn patch_i32(&mut self, pos: usize, v: i32) {
        LE::write_i32(&mut self.buf[pos..pos + 4], v);
    }

    pub fn patch_i64(&mut self, pos: usize, v: i64) {
        LE::write_i64(&mut self.buf[pos..pos + 8], v);
    }
}
