//! `Texture2D` and `TextureCube` exports.
//!
//! The cooked platform data lists one block per pixel format. Each block
//! holds the mip chain; a mip's bytes are either inline in the export
//! payload or stored in the paired `.ubulk`, in mip order. Both locations
//! are recorded as offsets, and the block records where it ends, so every
//! re-encode recomputes those values from the layout being written.

use byteorder::{ByteOrder, LE};
use tracing::{debug, trace};

use crate::data::{ByteReader, ByteWriter, FString};
use crate::error::{AssetResult, malformed, unsupported_version};
use crate::objects::common::StripFlags;
use crate::objects::{AssetKind, DecodeContext, EncodeContext, ExportCodec, ObjectHeader};
use crate::package::names::FName;
use crate::version::{EngineVersion, GameVariant};

/// Bulk data flags relevant to mip storage.
pub mod bulk_flags {
    pub const PAYLOAD_AT_END_OF_FILE: u32 = 0x1;
    pub const SINGLE_USE: u32 = 0x8;
    pub const UNUSED: u32 = 0x20;
    pub const FORCE_INLINE_PAYLOAD: u32 = 0x40;
    pub const PAYLOAD_IN_SEPARATE_FILE: u32 = 0x100;
    pub const DUPLICATE_NON_OPTIONAL_PAYLOAD: u32 = 0x400;
    pub const NO_OFFSET_FIX_UP: u32 = 0x10000;
}

use bulk_flags::*;

const SLICE_MASK: u32 = 0x3FFF_FFFF;
const HAS_OPT_DATA: u32 = 1 << 30;
const IS_CUBEMAP: u32 = 1 << 31;

/// Where a mip's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipStorage {
    Inline,
    Bulk,
    /// Declared but carries no payload.
    Empty,
}

impl MipStorage {
    pub fn from_flags(flags: u32) -> Self {
        if flags & FORCE_INLINE_PAYLOAD != 0 && flags & UNUSED == 0 {
            MipStorage::Inline
        } else if flags & (PAYLOAD_IN_SEPARATE_FILE | PAYLOAD_AT_END_OF_FILE) != 0 && flags & UNUSED == 0 {
            MipStorage::Bulk
        } else {
            MipStorage::Empty
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mip {
    /// Leading `1` stored before 5.0.
    pub cooked: Option<u32>,
    pub flags: u32,
    pub element_count: i32,
    pub size_on_disk: i32,
    /// Offset as stored; rewritten on encode.
    pub offset: i64,
    pub data: Vec<u8>,
    pub size_x: u32,
    pub size_y: u32,
    /// Stored from 4.20 on.
    pub size_z: Option<u32>,
}

impl Mip {
    pub fn storage(&self) -> MipStorage {
        MipStorage::from_flags(self.flags)
    }

    /// A new mip with its payload in the given location.
    pub fn new(data: Vec<u8>, size_x: u32, size_y: u32, storage: MipStorage, version: EngineVersion) -> Self {
        let flags = match storage {
            MipStorage::Inline => FORCE_INLINE_PAYLOAD | SINGLE_USE,
            MipStorage::Bulk if version >= EngineVersion::UE4_27 => {
                DUPLICATE_NON_OPTIONAL_PAYLOAD | PAYLOAD_IN_SEPARATE_FILE | PAYLOAD_AT_END_OF_FILE | NO_OFFSET_FIX_UP
            }
            MipStorage::Bulk => DUPLICATE_NON_OPTIONAL_PAYLOAD | PAYLOAD_IN_SEPARATE_FILE | PAYLOAD_AT_END_OF_FILE,
            MipStorage::Empty => UNUSED,
        };
        let len = if storage == MipStorage::Empty { 0 } else { data.len() as i32 };
        Self {
            cooked: (!version.is_ue5()).then_some(1),
            flags,
            element_count: len,
            size_on_disk: len,
            offset: 0,
            data: if storage == MipStorage::Empty { Vec::new() } else { data },
            size_x,
            size_y,
            size_z: (version >= EngineVersion::UE4_20).then_some(1),
        }
    }

    fn read(r: &mut ByteReader<'_>, bulk: &mut ByteReader<'_>, has_bulk: bool, version: EngineVersion) -> AssetResult<Self> {
        let cooked = if version.is_ue5() { None } else { Some(r.read_u32()?) };
        let offset_at = r.position();
        let flags = r.read_u32()?;
        let element_count = r.read_i32()?;
        let size_on_disk = r.read_i32()?;
        let offset = r.read_i64()?;
        let len = usize::try_from(size_on_disk)
            .map_err(|_| malformed(offset_at, format!("negative mip size {size_on_disk}")))?;
        let data = match MipStorage::from_flags(flags) {
            MipStorage::Inline => r.read_bytes(len)?.to_vec(),
            MipStorage::Bulk if !has_bulk => {
                return Err(malformed(offset_at, "mip is stored in a .ubulk that was not supplied"));
            }
            MipStorage::Bulk => bulk.read_bytes(len)?.to_vec(),
            MipStorage::Empty => Vec::new(),
        };
        Ok(Self {
            cooked,
            flags,
            element_count,
            size_on_disk,
            offset,
            data,
            size_x: r.read_u32()?,
            size_y: r.read_u32()?,
            size_z: if version >= EngineVersion::UE4_20 { Some(r.read_u32()?) } else { None },
        })
    }
}

/// Cooked data for one pixel format.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformData {
    pub format_name: FName,
    /// Stored value of the end-of-block offset; rewritten on encode.
    pub skip_offset: i64,
    /// Placeholder bytes stored from 5.0 on.
    pub placeholder: Option<[u8; 16]>,
    pub size_x: u32,
    pub size_y: u32,
    /// Slice count plus the opt-data and cubemap bits.
    pub packed: u32,
    pub pixel_format: FString,
    pub opt_data: Option<[u32; 2]>,
    pub first_mip: i32,
    pub mips: Vec<Mip>,
    /// Stored from 4.23 on.
    pub is_virtual: Option<u32>,
}

impl PlatformData {
    pub fn num_slices(&self) -> u32 {
        self.packed & SLICE_MASK
    }

    pub fn is_cubemap(&self) -> bool {
        self.packed & IS_CUBEMAP != 0 || self.num_slices() == 6
    }

    /// Replace the slice count and cubemap bit, keeping the opt-data bit.
    pub fn set_layout(&mut self, slices: u32, cubemap: bool) {
        let flags = self.packed & HAS_OPT_DATA;
        self.packed = flags | (slices & SLICE_MASK) | if cubemap { IS_CUBEMAP } else { 0 };
    }

    /// Number of trailing mips stored inline.
    pub fn inline_tail(&self) -> usize {
        self.mips
            .iter()
            .rev()
            .take_while(|m| m.storage() == MipStorage::Inline)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub header: ObjectHeader,
    pub strips: [StripFlags; 2],
    pub cooked: bool,
    pub platforms: Vec<PlatformData>,
    /// The `None` name closing the platform list.
    pub terminator: FName,
    pub trailing: Vec<u8>,
}

impl Texture {
    pub fn kind(&self) -> AssetKind {
        match self.platforms.first() {
            Some(p) if p.is_cubemap() => AssetKind::TextureCube,
            _ => AssetKind::Texture2D,
        }
    }

    /// Data for the first (usually only) pixel format.
    pub fn primary(&self) -> Option<&PlatformData> {
        self.platforms.first()
    }

    pub fn primary_mut(&mut self) -> Option<&mut PlatformData> {
        self.platforms.first_mut()
    }

    pub fn has_bulk_mips(&self) -> bool {
        self.platforms
            .iter()
            .flat_map(|p| &p.mips)
            .any(|m| m.storage() == MipStorage::Bulk)
    }

    fn skip_offset_is_wide(version: EngineVersion) -> bool {
        version >= EngineVersion::UE4_20
    }

    fn check_layout(version: EngineVersion) -> AssetResult<()> {
        if version.is_game(GameVariant::Ff7r) {
            return Err(unsupported_version(format!("texture data layout of {version}")));
        }
        Ok(())
    }
}

/// Patch the file offsets recorded in an encoded texture payload after the
/// payload moved `shift` bytes within its file. Mip bytes are not read, so
/// the paired `.ubulk` is neither needed nor changed, and the payload keeps
/// its length.
pub fn relocate(payload: &[u8], ctx: &DecodeContext<'_>, shift: i64) -> AssetResult<Vec<u8>> {
    let version = ctx.version;
    Texture::check_layout(version)?;
    let wide = Texture::skip_offset_is_wide(version);
    let mut r = ByteReader::new(payload);
    ObjectHeader::parse(&mut r, ctx)?;
    StripFlags::read(&mut r)?;
    StripFlags::read(&mut r)?;
    r.read_bool32()?;
    // (position, stored as i64, delta)
    let mut patches = Vec::new();
    while !ctx.names.read_fname(&mut r)?.is_none() {
        // UE5 stores the skip as a distance, which does not move.
        if !version.is_ue5() {
            patches.push((r.position(), wide, shift));
        }
        r.read_bytes(if wide { 8 } else { 4 })?;
        if version.is_ue5() {
            r.read_array::<16>()?;
        }
        r.read_bytes(8)?;
        let packed = r.read_u32()?;
        r.read_fstring()?;
        if packed & HAS_OPT_DATA != 0 {
            r.read_bytes(8)?;
        }
        r.read_i32()?;
        for _ in 0..r.read_count(28)? {
            if !version.is_ue5() {
                r.read_u32()?;
            }
            let flags = r.read_u32()?;
            r.read_i32()?;
            let size_on_disk = r.read_i32()?;
            let offset_at = r.position();
            r.read_i64()?;
            match MipStorage::from_flags(flags) {
                MipStorage::Inline => {
                    patches.push((offset_at, true, shift));
                    let len = usize::try_from(size_on_disk)
                        .map_err(|_| malformed(offset_at, format!("negative mip size {size_on_disk}")))?;
                    r.read_bytes(len)?;
                }
                MipStorage::Bulk if flags & NO_OFFSET_FIX_UP == 0 => patches.push((offset_at, true, -shift)),
                MipStorage::Bulk | MipStorage::Empty => {}
            }
            r.read_bytes(8)?;
            if version >= EngineVersion::UE4_20 {
                r.read_u32()?;
            }
        }
        if version >= EngineVersion::UE4_23 {
            r.read_u32()?;
        }
    }

    let mut out = payload.to_vec();
    for &(at, wide, delta) in &patches {
        if wide {
            let value = LE::read_i64(&out[at..at + 8]) + delta;
            LE::write_i64(&mut out[at..at + 8], value);
        } else {
            let value = i32::try_from(i64::from(LE::read_i32(&out[at..at + 4])) + delta)
                .map_err(|_| malformed(at, "relocated skip offset does not fit 32 bits"))?;
            LE::write_i32(&mut out[at..at + 4], value);
        }
    }
    debug!(shift, offsets = patches.len(), "relocated texture");
    Ok(out)
}

impl ExportCodec for Texture {
    fn decode(payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<Self> {
        let version = ctx.version;
        Texture::check_layout(version)?;
        let mut r = ByteReader::new(payload);
        let header = ObjectHeader::parse(&mut r, ctx)?;
        let strips = [StripFlags::read(&mut r)?, StripFlags::read(&mut r)?];
        let cooked = r.read_bool32()?;
        let mut bulk = ByteReader::new(ctx.bulk.unwrap_or_default());
        let mut platforms = Vec::new();
        let terminator = loop {
            let format_name = ctx.names.read_fname(&mut r)?;
            if format_name.is_none() {
                break format_name;
            }
            let skip_offset = if Texture::skip_offset_is_wide(version) {
                r.read_i64()?
            } else {
                r.read_i32()? as i64
            };
            let placeholder = if version.is_ue5() { Some(r.read_array()?) } else { None };
            let size_x = r.read_u32()?;
            let size_y = r.read_u32()?;
            let packed = r.read_u32()?;
            let pixel_format = r.read_fstring()?;
            let opt_data = if packed & HAS_OPT_DATA != 0 {
                Some([r.read_u32()?, r.read_u32()?])
            } else {
                None
            };
            let first_mip = r.read_i32()?;
            let mips = r.read_counted(28, |r| Mip::read(r, &mut bulk, ctx.bulk.is_some(), version))?;
            let is_virtual = if version >= EngineVersion::UE4_23 { Some(r.read_u32()?) } else { None };
            trace!(format = %pixel_format, size_x, size_y, mips = mips.len(), "texture platform data");
            platforms.push(PlatformData {
                format_name,
                skip_offset,
                placeholder,
                size_x,
                size_y,
                packed,
                pixel_format,
                opt_data,
                first_mip,
                mips,
                is_virtual,
            });
        };
        if ctx.bulk.is_some() && !bulk.is_at_end() {
            debug!(unused = bulk.remaining(), ".ubulk holds bytes no mip refers to");
        }
        Ok(Self {
            header,
            strips,
            cooked,
            platforms,
            terminator,
            trailing: r.rest().to_vec(),
        })
    }

    fn encode(&self, ctx: &mut EncodeContext) -> AssetResult<Vec<u8>> {
        let version = ctx.version;
        Texture::check_layout(version)?;
        let base = ctx.payload_offset;
        let mut w = ByteWriter::new();
        self.header.write(&mut w);
        for strip in &self.strips {
            strip.write(&mut w);
        }
        w.write_bool32(self.cooked);
        // Offsets of bulk mips without NO_OFFSET_FIX_UP are relative to
        // the end of the platform list, which is only known afterwards.
        let mut fix_ups = Vec::new();
        let mut bulk_len = 0usize;
        for platform in &self.platforms {
            platform.format_name.write(&mut w);
            let skip_at = w.position();
            if Texture::skip_offset_is_wide(version) {
                w.reserve_i64();
            } else {
                w.reserve_u32();
            }
            if let Some(placeholder) = &platform.placeholder {
                w.write_bytes(placeholder);
            }
            w.write_u32(platform.size_x);
            w.write_u32(platform.size_y);
            w.write_u32(platform.packed);
            w.write_fstring(&platform.pixel_format);
            if let Some([a, b]) = platform.opt_data {
                w.write_u32(a);
                w.write_u32(b);
            }
            w.write_i32(platform.first_mip);
            w.write_count(platform.mips.len());
            for mip in &platform.mips {
                if let Some(cooked) = mip.cooked {
                    w.write_u32(cooked);
                }
                let storage = mip.storage();
                let len = match storage {
                    MipStorage::Empty => mip.size_on_disk,
                    _ => mip.data.len() as i32,
                };
                let element_count = if storage == MipStorage::Empty { mip.element_count } else { len };
                w.write_u32(mip.flags);
                w.write_i32(element_count);
                w.write_i32(len);
                let offset_at = w.position();
                match storage {
                    MipStorage::Inline => {
                        w.write_i64(base + offset_at as i64 + 8);
                        w.write_bytes(&mip.data);
                    }
                    MipStorage::Bulk => {
                        w.write_i64(bulk_len as i64);
                        if mip.flags & NO_OFFSET_FIX_UP == 0 {
                            fix_ups.push((offset_at, bulk_len as i64));
                        }
                        ctx.bulk_mut().extend_from_slice(&mip.data);
                        bulk_len += mip.data.len();
                    }
                    MipStorage::Empty => w.write_i64(mip.offset),
                }
                w.write_u32(mip.size_x);
                w.write_u32(mip.size_y);
                if let Some(z) = mip.size_z {
                    w.write_u32(z);
                }
            }
            if let Some(is_virtual) = platform.is_virtual {
                w.write_u32(is_virtual);
            }
            let end = w.position();
            let skip = if version.is_ue5() {
                (end - skip_at) as i64
            } else {
                base + end as i64
            };
            if Texture::skip_offset_is_wide(version) {
                w.patch_i64(skip_at, skip);
            } else {
                w.patch_i32(skip_at, skip as i32);
            }
        }
        self.terminator.write(&mut w);
        let list_end = base + w.position() as i64;
        for (at, offset) in fix_ups {
            w.patch_i64(at, offset - list_end);
        }
        w.write_bytes(&self.trailing);
        debug!(bulk = bulk_len, "encoded texture");
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{name_table, sample_texture};

    #[test]
    fn test_texture_inline_and_bulk_mips() {
        for version in [EngineVersion::UE4_25, EngineVersion::UE4_27, EngineVersion::UE5_0] {
            let mut names = name_table(&["None"]);
            let texture = sample_texture(&mut names, version, false);
            let mut out = EncodeContext::new(version, 1000);
            let payload = texture.encode(&mut out).unwrap();
            let bulk = out.into_bulk().unwrap();
            assert_eq!(bulk.len(), 64 + 16);

            let mut ctx = DecodeContext::new(&names, version);
            ctx.payload_offset = 1000;
            ctx.bulk = Some(&bulk);
            let decoded = Texture::decode(&payload, &ctx).unwrap();
            let platform = decoded.primary().unwrap();
            assert_eq!(platform.mips.len(), 3);
            assert_eq!(platform.mips[0].storage(), MipStorage::Bulk);
            assert_eq!(platform.mips[2].storage(), MipStorage::Inline);
            assert_eq!(platform.mips[2].data, vec![7u8; 4]);
            assert_eq!(decoded.kind(), AssetKind::Texture2D);

            // Re-encoding the decoded texture at the same place is exact.
            let mut again = EncodeContext::new(version, 1000);
            assert_eq!(decoded.encode(&mut again).unwrap(), payload);
            assert_eq!(again.into_bulk().unwrap(), bulk);
        }
    }

    #[test]
    fn test_inline_offset_is_absolute() {
        let mut names = name_table(&["None"]);
        let texture = sample_texture(&mut names, EngineVersion::UE4_27, false);
        let at_0 = texture.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap();
        let at_100 = texture.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 100)).unwrap();
        assert_eq!(at_0.len(), at_100.len());
        let inline = at_0.windows(4).rposition(|w| w == [7, 7, 7, 7]).unwrap();
        let stored = |p: &[u8]| i64::from_le_bytes(p[inline - 8..inline].try_into().unwrap());
        assert_eq!(stored(&at_0), inline as i64);
        assert_eq!(stored(&at_100), inline as i64 + 100);
    }

    #[test]
    fn test_relocate_matches_encode_at_new_offset() {
        for version in [EngineVersion::UE4_18, EngineVersion::UE4_25, EngineVersion::UE4_27, EngineVersion::UE5_0] {
            let mut names = name_table(&["None"]);
            let mut texture = sample_texture(&mut names, version, false);
            // A bulk mip whose offset is relative to the platform list end.
            texture.platforms[0].mips[1].flags &= !NO_OFFSET_FIX_UP;
            let mut at_500 = EncodeContext::new(version, 500);
            let payload = texture.encode(&mut at_500).unwrap();
            let bulk = at_500.into_bulk().unwrap();
            let mut at_740 = EncodeContext::new(version, 740);
            let expected = texture.encode(&mut at_740).unwrap();
            assert_eq!(at_740.into_bulk().unwrap(), bulk);

            let mut ctx = DecodeContext::new(&names, version);
            ctx.payload_offset = 500;
            let moved = relocate(&payload, &ctx, 240).unwrap();
            assert_eq!(moved, expected);
            ctx.payload_offset = 740;
            let back = relocate(&moved, &ctx, -240).unwrap();
            assert_eq!(back, payload);
        }
    }

    #[test]
    fn test_ff7r_texture_layout_is_unsupported() {
        let mut names = name_table(&["None"]);
        let texture = sample_texture(&mut names, EngineVersion::UE4_18, false);
        let mut out = EncodeContext::new(EngineVersion::UE4_18, 0);
        let payload = texture.encode(&mut out).unwrap();
        let bulk = out.into_bulk().unwrap();
        let mut ctx = DecodeContext::new(&names, EngineVersion::FF7R);
        ctx.bulk = Some(&bulk);
        let err = Texture::decode(&payload, &ctx).unwrap_err();
        assert!(matches!(
            err.current_context(),
            crate::error::AssetError::UnsupportedVersion { .. }
        ));
        assert!(relocate(&payload, &ctx, 8).is_err());
        // kh3 keeps the stock layout.
        ctx.version = EngineVersion::KH3;
        assert!(Texture::decode(&payload, &ctx).is_ok());
    }

    #[test]
    fn test_cube_kind_and_missing_bulk() {
        let mut names = name_table(&["None"]);
        let texture = sample_texture(&mut names, EngineVersion::UE4_27, true);
        assert_eq!(texture.kind(), AssetKind::TextureCube);
        let payload = texture.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap();
        let err = Texture::decode(&payload, &DecodeContext::new(&names, EngineVersion::UE4_27)).unwrap_err();
        assert!(matches!(
            err.current_context(),
            crate::error::AssetError::Malformed { .. }
        ));
    }
}
