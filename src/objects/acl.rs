//! Reader for ACL 1.1 compressed clips.
//!
//! Only the layout the engine plugin produces by default is decoded: one
//! segment, clip-wide range reduction on every track, no segment range
//! reduction and variable bit rates. Anything else is reported through
//! [`CompressedClip::is_decodable`] and left compressed.

use rootcause::Report;
use tracing::debug;

use crate::data::ByteReader;
use crate::error::{AssetError, AssetResult, malformed, truncated, unsupported_version};
use crate::objects::animation::{BoneTrack, Keys, quat_from_xyz};

pub const CLIP_TAG: u32 = 0xAC10_AC10;
pub const CLIP_VERSION: u16 = 3;

/// Size of the `size, hash, tag, version, algorithm, pad` prefix.
const PREFIX_SIZE: usize = 16;
const CLIP_HEADER_SIZE: usize = 32;
const SEGMENT_HEADER_SIZE: usize = 20;

/// Bits per component for each bit rate index.
pub const BIT_RATE_NUM_BITS: [u32; 19] = [0, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 32];

pub const QUAT_DROP_W_VARIABLE: u8 = 4;
pub const VECTOR3_VARIABLE: u8 = 3;
pub const RANGE_REDUCTION_NONE: u8 = 0;
pub const RANGE_REDUCTION_ALL_TRACKS: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClipHeader {
    pub num_bones: u16,
    pub num_segments: u16,
    pub rotation_format: u8,
    pub translation_format: u8,
    pub scale_format: u8,
    pub clip_range_reduction: u8,
    pub segment_range_reduction: u8,
    pub has_scale: u8,
    pub default_scale: u8,
    pub num_samples: u32,
    pub sample_rate: u32,
    pub segment_headers_offset: u16,
    pub default_tracks_bitset_offset: u16,
    pub constant_tracks_bitset_offset: u16,
    pub constant_tracks_data_offset: u16,
    pub clip_range_data_offset: u16,
}

impl ClipHeader {
    fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let num_bones = r.read_u16()?;
        let num_segments = r.read_u16()?;
        let [rotation_format, translation_format, scale_format] = r.read_array()?;
        let [clip_range_reduction, segment_range_reduction, has_scale, default_scale, _pad] = r.read_array()?;
        let num_samples = r.read_u32()?;
        let sample_rate = r.read_u32()?;
        let mut offsets = [0u16; 6];
        for offset in offsets.iter_mut() {
            *offset = r.read_u16()?;
        }
        Ok(Self {
            num_bones,
            num_segments,
            rotation_format,
            translation_format,
            scale_format,
            clip_range_reduction,
            segment_range_reduction,
            has_scale,
            default_scale,
            num_samples,
            sample_rate,
            segment_headers_offset: offsets[0],
            default_tracks_bitset_offset: offsets[1],
            constant_tracks_bitset_offset: offsets[2],
            constant_tracks_data_offset: offsets[3],
            clip_range_data_offset: offsets[4],
        })
    }

    fn tracks_per_bone(&self) -> usize {
        if self.has_scale != 0 { 3 } else { 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentHeader {
    pub num_samples: u32,
    pub animated_pose_bit_size: i32,
    pub format_per_track_data_offset: i32,
    pub range_data_offset: i32,
    pub track_data_offset: i32,
}

impl SegmentHeader {
    fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            num_samples: r.read_u32()?,
            animated_pose_bit_size: r.read_i32()?,
            format_per_track_data_offset: r.read_i32()?,
            range_data_offset: r.read_i32()?,
            track_data_offset: r.read_i32()?,
        })
    }
}

/// Headers of a compressed clip. The sample data stays in the stream it
/// was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressedClip {
    pub size: u32,
    pub hash: u32,
    pub header: ClipHeader,
    pub segments: Vec<SegmentHeader>,
}

/// How one track of one bone is stored.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TrackStorage {
    Default,
    Constant([f32; 3]),
    Animated { min: [f32; 3], extent: [f32; 3], bits: u32 },
}

/// MSB-first bit stream over little-endian `u32` words.
struct PackedBits<'a> {
    data: &'a [u8],
    base: usize,
}

impl PackedBits<'_> {
    fn read(&self, bit: usize, width: u32) -> AssetResult<u64> {
        let mut value = 0u64;
        for i in 0..width as usize {
            let at = bit + i;
            let word_at = self.base + at / 32 * 4;
            let bytes = self
                .data
                .get(word_at..word_at + 4)
                .ok_or_else(|| truncated(word_at, 4, self.data.len().saturating_sub(word_at)))?;
            let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            value = value << 1 | ((word >> (31 - at % 32)) & 1) as u64;
        }
        Ok(value)
    }
}

fn read_bitset(stream: &[u8], at: usize, bits: usize) -> AssetResult<Vec<bool>> {
    let packed = PackedBits { data: stream, base: at };
    (0..bits).map(|i| Ok(packed.read(i, 1)? == 1)).collect()
}

impl CompressedClip {
    /// Parse the prefix, clip header and segment headers of `stream`.
    pub fn parse(stream: &[u8]) -> AssetResult<Self> {
        let mut r = ByteReader::new(stream);
        let size = r.read_u32()?;
        let hash = r.read_u32()?;
        let tag = r.read_u32()?;
        if tag != CLIP_TAG {
            return Err(Report::new(AssetError::InvalidMagic {
                expected: CLIP_TAG,
                found: tag,
            }));
        }
        let version = r.read_u16()?;
        if version != CLIP_VERSION {
            return Err(unsupported_version(format!("ACL clip version {version}")));
        }
        let algorithm = r.read_u8()?;
        if algorithm != 0 {
            return Err(unsupported_version(format!("ACL algorithm {algorithm}")));
        }
        r.read_u8()?;
        let header = ClipHeader::read(&mut r)?;
        r.seek(PREFIX_SIZE + header.segment_headers_offset as usize)?;
        r.ensure(header.num_segments as usize * SEGMENT_HEADER_SIZE)?;
        let segments = r.read_vec(header.num_segments as usize, SegmentHeader::read)?;
        Ok(Self {
            size,
            hash,
            header,
            segments,
        })
    }

    pub fn is_decodable(&self) -> bool {
        let h = &self.header;
        self.segments.len() == 1
            && h.clip_range_reduction == RANGE_REDUCTION_ALL_TRACKS
            && h.segment_range_reduction == RANGE_REDUCTION_NONE
            && h.rotation_format == QUAT_DROP_W_VARIABLE
            && h.translation_format == VECTOR3_VARIABLE
            && (h.has_scale == 0 || h.scale_format == VECTOR3_VARIABLE)
    }

    /// Decode every bone's samples from `stream`, the buffer this clip was
    /// parsed from. Returns `None` for clips outside the decodable subset.
    pub fn decode_tracks(&self, stream: &[u8]) -> AssetResult<Option<Vec<BoneTrack>>> {
        if !self.is_decodable() {
            debug!(header = ?self.header, "ACL clip settings not decodable, keeping it compressed");
            return Ok(None);
        }
        let h = &self.header;
        let at = |offset: u16| PREFIX_SIZE + offset as usize;
        let per_bone = h.tracks_per_bone();
        let num_tracks = h.num_bones as usize * per_bone;
        let defaults = read_bitset(stream, at(h.default_tracks_bitset_offset), num_tracks)?;
        let constants = read_bitset(stream, at(h.constant_tracks_bitset_offset), num_tracks)?;

        let segment = &self.segments[0];
        let format_at = PREFIX_SIZE + usize::try_from(segment.format_per_track_data_offset).unwrap_or(0);
        let mut constant_data = ByteReader::at(stream, at(h.constant_tracks_data_offset))?;
        let mut range_data = ByteReader::at(stream, at(h.clip_range_data_offset))?;
        let mut bit_rates = ByteReader::at(stream, format_at)?;

        let mut storage = Vec::with_capacity(num_tracks);
        for track in 0..num_tracks {
            let entry = if defaults[track] {
                TrackStorage::Default
            } else if constants[track] {
                TrackStorage::Constant(constant_data.read_f32_array()?)
            } else {
                let min = range_data.read_f32_array()?;
                let extent = range_data.read_f32_array()?;
                let rate_at = bit_rates.position();
                let rate = bit_rates.read_u8()? as usize;
                let bits = *BIT_RATE_NUM_BITS
                    .get(rate)
                    .ok_or_else(|| malformed(rate_at, format!("bit rate index {rate} out of range")))?;
                TrackStorage::Animated { min, extent, bits }
            };
            storage.push(entry);
        }

        let sample_bits: usize = storage
            .iter()
            .map(|s| match s {
                TrackStorage::Animated { bits, .. } => *bits as usize * 3,
                _ => 0,
            })
            .sum();
        let samples = h.num_samples as usize;
        let data_at = PREFIX_SIZE + usize::try_from(segment.track_data_offset).unwrap_or(0);
        let words = (sample_bits * samples).div_ceil(32);
        if data_at + words * 4 > stream.len() {
            return Err(truncated(data_at, words * 4, stream.len().saturating_sub(data_at)));
        }
        let packed = PackedBits { data: stream, base: data_at };

        let default_scale = if h.default_scale != 0 { 1.0 } else { 0.0 };
        let times: Vec<f32> = (0..samples).map(|i| i as f32).collect();
        let mut sampled: Vec<Vec<[f32; 3]>> = vec![Vec::with_capacity(samples); num_tracks];
        for s in 0..samples {
            let mut bit = s * sample_bits;
            for (track, entry) in storage.iter().enumerate() {
                if let TrackStorage::Animated { min, extent, bits } = *entry {
                    let mut v = [0f32; 3];
                    for c in 0..3 {
                        let raw = packed.read(bit, bits)?;
                        bit += bits as usize;
                        let normalized = if bits == 0 {
                            0.0
                        } else {
                            raw as f64 / ((1u64 << bits) - 1) as f64
                        };
                        v[c] = (normalized * extent[c] as f64 + min[c] as f64) as f32;
                    }
                    sampled[track].push(v);
                }
            }
        }

        let expand = |track: usize, default: [f32; 3]| -> Keys<[f32; 3]> {
            match storage[track] {
                TrackStorage::Default => Keys::constant(default),
                TrackStorage::Constant(v) => Keys::constant(v),
                TrackStorage::Animated { .. } => Keys {
                    times: times.clone(),
                    values: sampled[track].clone(),
                },
            }
        };
        let tracks = (0..h.num_bones as usize)
            .map(|bone| {
                let first = bone * per_bone;
                let rotation = expand(first, [0.0; 3]);
                BoneTrack {
                    rotation: Some(Keys {
                        times: rotation.times,
                        values: rotation.values.into_iter().map(quat_from_xyz).collect(),
                    }),
                    translation: Some(expand(first + 1, [0.0; 3])),
                    scale: (per_bone == 3).then(|| expand(first + 2, [default_scale; 3])),
                }
            })
            .collect();
        Ok(Some(tracks))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::ByteWriter;

    /// Packs values MSB-first into little-endian words.
    #[derive(Default)]
    struct BitWriter {
        bits: Vec<bool>,
    }

    impl BitWriter {
        fn push(&mut self, value: u32, width: u32) {
            for i in (0..width).rev() {
                self.bits.push(value >> i & 1 == 1);
            }
        }

        fn words(&self) -> Vec<u32> {
            self.bits
                .chunks(32)
                .map(|chunk| {
                    chunk
                        .iter()
                        .enumerate()
                        .fold(0u32, |word, (i, &b)| word | (b as u32) << (31 - i))
                })
                .collect()
        }
    }

    /// Two bones, two samples. Bone 0 animates its rotation and has a
    /// constant translation; bone 1 animates its translation. Both use the
    /// default scale.
    pub(crate) fn sample_clip() -> Vec<u8> {
        let mut body = ByteWriter::new();
        let header_at = body.position();
        body.write_zeros(CLIP_HEADER_SIZE);
        let segment_at = body.position();
        body.write_zeros(SEGMENT_HEADER_SIZE);

        let default_at = body.position();
        let mut defaults = BitWriter::default();
        defaults.push(0b001_101, 6);
        defaults.words().iter().for_each(|w| body.write_u32(*w));
        let constant_at = body.position();
        let mut constants = BitWriter::default();
        constants.push(0b011_101, 6);
        constants.words().iter().for_each(|w| body.write_u32(*w));

        let constant_data_at = body.position();
        body.write_f32_slice(&[1.0, 2.0, 3.0]);
        let range_at = body.position();
        body.write_f32_slice(&[0.0, 0.0, 0.0, 0.5, 0.5, 0.5]);
        body.write_f32_slice(&[10.0, 0.0, 0.0, 255.0, 255.0, 255.0]);
        let format_at = body.position();
        body.write_bytes(&[6, 6, 0xCD, 0xCD]);

        let data_at = body.position();
        let mut samples = BitWriter::default();
        for (rotation, translation) in [([0, 0, 0], [0, 1, 2]), ([255, 0, 0], [255, 255, 0])] {
            rotation.iter().chain(&translation).for_each(|v| samples.push(*v, 8));
        }
        samples.words().iter().for_each(|w| body.write_u32(*w));

        let mut header = ByteWriter::new();
        header.write_u16(2);
        header.write_u16(1);
        header.write_bytes(&[QUAT_DROP_W_VARIABLE, VECTOR3_VARIABLE, VECTOR3_VARIABLE]);
        header.write_bytes(&[RANGE_REDUCTION_ALL_TRACKS, RANGE_REDUCTION_NONE, 1, 1, 0]);
        header.write_u32(2);
        header.write_u32(30);
        for offset in [segment_at, default_at, constant_at, constant_data_at, range_at, 0] {
            header.write_u16(offset as u16);
        }
        let mut segment = ByteWriter::new();
        segment.write_u32(2);
        segment.write_i32(48);
        segment.write_i32(format_at as i32);
        segment.write_i32(-1);
        segment.write_i32(data_at as i32);

        let mut body = body.into_inner();
        body[header_at..header_at + CLIP_HEADER_SIZE].copy_from_slice(header.as_slice());
        body[segment_at..segment_at + SEGMENT_HEADER_SIZE].copy_from_slice(segment.as_slice());

        let mut w = ByteWriter::new();
        w.write_u32((PREFIX_SIZE + body.len()) as u32);
        w.write_u32(0xDEAD_BEEF);
        w.write_u32(CLIP_TAG);
        w.write_u16(CLIP_VERSION);
        w.write_u8(0);
        w.write_u8(0);
        w.write_bytes(&body);
        w.into_inner()
    }

    #[test]
    fn test_decode_clip() {
        let stream = sample_clip();
        let clip = CompressedClip::parse(&stream).unwrap();
        assert_eq!(clip.size as usize, stream.len());
        assert_eq!(clip.header.num_samples, 2);
        assert_eq!(clip.header.sample_rate, 30);
        assert!(clip.is_decodable());

        let tracks = clip.decode_tracks(&stream).unwrap().unwrap();
        assert_eq!(tracks.len(), 2);

        let rotation = tracks[0].rotation.as_ref().unwrap();
        assert_eq!(rotation.times, vec![0.0, 1.0]);
        assert_eq!(rotation.values[0], [0.0, 0.0, 0.0, 1.0]);
        assert!((rotation.values[1][0] - 0.5).abs() < 1e-6);
        assert!((rotation.values[1][3] - 0.75f32.sqrt()).abs() < 1e-6);
        assert_eq!(tracks[0].translation.as_ref().unwrap().values, vec![[1.0, 2.0, 3.0]]);
        assert_eq!(tracks[0].scale.as_ref().unwrap().values, vec![[1.0; 3]]);

        let translation = tracks[1].translation.as_ref().unwrap();
        assert_eq!(translation.values, vec![[10.0, 1.0, 2.0], [265.0, 255.0, 0.0]]);
        assert_eq!(tracks[1].rotation.as_ref().unwrap().values, vec![[0.0, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_unsupported_settings_stay_compressed() {
        let mut stream = sample_clip();
        // Segment range reduction on rotations.
        stream[PREFIX_SIZE + 8] = 1;
        let clip = CompressedClip::parse(&stream).unwrap();
        assert!(!clip.is_decodable());
        assert_eq!(clip.decode_tracks(&stream).unwrap(), None);
    }

    #[test]
    fn test_bad_tag() {
        let mut stream = sample_clip();
        stream[8] = 0x11;
        let err = CompressedClip::parse(&stream).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::InvalidMagic { found: 0xAC10_AC11, .. }));
    }

    #[test]
    fn test_truncated_samples() {
        let stream = sample_clip();
        let clip = CompressedClip::parse(&stream).unwrap();
        let err = clip.decode_tracks(&stream[..stream.len() - 4]).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::TruncatedInput { .. }));
    }
}
