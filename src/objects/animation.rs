//! `AnimSequence` exports.
//!
//! The compressed stream is kept as bytes and only interpreted on request,
//! so an animation whose codec is not understood still round-trips. Two
//! codecs are read: the engine's per-track compression and ACL 1.1 clips.
//! Replacing the tracks always writes per-track `Float96NoW` keys.

use tracing::{debug, trace};

use crate::data::{ByteReader, ByteWriter};
use crate::error::{AssetResult, malformed, unsupported_version};
use crate::objects::acl::CompressedClip;
use crate::objects::common::StripFlags;
use crate::objects::{DecodeContext, EncodeContext, ExportCodec, ObjectHeader};
use crate::package::tables::PackageIndex;
use crate::property::PropertyList;
use crate::recognized::Recognized;
use crate::version::GameVariant;

/// How the key data of the whole sequence is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KeyEncoding {
    ConstantKeyLerp,
    VariableKeyLerp,
    PerTrackCompression,
    AclDefault,
    AclCustom,
    AclSafe,
}

impl KeyEncoding {
    pub fn from_u8(v: u8) -> Recognized<Self, u8> {
        match v {
            0 => Recognized::Known(KeyEncoding::ConstantKeyLerp),
            1 => Recognized::Known(KeyEncoding::VariableKeyLerp),
            2 => Recognized::Known(KeyEncoding::PerTrackCompression),
            3 => Recognized::Known(KeyEncoding::AclDefault),
            4 => Recognized::Known(KeyEncoding::AclCustom),
            5 => Recognized::Known(KeyEncoding::AclSafe),
            other => Recognized::Unknown(other),
        }
    }

    pub fn is_acl(self) -> bool {
        matches!(self, KeyEncoding::AclDefault | KeyEncoding::AclCustom | KeyEncoding::AclSafe)
    }
}

/// Encoding of one per-track key stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackFormat {
    None,
    Float96NoW,
    Fixed48NoW,
    IntervalFixed32NoW,
    Fixed32NoW,
    Float32NoW,
    Identity,
}

impl TrackFormat {
    const ALL: [TrackFormat; 7] = [
        TrackFormat::None,
        TrackFormat::Float96NoW,
        TrackFormat::Fixed48NoW,
        TrackFormat::IntervalFixed32NoW,
        TrackFormat::Fixed32NoW,
        TrackFormat::Float32NoW,
        TrackFormat::Identity,
    ];

    pub fn from_u8(v: u8) -> Recognized<Self, u8> {
        match Self::ALL.get(v as usize) {
            Some(format) => Recognized::Known(*format),
            None => Recognized::Unknown(v),
        }
    }

    pub fn to_u8(self) -> u8 {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0) as u8
    }
}

/// Keyed values of one channel. Times are in frames.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keys<T> {
    pub times: Vec<f32>,
    pub values: Vec<T>,
}

impl<T> Keys<T> {
    /// A single key at frame 0.
    pub fn constant(value: T) -> Self {
        Self {
            times: vec![0.0],
            values: vec![value],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Animation of one track. A missing channel keeps the reference pose.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneTrack {
    /// Quaternions `x, y, z, w`.
    pub rotation: Option<Keys<[f32; 4]>>,
    pub translation: Option<Keys<[f32; 3]>>,
    pub scale: Option<Keys<[f32; 3]>>,
}

/// Rebuild a unit quaternion from its stored `x, y, z`, with `w >= 0`.
pub fn quat_from_xyz([x, y, z]: [f32; 3]) -> [f32; 4] {
    let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
    [x, y, z, w]
}

/// `x, y, z` of `q` after flipping it into the `w >= 0` hemisphere.
fn quat_to_xyz([x, y, z, w]: [f32; 4]) -> [f32; 3] {
    if w < 0.0 { [-x, -y, -z] } else { [x, y, z] }
}

const PADDING: u8 = 0x55;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Translation,
    Rotation,
    Scale,
}

fn skip_padding(r: &mut ByteReader<'_>) -> AssetResult<()> {
    let pad = (4 - r.position() % 4) % 4;
    let at = r.position();
    if r.read_bytes(pad)?.iter().any(|b| *b != PADDING) {
        return Err(malformed(at, "key stream padding is not 0x55"));
    }
    Ok(())
}

fn write_padding(w: &mut ByteWriter) {
    while w.position() % 4 != 0 {
        w.write_u8(PADDING);
    }
}

fn unpack_interval(packed: u32, channel: Channel) -> [f32; 3] {
    let bits10 = |shift: u32| ((packed >> shift) & 0x3FF) as f32 / 511.0 - 1.0;
    let bits11 = |shift: u32| ((packed >> shift) & 0x7FF) as f32 / 1023.0 - 1.0;
    match channel {
        Channel::Rotation => [bits11(21), bits11(10), bits10(0)],
        _ => [bits10(0), bits11(10), bits11(21)],
    }
}

/// Read the track starting at `offset` in `stream`.
fn read_track(stream: &[u8], offset: usize, num_frames: u32, channel: Channel) -> AssetResult<Keys<[f32; 3]>> {
    let mut r = ByteReader::at(stream, offset)?;
    let packed = r.read_u32()?;
    let format = TrackFormat::from_u8((packed >> 28) as u8);
    let mut mask = (packed >> 24) & 0xF;
    let num_keys = (packed & 0x00FF_FFFF) as usize;
    let has_times = mask & 8 != 0;
    trace!(offset, ?format, mask, num_keys, ?channel, "track");

    let format = match format {
        Recognized::Known(
            f @ (TrackFormat::Float96NoW
            | TrackFormat::Fixed48NoW
            | TrackFormat::IntervalFixed32NoW
            | TrackFormat::Identity),
        ) => f,
        other => {
            return Err(unsupported_version(format!("per-track key format {other:?}")));
        }
    };
    if format == TrackFormat::Float96NoW && mask & 7 == 0 {
        mask |= 7;
    }
    let axes = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0];

    let mut range = [[0f32; 2]; 3];
    if format == TrackFormat::IntervalFixed32NoW {
        for (axis, present) in range.iter_mut().zip(axes) {
            if present {
                *axis = [r.read_f32()?, r.read_f32()?];
            }
        }
    }

    let element = match format {
        TrackFormat::Float96NoW => 4 * axes.iter().filter(|a| **a).count(),
        TrackFormat::Fixed48NoW => 2 * axes.iter().filter(|a| **a).count(),
        TrackFormat::IntervalFixed32NoW => 4,
        _ => 0,
    };
    r.ensure(num_keys.saturating_mul(element))?;
    let mut values = Vec::with_capacity(num_keys);
    for _ in 0..num_keys {
        let mut v = [0f32; 3];
        match format {
            TrackFormat::Float96NoW => {
                for (c, present) in v.iter_mut().zip(axes) {
                    if present {
                        *c = r.read_f32()?;
                    }
                }
            }
            TrackFormat::Fixed48NoW => {
                for (c, present) in v.iter_mut().zip(axes) {
                    if present {
                        let raw = r.read_u16()? as f32;
                        *c = match channel {
                            Channel::Rotation => (raw - 32767.0) / 32767.0,
                            _ => raw - 255.0,
                        };
                    }
                }
            }
            TrackFormat::IntervalFixed32NoW => {
                let unit = unpack_interval(r.read_u32()?, channel);
                for ((c, u), [min, extent]) in v.iter_mut().zip(unit).zip(range) {
                    *c = u * extent + min;
                }
            }
            _ => {
                if channel == Channel::Scale {
                    v = [1.0; 3];
                }
            }
        }
        values.push(v);
    }
    skip_padding(&mut r)?;

    let times = if has_times {
        let times: Vec<f32> = if num_frames < 256 {
            r.read_bytes(num_keys)?.iter().map(|t| *t as f32).collect()
        } else {
            r.read_vec(num_keys, |r| Ok(r.read_u16()? as f32))?
        };
        skip_padding(&mut r)?;
        times
    } else {
        uniform_times(num_keys, num_frames)
    };
    Ok(Keys { times, values })
}

/// Key times for `n` keys spread evenly over the sequence.
fn uniform_times(n: usize, num_frames: u32) -> Vec<f32> {
    if n <= 1 {
        return vec![0.0; n];
    }
    let interval = num_frames as f32 / (n - 1) as f32;
    (0..n).map(|i| interval * i as f32).collect()
}

fn write_float96(w: &mut ByteWriter, times: &[f32], values: &[[f32; 3]], num_frames: u32) {
    let uniform = uniform_times(values.len(), num_frames);
    let has_times = times.len() == values.len()
        && times.iter().zip(&uniform).any(|(t, u)| (t - u).abs() > 1e-3);
    let mask: u32 = if has_times { 0xF } else { 7 };
    let format = TrackFormat::Float96NoW.to_u8() as u32;
    w.write_u32(format << 28 | mask << 24 | values.len() as u32);
    values.iter().for_each(|v| w.write_f32_slice(v));
    write_padding(w);
    if has_times {
        for t in times {
            let frame = t.round().max(0.0);
            if num_frames < 256 {
                w.write_u8(frame.min(255.0) as u8);
            } else {
                w.write_u16(frame.min(65535.0) as u16);
            }
        }
        write_padding(w);
    }
}

/// An `AnimSequence` export.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimSequence {
    pub header: ObjectHeader,
    pub raw_data_guid: [u8; 16],
    pub strip: StripFlags,
    pub serialize_compressed: u32,
    pub key_encoding: u8,
    /// Translation, rotation and scale formats.
    pub formats: [u8; 3],
    /// Two entries per track, translation then rotation; `-1` for none.
    pub track_offsets: Vec<i32>,
    pub scale_offsets: Vec<i32>,
    pub scale_strip_size: i32,
    pub track_to_skeleton: Vec<i32>,
    pub curves: PropertyList,
    pub raw_size: u32,
    /// Stored after the data size, except by the game variants.
    pub reserved: Option<u32>,
    pub stream: Vec<u8>,
    pub trailing: Vec<u8>,
}

impl AnimSequence {
    pub fn key_encoding(&self) -> Recognized<KeyEncoding, u8> {
        KeyEncoding::from_u8(self.key_encoding)
    }

    pub fn is_acl(&self) -> bool {
        self.key_encoding().known().is_some_and(|k| k.is_acl())
    }

    pub fn translation_format(&self) -> Recognized<TrackFormat, u8> {
        TrackFormat::from_u8(self.formats[0])
    }

    pub fn rotation_format(&self) -> Recognized<TrackFormat, u8> {
        TrackFormat::from_u8(self.formats[1])
    }

    pub fn scale_format(&self) -> Recognized<TrackFormat, u8> {
        TrackFormat::from_u8(self.formats[2])
    }

    pub fn num_frames(&self) -> Option<u32> {
        let properties = &self.header.properties;
        properties
            .get("NumFrames")
            .or_else(|| properties.get("NumberOfSampledKeys"))
            .and_then(|v| v.as_i64())
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Length in seconds.
    pub fn sequence_length(&self) -> Option<f32> {
        self.header
            .properties
            .get("SequenceLength")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
    }

    pub fn rate_scale(&self) -> f32 {
        self.header
            .properties
            .get("RateScale")
            .and_then(|v| v.as_f64())
            .map_or(1.0, |v| v as f32)
    }

    pub fn skeleton(&self) -> Option<PackageIndex> {
        self.header.properties.get("Skeleton").and_then(|v| v.as_object())
    }

    pub fn num_tracks(&self) -> usize {
        self.track_to_skeleton.len()
    }

    /// The ACL clip headers, for ACL-encoded sequences.
    pub fn acl_clip(&self) -> AssetResult<Option<CompressedClip>> {
        if !self.is_acl() {
            return Ok(None);
        }
        CompressedClip::parse(&self.stream).map(Some)
    }

    /// Decoded keys per track, in `track_to_skeleton` order.
    ///
    /// `None` when the stream uses a codec that is kept compressed.
    pub fn bone_tracks(&self) -> AssetResult<Option<Vec<BoneTrack>>> {
        match self.key_encoding() {
            Recognized::Known(KeyEncoding::PerTrackCompression) => self.per_track_tracks().map(Some),
            Recognized::Known(k) if k.is_acl() => {
                let clip = CompressedClip::parse(&self.stream)?;
                clip.decode_tracks(&self.stream)
            }
            other => {
                debug!(encoding = ?other, "animation codec kept compressed");
                Ok(None)
            }
        }
    }

    fn per_track_tracks(&self) -> AssetResult<Vec<BoneTrack>> {
        if self.track_offsets.len() % 2 != 0 {
            return Err(malformed(0, format!("{} track offsets is not two per track", self.track_offsets.len())));
        }
        let num_tracks = self.track_offsets.len() / 2;
        let max_keys = || {
            self.track_offsets
                .iter()
                .filter_map(|o| usize::try_from(*o).ok())
                .filter_map(|o| self.stream.get(o..o + 4))
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
                .max()
                .unwrap_or(1)
        };
        let num_frames = self.num_frames().unwrap_or_else(max_keys);
        let strip = usize::try_from(self.scale_strip_size).unwrap_or(1).max(1);
        let read = |offset: i32, channel: Channel| -> AssetResult<Option<Keys<[f32; 3]>>> {
            match usize::try_from(offset) {
                Ok(offset) => read_track(&self.stream, offset, num_frames, channel).map(Some),
                Err(_) => Ok(None),
            }
        };
        (0..num_tracks)
            .map(|i| {
                let translation = read(self.track_offsets[2 * i], Channel::Translation)?;
                let rotation = read(self.track_offsets[2 * i + 1], Channel::Rotation)?;
                let scale = match self.scale_offsets.get(i * strip) {
                    Some(offset) => read(*offset, Channel::Scale)?,
                    None => None,
                };
                Ok(BoneTrack {
                    rotation: rotation.map(|k| Keys {
                        times: k.times,
                        values: k.values.into_iter().map(quat_from_xyz).collect(),
                    }),
                    translation,
                    scale,
                })
            })
            .collect()
    }

    /// Replace the animation with `tracks`, one per entry of
    /// `track_to_skeleton`, stored as per-track `Float96NoW` keys.
    pub fn set_bone_tracks(&mut self, tracks: &[BoneTrack], track_to_skeleton: Vec<i32>) -> AssetResult<()> {
        if tracks.len() != track_to_skeleton.len() {
            return Err(malformed(
                0,
                format!("{} tracks for {} skeleton mappings", tracks.len(), track_to_skeleton.len()),
            ));
        }
        let num_frames = self.num_frames().unwrap_or_else(|| {
            tracks
                .iter()
                .filter_map(|t| t.translation.as_ref().map(Keys::len))
                .max()
                .unwrap_or(1) as u32
        });
        let has_scale = tracks.iter().any(|t| t.scale.is_some());
        let mut w = ByteWriter::new();
        let mut track_offsets = Vec::with_capacity(tracks.len() * 2);
        let mut scale_offsets = Vec::new();
        let mut raw_size = 0usize;
        for track in tracks {
            match &track.translation {
                Some(keys) => {
                    track_offsets.push(w.position() as i32);
                    write_float96(&mut w, &keys.times, &keys.values, num_frames);
                    raw_size += 12 * keys.len();
                }
                None => track_offsets.push(-1),
            }
            match &track.rotation {
                Some(keys) => {
                    track_offsets.push(w.position() as i32);
                    let xyz: Vec<[f32; 3]> = keys.values.iter().copied().map(quat_to_xyz).collect();
                    write_float96(&mut w, &keys.times, &xyz, num_frames);
                    raw_size += 16 * keys.len();
                }
                None => track_offsets.push(-1),
            }
            if has_scale {
                match &track.scale {
                    Some(keys) => {
                        scale_offsets.push(w.position() as i32);
                        write_float96(&mut w, &keys.times, &keys.values, num_frames);
                        raw_size += 12 * keys.len();
                    }
                    None => scale_offsets.push(-1),
                }
            }
        }
        let float96 = TrackFormat::Float96NoW.to_u8();
        self.key_encoding = 2;
        self.formats = [float96; 3];
        self.track_offsets = track_offsets;
        self.scale_offsets = scale_offsets;
        if has_scale {
            self.scale_strip_size = 1;
        }
        self.track_to_skeleton = track_to_skeleton;
        self.raw_size = raw_size as u32;
        self.stream = w.into_inner();
        debug!(tracks = tracks.len(), bytes = self.stream.len(), "re-encoded animation as per-track keys");
        Ok(())
    }
}

impl ExportCodec for AnimSequence {
    fn decode(payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<Self> {
        if ctx.version.is_ue5() || ctx.version.is_game(GameVariant::Ff7r) {
            return Err(unsupported_version(format!("animation data layout of {}", ctx.version)));
        }
        let mut r = ByteReader::new(payload);
        let header = ObjectHeader::parse(&mut r, ctx)?;
        let raw_data_guid = r.read_guid()?;
        let strip = StripFlags::read(&mut r)?;
        let serialize_compressed = r.read_u32()?;
        let [key_encoding, translation, rotation, scale] = r.read_array()?;
        let track_offsets = r.read_i32_array()?;
        let scale_offsets = r.read_i32_array()?;
        let scale_strip_size = r.read_i32()?;
        let track_to_skeleton = r.read_i32_array()?;
        let curves = PropertyList::parse(&mut r, ctx.properties())?;
        let raw_size = r.read_u32()?;
        let data_size = r.read_u32()? as usize;
        let reserved = if ctx.version.game().is_some() { None } else { Some(r.read_u32()?) };
        let stream = r.read_bytes(data_size)?.to_vec();
        debug!(
            tracks = track_to_skeleton.len(),
            encoding = key_encoding,
            bytes = data_size,
            "decoded animation"
        );
        Ok(Self {
            header,
            raw_data_guid,
            strip,
            serialize_compressed,
            key_encoding,
            formats: [translation, rotation, scale],
            track_offsets,
            scale_offsets,
            scale_strip_size,
            track_to_skeleton,
            curves,
            raw_size,
            reserved,
            stream,
            trailing: r.rest().to_vec(),
        })
    }

    fn encode(&self, _ctx: &mut EncodeContext) -> AssetResult<Vec<u8>> {
        let mut w = ByteWriter::with_capacity(self.stream.len() + 256);
        self.header.write(&mut w);
        w.write_guid(&self.raw_data_guid);
        self.strip.write(&mut w);
        w.write_u32(self.serialize_compressed);
        w.write_u8(self.key_encoding);
        w.write_bytes(&self.formats);
        w.write_i32_array(&self.track_offsets);
        w.write_i32_array(&self.scale_offsets);
        w.write_i32(self.scale_strip_size);
        w.write_i32_array(&self.track_to_skeleton);
        self.curves.write(&mut w);
        w.write_u32(self.raw_size);
        w.write_u32(self.stream.len() as u32);
        if let Some(reserved) = self.reserved {
            w.write_u32(reserved);
        }
        w.write_bytes(&self.stream);
        w.write_bytes(&self.trailing);
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;
    use crate::test_support::{name_table, sample_animation};
    use crate::version::EngineVersion;

    fn round_trip(anim: &AnimSequence, names: &crate::package::names::NameTable) -> AnimSequence {
        let payload = anim.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap();
        let decoded = AnimSequence::decode(&payload, &DecodeContext::new(names, EngineVersion::UE4_27)).unwrap();
        assert_eq!(decoded.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap(), payload);
        decoded
    }

    #[test]
    fn test_float96_tracks_round_trip() {
        let mut names = name_table(&["None"]);
        let anim = sample_animation(&mut names, 3);
        let decoded = round_trip(&anim, &names);
        assert_eq!(decoded.num_frames(), Some(3));
        assert_eq!(decoded.sequence_length(), Some(0.1));
        assert_eq!(decoded.rate_scale(), 1.0);
        assert_eq!(decoded.track_to_skeleton, vec![0, 2]);
        assert!(decoded.skeleton().is_some());

        let tracks = decoded.bone_tracks().unwrap().unwrap();
        assert_eq!(tracks.len(), 2);
        let translation = tracks[0].translation.as_ref().unwrap();
        assert_eq!(translation.values, vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        assert_eq!(translation.times, vec![0.0, 1.5, 3.0]);
        assert!(tracks[0].rotation.is_none());
        let rotation = tracks[1].rotation.as_ref().unwrap();
        assert_eq!(rotation.values, vec![[0.0, 0.0, 0.0, 1.0]]);
        assert_eq!(tracks[1].scale.as_ref().unwrap().values, vec![[2.0, 2.0, 2.0]]);
        assert_eq!(decoded.scale_offsets.len(), 2);
        assert_eq!(decoded.scale_offsets[0], -1);
    }

    #[test]
    fn test_non_uniform_times_are_stored() {
        let mut names = name_table(&["None"]);
        let mut anim = sample_animation(&mut names, 3);
        let track = BoneTrack {
            translation: Some(Keys {
                times: vec![0.0, 2.0],
                values: vec![[0.0; 3], [4.0, 5.0, 6.0]],
            }),
            // Negative w is flipped into the positive hemisphere.
            rotation: Some(Keys::constant([0.0, 0.0, -0.6, -0.8])),
            scale: None,
        };
        anim.set_bone_tracks(&[track], vec![1]).unwrap();
        assert!(anim.scale_offsets.is_empty());
        // Packed info, two keys, two u8 times padded to four bytes.
        assert_eq!(&anim.stream[..4], &(0x1F00_0002u32).to_le_bytes());
        assert_eq!(&anim.stream[28..32], &[0, 2, 0x55, 0x55]);

        let decoded = round_trip(&anim, &names);
        let tracks = decoded.bone_tracks().unwrap().unwrap();
        assert_eq!(tracks[0].translation.as_ref().unwrap().times, vec![0.0, 2.0]);
        let q = tracks[0].rotation.as_ref().unwrap().values[0];
        assert_eq!(&q[..3], &[0.0, 0.0, 0.6]);
        assert!((q[3] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_and_interval_tracks() {
        let mut names = name_table(&["None"]);
        let mut anim = sample_animation(&mut names, 3);
        let mut w = ByteWriter::new();
        // Fixed48 translation, x and z only, two keys.
        w.write_u32(2 << 28 | 0b101 << 24 | 2);
        for v in [255u16, 256, 260, 255] {
            w.write_u16(v);
        }
        let rotation_at = w.position();
        // IntervalFixed32 rotation, all axes, one key.
        w.write_u32(3 << 28 | 7 << 24 | 1);
        w.write_f32_slice(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        w.write_u32(1023 << 21 | 1023 << 10 | 511);
        anim.key_encoding = 2;
        anim.formats = [2, 3, 1];
        anim.track_offsets = vec![0, rotation_at as i32];
        anim.scale_offsets = Vec::new();
        anim.track_to_skeleton = vec![0];
        anim.stream = w.into_inner();

        let tracks = anim.bone_tracks().unwrap().unwrap();
        let translation = tracks[0].translation.as_ref().unwrap();
        assert_eq!(translation.values, vec![[0.0, 0.0, 1.0], [5.0, 0.0, 0.0]]);
        assert_eq!(translation.times, vec![0.0, 3.0]);
        let rotation = tracks[0].rotation.as_ref().unwrap();
        assert_eq!(rotation.values, vec![[0.0, 0.0, 0.0, 1.0]]);
        assert_eq!(anim.translation_format(), Recognized::Known(TrackFormat::Fixed48NoW));
        assert_eq!(anim.rotation_format(), Recognized::Known(TrackFormat::IntervalFixed32NoW));
    }

    #[test]
    fn test_unsupported_track_format() {
        let mut names = name_table(&["None"]);
        let mut anim = sample_animation(&mut names, 3);
        anim.stream[3] = 0x50;
        let err = anim.bone_tracks().unwrap_err();
        assert!(matches!(err.current_context(), AssetError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_acl_stream() {
        let mut names = name_table(&["None"]);
        let mut anim = sample_animation(&mut names, 2);
        anim.key_encoding = 3;
        anim.stream = crate::objects::acl::tests::sample_clip();
        anim.track_offsets.clear();
        anim.scale_offsets.clear();
        let decoded = round_trip(&anim, &names);
        assert!(decoded.is_acl());
        assert_eq!(decoded.acl_clip().unwrap().unwrap().header.num_bones, 2);
        let tracks = decoded.bone_tracks().unwrap().unwrap();
        assert_eq!(tracks[1].translation.as_ref().unwrap().values[1], [265.0, 255.0, 0.0]);
    }

    #[test]
    fn test_other_codecs_stay_compressed() {
        let mut names = name_table(&["None"]);
        let mut anim = sample_animation(&mut names, 3);
        anim.key_encoding = 0;
        assert_eq!(anim.bone_tracks().unwrap(), None);
        anim.key_encoding = 9;
        assert_eq!(anim.key_encoding(), Recognized::Unknown(9));
        assert_eq!(anim.bone_tracks().unwrap(), None);
    }

    #[test]
    fn test_game_variant_layouts() {
        let mut names = name_table(&["None"]);
        let mut anim = sample_animation(&mut names, 3);
        let stock = anim.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap();
        anim.reserved = None;
        let payload = anim.encode(&mut EncodeContext::new(EngineVersion::KH3, 0)).unwrap();
        assert_eq!(payload.len() + 4, stock.len());
        let decoded = AnimSequence::decode(&payload, &DecodeContext::new(&names, EngineVersion::KH3)).unwrap();
        assert_eq!(decoded.reserved, None);
        assert_eq!(decoded.stream, anim.stream);
        assert_eq!(decoded.encode(&mut EncodeContext::new(EngineVersion::KH3, 0)).unwrap(), payload);
        assert_eq!(decoded.bone_tracks().unwrap().unwrap().len(), 2);

        let err = AnimSequence::decode(&payload, &DecodeContext::new(&names, EngineVersion::FF7R)).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_ue5_layout_is_unsupported() {
        let mut names = name_table(&["None"]);
        let anim = sample_animation(&mut names, 3);
        let payload = anim.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap();
        let err = AnimSequence::decode(&payload, &DecodeContext::new(&names, EngineVersion::UE5_0)).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::UnsupportedVersion { .. }));
    }
}
