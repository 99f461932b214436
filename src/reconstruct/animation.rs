//! Animation tracks <-> [`AnimationData`].

use tracing::debug;

use crate::error::{AssetResult, TableKind, dangling};
use crate::model::{AnimationData, SkeletonData, TrackCompression, TrackData};
use crate::objects::animation::{AnimSequence, BoneTrack, KeyEncoding, TrackFormat};
use crate::property::PropertyValue;
use crate::recognized::Recognized;

/// Playback rate assumed when the stream does not record one.
const DEFAULT_FRAME_RATE: f32 = 30.0;

fn format_name(format: Recognized<TrackFormat, u8>) -> String {
    match format {
        Recognized::Known(f) => format!("{f:?}"),
        Recognized::Unknown(code) => format!("Unknown({code})"),
    }
}

/// Semantic view of a sequence. Bone names are filled in when `skeleton`
/// is given; tracks stay empty for codecs that are kept compressed.
pub fn animation_data(anim: &AnimSequence, skeleton: Option<&SkeletonData>) -> AssetResult<AnimationData> {
    let mut frame_rate = DEFAULT_FRAME_RATE;
    let compression = match anim.key_encoding() {
        Recognized::Known(KeyEncoding::PerTrackCompression) => TrackCompression::PerTrack {
            formats: [
                format_name(anim.translation_format()),
                format_name(anim.rotation_format()),
                format_name(anim.scale_format()),
            ],
        },
        Recognized::Known(k) if k.is_acl() => {
            if let Some(clip) = anim.acl_clip()? {
                frame_rate = clip.header.sample_rate as f32;
            }
            TrackCompression::Acl
        }
        _ => TrackCompression::Other(anim.key_encoding),
    };
    let tracks = match anim.bone_tracks()? {
        Some(tracks) => tracks
            .into_iter()
            .zip(&anim.track_to_skeleton)
            .map(|(track, &bone)| {
                let bone = usize::try_from(bone)
                    .map_err(|_| dangling(TableKind::Bone, bone as i64, skeleton.map_or(0, |s| s.bones.len())))?;
                let bone_name = match skeleton {
                    Some(s) => Some(
                        s.bones
                            .get(bone)
                            .ok_or_else(|| dangling(TableKind::Bone, bone as i64, s.bones.len()))?
                            .name
                            .clone(),
                    ),
                    None => None,
                };
                Ok(TrackData {
                    bone,
                    bone_name,
                    translation: track.translation,
                    rotation: track.rotation,
                    scale: track.scale,
                })
            })
            .collect::<AssetResult<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(AnimationData {
        compression,
        num_frames: anim.num_frames().unwrap_or(0),
        length: anim.sequence_length().unwrap_or(0.0),
        frame_rate,
        rate_scale: anim.rate_scale(),
        tracks,
    })
}

/// Replace the keys of `anim` with the tracks of `data`, re-encoded as
/// per-track `Float96NoW`. Frame count and length are written back to
/// their properties when the sequence has them.
pub fn apply_animation(anim: &mut AnimSequence, data: &AnimationData) -> AssetResult<()> {
    let properties = &mut anim.header.properties;
    if let Some(frames) = properties.get("NumFrames").and_then(PropertyValue::as_i64) {
        if frames != data.num_frames as i64 {
            properties.set("NumFrames", PropertyValue::Int(data.num_frames as i32))?;
        }
    }
    if let Some(length) = properties.get("SequenceLength").and_then(PropertyValue::as_f64) {
        if length as f32 != data.length {
            properties.set("SequenceLength", PropertyValue::Float(data.length))?;
        }
    }
    let tracks: Vec<BoneTrack> = data
        .tracks
        .iter()
        .map(|t| BoneTrack {
            rotation: t.rotation.clone(),
            translation: t.translation.clone(),
            scale: t.scale.clone(),
        })
        .collect();
    let map = data.tracks.iter().map(|t| t.bone as i32).collect();
    anim.set_bone_tracks(&tracks, map)?;
    debug!(tracks = tracks.len(), frames = data.num_frames, "applied animation");
    Ok(())
}
