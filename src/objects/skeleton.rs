//! Reference skeleton and the `Skeleton` asset.

use crate::data::{ByteReader, ByteWriter};
use crate::error::{AssetResult, malformed};
use crate::objects::{DecodeContext, EncodeContext, ExportCodec, ObjectHeader};
use crate::package::names::{FName, NameTable};
use crate::property::PropertyValue;
use crate::version::EngineVersion;

#[derive(Debug, Clone, PartialEq)]
pub struct BoneInfo {
    pub name: FName,
    /// Index of the parent bone, `-1` for a root.
    pub parent: i32,
}

/// Local transform of a bone in the reference pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePose {
    /// Quaternion `x, y, z, w`.
    pub rotation: [f64; 4],
    pub translation: [f64; 3],
    pub scale: [f64; 3],
}

impl BonePose {
    pub const IDENTITY: Self = Self {
        rotation: [0.0, 0.0, 0.0, 1.0],
        translation: [0.0; 3],
        scale: [1.0; 3],
    };

    fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let mut values = [0f64; 10];
        for v in values.iter_mut() {
            *v = if version.is_ue5() {
                r.read_f64()?
            } else {
                r.read_f32()? as f64
            };
        }
        Ok(Self {
            rotation: [values[0], values[1], values[2], values[3]],
            translation: [values[4], values[5], values[6]],
            scale: [values[7], values[8], values[9]],
        })
    }

    fn write(&self, w: &mut ByteWriter, version: EngineVersion) {
        let values = self.rotation.iter().chain(&self.translation).chain(&self.scale);
        for &v in values {
            if version.is_ue5() {
                w.write_f64(v);
            } else {
                w.write_f32(v as f32);
            }
        }
    }
}

/// Bones, their reference pose, and the name lookup the engine stores
/// alongside them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceSkeleton {
    pub bones: Vec<BoneInfo>,
    pub poses: Vec<BonePose>,
    pub name_to_index: Vec<(FName, i32)>,
}

impl ReferenceSkeleton {
    pub fn read(r: &mut ByteReader<'_>, names: &NameTable, version: EngineVersion) -> AssetResult<Self> {
        let bones = r.read_counted(12, |r| {
            Ok(BoneInfo {
                name: names.read_fname(r)?,
                parent: r.read_i32()?,
            })
        })?;
        let offset = r.position();
        let pose_size = if version.is_ue5() { 80 } else { 40 };
        let poses = r.read_counted(pose_size, |r| BonePose::read(r, version))?;
        if poses.len() != bones.len() {
            return Err(malformed(
                offset,
                format!("{} bone poses for {} bones", poses.len(), bones.len()),
            ));
        }
        let name_to_index = r.read_counted(12, |r| Ok((names.read_fname(r)?, r.read_i32()?)))?;
        Ok(Self {
            bones,
            poses,
            name_to_index,
        })
    }

    pub fn write(&self, w: &mut ByteWriter, version: EngineVersion) {
        w.write_count(self.bones.len());
        for bone in &self.bones {
            bone.name.write(w);
            w.write_i32(bone.parent);
        }
        w.write_count(self.poses.len());
        for pose in &self.poses {
            pose.write(w, version);
        }
        w.write_count(self.name_to_index.len());
        for (name, index) in &self.name_to_index {
            name.write(w);
            w.write_i32(*index);
        }
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == *name)
    }

    /// Replace every bone, regenerating the name lookup in bone order.
    pub fn set_bones(&mut self, bones: Vec<BoneInfo>, poses: Vec<BonePose>) {
        self.name_to_index = bones
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.clone(), i as i32))
            .collect();
        self.bones = bones;
        self.poses = poses;
    }
}

/// A `Skeleton` export.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    pub header: ObjectHeader,
    pub reference: ReferenceSkeleton,
    pub trailing: Vec<u8>,
}

impl Skeleton {
    /// Translation retargeting mode per bone, from the `BoneTree` property.
    pub fn retarget_modes(&self) -> Vec<Option<String>> {
        let nodes = self
            .header
            .properties
            .get("BoneTree")
            .and_then(PropertyValue::as_array)
            .unwrap_or_default();
        (0..self.reference.len())
            .map(|i| {
                nodes
                    .get(i)
                    .and_then(PropertyValue::as_properties)
                    .and_then(|node| node.get("TranslationRetargetingMode"))
                    .and_then(PropertyValue::as_name)
                    .map(|mode| mode.text().rsplit("::").next().unwrap_or(mode.text()).to_string())
            })
            .collect()
    }
}

impl ExportCodec for Skeleton {
    fn decode(payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<Self> {
        let mut r = ByteReader::new(payload);
        let header = ObjectHeader::parse(&mut r, ctx)?;
        let reference = ReferenceSkeleton::read(&mut r, ctx.names, ctx.version)?;
        Ok(Self {
            header,
            reference,
            trailing: r.rest().to_vec(),
        })
    }

    fn encode(&self, ctx: &mut EncodeContext) -> AssetResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.header.write(&mut w);
        self.reference.write(&mut w, ctx.version);
        w.write_bytes(&self.trailing);
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{PropertyWriter, name_table, sample_reference};

    #[test]
    fn test_reference_skeleton_widths() {
        for (version, pose_size) in [(EngineVersion::UE4_26, 40), (EngineVersion::UE5_0, 80)] {
            let mut names = name_table(&["None"]);
            let reference = sample_reference(&mut names, &[-1, 0, 0]);
            let mut w = ByteWriter::new();
            reference.write(&mut w, version);
            assert_eq!(w.position(), 4 + 3 * 12 + 4 + 3 * pose_size + 4 + 3 * 12);
            let parsed = ReferenceSkeleton::read(&mut ByteReader::new(w.as_slice()), &names, version).unwrap();
            assert_eq!(parsed, reference);
            assert_eq!(parsed.find_bone("bone_2"), Some(2));
        }
    }

    #[test]
    fn test_skeleton_asset_and_retarget_modes() {
        let mut names = name_table(&["None"]);
        let nodes: Vec<Vec<u8>> = ["EBoneTranslationRetargetingMode::Animation", "EBoneTranslationRetargetingMode::Skeleton"]
            .iter()
            .map(|mode| {
                PropertyWriter::new(&mut names)
                    .enum_value("TranslationRetargetingMode", "EBoneTranslationRetargetingMode", mode)
                    .finish()
            })
            .collect();
        let mut payload = PropertyWriter::new(&mut names)
            .struct_array("BoneTree", "BoneNode", &nodes)
            .finish();
        payload.extend_from_slice(&0u32.to_le_bytes());
        let reference = sample_reference(&mut names, &[-1, 0]);
        let mut w = ByteWriter::new();
        reference.write(&mut w, EngineVersion::UE4_27);
        payload.extend_from_slice(w.as_slice());
        payload.extend_from_slice(&[9, 9, 9]);

        let ctx = DecodeContext::new(&names, EngineVersion::UE4_27);
        let skeleton = Skeleton::decode(&payload, &ctx).unwrap();
        assert_eq!(skeleton.reference, reference);
        assert_eq!(skeleton.trailing, vec![9, 9, 9]);
        assert_eq!(
            skeleton.retarget_modes(),
            vec![Some("Animation".to_string()), Some("Skeleton".to_string())]
        );

        let mut out = EncodeContext::new(EngineVersion::UE4_27, 0);
        assert_eq!(skeleton.encode(&mut out).unwrap(), payload);
    }
}
