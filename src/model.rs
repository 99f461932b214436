//! Plain data handed to the host application and accepted back from it.
//!
//! Nothing in here refers to package tables or encodings: names are
//! resolved strings, bones are indices into [`SkeletonData::bones`], and
//! every buffer is owned so the host can edit a copy freely.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use crate::objects::animation::Keys;

/// One material slot of a mesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaterialData {
    pub slot_name: String,
    /// Object path of the material, if the slot references one.
    pub material: Option<String>,
}

/// A run of triangles within a LOD's index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SectionData {
    pub material_index: u32,
    pub first_index: u32,
    pub num_triangles: u32,
}

impl SectionData {
    pub fn index_range(&self) -> std::ops::Range<usize> {
        let start = self.first_index as usize;
        start..start + self.num_triangles as usize * 3
    }
}

/// A bone influence on one vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Influence {
    /// Index into the skeleton's bones.
    pub bone: u16,
    pub weight: f32,
}

/// Geometry of one level of detail.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LodData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// Tangent with the binormal sign in `w`.
    pub tangents: Vec<[f32; 4]>,
    /// One entry per UV channel, each with one UV per vertex.
    pub uvs: Vec<Vec<[f32; 2]>>,
    /// Empty when the LOD has no vertex colors.
    pub colors: Vec<[u8; 4]>,
    /// Per-vertex influences; empty for static meshes.
    pub influences: Vec<Vec<Influence>>,
    /// Triangle list.
    pub indices: Vec<u32>,
    pub sections: Vec<SectionData>,
}

impl LodData {
    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_skinned(&self) -> bool {
        !self.influences.is_empty()
    }
}

/// A whole mesh. The skeleton is present for skeletal meshes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeshData {
    pub lods: Vec<LodData>,
    pub materials: Vec<MaterialData>,
    pub skeleton: Option<SkeletonData>,
}

/// Geometry of a single section with its vertices compacted and its
/// indices rebased to them.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SectionMesh {
    pub material_index: u32,
    /// LOD vertex index of each section vertex.
    pub source_vertices: Vec<u32>,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    pub uvs: Vec<Vec<[f32; 2]>>,
    pub colors: Vec<[u8; 4]>,
    pub influences: Vec<Vec<Influence>>,
    pub indices: Vec<u32>,
}

/// Local transform relative to the parent bone.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform {
    /// Quaternion `x, y, z, w`.
    pub rotation: [f64; 4],
    pub translation: [f64; 3],
    pub scale: [f64; 3],
}

impl Transform {
    pub const IDENTITY: Self = Self {
        rotation: [0.0, 0.0, 0.0, 1.0],
        translation: [0.0; 3],
        scale: [1.0; 3],
    };

    /// `self` applied after `local`: the transform of a child whose local
    /// transform is `local` under a parent at `self`.
    pub fn compose(&self, local: &Transform) -> Transform {
        let scaled = [
            local.translation[0] * self.scale[0],
            local.translation[1] * self.scale[1],
            local.translation[2] * self.scale[2],
        ];
        let rotated = rotate(self.rotation, scaled);
        Transform {
            rotation: quat_mul(self.rotation, local.rotation),
            translation: [
                self.translation[0] + rotated[0],
                self.translation[1] + rotated[1],
                self.translation[2] + rotated[2],
            ],
            scale: [
                self.scale[0] * local.scale[0],
                self.scale[1] * local.scale[1],
                self.scale[2] * local.scale[2],
            ],
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn quat_mul([ax, ay, az, aw]: [f64; 4], [bx, by, bz, bw]: [f64; 4]) -> [f64; 4] {
    [
        aw * bx + ax * bw + ay * bz - az * by,
        aw * by - ax * bz + ay * bw + az * bx,
        aw * bz + ax * by - ay * bx + az * bw,
        aw * bw - ax * bx - ay * by - az * bz,
    ]
}

fn rotate(q: [f64; 4], v: [f64; 3]) -> [f64; 3] {
    let p = quat_mul(quat_mul(q, [v[0], v[1], v[2], 0.0]), [-q[0], -q[1], -q[2], q[3]]);
    [p[0], p[1], p[2]]
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoneData {
    pub name: String,
    /// `None` for a root bone.
    pub parent: Option<usize>,
    pub local: Transform,
    /// Translation retargeting mode, when the asset records one.
    pub retarget: Option<String>,
}

/// Bones in declaration order. Parents may be declared after their
/// children; see [`crate::reconstruct::BoneTree`] for a validated view.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkeletonData {
    pub bones: Vec<BoneData>,
}

impl SkeletonData {
    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.bones.iter().map(|b| b.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MipData {
    pub width: u32,
    pub height: u32,
    /// Compressed pixel blocks, as stored.
    pub data: Vec<u8>,
}

/// Texture payload for an external pixel-format converter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextureData {
    /// Engine pixel format name, such as `PF_DXT5`.
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub cubemap: bool,
    pub slices: u32,
    pub srgb: bool,
    /// Largest first.
    pub mips: Vec<MipData>,
}

/// How an animation's keys were stored.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TrackCompression {
    /// Engine per-track compression with the translation, rotation and
    /// scale formats.
    PerTrack { formats: [String; 3] },
    Acl,
    /// A codec kept compressed, by its stored code.
    Other(u8),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackData {
    /// Index into the skeleton's bones.
    pub bone: usize,
    pub bone_name: Option<String>,
    pub translation: Option<Keys<[f32; 3]>>,
    /// Quaternions `x, y, z, w`.
    pub rotation: Option<Keys<[f32; 4]>>,
    pub scale: Option<Keys<[f32; 3]>>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnimationData {
    pub compression: TrackCompression,
    pub num_frames: u32,
    /// Seconds.
    pub length: f32,
    pub frame_rate: f32,
    pub rate_scale: f32,
    /// Empty when the keys stayed compressed.
    pub tracks: Vec<TrackData>,
}
