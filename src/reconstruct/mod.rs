//! Conversion between decoded objects and the plain data in [`crate::model`].
//!
//! Each submodule has a `*_data` function that reads an object into model
//! data and an `apply_*` function that writes edited model data back. The
//! write side validates the whole input before touching the object.

pub mod animation;
pub mod mesh;
pub mod skeleton;
pub mod texture;

pub use animation::{animation_data, apply_animation};
pub use mesh::{
    BoneRemap, apply_skeletal_mesh, apply_static_mesh, section_geometry, skeletal_mesh_data, static_mesh_data,
};
pub use skeleton::{BoneTree, apply_skeleton, skeleton_data};
pub use texture::{apply_texture, texture_data};

use crate::error::{AssetResult, class_mismatch};
use crate::model::{AnimationData, MeshData, SkeletonData, TextureData};
use crate::objects::DecodedExport;
use crate::package::AssetFile;
use crate::package::tables::PackageIndex;

impl AssetFile {
    fn decoded_as(&self, index: usize, expected: &str) -> AssetResult<DecodedExport> {
        let decoded = self.decode_export(index)?;
        if let DecodedExport::Generic(generic) = &decoded {
            // Non-strict fallback: the class is known but its layout is not.
            return Err(class_mismatch(expected, generic.class.clone()));
        }
        Ok(decoded)
    }

    /// Geometry of a static or skeletal mesh export, with material paths
    /// resolved through the package's tables.
    pub fn mesh_data(&self, index: usize) -> AssetResult<MeshData> {
        let resolve = |material: PackageIndex| self.object_path(material).ok().filter(|p| !p.is_empty());
        let version = self.engine_version();
        match self.decoded_as(index, "StaticMesh or SkeletalMesh")? {
            DecodedExport::StaticMesh(mesh) => static_mesh_data(&mesh, version, &resolve),
            DecodedExport::SkeletalMesh(mesh) => skeletal_mesh_data(&mesh, version, &resolve),
            other => Err(class_mismatch("StaticMesh or SkeletalMesh", other.class_name())),
        }
    }

    /// Bone hierarchy of a `Skeleton` export, or the reference skeleton
    /// embedded in a skeletal mesh.
    pub fn skeleton_data(&self, index: usize) -> AssetResult<SkeletonData> {
        match self.decoded_as(index, "Skeleton")? {
            DecodedExport::Skeleton(skeleton) => skeleton_data(&skeleton.reference, &skeleton.retarget_modes()),
            DecodedExport::SkeletalMesh(mesh) => skeleton_data(&mesh.reference, &[]),
            other => Err(class_mismatch("Skeleton", other.class_name())),
        }
    }

    pub fn texture_data(&self, index: usize) -> AssetResult<TextureData> {
        match self.decoded_as(index, "Texture2D")? {
            DecodedExport::Texture(texture) => texture_data(&texture),
            other => Err(class_mismatch("Texture2D", other.class_name())),
        }
    }

    /// Keys of an `AnimSequence` export. The skeleton lives in another
    /// package, so bone names are only filled in when the caller passes it.
    pub fn animation_data(&self, index: usize, skeleton: Option<&SkeletonData>) -> AssetResult<AnimationData> {
        match self.decoded_as(index, "AnimSequence")? {
            DecodedExport::Animation(anim) => animation_data(&anim, skeleton),
            other => Err(class_mismatch("AnimSequence", other.class_name())),
        }
    }
}
