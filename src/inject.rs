//! Replacing export payloads in an existing package.
//!
//! An injection pass moves through four states, each a distinct type:
//!
//! * [`Loaded`]: a working copy of the parsed package.
//! * [`Patched`]: one export's payload replaced by re-encoded bytes.
//! * [`Relinked`]: export offsets and sizes recomputed for the new payload.
//! * [`Emitted`]: the new file bytes.
//!
//! The caller's [`AssetFile`] is never modified, so a pass that fails at any
//! step leaves nothing behind. Several exports are injected by running one
//! pass per export in export-table order, each pass starting from the
//! previous pass's result (see [`inject_all`]).
//!
//! ```ignore
//! let output = Injection::new(&asset)
//!     .patch_mesh(index, &edited)?
//!     .relink()?
//!     .emit()
//!     .into_output();
//! ```

use itertools::Itertools;
use tracing::{debug, info};

use crate::error::{Annotate, AssetError, AssetResult, class_mismatch, unsupported_version};
use crate::model::{AnimationData, MeshData, SkeletonData, TextureData};
use crate::objects::{AssetKind, DecodeContext, DecodedExport, EncodeContext, texture, truncate_array_property};
use crate::package::names::NameTable;
use crate::package::{AssetFile, SerializedAsset, check_export_offsets};
use crate::reconstruct::{apply_animation, apply_skeletal_mesh, apply_skeleton, apply_static_mesh, apply_texture};

/// Working copy as parsed, with the offsets every export had.
#[derive(Debug)]
pub struct Loaded {
    offsets: Vec<i64>,
}

/// One payload replaced; offsets not yet recomputed.
#[derive(Debug)]
pub struct Patched {
    offsets: Vec<i64>,
    index: usize,
    size_delta: i64,
}

/// Export table consistent with the payloads.
#[derive(Debug)]
pub struct Relinked {
    index: usize,
    shifts: Vec<i64>,
}

#[derive(Debug)]
pub struct Emitted {
    output: SerializedAsset,
}

/// An injection pass over a copy of a package, in state `S`.
#[derive(Debug)]
pub struct Injection<S> {
    asset: AssetFile,
    state: S,
}

impl<S> Injection<S> {
    /// The working copy in its current state.
    pub fn asset(&self) -> &AssetFile {
        &self.asset
    }
}

impl Injection<Loaded> {
    pub fn new(original: &AssetFile) -> Self {
        let offsets = original.exports().iter().map(|e| e.serial_offset).collect();
        Self {
            asset: original.clone(),
            state: Loaded { offsets },
        }
    }

    /// Names the replacement object refers to must be interned here before
    /// it is encoded.
    pub fn names_mut(&mut self) -> &mut NameTable {
        self.asset.names_mut()
    }

    /// Replace export `index` with `object`, which must be of the export's
    /// class.
    pub fn patch(mut self, index: usize, object: &DecodedExport) -> AssetResult<Injection<Patched>> {
        let expected = self.asset.export_class(index)?;
        if object.class_name() != expected {
            return Err(class_mismatch(expected, object.class_name()));
        }
        let mut ctx = EncodeContext::new(self.asset.engine_version(), self.asset.payload_offset(index));
        let payload = object.encode(&mut ctx)?;
        if let Some(bulk) = ctx.into_bulk() {
            self.ensure_sole_bulk_owner(index)?;
            debug!(index, bytes = bulk.len(), "rebuilt .ubulk");
            self.asset.set_bulk(Some(bulk));
        }
        self.replace(index, payload)
    }

    /// Replace export `index` with already encoded bytes of class `class`.
    /// The `.ubulk` is kept as is.
    pub fn patch_payload(self, index: usize, class: &str, payload: Vec<u8>) -> AssetResult<Injection<Patched>> {
        let expected = self.asset.export_class(index)?;
        if class != expected {
            return Err(class_mismatch(expected, class));
        }
        self.replace(index, payload)
    }

    /// Decode export `index` from the working copy, let `edit` change it
    /// (interning names as needed), and patch the result back. Exports of a
    /// class without a decoder are edited as generic objects.
    pub fn edit<F>(mut self, index: usize, edit: F) -> AssetResult<Injection<Patched>>
    where
        F: FnOnce(&mut DecodedExport, &mut NameTable) -> AssetResult<()>,
    {
        let mut object = match self.asset.decode_export(index) {
            Err(err) if matches!(err.current_context(), AssetError::UnsupportedAssetType { .. }) => {
                DecodedExport::Generic(self.asset.generic_export(index)?)
            }
            decoded => decoded?,
        };
        edit(&mut object, self.asset.names_mut())?;
        self.patch(index, &object)
    }

    /// Replace the geometry of a static or skeletal mesh export.
    pub fn patch_mesh(self, index: usize, data: &MeshData) -> AssetResult<Injection<Patched>> {
        let version = self.asset.engine_version();
        self.edit(index, |object, names| match object {
            DecodedExport::StaticMesh(mesh) => apply_static_mesh(mesh, data, version),
            DecodedExport::SkeletalMesh(mesh) => apply_skeletal_mesh(mesh, names, data, version),
            other => Err(class_mismatch("StaticMesh or SkeletalMesh", other.class_name())),
        })
    }

    /// Replace the bones of a `Skeleton` export. The `BoneTree` property is
    /// shortened when bones are removed.
    pub fn patch_skeleton(self, index: usize, data: &SkeletonData) -> AssetResult<Injection<Patched>> {
        self.edit(index, |object, names| match object {
            DecodedExport::Skeleton(skeleton) => {
                apply_skeleton(&mut skeleton.reference, names, data)?;
                truncate_array_property(&mut skeleton.header.properties, "BoneTree", data.bones.len())
            }
            other => Err(class_mismatch("Skeleton", other.class_name())),
        })
    }

    pub fn patch_texture(self, index: usize, data: &TextureData) -> AssetResult<Injection<Patched>> {
        let version = self.asset.engine_version();
        self.edit(index, |object, names| match object {
            DecodedExport::Texture(texture) => apply_texture(texture, names, data, version),
            other => Err(class_mismatch("Texture2D", other.class_name())),
        })
    }

    pub fn patch_animation(self, index: usize, data: &AnimationData) -> AssetResult<Injection<Patched>> {
        self.edit(index, |object, _| match object {
            DecodedExport::Animation(anim) => apply_animation(anim, data),
            other => Err(class_mismatch("AnimSequence", other.class_name())),
        })
    }

    /// A rebuilt `.ubulk` replaces the whole file, so no other export may
    /// keep mips in the old one.
    fn ensure_sole_bulk_owner(&self, index: usize) -> AssetResult<()> {
        if self.asset.bulk().is_none() {
            return Ok(());
        }
        for other in (0..self.asset.exports().len()).filter(|i| *i != index) {
            let class = self.asset.export_class(other)?;
            if matches!(
                AssetKind::from_class(&class),
                Some(AssetKind::Texture2D | AssetKind::TextureCube)
            ) {
                return Err(unsupported_version(format!(
                    "export {index} shares its .ubulk with texture export {other}"
                )));
            }
        }
        Ok(())
    }

    fn replace(mut self, index: usize, payload: Vec<u8>) -> AssetResult<Injection<Patched>> {
        let old_len = self.asset.export_payload(index)?.len();
        let size_delta = payload.len() as i64 - old_len as i64;
        self.asset.replace_payload(index, payload)?;
        debug!(index, size_delta, "patched export payload");
        Ok(Injection {
            asset: self.asset,
            state: Patched {
                offsets: self.state.offsets,
                index,
                size_delta,
            },
        })
    }
}

impl Injection<Patched> {
    pub fn index(&self) -> usize {
        self.state.index
    }

    /// New payload length minus the old one.
    pub fn size_delta(&self) -> i64 {
        self.state.size_delta
    }

    /// Recompute every export's offset and size, move the file offsets that
    /// other texture exports record along with them, then check that the
    /// exports tile the payload region right after the header.
    pub fn relink(mut self) -> AssetResult<Injection<Relinked>> {
        self.asset.relink();
        let shifts = self
            .asset
            .exports()
            .iter()
            .zip(&self.state.offsets)
            .map(|(export, old)| export.serial_offset - old)
            .collect_vec();
        self.relocate_textures(&shifts)?;
        check_export_offsets(self.asset.exports(), self.asset.header_len() as i64)?;
        debug!(index = self.state.index, ?shifts, "relinked export table");
        Ok(Injection {
            asset: self.asset,
            state: Relinked {
                index: self.state.index,
                shifts,
            },
        })
    }
}

impl Injection<Patched> {
    /// The patched export was encoded at its new offset already.
    fn relocate_textures(&mut self, shifts: &[i64]) -> AssetResult<()> {
        let version = self.asset.engine_version();
        let mut moved = Vec::new();
        for (index, &shift) in shifts.iter().enumerate() {
            if index == self.state.index || shift == 0 {
                continue;
            }
            let class = self.asset.export_class(index)?;
            if !matches!(
                AssetKind::from_class(&class),
                Some(AssetKind::Texture2D | AssetKind::TextureCube)
            ) {
                continue;
            }
            let ctx = DecodeContext::new(self.asset.names(), version);
            let payload = texture::relocate(self.asset.export_payload(index)?, &ctx, shift)
                .annotate(|| format!("relocating texture export {index}"))?;
            moved.push((index, payload));
        }
        for (index, payload) in moved {
            debug!(index, "relocated texture offsets");
            self.asset.replace_payload(index, payload)?;
        }
        Ok(())
    }
}

impl Injection<Relinked> {
    /// How far each export moved, in bytes.
    pub fn shifts(&self) -> &[i64] {
        &self.state.shifts
    }

    pub fn emit(self) -> Injection<Emitted> {
        let output = self.asset.serialize();
        info!(
            index = self.state.index,
            bytes = output.uasset.len() + output.uexp.as_ref().map_or(0, Vec::len),
            "emitted package"
        );
        Injection {
            asset: self.asset,
            state: Emitted { output },
        }
    }
}

impl Injection<Emitted> {
    pub fn output(&self) -> &SerializedAsset {
        &self.state.output
    }

    pub fn into_output(self) -> SerializedAsset {
        self.state.output
    }

    /// The patched package, ready to start the next pass from.
    pub fn into_asset(self) -> AssetFile {
        self.asset
    }
}

/// Run one full pass replacing export `index` with `object`.
pub fn inject(asset: &AssetFile, index: usize, object: &DecodedExport) -> AssetResult<SerializedAsset> {
    Ok(Injection::new(asset).patch(index, object)?.relink()?.emit().into_output())
}

/// Replace several exports, one pass each in export-table order.
pub fn inject_all(asset: &AssetFile, mut edits: Vec<(usize, DecodedExport)>) -> AssetResult<SerializedAsset> {
    edits.sort_by_key(|(index, _)| *index);
    let mut current = asset.clone();
    for (index, object) in &edits {
        current = Injection::new(&current)
            .patch(*index, object)?
            .relink()?
            .emit()
            .into_asset();
    }
    Ok(current.serialize())
}
