//! Mesh buffers <-> [`MeshData`].
//!
//! Vertices are handed over exactly as the LOD stores them. The engine
//! already splits vertices along UV and normal seams, so nothing here
//! merges or splits vertices in either direction.

use std::collections::BTreeSet;

use itertools::Itertools;
use tracing::{debug, warn};

use crate::error::{AssetResult, TableKind, dangling, malformed};
use crate::model::{Influence, LodData, MaterialData, MeshData, SectionData, SectionMesh, SkeletonData};
use crate::objects::common::{Bounds, MaterialSlot, VertexAttributes, uses_split_vertex_layout};
use crate::objects::skeletal_mesh::{SkeletalMesh, SkinInfluences};
use crate::objects::static_mesh::{MAX_STATIC_LODS, ScreenSize, StaticLod, StaticMesh, StaticSection};
use crate::package::names::NameTable;
use crate::package::tables::PackageIndex;
use crate::reconstruct::skeleton::{BoneTree, apply_skeleton, skeleton_data};
use crate::version::EngineVersion;

fn materials(slots: &[MaterialSlot], material_path: &dyn Fn(PackageIndex) -> Option<String>) -> Vec<MaterialData> {
    slots
        .iter()
        .map(|slot| MaterialData {
            slot_name: slot.slot_name.to_string(),
            material: if slot.material.is_null() {
                None
            } else {
                material_path(slot.material)
            },
        })
        .collect()
}

/// Check that indices form whole triangles over existing vertices and that
/// every section lies inside the index buffer.
fn check_geometry(lod_index: usize, lod: &LodData) -> AssetResult<()> {
    let num_vertices = lod.num_vertices();
    if lod.indices.len() % 3 != 0 {
        return Err(malformed(
            0,
            format!("LOD {lod_index}: {} indices do not form whole triangles", lod.indices.len()),
        ));
    }
    if let Some(bad) = lod.indices.iter().find(|&&i| i as usize >= num_vertices) {
        return Err(malformed(
            0,
            format!("LOD {lod_index}: index {bad} past {num_vertices} vertices"),
        ));
    }
    for (i, section) in lod.sections.iter().enumerate() {
        if section.index_range().end > lod.indices.len() {
            return Err(malformed(
                0,
                format!("LOD {lod_index} section {i} runs past the index buffer"),
            ));
        }
    }
    Ok(())
}

/// Check the per-vertex arrays against the position count.
fn check_attributes(lod_index: usize, lod: &LodData) -> AssetResult<()> {
    let n = lod.num_vertices();
    let optional = [lod.tangents.len(), lod.colors.len(), lod.influences.len()];
    if lod.normals.len() != n
        || lod.uvs.iter().any(|channel| channel.len() != n)
        || optional.iter().any(|&len| len != 0 && len != n)
    {
        return Err(malformed(
            0,
            format!("LOD {lod_index}: vertex attribute counts do not match {n} positions"),
        ));
    }
    Ok(())
}

fn attributes(lod: &LodData) -> VertexAttributes {
    VertexAttributes {
        normals: lod.normals.clone(),
        tangents: lod.tangents.clone(),
        uvs: lod.uvs.clone(),
    }
}

/// Lowest and highest vertex referenced by a section.
fn vertex_range(lod: &LodData, section: &SectionData) -> Option<(u32, u32)> {
    lod.indices[section.index_range()].iter().copied().minmax().into_option()
}

/// Decoded geometry of every LOD of a static mesh. `material_path` turns a
/// material reference into an object path.
pub fn static_mesh_data(
    mesh: &StaticMesh,
    version: EngineVersion,
    material_path: &dyn Fn(PackageIndex) -> Option<String>,
) -> AssetResult<MeshData> {
    let lods = mesh
        .lods()
        .iter()
        .enumerate()
        .map(|(i, lod)| {
            let attrs = lod.vertices.attributes(version);
            let data = LodData {
                positions: lod.positions.positions(),
                normals: attrs.normals,
                tangents: attrs.tangents,
                uvs: attrs.uvs,
                colors: lod.colors.colors(),
                influences: Vec::new(),
                indices: lod.indices.indices(),
                sections: lod
                    .sections
                    .iter()
                    .map(|s| {
                        let material_index = u32::try_from(s.material_index).map_err(|_| {
                            dangling(TableKind::Material, s.material_index as i64, mesh.materials.len())
                        })?;
                        Ok(SectionData {
                            material_index,
                            first_index: s.first_index,
                            num_triangles: s.num_triangles,
                        })
                    })
                    .collect::<AssetResult<_>>()?,
            };
            check_geometry(i, &data)?;
            Ok(data)
        })
        .collect::<AssetResult<Vec<_>>>()?;
    debug!(lods = lods.len(), "reconstructed static mesh");
    Ok(MeshData {
        lods,
        materials: materials(&mesh.materials, material_path),
        skeleton: None,
    })
}

/// Decoded geometry, skin and skeleton of a skeletal mesh. Influences are
/// translated from section bone maps to skeleton bone indices.
pub fn skeletal_mesh_data(
    mesh: &SkeletalMesh,
    version: EngineVersion,
    material_path: &dyn Fn(PackageIndex) -> Option<String>,
) -> AssetResult<MeshData> {
    let skeleton = skeleton_data(&mesh.reference, &[])?;
    let num_bones = skeleton.bones.len();
    let lods = mesh
        .lods
        .iter()
        .enumerate()
        .map(|(lod_index, lod)| {
            let attrs = lod.attributes(version);
            let skin = lod.weights.influences();
            let positions = lod.positions();
            let mut influences = vec![Vec::new(); positions.len()];
            for section in &lod.sections {
                let start = section.base_vertex_index as usize;
                let end = (start + section.num_vertices as usize).min(positions.len());
                for v in start..end {
                    let (Some(bones), Some(weights)) = (skin.bones.get(v), skin.weights.get(v)) else {
                        continue;
                    };
                    for (&local, &weight) in bones.iter().zip(weights) {
                        if weight == 0 {
                            continue;
                        }
                        let bone = *section
                            .bone_map
                            .get(local as usize)
                            .ok_or_else(|| dangling(TableKind::Bone, local as i64, section.bone_map.len()))?;
                        if bone as usize >= num_bones {
                            return Err(dangling(TableKind::Bone, bone as i64, num_bones));
                        }
                        influences[v].push(Influence {
                            bone,
                            weight: weight as f32 / 255.0,
                        });
                    }
                }
            }
            let data = LodData {
                positions,
                normals: attrs.normals,
                tangents: attrs.tangents,
                uvs: attrs.uvs,
                colors: lod.colors(),
                influences,
                indices: lod.indices.indices(),
                sections: lod
                    .sections
                    .iter()
                    .map(|s| SectionData {
                        material_index: s.material_index as u32,
                        first_index: s.base_index,
                        num_triangles: s.num_triangles,
                    })
                    .collect(),
            };
            check_geometry(lod_index, &data)?;
            Ok(data)
        })
        .collect::<AssetResult<Vec<_>>>()?;
    debug!(lods = lods.len(), bones = num_bones, "reconstructed skeletal mesh");
    Ok(MeshData {
        lods,
        materials: materials(&mesh.materials, material_path),
        skeleton: Some(skeleton),
    })
}

/// The vertices and triangles of one section, for hosts that build one
/// object per material.
pub fn section_geometry(lod: &LodData, section: usize) -> Option<SectionMesh> {
    let info = lod.sections.get(section)?;
    let indices = lod.indices.get(info.index_range())?;
    let source_vertices: Vec<u32> = indices.iter().copied().unique().sorted().collect();
    let local = |v: u32| source_vertices.binary_search(&v).map_or(0, |i| i as u32);
    let pick = |v: &u32| *v as usize;
    let gather = |values: &[[f32; 3]]| -> Vec<[f32; 3]> {
        source_vertices.iter().filter_map(|v| values.get(pick(v)).copied()).collect()
    };
    Some(SectionMesh {
        material_index: info.material_index,
        positions: gather(&lod.positions),
        normals: gather(&lod.normals),
        tangents: source_vertices.iter().filter_map(|v| lod.tangents.get(pick(v)).copied()).collect(),
        uvs: lod
            .uvs
            .iter()
            .map(|channel| source_vertices.iter().filter_map(|v| channel.get(pick(v)).copied()).collect())
            .collect(),
        colors: source_vertices.iter().filter_map(|v| lod.colors.get(pick(v)).copied()).collect(),
        influences: source_vertices.iter().filter_map(|v| lod.influences.get(pick(v)).cloned()).collect(),
        indices: indices.iter().map(|&v| local(v)).collect(),
        source_vertices,
    })
}

/// Translation of bone indices from one skeleton ordering to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoneRemap {
    targets: Vec<Option<u16>>,
    target_len: usize,
}

impl BoneRemap {
    /// `targets[i]` is the new index of bone `i`; every one must be below
    /// `target_len`.
    pub fn new(targets: Vec<Option<u16>>, target_len: usize) -> AssetResult<Self> {
        if let Some(t) = targets.iter().flatten().find(|t| usize::from(**t) >= target_len) {
            return Err(dangling(TableKind::Bone, i64::from(*t), target_len));
        }
        Ok(Self { targets, target_len })
    }

    /// Match bones by name. Bones missing from `target`, or past the
    /// 16-bit index range, map to nothing.
    pub fn by_name(source: &SkeletonData, target: &[&str]) -> Self {
        let targets = source
            .bones
            .iter()
            .map(|bone| {
                let found = target
                    .iter()
                    .position(|name| *name == bone.name)
                    .and_then(|i| u16::try_from(i).ok());
                if found.is_none() {
                    warn!(bone = %bone.name, "bone missing from the target skeleton");
                }
                found
            })
            .collect();
        Self {
            targets,
            target_len: target.len(),
        }
    }

    pub fn target(&self, bone: usize) -> Option<u16> {
        self.targets.get(bone).copied().flatten()
    }

    /// The mapping back from the target ordering.
    pub fn inverse(&self) -> Self {
        let mut targets = vec![None; self.target_len];
        for (source, target) in self.targets.iter().enumerate() {
            let (Some(t), Ok(source)) = (target, u16::try_from(source)) else {
                continue;
            };
            if let Some(slot) = targets.get_mut(usize::from(*t)) {
                slot.get_or_insert(source);
            }
        }
        Self {
            targets,
            target_len: self.targets.len(),
        }
    }

    /// Rewrite the influences of `lods` into the target ordering. Fails
    /// without changing anything if an influence uses an unmapped bone.
    pub fn remap_influences(&self, lods: &mut [LodData]) -> AssetResult<()> {
        for influence in lods.iter().flat_map(|l| l.influences.iter().flatten()) {
            if self.target(influence.bone as usize).is_none() {
                return Err(dangling(TableKind::Bone, influence.bone as i64, self.targets.len()));
            }
        }
        for influence in lods.iter_mut().flat_map(|l| l.influences.iter_mut().flatten()) {
            if let Some(t) = self.target(influence.bone as usize) {
                influence.bone = t;
            }
        }
        Ok(())
    }
}

/// Replace the render data of a static mesh with `data`. Section flags and
/// buffer settings come from the existing LOD at the same position (or the
/// last one); index buffers derived from the geometry are left empty.
pub fn apply_static_mesh(mesh: &mut StaticMesh, data: &MeshData, version: EngineVersion) -> AssetResult<()> {
    if data.lods.is_empty() || data.lods.len() > MAX_STATIC_LODS {
        return Err(malformed(
            0,
            format!("{} LODs, a static mesh holds 1 to {MAX_STATIC_LODS}", data.lods.len()),
        ));
    }
    for (i, lod) in data.lods.iter().enumerate() {
        check_geometry(i, lod)?;
        check_attributes(i, lod)?;
        if let Some(s) = lod.sections.iter().find(|s| s.material_index as usize >= mesh.materials.len()) {
            return Err(dangling(TableKind::Material, s.material_index as i64, mesh.materials.len()));
        }
    }
    let Some(render) = mesh.render_data.as_mut() else {
        return Err(malformed(0, "static mesh carries no cooked render data to replace"));
    };

    let old_count = render.lods.len();
    let lods: Vec<StaticLod> = data
        .lods
        .iter()
        .enumerate()
        .map(|(i, lod)| {
            let template = render.lods.get(i).or(render.lods.last());
            let flags = template.and_then(|t| t.sections.first());
            let sections = lod
                .sections
                .iter()
                .map(|s| {
                    let (min_vertex, max_vertex) = vertex_range(lod, s).unwrap_or((0, 0));
                    StaticSection {
                        material_index: s.material_index as i32,
                        first_index: s.first_index,
                        num_triangles: s.num_triangles,
                        min_vertex,
                        max_vertex,
                        enable_collision: flags.is_none_or(|f| f.enable_collision),
                        cast_shadow: flags.is_none_or(|f| f.cast_shadow),
                        extra_flags: match flags {
                            Some(f) => f.extra_flags,
                            None => uses_split_vertex_layout(version).then_some([0, 1]),
                        },
                    }
                })
                .collect();
            let full_precision_uvs = template.is_some_and(|t| t.vertices.full_precision_uvs);
            StaticLod::build(
                template,
                sections,
                &lod.positions,
                &attributes(lod),
                &lod.colors,
                &lod.indices,
                full_precision_uvs,
                version,
            )
        })
        .collect();

    render.lods = lods;
    render.bounds = Bounds::from_points(&data.lods[0].positions);
    for i in 1..MAX_STATIC_LODS {
        if i >= data.lods.len() {
            render.screen_sizes[i] = ScreenSize::default();
        } else if i >= old_count {
            // Added LODs switch in at half the previous screen size.
            let previous = render.screen_sizes[i - 1];
            render.screen_sizes[i] = ScreenSize {
                cooked: true,
                value: previous.value * 0.5,
            };
        }
    }
    debug!(lods = data.lods.len(), "applied static mesh geometry");
    Ok(())
}

/// Influences of one vertex as section-local bones and weights summing to
/// 255, heaviest first.
fn quantize(influences: &[Influence], bone_map: &[u16]) -> (Vec<u16>, Vec<u8>) {
    let sorted: Vec<&Influence> = influences
        .iter()
        .filter(|i| i.weight > 0.0)
        .sorted_by(|a, b| b.weight.total_cmp(&a.weight))
        .collect();
    let total: f32 = sorted.iter().map(|i| i.weight).sum();
    if sorted.is_empty() || total <= 0.0 {
        return (Vec::new(), Vec::new());
    }
    let mut weights: Vec<u8> = sorted
        .iter()
        .map(|i| (i.weight / total * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    let sum: i32 = weights.iter().map(|&w| w as i32).sum();
    weights[0] = (weights[0] as i32 + 255 - sum).clamp(0, 255) as u8;
    let bones = sorted
        .iter()
        .map(|i| bone_map.binary_search(&i.bone).map_or(0, |b| b as u16))
        .collect();
    (bones, weights)
}

/// Replace the skeleton (if `data` carries one) and the LODs of a skeletal
/// mesh. Sections must cover disjoint vertex ranges. Material slots that
/// `data` refers to beyond the existing ones are added.
pub fn apply_skeletal_mesh(
    mesh: &mut SkeletalMesh,
    names: &mut NameTable,
    data: &MeshData,
    version: EngineVersion,
) -> AssetResult<()> {
    if data.lods.is_empty() || data.lods.len() > mesh.lods.len() {
        return Err(malformed(
            0,
            format!("{} LODs, this mesh holds 1 to {}", data.lods.len(), mesh.lods.len()),
        ));
    }
    for (i, lod) in data.lods.iter().enumerate() {
        check_geometry(i, lod)?;
        check_attributes(i, lod)?;
    }
    // Edits go to a copy so a failure leaves the mesh untouched.
    let mut out = mesh.clone();
    if let Some(skeleton) = &data.skeleton {
        apply_skeleton(&mut out.reference, names, skeleton)?;
        if let Some(extra_mesh) = &mut out.extra_mesh {
            extra_mesh.disable();
        }
    }
    let num_bones = out.reference.len();
    let parents: Vec<Option<usize>> = out
        .reference
        .bones
        .iter()
        .map(|b| usize::try_from(b.parent).ok())
        .collect();
    BoneTree::build(&parents)?;

    let mut lods = Vec::with_capacity(data.lods.len());
    for (lod_index, lod) in data.lods.iter().enumerate() {
        let template = &mesh.lods[lod_index];
        let ranges: Vec<(u32, u32)> = lod
            .sections
            .iter()
            .map(|s| vertex_range(lod, s).unwrap_or((0, 0)))
            .collect();
        for (a, b) in ranges.iter().sorted().tuple_windows() {
            if b.0 <= a.1 {
                return Err(malformed(0, format!("LOD {lod_index}: sections share vertices {}..={}", b.0, a.1)));
            }
        }

        let mut skin = SkinInfluences {
            bones: vec![Vec::new(); lod.num_vertices()],
            weights: vec![Vec::new(); lod.num_vertices()],
        };
        let mut required = BTreeSet::new();
        let mut sections = Vec::with_capacity(lod.sections.len());
        for (j, (section, &(min, max))) in lod.sections.iter().zip(&ranges).enumerate() {
            let Some(base) = template.sections.get(j).or(template.sections.last()) else {
                return Err(malformed(0, format!("LOD {lod_index} has no section to take settings from")));
            };
            let vertices = min as usize..=max as usize;
            let mut used = BTreeSet::new();
            for influence in lod.influences.get(vertices.clone()).into_iter().flatten().flatten() {
                if influence.bone as usize >= num_bones {
                    return Err(dangling(TableKind::Bone, influence.bone as i64, num_bones));
                }
                used.insert(influence.bone);
            }
            let bone_map: Vec<u16> = used.iter().copied().collect();
            let mut max_influences = 0;
            for v in vertices {
                let (bones, weights) = quantize(lod.influences.get(v).map_or(&[][..], Vec::as_slice), &bone_map);
                max_influences = max_influences.max(bones.len() as u32);
                skin.bones[v] = bones;
                skin.weights[v] = weights;
            }
            for &bone in &bone_map {
                let mut current = Some(bone as usize);
                while let Some(b) = current {
                    if !required.insert(b as u16) {
                        break;
                    }
                    current = parents[b];
                }
            }

            let material_index = section.material_index as usize;
            while out.materials.len() <= material_index {
                let next = out.materials.len();
                let slot_name = data
                    .materials
                    .get(next)
                    .map_or_else(|| format!("Material_{next}"), |m| m.slot_name.clone());
                out.add_material_slot(names, &slot_name)?;
            }
            sections.push(base.with_geometry(
                section.material_index as u16,
                section.first_index,
                section.num_triangles,
                min,
                max - min + 1,
                bone_map,
                max_influences,
            ));
        }
        let required: Vec<u16> = required.into_iter().collect();
        lods.push(template.rebuild(
            sections,
            required,
            &lod.positions,
            &attributes(lod),
            &skin,
            &lod.indices,
            version,
        )?);
    }

    out.bounds = Bounds::from_points(&data.lods[0].positions);
    let count = lods.len();
    out.lods = lods;
    out.remove_lods(count)?;
    *mesh = out;
    debug!(lods = count, bones = num_bones, "applied skeletal mesh geometry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;
    use crate::objects::{DecodedExport, EncodeContext, ExportCodec};
    use crate::test_support::{PackageBuilder, name_table, reparse, sample_skeletal_mesh, sample_static_mesh};
    use crate::version::ParseOptions;

    fn no_paths(_: PackageIndex) -> Option<String> {
        None
    }

    #[test]
    fn test_static_mesh_lods_from_package() {
        let mut builder = PackageBuilder::new();
        builder.import("/Game/Materials/M_Body", "Material", "M_Body");
        let class = builder.class("StaticMesh");
        let mesh = sample_static_mesh(builder.names(), EngineVersion::UE4_27, 2, 4);
        let payload = mesh.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap();
        builder.export("SM_Chair", class, payload);
        let asset = reparse(&builder.build(), &ParseOptions::default());

        let DecodedExport::StaticMesh(decoded) = asset.decode_export(0).unwrap() else {
            panic!("expected a static mesh");
        };
        let resolve = |index: PackageIndex| asset.object_path(index).ok();
        let data = static_mesh_data(&decoded, EngineVersion::UE4_27, &resolve).unwrap();
        assert_eq!(data.lods.len(), 2);
        for lod in &data.lods {
            assert_eq!(lod.indices.len() % 3, 0);
            assert_eq!(lod.uvs.len(), 4);
            assert_eq!(lod.sections.len(), 1);
        }
        assert_eq!(data.materials.len(), 1);
        assert_eq!(data.materials[0].slot_name, "Body");
        assert_eq!(data.materials[0].material.as_deref(), Some("/Game/Materials/M_Body"));
        assert!(data.skeleton.is_none());
    }

    #[test]
    fn test_apply_static_mesh() {
        let version = EngineVersion::UE4_27;
        let mut names = name_table(&["None"]);
        let mut mesh = sample_static_mesh(&mut names, version, 2, 2);
        let mut data = static_mesh_data(&mesh, version, &no_paths).unwrap();
        data.lods.truncate(1);
        let lod = &mut data.lods[0];
        lod.positions.push([2.0, 0.0, 0.0]);
        lod.normals.push([0.0, 0.0, 1.0]);
        lod.tangents.push([1.0, 0.0, 0.0, 1.0]);
        for channel in &mut lod.uvs {
            channel.push([1.0, 0.0]);
        }
        lod.indices.extend([1, 4, 2]);
        lod.sections[0].num_triangles = 3;

        apply_static_mesh(&mut mesh, &data, version).unwrap();
        let again = static_mesh_data(&mesh, version, &no_paths).unwrap();
        assert_eq!(again.lods.len(), 1);
        assert_eq!(again.lods[0].positions, data.lods[0].positions);
        assert_eq!(again.lods[0].indices, data.lods[0].indices);
        let section = &mesh.lods()[0].sections[0];
        assert_eq!((section.min_vertex, section.max_vertex), (0, 4));
        assert_eq!(mesh.render_data.as_ref().unwrap().bounds.extent[0], 1.0);
        assert_eq!(mesh.render_data.as_ref().unwrap().screen_sizes[1], ScreenSize::default());

        data.lods[0].indices.push(0);
        let err = apply_static_mesh(&mut mesh, &data, version).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::Malformed { .. }));
    }

    #[test]
    fn test_skeletal_influences_use_skeleton_indices() {
        for version in [EngineVersion::UE4_25, EngineVersion::UE4_27] {
            let mut names = name_table(&["None"]);
            let mut mesh = sample_skeletal_mesh(&mut names, version, &[-1, 0, 0]);
            // Section bone map in reverse skeleton order.
            mesh.lods[0].sections[0].bone_map = vec![2, 1, 0];
            let data = skeletal_mesh_data(&mesh, version, &no_paths).unwrap();
            let lod = &data.lods[0];
            let bones: Vec<u16> = lod.influences.iter().map(|i| i[0].bone).collect();
            assert_eq!(bones, vec![2, 1, 0, 2]);
            assert_eq!(lod.influences[0][0].weight, 1.0);
            let skeleton = data.skeleton.as_ref().unwrap();
            assert_eq!(skeleton.bones.len(), 3);
            assert_eq!(skeleton.bones[2].parent, Some(0));
        }
    }

    #[test]
    fn test_apply_skeletal_mesh_rebuilds_bone_maps() {
        let version = EngineVersion::UE4_27;
        let mut names = name_table(&["None"]);
        let mut mesh = sample_skeletal_mesh(&mut names, version, &[-1, 0, 1]);
        let mut data = skeletal_mesh_data(&mesh, version, &no_paths).unwrap();
        // Everything on bone 2, half of vertex 0 on bone 1.
        let lod = &mut data.lods[0];
        for influences in &mut lod.influences {
            *influences = vec![Influence { bone: 2, weight: 1.0 }];
        }
        lod.influences[0].push(Influence { bone: 1, weight: 1.0 });
        lod.sections[0].material_index = 1;
        data.materials.push(MaterialData {
            slot_name: "Cloth".into(),
            material: None,
        });

        apply_skeletal_mesh(&mut mesh, &mut names, &data, version).unwrap();
        let section = &mesh.lods[0].sections[0];
        assert_eq!(section.bone_map, vec![1, 2]);
        assert_eq!(section.max_bone_influences, 2);
        assert_eq!(mesh.lods[0].required_bones, vec![0, 1, 2]);
        assert_eq!(mesh.materials.len(), 2);
        assert_eq!(mesh.materials[1].slot_name.text(), "Cloth");

        let skin = mesh.lods[0].weights.influences();
        // Equal weights keep their order: bone 2 (local 1) before bone 1.
        assert_eq!(&skin.bones[0][..2], &[1, 0]);
        assert_eq!(skin.weights[0][0] as u32 + skin.weights[0][1] as u32, 255);

        let again = skeletal_mesh_data(&mesh, version, &no_paths).unwrap();
        assert_eq!(again.lods[0].influences[1], vec![Influence { bone: 2, weight: 1.0 }]);

        // A payload that still decodes after the edit.
        let payload = mesh.encode(&mut EncodeContext::new(version, 0)).unwrap();
        let decoded = SkeletalMesh::decode(&payload, &crate::objects::DecodeContext::new(&names, version)).unwrap();
        assert_eq!(decoded, mesh);
    }

    #[test]
    fn test_apply_skeletal_mesh_drops_game_buffers() {
        use crate::objects::skeletal_mesh::{ExtraMesh, KdiBinding, SectionExtra};

        let version = EngineVersion::FF7R;
        let mut names = name_table(&["None"]);
        let mut mesh = sample_skeletal_mesh(&mut names, version, &[-1, 0]);
        if let SectionExtra::Legacy { kdi, .. } = &mut mesh.lods[0].sections[0].extra {
            *kdi = Some(KdiBinding {
                flag: 1,
                records: vec![[5; 16]],
            });
        }
        mesh.extra_mesh = Some(ExtraMesh {
            positions: vec![0; 12],
            weights: vec![0; 12],
            indices: Vec::new(),
            tail: [0; 8],
        });
        let data = skeletal_mesh_data(&mesh, version, &no_paths).unwrap();

        // Geometry only: the collision mesh still matches the skeleton.
        let mut geometry_only = data.clone();
        geometry_only.skeleton = None;
        let mut edited = mesh.clone();
        apply_skeletal_mesh(&mut edited, &mut names, &geometry_only, version).unwrap();
        assert_eq!(edited.extra_mesh, mesh.extra_mesh);
        assert_eq!(edited.lods[0].sections[0].kdi_records(), 0);

        apply_skeletal_mesh(&mut mesh, &mut names, &data, version).unwrap();
        assert_eq!(mesh.extra_mesh.as_ref().map(ExtraMesh::num_vertices), Some(0));
        let payload = mesh.encode(&mut EncodeContext::new(version, 0)).unwrap();
        let decoded = SkeletalMesh::decode(&payload, &crate::objects::DecodeContext::new(&names, version)).unwrap();
        assert_eq!(decoded, mesh);
    }

    #[test]
    fn test_apply_skeletal_mesh_rejects_unknown_bone() {
        let version = EngineVersion::UE4_25;
        let mut names = name_table(&["None"]);
        let mut mesh = sample_skeletal_mesh(&mut names, version, &[-1, 0]);
        let mut data = skeletal_mesh_data(&mesh, version, &no_paths).unwrap();
        data.lods[0].influences[0] = vec![Influence { bone: 7, weight: 1.0 }];
        let before = mesh.clone();
        let err = apply_skeletal_mesh(&mut mesh, &mut names, &data, version).unwrap_err();
        assert!(matches!(
            err.current_context(),
            AssetError::DanglingReference { table: TableKind::Bone, index: 7, .. }
        ));
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_section_geometry_is_rebased() {
        let lod = LodData {
            positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [3.0, 0.0, 0.0], [4.0, 0.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 5],
            indices: vec![0, 1, 2, 4, 3, 2],
            sections: vec![
                SectionData {
                    material_index: 0,
                    first_index: 0,
                    num_triangles: 1,
                },
                SectionData {
                    material_index: 1,
                    first_index: 3,
                    num_triangles: 1,
                },
            ],
            ..Default::default()
        };
        let second = section_geometry(&lod, 1).unwrap();
        assert_eq!(second.material_index, 1);
        assert_eq!(second.source_vertices, vec![2, 3, 4]);
        assert_eq!(second.indices, vec![2, 1, 0]);
        assert_eq!(second.positions[0], [2.0, 0.0, 0.0]);
        assert!(section_geometry(&lod, 2).is_none());
    }

    #[test]
    fn test_bone_remap_by_name() {
        let mut names = name_table(&["None"]);
        let mesh = sample_skeletal_mesh(&mut names, EngineVersion::UE4_25, &[-1, 0, 0]);
        let mut data = skeletal_mesh_data(&mesh, EngineVersion::UE4_25, &no_paths).unwrap();
        let skeleton = data.skeleton.clone().unwrap();
        let remap = BoneRemap::by_name(&skeleton, &["root", "bone_2", "bone_0", "bone_1"]);
        assert_eq!(remap.target(0), Some(2));
        assert_eq!(remap.inverse().target(1), Some(2));
        assert_eq!(remap.inverse().target(0), None);
        remap.remap_influences(&mut data.lods).unwrap();
        let bones: Vec<u16> = data.lods[0].influences.iter().map(|i| i[0].bone).collect();
        assert_eq!(bones, vec![2, 3, 1, 2]);

        let partial = BoneRemap::by_name(&skeleton, &["bone_0"]);
        let mut lods = skeletal_mesh_data(&mesh, EngineVersion::UE4_25, &no_paths).unwrap().lods;
        assert!(partial.remap_influences(&mut lods).is_err());
    }

    #[test]
    fn test_bone_remap_rejects_out_of_range_target() {
        let err = BoneRemap::new(vec![Some(0), Some(3)], 3).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::DanglingReference { .. }));

        let remap = BoneRemap::new(vec![Some(2), None, Some(0)], 3).unwrap();
        let inverse = remap.inverse();
        assert_eq!(inverse.target(0), Some(2));
        assert_eq!(inverse.target(1), None);
        assert_eq!(inverse.target(2), Some(0));
        assert_eq!(inverse.inverse().target(0), Some(2));
    }
}
