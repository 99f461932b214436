//! `SkeletalMesh` exports.
//!
//! Two LOD layouts exist. Before 4.27 each LOD stores one interleaved GPU
//! vertex buffer (tangents, position and UVs per vertex) followed by fixed
//! width skin weights. From 4.27 on the render buffers live in a sized block
//! using the split static-mesh vertex layout and variable-width weights.
//!
//! The 4.18-based games (see [`GameVariant`]) extend the legacy layout: each
//! section binds a run of KDI records, whose buffers follow the LOD, and
//! FF7R stores a low-poly collision mesh after the LODs.

use tracing::{debug, warn};

use crate::data::{ByteReader, ByteWriter};
use crate::error::{AssetResult, TableKind, dangling, malformed, unsupported_version};
use crate::objects::common::{
    BulkArray, Bounds, ColorBuffer, DEFAULT_TANGENT, MaterialSlot, PositionBuffer, SkeletalIndexBuffer,
    StaticVertexBuffer, StripFlags, VertexAttributes, pack_tangent_basis, read_materials, read_u32_at, read_uv,
    read_vec3, unpack_tangent_basis, uses_split_vertex_layout, uv_size, write_materials, write_uv,
};
use crate::objects::skeleton::ReferenceSkeleton;
use crate::objects::{DecodeContext, EncodeContext, ExportCodec, ObjectHeader, truncate_array_property};
use crate::package::names::NameTable;
use crate::version::{EngineVersion, GameVariant};

/// Size of one cloth mapping record (`FMeshToMeshVertData`).
const CLOTH_MAPPING_SIZE: usize = 64;

/// Strip bit set when a legacy LOD carries no adjacency index buffer.
const NO_ADJACENCY: u8 = 1;

/// Size of one KDI record bound by a section.
const KDI_RECORD_SIZE: usize = 16;

/// KDI records a section binds (game variants only).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KdiBinding {
    /// `1` when `records` is non-empty.
    pub flag: u32,
    pub records: Vec<[u8; KDI_RECORD_SIZE]>,
}

impl KdiBinding {
    fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let flag = r.read_u32()?;
        let records = r.read_counted(KDI_RECORD_SIZE, |r| r.read_array())?;
        Ok(Self { flag, records })
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_u32(self.flag);
        w.write_count(self.records.len());
        for record in &self.records {
            w.write_bytes(record);
        }
    }
}

/// A KDI buffer stored after a legacy LOD: a `1` marker and a bulk array.
#[derive(Debug, Clone, PartialEq)]
pub struct KdiBuffer {
    pub marker: u16,
    pub data: BulkArray,
}

impl KdiBuffer {
    fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let offset = r.position();
        let marker = r.read_u16()?;
        if marker != 1 {
            return Err(malformed(offset, format!("KDI buffer marker {marker}, expected 1")));
        }
        Ok(Self {
            marker,
            data: BulkArray::read(r)?,
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_u16(self.marker);
        self.data.write(w);
    }
}

/// Section fields that only exist in one of the two layouts.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionExtra {
    Legacy {
        flags: [u8; 8],
        cloth: [u8; 12],
        /// Present for the game variants.
        kdi: Option<KdiBinding>,
    },
    Split {
        recompute_tangent_mask: u8,
        /// Stored from 5.0 on.
        visible_in_ray_tracing: Option<u32>,
        cloth_mapping: Vec<[u8; CLOTH_MAPPING_SIZE]>,
        duplicated_vertices: Vec<u32>,
        /// `{index, length}` into `duplicated_vertices`, one per vertex.
        duplicated_index: Vec<[u32; 2]>,
        disabled: u32,
    },
}

/// A run of triangles sharing a material and a bone map.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletalSection {
    pub strip: StripFlags,
    pub material_index: u16,
    pub base_index: u32,
    pub num_triangles: u32,
    pub recompute_tangent: u32,
    pub cast_shadow: u32,
    pub base_vertex_index: u32,
    /// Skeleton bone index for each section-local influence index.
    pub bone_map: Vec<u16>,
    pub num_vertices: u32,
    pub max_bone_influences: u32,
    pub cloth_asset_index: i16,
    pub cloth_asset_guid: [u8; 16],
    pub cloth_asset_lod_index: i32,
    pub extra: SectionExtra,
}

impl SkeletalSection {
    fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let strip = StripFlags::read(r)?;
        let material_index = r.read_u16()?;
        let base_index = r.read_u32()?;
        let num_triangles = r.read_u32()?;
        if !uses_split_vertex_layout(version) {
            let flags = r.read_array()?;
            let recompute_tangent = r.read_u32()?;
            let cast_shadow = r.read_u32()?;
            let base_vertex_index = r.read_u32()?;
            let bone_map = r.read_u16_array()?;
            let num_vertices = r.read_u32()?;
            let max_bone_influences = r.read_u32()?;
            let cloth = r.read_array()?;
            let cloth_asset_index = r.read_i16()?;
            let cloth_asset_guid = r.read_guid()?;
            let cloth_asset_lod_index = r.read_i32()?;
            let kdi = if version.game().is_some() { Some(KdiBinding::read(r)?) } else { None };
            return Ok(Self {
                strip,
                material_index,
                base_index,
                num_triangles,
                recompute_tangent,
                cast_shadow,
                base_vertex_index,
                bone_map,
                num_vertices,
                max_bone_influences,
                cloth_asset_index,
                cloth_asset_guid,
                cloth_asset_lod_index,
                extra: SectionExtra::Legacy { flags, cloth, kdi },
            });
        }

        let recompute_tangent = r.read_u32()?;
        let recompute_tangent_mask = r.read_u8()?;
        let cast_shadow = r.read_u32()?;
        let visible_in_ray_tracing = if version.is_ue5() { Some(r.read_u32()?) } else { None };
        let base_vertex_index = r.read_u32()?;
        let cloth_mapping = r.read_counted(CLOTH_MAPPING_SIZE, |r| r.read_array())?;
        let bone_map = r.read_u16_array()?;
        let num_vertices = r.read_u32()?;
        let max_bone_influences = r.read_u32()?;
        let cloth_asset_index = r.read_i16()?;
        let cloth_asset_guid = r.read_guid()?;
        let cloth_asset_lod_index = r.read_i32()?;
        let duplicated_vertices = r.read_u32_array()?;
        let duplicated_index = r.read_counted(8, |r| Ok([r.read_u32()?, r.read_u32()?]))?;
        let disabled = r.read_u32()?;
        Ok(Self {
            strip,
            material_index,
            base_index,
            num_triangles,
            recompute_tangent,
            cast_shadow,
            base_vertex_index,
            bone_map,
            num_vertices,
            max_bone_influences,
            cloth_asset_index,
            cloth_asset_guid,
            cloth_asset_lod_index,
            extra: SectionExtra::Split {
                recompute_tangent_mask,
                visible_in_ray_tracing,
                cloth_mapping,
                duplicated_vertices,
                duplicated_index,
                disabled,
            },
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        self.strip.write(w);
        w.write_u16(self.material_index);
        w.write_u32(self.base_index);
        w.write_u32(self.num_triangles);
        match &self.extra {
            SectionExtra::Legacy { flags, cloth, kdi } => {
                w.write_bytes(flags);
                w.write_u32(self.recompute_tangent);
                w.write_u32(self.cast_shadow);
                w.write_u32(self.base_vertex_index);
                w.write_u16_array(&self.bone_map);
                w.write_u32(self.num_vertices);
                w.write_u32(self.max_bone_influences);
                w.write_bytes(cloth);
                self.write_cloth_asset(w);
                if let Some(kdi) = kdi {
                    kdi.write(w);
                }
            }
            SectionExtra::Split {
                recompute_tangent_mask,
                visible_in_ray_tracing,
                cloth_mapping,
                duplicated_vertices,
                duplicated_index,
                disabled,
            } => {
                w.write_u32(self.recompute_tangent);
                w.write_u8(*recompute_tangent_mask);
                w.write_u32(self.cast_shadow);
                if let Some(v) = visible_in_ray_tracing {
                    w.write_u32(*v);
                }
                w.write_u32(self.base_vertex_index);
                w.write_count(cloth_mapping.len());
                for record in cloth_mapping {
                    w.write_bytes(record);
                }
                w.write_u16_array(&self.bone_map);
                w.write_u32(self.num_vertices);
                w.write_u32(self.max_bone_influences);
                self.write_cloth_asset(w);
                w.write_u32_array(duplicated_vertices);
                w.write_count(duplicated_index.len());
                for [index, length] in duplicated_index {
                    w.write_u32(*index);
                    w.write_u32(*length);
                }
                w.write_u32(*disabled);
            }
        }
    }

    fn write_cloth_asset(&self, w: &mut ByteWriter) {
        w.write_i16(self.cloth_asset_index);
        w.write_guid(&self.cloth_asset_guid);
        w.write_i32(self.cloth_asset_lod_index);
    }

    /// Number of KDI records this section binds.
    pub fn kdi_records(&self) -> usize {
        match &self.extra {
            SectionExtra::Legacy { kdi: Some(kdi), .. } => kdi.records.len(),
            _ => 0,
        }
    }

    /// This section with new geometry ranges. Cloth and KDI bindings and
    /// vertex duplication data no longer apply and are reset.
    #[allow(clippy::too_many_arguments)]
    pub fn with_geometry(
        &self,
        material_index: u16,
        base_index: u32,
        num_triangles: u32,
        base_vertex_index: u32,
        num_vertices: u32,
        bone_map: Vec<u16>,
        max_bone_influences: u32,
    ) -> Self {
        let extra = match &self.extra {
            SectionExtra::Legacy { flags, kdi, .. } => SectionExtra::Legacy {
                flags: *flags,
                cloth: [0; 12],
                kdi: kdi.as_ref().map(|_| KdiBinding::default()),
            },
            SectionExtra::Split {
                recompute_tangent_mask,
                visible_in_ray_tracing,
                disabled,
                ..
            } => SectionExtra::Split {
                recompute_tangent_mask: *recompute_tangent_mask,
                visible_in_ray_tracing: *visible_in_ray_tracing,
                cloth_mapping: Vec::new(),
                duplicated_vertices: Vec::new(),
                duplicated_index: vec![[0, 0]; num_vertices as usize],
                disabled: *disabled,
            },
        };
        Self {
            material_index,
            base_index,
            num_triangles,
            base_vertex_index,
            num_vertices,
            bone_map,
            max_bone_influences,
            cloth_asset_index: -1,
            cloth_asset_guid: [0; 16],
            cloth_asset_lod_index: -1,
            extra,
            ..self.clone()
        }
    }
}

/// Interleaved `{tangent_x, tangent_z, position, uvs}` vertices (pre-4.27).
#[derive(Debug, Clone, PartialEq)]
pub struct GpuVertexBuffer {
    pub strip: StripFlags,
    pub num_tex_coords: u32,
    pub full_precision_uvs: bool,
    pub extension: [f32; 3],
    pub origin: [f32; 3],
    pub data: BulkArray,
}

impl GpuVertexBuffer {
    fn vertex_size(num_tex_coords: u32, full_precision_uvs: bool) -> u32 {
        20 + uv_size(full_precision_uvs) as u32 * num_tex_coords
    }

    fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let buffer = Self {
            strip: StripFlags::read(r)?,
            num_tex_coords: r.read_u32()?,
            full_precision_uvs: r.read_bool32()?,
            extension: r.read_f32_array()?,
            origin: r.read_f32_array()?,
            data: BulkArray::read(r)?,
        };
        buffer.data.expect_element_size(
            Self::vertex_size(buffer.num_tex_coords, buffer.full_precision_uvs),
            "skeletal vertex buffer",
        )?;
        Ok(buffer)
    }

    fn write(&self, w: &mut ByteWriter) {
        self.strip.write(w);
        w.write_u32(self.num_tex_coords);
        w.write_bool32(self.full_precision_uvs);
        w.write_f32_slice(&self.extension);
        w.write_f32_slice(&self.origin);
        self.data.write(w);
    }

    pub fn positions(&self) -> Vec<[f32; 3]> {
        self.data.elements().map(|v| read_vec3(&v[8..20])).collect()
    }

    pub fn attributes(&self) -> VertexAttributes {
        let channels = self.num_tex_coords as usize;
        let uv_bytes = uv_size(self.full_precision_uvs);
        let mut out = VertexAttributes {
            uvs: vec![Vec::with_capacity(self.data.count as usize); channels],
            ..Default::default()
        };
        for vertex in self.data.elements() {
            let (tangent, normal) = unpack_tangent_basis(read_u32_at(vertex, 0), read_u32_at(vertex, 4), false);
            out.tangents.push(tangent);
            out.normals.push(normal);
            for (channel, uv) in vertex[20..].chunks_exact(uv_bytes).take(channels).enumerate() {
                out.uvs[channel].push(read_uv(uv, self.full_precision_uvs));
            }
        }
        out
    }

    fn build(positions: &[[f32; 3]], attrs: &VertexAttributes, full_precision_uvs: bool) -> Self {
        let num_tex_coords = attrs.uvs.len() as u32;
        let stride = Self::vertex_size(num_tex_coords, full_precision_uvs);
        let mut data = Vec::with_capacity(positions.len() * stride as usize);
        for (i, position) in positions.iter().enumerate() {
            let tangent = attrs.tangents.get(i).copied().unwrap_or(DEFAULT_TANGENT);
            let normal = attrs.normals.get(i).copied().unwrap_or([0.0, 0.0, 1.0]);
            let (x, z) = pack_tangent_basis(tangent, normal, false);
            data.extend_from_slice(&x.to_le_bytes());
            data.extend_from_slice(&z.to_le_bytes());
            for c in position {
                data.extend_from_slice(&c.to_le_bytes());
            }
            for channel in &attrs.uvs {
                write_uv(&mut data, channel.get(i).copied().unwrap_or_default(), full_precision_uvs);
            }
        }
        Self {
            strip: StripFlags::COOKED,
            num_tex_coords,
            full_precision_uvs,
            extension: [1.0; 3],
            origin: [0.0; 3],
            data: BulkArray {
                element_size: stride,
                count: positions.len() as u32,
                data,
            },
        }
    }
}

/// Per-vertex bone influences. Bone indices are section-local (indices into
/// the section's bone map); weights are normalized to 255.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkinInfluences {
    pub bones: Vec<Vec<u16>>,
    pub weights: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkinWeightBuffer {
    /// 4 or 8 influences per vertex, `u8` bone indices then `u8` weights.
    Fixed {
        strip: StripFlags,
        extra_influences: bool,
        num_vertices: u32,
        data: BulkArray,
    },
    /// `max_influences` per vertex in a byte array (4.27+).
    Variable {
        strip: StripFlags,
        variable_influences: bool,
        max_influences: u32,
        num_bones: u32,
        num_vertices: u32,
        use_16bit_indices: bool,
        data: BulkArray,
    },
}

impl SkinWeightBuffer {
    fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let offset = r.position();
        let strip = StripFlags::read(r)?;
        if !uses_split_vertex_layout(version) {
            let extra_influences = r.read_bool32()?;
            let num_vertices = r.read_u32()?;
            let data = BulkArray::read(r)?;
            data.expect_element_size(if extra_influences { 16 } else { 8 }, "skin weights")?;
            if data.count != num_vertices {
                return Err(malformed(
                    offset,
                    format!("skin weights for {} vertices, header says {num_vertices}", data.count),
                ));
            }
            return Ok(Self::Fixed {
                strip,
                extra_influences,
                num_vertices,
                data,
            });
        }
        let variable_influences = r.read_bool32()?;
        let max_influences = r.read_u32()?;
        let num_bones = r.read_u32()?;
        let num_vertices = r.read_u32()?;
        let use_16bit_indices = r.read_bool32()?;
        let data = BulkArray::read(r)?;
        data.expect_element_size(1, "skin weights")?;
        if num_bones != max_influences.saturating_mul(num_vertices) {
            return Err(malformed(
                offset,
                format!("{num_bones} influences for {num_vertices} vertices of {max_influences}"),
            ));
        }
        Ok(Self::Variable {
            strip,
            variable_influences,
            max_influences,
            num_bones,
            num_vertices,
            use_16bit_indices,
            data,
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        match self {
            Self::Fixed {
                strip,
                extra_influences,
                num_vertices,
                data,
            } => {
                strip.write(w);
                w.write_bool32(*extra_influences);
                w.write_u32(*num_vertices);
                data.write(w);
            }
            Self::Variable {
                strip,
                variable_influences,
                max_influences,
                num_bones,
                num_vertices,
                use_16bit_indices,
                data,
            } => {
                strip.write(w);
                w.write_bool32(*variable_influences);
                w.write_u32(*max_influences);
                w.write_u32(*num_bones);
                w.write_u32(*num_vertices);
                w.write_bool32(*use_16bit_indices);
                data.write(w);
            }
        }
    }

    pub fn num_vertices(&self) -> u32 {
        match self {
            Self::Fixed { num_vertices, .. } | Self::Variable { num_vertices, .. } => *num_vertices,
        }
    }

    pub fn influences(&self) -> SkinInfluences {
        let mut out = SkinInfluences::default();
        match self {
            Self::Fixed { data, .. } => {
                for vertex in data.elements() {
                    let (bones, weights) = vertex.split_at(vertex.len() / 2);
                    out.bones.push(bones.iter().map(|&b| b as u16).collect());
                    out.weights.push(weights.to_vec());
                }
            }
            Self::Variable {
                max_influences,
                use_16bit_indices,
                data,
                ..
            } => {
                let count = *max_influences as usize;
                let index_size = if *use_16bit_indices { 2 } else { 1 };
                let per_vertex = count * (index_size + 1);
                if per_vertex == 0 {
                    return out;
                }
                for vertex in data.data.chunks_exact(per_vertex) {
                    let (bones, weights) = vertex.split_at(count * index_size);
                    out.bones.push(if *use_16bit_indices {
                        bones.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect()
                    } else {
                        bones.iter().map(|&b| b as u16).collect()
                    });
                    out.weights.push(weights.to_vec());
                }
            }
        }
        out
    }

    /// Encode influences in the layout `version` expects, padding every
    /// vertex to the widest one.
    pub fn build(influences: &SkinInfluences, version: EngineVersion) -> AssetResult<Self> {
        let widest = influences.bones.iter().map(Vec::len).max().unwrap_or(0);
        let num_vertices = influences.bones.len() as u32;
        let bone = |v: usize, i: usize| influences.bones[v].get(i).copied().unwrap_or(0);
        let weight = |v: usize, i: usize| influences.weights.get(v).and_then(|w| w.get(i)).copied().unwrap_or(0);
        if uses_split_vertex_layout(version) {
            let max_influences = widest.max(1);
            let use_16bit_indices = influences.bones.iter().flatten().any(|&b| b > u8::MAX as u16);
            let mut data = Vec::new();
            for v in 0..influences.bones.len() {
                for i in 0..max_influences {
                    if use_16bit_indices {
                        data.extend_from_slice(&bone(v, i).to_le_bytes());
                    } else {
                        data.push(bone(v, i) as u8);
                    }
                }
                data.extend((0..max_influences).map(|i| weight(v, i)));
            }
            return Ok(Self::Variable {
                strip: StripFlags::COOKED,
                variable_influences: false,
                max_influences: max_influences as u32,
                num_bones: (max_influences as u32) * num_vertices,
                num_vertices,
                use_16bit_indices,
                data: BulkArray::from_bytes(1, data),
            });
        }

        if widest > 8 {
            return Err(malformed(0, format!("{widest} influences per vertex, at most 8 fit")));
        }
        if let Some(b) = influences.bones.iter().flatten().find(|&&b| b > u8::MAX as u16) {
            return Err(malformed(0, format!("bone index {b} does not fit in a byte")));
        }
        let extra_influences = widest > 4;
        let width = if extra_influences { 8 } else { 4 };
        let mut data = Vec::with_capacity(influences.bones.len() * width * 2);
        for v in 0..influences.bones.len() {
            data.extend((0..width).map(|i| bone(v, i) as u8));
            data.extend((0..width).map(|i| weight(v, i)));
        }
        Ok(Self::Fixed {
            strip: StripFlags::COOKED,
            extra_influences,
            num_vertices,
            data: BulkArray::from_bytes(width as u32 * 2, data),
        })
    }
}

/// Render buffers of a LOD, in one of the two layouts.
#[derive(Debug, Clone, PartialEq)]
pub enum LodBuffers {
    Legacy {
        reserved: u32,
        vertex_map: Vec<u32>,
        max_vertex_map_index: u32,
        vertices: GpuVertexBuffer,
        colors: Option<ColorBuffer>,
        adjacency: Option<SkeletalIndexBuffer>,
        /// KDI record and vertex buffers, present when any section binds
        /// KDI records.
        kdi: Option<[KdiBuffer; 2]>,
    },
    Split {
        cooked_out: u32,
        inlined: u32,
        block_strip: StripFlags,
        positions: PositionBuffer,
        vertices: StaticVertexBuffer,
        /// Block bytes after the skin weights (colors, adjacency, ray tracing data).
        block_tail: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletalLod {
    pub strip: StripFlags,
    pub sections: Vec<SkeletalSection>,
    pub active_bones: Vec<u16>,
    pub required_bones: Vec<u16>,
    pub indices: SkeletalIndexBuffer,
    pub weights: SkinWeightBuffer,
    pub buffers: LodBuffers,
}

impl SkeletalLod {
    fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        if uses_split_vertex_layout(version) {
            Self::read_split(r, version)
        } else {
            Self::read_legacy(r, version)
        }
    }

    fn read_legacy(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let strip = StripFlags::read(r)?;
        let sections = r.read_counted(40, |r| SkeletalSection::read(r, version))?;
        let indices = SkeletalIndexBuffer::read(r)?;
        let active_bones = r.read_u16_array()?;
        let reserved = r.read_u32()?;
        let offset = r.position();
        let num_vertices = r.read_u32()?;
        let required_bones = r.read_u16_array()?;
        let vertex_map = r.read_u32_array()?;
        let max_vertex_map_index = r.read_u32()?;
        let num_tex_coords = r.read_u32()?;
        let vertices = GpuVertexBuffer::read(r)?;
        if vertices.data.count != num_vertices || vertices.num_tex_coords != num_tex_coords {
            return Err(malformed(
                offset,
                format!(
                    "LOD declares {num_vertices} vertices with {num_tex_coords} UVs, buffer has {} with {}",
                    vertices.data.count, vertices.num_tex_coords
                ),
            ));
        }
        let weights = SkinWeightBuffer::read(r, version)?;
        let has_adjacency = !strip.is_class_stripped(NO_ADJACENCY);
        // A color buffer starts with its strip flags (1), an index buffer
        // with its index size (2 or 4).
        let colors = if has_adjacency && r.rest().first() == Some(&1) {
            Some(ColorBuffer::read(r)?)
        } else {
            None
        };
        let adjacency = if has_adjacency { Some(SkeletalIndexBuffer::read(r)?) } else { None };
        let kdi_records: usize = sections.iter().map(SkeletalSection::kdi_records).sum();
        let kdi = if kdi_records > 0 {
            let offset = r.position();
            let records = KdiBuffer::read(r)?;
            if records.data.count as usize != kdi_records {
                return Err(malformed(
                    offset,
                    format!(
                        "KDI buffer holds {} records, sections bind {kdi_records}",
                        records.data.count
                    ),
                ));
            }
            Some([records, KdiBuffer::read(r)?])
        } else {
            None
        };
        Ok(Self {
            strip,
            sections,
            active_bones,
            required_bones,
            indices,
            weights,
            buffers: LodBuffers::Legacy {
                reserved,
                vertex_map,
                max_vertex_map_index,
                vertices,
                colors,
                adjacency,
                kdi,
            },
        })
    }

    fn read_split(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let strip = StripFlags::read(r)?;
        let cooked_out = r.read_u32()?;
        let inlined = r.read_u32()?;
        if inlined == 0 {
            return Err(unsupported_version("skeletal LOD buffers are streamed, not inlined"));
        }
        let active_bones = r.read_u16_array()?;
        let sections = r.read_counted(60, |r| SkeletalSection::read(r, version))?;
        let required_bones = r.read_u16_array()?;
        let block_size = r.read_u32()? as usize;
        let mut block = ByteReader::new(r.read_bytes(block_size)?);
        let block_strip = StripFlags::read(&mut block)?;
        let indices = SkeletalIndexBuffer::read(&mut block)?;
        let positions = PositionBuffer::read(&mut block)?;
        let vertices = StaticVertexBuffer::read(&mut block, version)?;
        let weights = SkinWeightBuffer::read(&mut block, version)?;
        if positions.num_vertices != vertices.num_vertices {
            return Err(malformed(
                r.position(),
                format!(
                    "LOD has {} positions but {} vertices",
                    positions.num_vertices, vertices.num_vertices
                ),
            ));
        }
        Ok(Self {
            strip,
            sections,
            active_bones,
            required_bones,
            indices,
            weights,
            buffers: LodBuffers::Split {
                cooked_out,
                inlined,
                block_strip,
                positions,
                vertices,
                block_tail: block.rest().to_vec(),
            },
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        self.strip.write(w);
        match &self.buffers {
            LodBuffers::Legacy {
                reserved,
                vertex_map,
                max_vertex_map_index,
                vertices,
                colors,
                adjacency,
                kdi,
            } => {
                self.write_sections(w);
                self.indices.write(w);
                w.write_u16_array(&self.active_bones);
                w.write_u32(*reserved);
                w.write_u32(vertices.data.count);
                w.write_u16_array(&self.required_bones);
                w.write_u32_array(vertex_map);
                w.write_u32(*max_vertex_map_index);
                w.write_u32(vertices.num_tex_coords);
                vertices.write(w);
                self.weights.write(w);
                if let Some(colors) = colors {
                    colors.write(w);
                }
                if let Some(adjacency) = adjacency {
                    adjacency.write(w);
                }
                for buffer in kdi.iter().flatten() {
                    buffer.write(w);
                }
            }
            LodBuffers::Split {
                cooked_out,
                inlined,
                block_strip,
                positions,
                vertices,
                block_tail,
            } => {
                w.write_u32(*cooked_out);
                w.write_u32(*inlined);
                w.write_u16_array(&self.active_bones);
                self.write_sections(w);
                w.write_u16_array(&self.required_bones);
                let mut block = ByteWriter::new();
                block_strip.write(&mut block);
                self.indices.write(&mut block);
                positions.write(&mut block);
                vertices.write(&mut block);
                self.weights.write(&mut block);
                block.write_bytes(block_tail);
                w.write_count(block.position());
                w.write_bytes(block.as_slice());
            }
        }
    }

    fn write_sections(&self, w: &mut ByteWriter) {
        w.write_count(self.sections.len());
        for section in &self.sections {
            section.write(w);
        }
    }

    pub fn num_vertices(&self) -> usize {
        match &self.buffers {
            LodBuffers::Legacy { vertices, .. } => vertices.data.count as usize,
            LodBuffers::Split { positions, .. } => positions.num_vertices as usize,
        }
    }

    pub fn num_tex_coords(&self) -> u32 {
        match &self.buffers {
            LodBuffers::Legacy { vertices, .. } => vertices.num_tex_coords,
            LodBuffers::Split { vertices, .. } => vertices.num_tex_coords,
        }
    }

    pub fn full_precision_uvs(&self) -> bool {
        match &self.buffers {
            LodBuffers::Legacy { vertices, .. } => vertices.full_precision_uvs,
            LodBuffers::Split { vertices, .. } => vertices.full_precision_uvs,
        }
    }

    pub fn positions(&self) -> Vec<[f32; 3]> {
        match &self.buffers {
            LodBuffers::Legacy { vertices, .. } => vertices.positions(),
            LodBuffers::Split { positions, .. } => positions.positions(),
        }
    }

    pub fn attributes(&self, version: EngineVersion) -> VertexAttributes {
        match &self.buffers {
            LodBuffers::Legacy { vertices, .. } => vertices.attributes(),
            LodBuffers::Split { vertices, .. } => vertices.attributes(version),
        }
    }

    pub fn colors(&self) -> Vec<[u8; 4]> {
        match &self.buffers {
            LodBuffers::Legacy { colors: Some(colors), .. } => colors.colors(),
            _ => Vec::new(),
        }
    }

    /// Replace the geometry of this LOD, keeping its layout. Buffers that
    /// are derived from the old geometry (colors, adjacency, vertex map and
    /// KDI buffers) are dropped; bytes kept raw in the split layout are
    /// carried over.
    #[allow(clippy::too_many_arguments)]
    pub fn rebuild(
        &self,
        sections: Vec<SkeletalSection>,
        bones: Vec<u16>,
        positions: &[[f32; 3]],
        attrs: &VertexAttributes,
        influences: &SkinInfluences,
        indices: &[u32],
        version: EngineVersion,
    ) -> AssetResult<Self> {
        let full_precision_uvs = self.full_precision_uvs();
        let weights = SkinWeightBuffer::build(influences, version)?;
        let (strip, buffers) = match &self.buffers {
            LodBuffers::Legacy { reserved, .. } => (
                StripFlags {
                    class: self.strip.class | NO_ADJACENCY,
                    ..self.strip
                },
                LodBuffers::Legacy {
                    reserved: *reserved,
                    vertex_map: Vec::new(),
                    max_vertex_map_index: 0,
                    vertices: GpuVertexBuffer::build(positions, attrs, full_precision_uvs),
                    colors: None,
                    adjacency: None,
                    kdi: None,
                },
            ),
            LodBuffers::Split {
                cooked_out,
                inlined,
                block_strip,
                block_tail,
                ..
            } => {
                if !block_tail.is_empty() {
                    warn!(bytes = block_tail.len(), "keeping trailing LOD buffers sized for the old geometry");
                }
                (
                    self.strip,
                    LodBuffers::Split {
                        cooked_out: *cooked_out,
                        inlined: *inlined,
                        block_strip: *block_strip,
                        positions: PositionBuffer::from_positions(positions),
                        vertices: StaticVertexBuffer::build(attrs, full_precision_uvs, version),
                        block_tail: block_tail.clone(),
                    },
                )
            }
        };
        Ok(Self {
            strip,
            sections,
            active_bones: bones.clone(),
            required_bones: bones,
            indices: SkeletalIndexBuffer::from_indices(indices),
            weights,
            buffers,
        })
    }
}

/// Low-poly skinned mesh FF7R stores after the LODs, used for collision
/// against cloth.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraMesh {
    /// `3 x f32` per vertex.
    pub positions: Vec<u8>,
    /// `4 x u16` bone indices then `4 x u8` weights per vertex.
    pub weights: Vec<u8>,
    /// `3 x u16` per triangle.
    pub indices: Vec<u8>,
    pub tail: [u8; 8],
}

impl ExtraMesh {
    const VERTEX_SIZE: usize = 12;
    const TRIANGLE_SIZE: usize = 6;

    fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let offset = r.position();
        let marker = r.read_u32()?;
        if marker != 1 {
            return Err(malformed(offset, format!("extra mesh marker {marker}, expected 1")));
        }
        let num_vertices = r.read_count(Self::VERTEX_SIZE)?;
        let positions = r.read_bytes(num_vertices * Self::VERTEX_SIZE)?.to_vec();
        let offset = r.position();
        let num_weights = r.read_u32()? as usize;
        if num_weights != num_vertices {
            return Err(malformed(
                offset,
                format!("extra mesh has {num_vertices} vertices but {num_weights} weights"),
            ));
        }
        let weights = r.read_bytes(num_vertices * Self::VERTEX_SIZE)?.to_vec();
        let num_triangles = r.read_count(Self::TRIANGLE_SIZE)?;
        let indices = r.read_bytes(num_triangles * Self::TRIANGLE_SIZE)?.to_vec();
        Ok(Self {
            positions,
            weights,
            indices,
            tail: r.read_array()?,
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        let num_vertices = self.num_vertices();
        w.write_u32(1);
        w.write_count(num_vertices);
        w.write_bytes(&self.positions);
        w.write_count(num_vertices);
        w.write_bytes(&self.weights);
        w.write_count(self.indices.len() / Self::TRIANGLE_SIZE);
        w.write_bytes(&self.indices);
        w.write_bytes(&self.tail);
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.len() / Self::VERTEX_SIZE
    }

    pub fn num_triangles(&self) -> usize {
        self.indices.len() / Self::TRIANGLE_SIZE
    }

    /// Drop the geometry; its bone indices refer to the old skeleton.
    pub fn disable(&mut self) {
        self.positions.clear();
        self.weights.clear();
        self.indices.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletalMesh {
    pub header: ObjectHeader,
    pub strip: StripFlags,
    pub bounds: Bounds,
    pub materials: Vec<MaterialSlot>,
    pub reference: ReferenceSkeleton,
    /// Cooked flag stored before the LODs from 4.27 on.
    pub cooked: Option<bool>,
    pub lods: Vec<SkeletalLod>,
    /// Stored by FF7R only.
    pub extra_mesh: Option<ExtraMesh>,
    pub trailing: Vec<u8>,
}

impl SkeletalMesh {
    /// Keep the first `keep` LODs (at least one) and trim `LODInfo` to match.
    pub fn remove_lods(&mut self, keep: usize) -> AssetResult<usize> {
        let keep = keep.max(1);
        let removed = self.lods.len().saturating_sub(keep);
        self.lods.truncate(keep);
        truncate_array_property(&mut self.header.properties, "LODInfo", keep)?;
        debug!(removed, kept = self.lods.len(), "removed skeletal mesh LODs");
        Ok(removed)
    }

    /// Append a material slot named `slot_name` that points at the same
    /// material import as slot 0. Returns the new slot's index.
    pub fn add_material_slot(&mut self, names: &mut NameTable, slot_name: &str) -> AssetResult<usize> {
        let Some(template) = self.materials.first() else {
            return Err(dangling(TableKind::Material, 0, 0));
        };
        let slot = MaterialSlot {
            slot_name: names.intern(slot_name),
            ..template.clone()
        };
        self.materials.push(slot);
        debug!(slot = slot_name, count = self.materials.len(), "added material slot");
        Ok(self.materials.len() - 1)
    }
}

impl ExportCodec for SkeletalMesh {
    fn decode(payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<Self> {
        let split = uses_split_vertex_layout(ctx.version);
        let mut r = ByteReader::new(payload);
        let header = ObjectHeader::parse(&mut r, ctx)?;
        let strip = StripFlags::read(&mut r)?;
        let bounds = Bounds::read(&mut r)?;
        let materials = read_materials(&mut r, ctx.names, split)?;
        let reference = ReferenceSkeleton::read(&mut r, ctx.names, ctx.version)?;
        let cooked = if split { Some(r.read_bool32()?) } else { None };
        let lods = r.read_counted(40, |r| SkeletalLod::read(r, ctx.version))?;
        let extra_mesh = if ctx.version.is_game(GameVariant::Ff7r) {
            Some(ExtraMesh::read(&mut r)?)
        } else {
            None
        };
        for (i, lod) in lods.iter().enumerate() {
            if lod.weights.num_vertices() as usize != lod.num_vertices() {
                return Err(malformed(
                    r.position(),
                    format!(
                        "LOD {i} has {} vertices but {} skin weights",
                        lod.num_vertices(),
                        lod.weights.num_vertices()
                    ),
                ));
            }
        }
        debug!(
            bones = reference.len(),
            lods = lods.len(),
            materials = materials.len(),
            "decoded skeletal mesh"
        );
        Ok(Self {
            header,
            strip,
            bounds,
            materials,
            reference,
            cooked,
            lods,
            extra_mesh,
            trailing: r.rest().to_vec(),
        })
    }

    fn encode(&self, ctx: &mut EncodeContext) -> AssetResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.header.write(&mut w);
        self.strip.write(&mut w);
        self.bounds.write(&mut w);
        write_materials(&mut w, &self.materials);
        self.reference.write(&mut w, ctx.version);
        if let Some(cooked) = self.cooked {
            w.write_bool32(cooked);
        }
        w.write_count(self.lods.len());
        for lod in &self.lods {
            lod.write(&mut w);
        }
        if let Some(extra_mesh) = &self.extra_mesh {
            extra_mesh.write(&mut w);
        }
        w.write_bytes(&self.trailing);
        Ok(w.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{name_table, sample_skeletal_mesh};

    #[test]
    fn test_skeletal_mesh_round_trip() {
        for version in [EngineVersion::UE4_25, EngineVersion::UE4_27, EngineVersion::UE5_0] {
            let mut names = name_table(&["None"]);
            let mesh = sample_skeletal_mesh(&mut names, version, &[-1, 0, 0]);
            let payload = mesh.encode(&mut EncodeContext::new(version, 0)).unwrap();
            let decoded = SkeletalMesh::decode(&payload, &DecodeContext::new(&names, version)).unwrap();
            assert_eq!(decoded, mesh, "{version}");
            assert_eq!(decoded.reference.len(), 3);
            assert_eq!(decoded.lods[0].num_vertices(), 4);
            assert_eq!(decoded.lods[0].weights.influences().bones.len(), 4);
        }
    }

    #[test]
    fn test_skin_weights_layouts() {
        let influences = SkinInfluences {
            bones: vec![vec![0, 1], vec![2], vec![0, 1, 2, 3, 4]],
            weights: vec![vec![128, 127], vec![255], vec![51, 51, 51, 51, 51]],
        };
        let fixed = SkinWeightBuffer::build(&influences, EngineVersion::UE4_25).unwrap();
        assert!(matches!(fixed, SkinWeightBuffer::Fixed { extra_influences: true, .. }));
        let decoded = fixed.influences();
        assert_eq!(decoded.bones[0], vec![0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decoded.weights[1][0], 255);

        let variable = SkinWeightBuffer::build(&influences, EngineVersion::UE4_27).unwrap();
        let SkinWeightBuffer::Variable { max_influences, num_bones, .. } = &variable else {
            panic!("expected variable weights");
        };
        assert_eq!((*max_influences, *num_bones), (5, 15));
        assert_eq!(variable.influences().bones[2], vec![0, 1, 2, 3, 4]);

        let wide = SkinInfluences {
            bones: vec![vec![300]],
            weights: vec![vec![255]],
        };
        assert!(SkinWeightBuffer::build(&wide, EngineVersion::UE4_25).is_err());
        let wide = SkinWeightBuffer::build(&wide, EngineVersion::UE5_0).unwrap();
        assert_eq!(wide.influences().bones[0], vec![300]);
    }

    #[test]
    fn test_remove_lods_and_add_material() {
        let mut names = name_table(&["None"]);
        let mut mesh = sample_skeletal_mesh(&mut names, EngineVersion::UE4_27, &[-1, 0]);
        mesh.lods.push(mesh.lods[0].clone());
        assert_eq!(mesh.remove_lods(1).unwrap(), 1);
        assert_eq!(mesh.lods.len(), 1);

        let index = mesh.add_material_slot(&mut names, "Cloth").unwrap();
        assert_eq!(index, 1);
        assert_eq!(mesh.materials[1].material, mesh.materials[0].material);
        assert_eq!(mesh.materials[1].slot_name.text(), "Cloth");
        assert!(names.find("Cloth").is_some());
    }

    fn bind_kdi(mesh: &mut SkeletalMesh) {
        let lod = &mut mesh.lods[0];
        let SectionExtra::Legacy { kdi, .. } = &mut lod.sections[0].extra else {
            panic!("expected a legacy section");
        };
        *kdi = Some(KdiBinding {
            flag: 1,
            records: vec![[0x11; 16], [0x22; 16]],
        });
        let LodBuffers::Legacy { kdi, .. } = &mut lod.buffers else {
            panic!("expected legacy buffers");
        };
        *kdi = Some([
            KdiBuffer {
                marker: 1,
                data: BulkArray::from_bytes(16, vec![0x33; 32]),
            },
            KdiBuffer {
                marker: 1,
                data: BulkArray::from_bytes(4, vec![0x44; 12]),
            },
        ]);
    }

    #[test]
    fn test_game_variant_layouts() {
        for version in [EngineVersion::KH3, EngineVersion::FF7R] {
            let mut names = name_table(&["None"]);
            let plain = sample_skeletal_mesh(&mut names, version, &[-1, 0]);
            let payload = plain.encode(&mut EncodeContext::new(version, 0)).unwrap();
            assert_eq!(
                SkeletalMesh::decode(&payload, &DecodeContext::new(&names, version)).unwrap(),
                plain
            );

            let mut mesh = plain.clone();
            bind_kdi(&mut mesh);
            if version.is_game(GameVariant::Ff7r) {
                mesh.extra_mesh = Some(ExtraMesh {
                    positions: vec![0; 36],
                    weights: vec![0; 36],
                    indices: vec![0, 0, 1, 0, 2, 0],
                    tail: [9; 8],
                });
            }
            let payload = mesh.encode(&mut EncodeContext::new(version, 0)).unwrap();
            let decoded = SkeletalMesh::decode(&payload, &DecodeContext::new(&names, version)).unwrap();
            assert_eq!(decoded, mesh, "{version}");
            assert_eq!(decoded.lods[0].sections[0].kdi_records(), 2);
            assert!(decoded.trailing.is_empty());
            if let Some(extra_mesh) = &decoded.extra_mesh {
                assert_eq!((extra_mesh.num_vertices(), extra_mesh.num_triangles()), (3, 1));
            }
        }
    }

    #[test]
    fn test_kdi_buffer_must_match_bindings() {
        let version = EngineVersion::KH3;
        let mut names = name_table(&["None"]);
        let mut mesh = sample_skeletal_mesh(&mut names, version, &[-1]);
        bind_kdi(&mut mesh);
        if let LodBuffers::Legacy { kdi: Some([records, _]), .. } = &mut mesh.lods[0].buffers {
            records.data = BulkArray::from_bytes(16, vec![0; 48]);
        }
        let payload = mesh.encode(&mut EncodeContext::new(version, 0)).unwrap();
        let err = SkeletalMesh::decode(&payload, &DecodeContext::new(&names, version)).unwrap_err();
        assert!(matches!(
            err.current_context(),
            crate::error::AssetError::Malformed { .. }
        ));
    }

    #[test]
    fn test_streamed_lod_is_unsupported() {
        let mut names = name_table(&["None"]);
        let mut mesh = sample_skeletal_mesh(&mut names, EngineVersion::UE4_27, &[-1]);
        if let LodBuffers::Split { inlined, .. } = &mut mesh.lods[0].buffers {
            *inlined = 0;
        }
        let payload = mesh.encode(&mut EncodeContext::new(EngineVersion::UE4_27, 0)).unwrap();
        let err = SkeletalMesh::decode(&payload, &DecodeContext::new(&names, EngineVersion::UE4_27)).unwrap_err();
        assert!(matches!(
            err.current_context(),
            crate::error::AssetError::UnsupportedVersion { .. }
        ));
    }
}
