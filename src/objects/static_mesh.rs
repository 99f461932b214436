//! `StaticMesh` exports: render data per LOD plus material slots.

use tracing::debug;

use crate::data::{ByteReader, ByteWriter};
use crate::error::{AssetResult, malformed};
use crate::objects::common::{
    Bounds, ColorBuffer, MaterialSlot, PositionBuffer, RawIndexBuffer, StaticVertexBuffer, StripFlags,
    VertexAttributes, read_materials, uses_split_vertex_layout, write_materials,
};
use crate::objects::{DecodeContext, EncodeContext, ExportCodec, ObjectHeader};
use crate::package::tables::PackageIndex;
use crate::version::EngineVersion;

/// Number of LOD screen sizes a static mesh always stores.
pub const MAX_STATIC_LODS: usize = 8;

/// A run of triangles drawn with one material.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSection {
    pub material_index: i32,
    pub first_index: u32,
    pub num_triangles: u32,
    pub min_vertex: u32,
    pub max_vertex: u32,
    pub enable_collision: bool,
    pub cast_shadow: bool,
    /// `force_opaque` and `visible_in_ray_tracing`, stored from 4.27 on.
    pub extra_flags: Option<[u32; 2]>,
}

impl StaticSection {
    fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        Ok(Self {
            material_index: r.read_i32()?,
            first_index: r.read_u32()?,
            num_triangles: r.read_u32()?,
            min_vertex: r.read_u32()?,
            max_vertex: r.read_u32()?,
            enable_collision: r.read_bool32()?,
            cast_shadow: r.read_bool32()?,
            extra_flags: if uses_split_vertex_layout(version) {
                Some([r.read_u32()?, r.read_u32()?])
            } else {
                None
            },
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_i32(self.material_index);
        w.write_u32(self.first_index);
        w.write_u32(self.num_triangles);
        w.write_u32(self.min_vertex);
        w.write_u32(self.max_vertex);
        w.write_bool32(self.enable_collision);
        w.write_bool32(self.cast_shadow);
        if let Some(flags) = self.extra_flags {
            w.write_u32(flags[0]);
            w.write_u32(flags[1]);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticLod {
    pub strip: StripFlags,
    pub sections: Vec<StaticSection>,
    pub max_deviation: f32,
    /// Bytes following the deviation from 4.27 on.
    pub deviation_extra: Option<[u8; 10]>,
    pub positions: PositionBuffer,
    pub vertices: StaticVertexBuffer,
    pub colors: ColorBuffer,
    pub indices: RawIndexBuffer,
    pub reversed_indices: RawIndexBuffer,
    pub depth_only_indices: RawIndexBuffer,
    pub reversed_depth_only_indices: RawIndexBuffer,
    pub adjacency_indices: RawIndexBuffer,
}

impl StaticLod {
    fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let strip = StripFlags::read(r)?;
        let sections = r.read_counted(28, |r| StaticSection::read(r, version))?;
        let max_deviation = r.read_f32()?;
        let deviation_extra = if uses_split_vertex_layout(version) {
            Some(r.read_array()?)
        } else {
            None
        };
        let positions = PositionBuffer::read(r)?;
        let vertices = StaticVertexBuffer::read(r, version)?;
        let colors = ColorBuffer::read(r)?;
        let lod = Self {
            strip,
            sections,
            max_deviation,
            deviation_extra,
            positions,
            vertices,
            colors,
            indices: RawIndexBuffer::read(r, version)?,
            reversed_indices: RawIndexBuffer::read(r, version)?,
            depth_only_indices: RawIndexBuffer::read(r, version)?,
            reversed_depth_only_indices: RawIndexBuffer::read(r, version)?,
            adjacency_indices: RawIndexBuffer::read(r, version)?,
        };
        if lod.positions.num_vertices != lod.vertices.num_vertices {
            return Err(malformed(
                r.position(),
                format!(
                    "LOD has {} positions but {} vertices",
                    lod.positions.num_vertices, lod.vertices.num_vertices
                ),
            ));
        }
        Ok(lod)
    }

    fn write(&self, w: &mut ByteWriter) {
        self.strip.write(w);
        w.write_count(self.sections.len());
        for section in &self.sections {
            section.write(w);
        }
        w.write_f32(self.max_deviation);
        if let Some(extra) = &self.deviation_extra {
            w.write_bytes(extra);
        }
        self.positions.write(w);
        self.vertices.write(w);
        self.colors.write(w);
        for buffer in [
            &self.indices,
            &self.reversed_indices,
            &self.depth_only_indices,
            &self.reversed_depth_only_indices,
            &self.adjacency_indices,
        ] {
            buffer.write(w);
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.num_vertices as usize
    }

    /// Assemble a LOD from geometry. Settings that are not geometry come
    /// from `template`; auxiliary index buffers are left empty.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        template: Option<&StaticLod>,
        sections: Vec<StaticSection>,
        positions: &[[f32; 3]],
        attrs: &VertexAttributes,
        colors: &[[u8; 4]],
        indices: &[u32],
        full_precision_uvs: bool,
        version: EngineVersion,
    ) -> Self {
        let indices = RawIndexBuffer::from_indices(indices, version);
        let empty = indices.cleared();
        Self {
            strip: template.map(|t| t.strip).unwrap_or_default(),
            sections,
            max_deviation: template.map(|t| t.max_deviation).unwrap_or(0.0),
            deviation_extra: match template {
                Some(t) => t.deviation_extra,
                None => uses_split_vertex_layout(version).then_some([0; 10]),
            },
            positions: PositionBuffer::from_positions(positions),
            vertices: StaticVertexBuffer::build(attrs, full_precision_uvs, version),
            colors: ColorBuffer::from_colors(colors),
            indices,
            reversed_indices: empty.clone(),
            depth_only_indices: empty.clone(),
            reversed_depth_only_indices: empty.clone(),
            adjacency_indices: empty,
        }
    }
}

/// Distance-based LOD switch point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenSize {
    pub cooked: bool,
    pub value: f32,
}

/// Cooked render data: every LOD plus bounds and switch points.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticRenderData {
    pub lods: Vec<StaticLod>,
    pub bounds: Bounds,
    pub lods_share_static_lighting: bool,
    pub screen_sizes: [ScreenSize; MAX_STATIC_LODS],
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticMesh {
    pub header: ObjectHeader,
    pub strip: StripFlags,
    pub body_setup: PackageIndex,
    pub nav_collision: PackageIndex,
    pub lighting_guid: [u8; 16],
    pub sockets: Vec<PackageIndex>,
    /// Present for cooked meshes.
    pub render_data: Option<StaticRenderData>,
    pub has_speedtree: bool,
    pub materials: Vec<MaterialSlot>,
    pub trailing: Vec<u8>,
}

impl StaticMesh {
    pub fn lods(&self) -> &[StaticLod] {
        self.render_data.as_ref().map(|d| d.lods.as_slice()).unwrap_or_default()
    }

    /// Keep the first `keep` LODs (at least one).
    pub fn remove_lods(&mut self, keep: usize) -> usize {
        let Some(data) = &mut self.render_data else {
            return 0;
        };
        let keep = keep.max(1);
        let removed = data.lods.len().saturating_sub(keep);
        data.lods.truncate(keep);
        for size in data.screen_sizes.iter_mut().skip(keep) {
            *size = ScreenSize::default();
        }
        debug!(removed, kept = data.lods.len(), "removed static mesh LODs");
        removed
    }
}

impl ExportCodec for StaticMesh {
    fn decode(payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<Self> {
        let mut r = ByteReader::new(payload);
        let header = ObjectHeader::parse(&mut r, ctx)?;
        let strip = StripFlags::read(&mut r)?;
        let cooked = r.read_bool32()?;
        let body_setup = PackageIndex::read(&mut r)?;
        let nav_collision = PackageIndex::read(&mut r)?;
        let lighting_guid = r.read_guid()?;
        let sockets = r.read_counted(4, PackageIndex::read)?;
        let render_data = if cooked {
            let lods = r.read_counted(40, |r| StaticLod::read(r, ctx.version))?;
            let bounds = Bounds::read(&mut r)?;
            let lods_share_static_lighting = r.read_bool32()?;
            let mut screen_sizes = [ScreenSize::default(); MAX_STATIC_LODS];
            for size in screen_sizes.iter_mut() {
                *size = ScreenSize {
                    cooked: r.read_bool32()?,
                    value: r.read_f32()?,
                };
            }
            Some(StaticRenderData {
                lods,
                bounds,
                lods_share_static_lighting,
                screen_sizes,
            })
        } else {
            None
        };
        let has_speedtree = r.read_bool32()?;
        let materials = read_materials(&mut r, ctx.names, false)?;
        debug!(
            lods = render_data.as_ref().map(|d| d.lods.len()).unwrap_or(0),
            materials = materials.len(),
            "decoded static mesh"
        );
        Ok(Self {
            header,
            strip,
            body_setup,
            nav_collision,
            lighting_guid,
            sockets,
            render_data,
            has_speedtree,
            materials,
            trailing: r.rest().to_vec(),
        })
    }

    fn encode(&self, _ctx: &mut EncodeContext) -> AssetResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.header.write(&mut w);
        self.strip.write(&mut w);
        w.write_bool32(self.render_data.is_some());
        self.body_setup.write(&mut w);
        self.nav_collision.write(&mut w);
        w.write_guid(&self.lighting_guid);
        w.write_count(self.sockets.len());
        for socket in &self.sockets {
            socket.write(&mut w);
        }
        if let Some(data) = &self.render_data {
            w.write_count(data.lods.len());
            for lod in &data.lods {
                lod.write(&mut w);
            }
            data.bounds.write(&mut w);
            w.write_bool32(data.lods_share_static_lighting);
            for size in &data.screen_sizes {
                w.write_bool32(size.cooked);
                w.write_f32(size.value);
            }
        }
        w.write_bool32(self.has_speedtree);
        write_materials(&mut w, &self.materials);
        w.write_bytes(&self.trailing);
        Ok(w.into_inner())
    }
}
