//! Building blocks shared by the mesh, skeleton and texture layouts.

use crate::data::{ByteReader, ByteWriter};
use crate::error::{AssetResult, malformed};
use crate::package::names::{FName, NameTable};
use crate::package::tables::PackageIndex;
use crate::version::EngineVersion;

/// Editor/runtime strip flags written in front of most render resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StripFlags {
    pub global: u8,
    pub class: u8,
}

impl StripFlags {
    /// The flags cooked assets carry: editor data stripped, nothing else.
    pub const COOKED: Self = Self { global: 1, class: 0 };

    pub fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            global: r.read_u8()?,
            class: r.read_u8()?,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u8(self.global);
        w.write_u8(self.class);
    }

    pub fn is_class_stripped(&self, bit: u8) -> bool {
        self.class & bit != 0
    }
}

impl Default for StripFlags {
    fn default() -> Self {
        Self::COOKED
    }
}

/// A bulk-serialized array: element size, element count, then the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkArray {
    pub element_size: u32,
    pub count: u32,
    pub data: Vec<u8>,
}

impl BulkArray {
    pub fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let offset = r.position();
        let element_size = r.read_u32()?;
        let count = r.read_u32()?;
        let len = (element_size as usize)
            .checked_mul(count as usize)
            .ok_or_else(|| malformed(offset, format!("bulk array of {count} x {element_size} bytes overflows")))?;
        let data = r.read_bytes(len)?.to_vec();
        Ok(Self {
            element_size,
            count,
            data,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u32(self.element_size);
        w.write_u32(self.count);
        w.write_bytes(&self.data);
    }

    /// Wrap `data`, which must hold whole elements of `element_size` bytes.
    pub fn from_bytes(element_size: u32, data: Vec<u8>) -> Self {
        let count = if element_size == 0 {
            0
        } else {
            (data.len() / element_size as usize) as u32
        };
        Self {
            element_size,
            count,
            data,
        }
    }

    pub fn elements(&self) -> std::slice::ChunksExact<'_, u8> {
        // chunks_exact panics on zero; an empty array still has no elements.
        self.data.chunks_exact(self.element_size.max(1) as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Fail unless elements are `expected` bytes wide (empty arrays pass).
    pub fn expect_element_size(&self, expected: u32, what: &str) -> AssetResult<()> {
        if self.count != 0 && self.element_size != expected {
            return Err(malformed(
                0,
                format!("{what}: expected {expected}-byte elements, found {}", self.element_size),
            ));
        }
        Ok(())
    }
}

/// Bounding box and sphere sharing an origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub origin: [f32; 3],
    pub extent: [f32; 3],
    pub radius: f32,
}

impl Bounds {
    pub fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            origin: r.read_f32_array()?,
            extent: r.read_f32_array()?,
            radius: r.read_f32()?,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_f32_slice(&self.origin);
        w.write_f32_slice(&self.extent);
        w.write_f32(self.radius);
    }

    /// Bounds enclosing `positions`.
    pub fn from_points(positions: &[[f32; 3]]) -> Self {
        let Some(first) = positions.first() else {
            return Self::default();
        };
        let (mut min, mut max) = (*first, *first);
        for p in positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        let origin = [0, 1, 2].map(|a| (min[a] + max[a]) * 0.5);
        let extent = [0, 1, 2].map(|a| (max[a] - min[a]) * 0.5);
        let radius = positions
            .iter()
            .map(|p| {
                let d = [0, 1, 2].map(|a| p[a] - origin[a]);
                (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
            })
            .fold(0.0f32, f32::max);
        Self {
            origin,
            extent,
            radius,
        }
    }
}

/// One material slot of a mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialSlot {
    pub material: PackageIndex,
    pub slot_name: FName,
    pub uv_initialized: u32,
    pub uv_override: u32,
    pub uv_densities: [f32; 4],
    /// Trailing word skeletal slots carry from 4.27 on.
    pub extra: Option<u32>,
}

impl MaterialSlot {
    pub fn read(r: &mut ByteReader<'_>, names: &NameTable, with_extra: bool) -> AssetResult<Self> {
        Ok(Self {
            material: PackageIndex::read(r)?,
            slot_name: names.read_fname(r)?,
            uv_initialized: r.read_u32()?,
            uv_override: r.read_u32()?,
            uv_densities: r.read_f32_array()?,
            extra: if with_extra { Some(r.read_u32()?) } else { None },
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        self.material.write(w);
        self.slot_name.write(w);
        w.write_u32(self.uv_initialized);
        w.write_u32(self.uv_override);
        w.write_f32_slice(&self.uv_densities);
        if let Some(extra) = self.extra {
            w.write_u32(extra);
        }
    }
}

pub(crate) fn read_materials(
    r: &mut ByteReader<'_>,
    names: &NameTable,
    with_extra: bool,
) -> AssetResult<Vec<MaterialSlot>> {
    r.read_counted(36, |r| MaterialSlot::read(r, names, with_extra))
}

pub(crate) fn write_materials(w: &mut ByteWriter, materials: &[MaterialSlot]) {
    w.write_count(materials.len());
    for m in materials {
        m.write(w);
    }
}

/// Whether render resources use the split (separate tangent / UV) layout.
pub(crate) fn uses_split_vertex_layout(version: EngineVersion) -> bool {
    version >= EngineVersion::UE4_27
}

/// Unpack a 4-byte packed unit vector. Before 4.27 components are unsigned
/// bytes centered on 127.5; from 4.27 on they are signed bytes.
pub fn unpack_normal(packed: u32, signed: bool) -> [f32; 4] {
    let b = packed.to_le_bytes();
    b.map(|c| {
        if signed {
            ((c as i8) as f32 / 127.0).clamp(-1.0, 1.0)
        } else {
            c as f32 / 127.5 - 1.0
        }
    })
}

pub fn pack_normal(v: [f32; 4], signed: bool) -> u32 {
    let b = v.map(|c| {
        let c = c.clamp(-1.0, 1.0);
        if signed {
            ((c * 127.0).round() as i8) as u8
        } else {
            ((c + 1.0) * 127.5).round() as u8
        }
    });
    u32::from_le_bytes(b)
}

/// Tangent used for vertices that carry none.
pub(crate) const DEFAULT_TANGENT: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

/// Split a packed `tangent_x` / `tangent_z` pair into a tangent (binormal
/// sign in w) and a normal. The sign is stored in the normal's w.
pub fn unpack_tangent_basis(tangent_x: u32, tangent_z: u32, signed: bool) -> ([f32; 4], [f32; 3]) {
    let x = unpack_normal(tangent_x, signed);
    let z = unpack_normal(tangent_z, signed);
    ([x[0], x[1], x[2], z[3]], [z[0], z[1], z[2]])
}

pub fn pack_tangent_basis(tangent: [f32; 4], normal: [f32; 3], signed: bool) -> (u32, u32) {
    let sign = if tangent[3] < 0.0 { -1.0 } else { 1.0 };
    (
        pack_normal([tangent[0], tangent[1], tangent[2], 0.0], signed),
        pack_normal([normal[0], normal[1], normal[2], sign], signed),
    )
}

pub fn read_uv(bytes: &[u8], full_precision: bool) -> [f32; 2] {
    if full_precision {
        [
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        ]
    } else {
        [
            half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            half::f16::from_le_bytes([bytes[2], bytes[3]]).to_f32(),
        ]
    }
}

pub fn write_uv(out: &mut Vec<u8>, uv: [f32; 2], full_precision: bool) {
    for c in uv {
        if full_precision {
            out.extend_from_slice(&c.to_le_bytes());
        } else {
            out.extend_from_slice(&half::f16::from_f32(c).to_le_bytes());
        }
    }
}

pub(crate) fn uv_size(full_precision: bool) -> usize {
    if full_precision { 8 } else { 4 }
}

/// Vertex positions: stride and count, then a bulk array of `3 x f32`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PositionBuffer {
    pub stride: u32,
    pub num_vertices: u32,
    pub data: BulkArray,
}

impl PositionBuffer {
    pub fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let stride = r.read_u32()?;
        let num_vertices = r.read_u32()?;
        let data = BulkArray::read(r)?;
        data.expect_element_size(12, "position buffer")?;
        Ok(Self {
            stride,
            num_vertices,
            data,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u32(self.stride);
        w.write_u32(self.num_vertices);
        self.data.write(w);
    }

    pub fn positions(&self) -> Vec<[f32; 3]> {
        self.data.elements().map(read_vec3).collect()
    }

    pub fn from_positions(positions: &[[f32; 3]]) -> Self {
        let mut data = Vec::with_capacity(positions.len() * 12);
        for p in positions {
            for c in p {
                data.extend_from_slice(&c.to_le_bytes());
            }
        }
        Self {
            stride: 12,
            num_vertices: positions.len() as u32,
            data: BulkArray::from_bytes(12, data),
        }
    }
}

pub(crate) fn read_vec3(bytes: &[u8]) -> [f32; 3] {
    [0, 4, 8].map(|o| f32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]))
}

pub(crate) fn read_u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// How tangents and UVs are laid out in a static vertex buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexLayout {
    /// Before 4.27: one array of `{tangent_x, tangent_z, uvs}` per vertex.
    Interleaved { stride: u32, data: BulkArray },
    /// 4.27 on: tangent array and UV array, both vertex-major.
    Split { tangents: BulkArray, uvs: BulkArray },
}

/// Tangent frame and texture coordinates of each vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticVertexBuffer {
    pub strip: StripFlags,
    pub num_tex_coords: u32,
    pub num_vertices: u32,
    pub full_precision_uvs: bool,
    pub high_precision_tangents: bool,
    pub layout: VertexLayout,
}

/// Per-vertex attributes unpacked from a vertex buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexAttributes {
    pub normals: Vec<[f32; 3]>,
    /// xyz tangent plus binormal sign in w.
    pub tangents: Vec<[f32; 4]>,
    /// One vector per UV channel.
    pub uvs: Vec<Vec<[f32; 2]>>,
}

impl StaticVertexBuffer {
    pub fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let strip = StripFlags::read(r)?;
        let num_tex_coords = r.read_u32()?;
        let split = uses_split_vertex_layout(version);
        let stride = if split { None } else { Some(r.read_u32()?) };
        let num_vertices = r.read_u32()?;
        let full_precision_uvs = r.read_bool32()?;
        let high_precision_tangents = r.read_bool32()?;
        let tangent_size = if high_precision_tangents { 16 } else { 8 };
        let uv_bytes = uv_size(full_precision_uvs) as u32;
        let layout = match stride {
            Some(stride) => {
                let data = BulkArray::read(r)?;
                data.expect_element_size(tangent_size + uv_bytes * num_tex_coords, "static vertex buffer")?;
                VertexLayout::Interleaved { stride, data }
            }
            None => {
                let tangents = BulkArray::read(r)?;
                tangents.expect_element_size(tangent_size, "tangent buffer")?;
                let uvs = BulkArray::read(r)?;
                uvs.expect_element_size(uv_bytes, "texture coordinate buffer")?;
                VertexLayout::Split { tangents, uvs }
            }
        };
        Ok(Self {
            strip,
            num_tex_coords,
            num_vertices,
            full_precision_uvs,
            high_precision_tangents,
            layout,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        self.strip.write(w);
        w.write_u32(self.num_tex_coords);
        if let VertexLayout::Interleaved { stride, .. } = &self.layout {
            w.write_u32(*stride);
        }
        w.write_u32(self.num_vertices);
        w.write_bool32(self.full_precision_uvs);
        w.write_bool32(self.high_precision_tangents);
        match &self.layout {
            VertexLayout::Interleaved { data, .. } => data.write(w),
            VertexLayout::Split { tangents, uvs } => {
                tangents.write(w);
                uvs.write(w);
            }
        }
    }

    fn tangent_size(&self) -> usize {
        if self.high_precision_tangents { 16 } else { 8 }
    }

    fn unpack_tangents(&self, bytes: &[u8], signed: bool) -> ([f32; 4], [f32; 3]) {
        if self.high_precision_tangents {
            let c = |i: usize| i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as f32 / 32767.0;
            ([c(0), c(1), c(2), c(7)], [c(4), c(5), c(6)])
        } else {
            unpack_tangent_basis(read_u32_at(bytes, 0), read_u32_at(bytes, 4), signed)
        }
    }

    /// Unpack normals, tangents and UV channels.
    pub fn attributes(&self, version: EngineVersion) -> VertexAttributes {
        let signed = uses_split_vertex_layout(version);
        let channels = self.num_tex_coords as usize;
        let uv_bytes = uv_size(self.full_precision_uvs);
        let mut out = VertexAttributes {
            uvs: vec![Vec::with_capacity(self.num_vertices as usize); channels],
            ..Default::default()
        };
        match &self.layout {
            VertexLayout::Interleaved { data, .. } => {
                for vertex in data.elements() {
                    let (tangent, normal) = self.unpack_tangents(vertex, signed);
                    out.tangents.push(tangent);
                    out.normals.push(normal);
                    let uvs = &vertex[self.tangent_size()..];
                    for (channel, uv) in uvs.chunks_exact(uv_bytes).take(channels).enumerate() {
                        out.uvs[channel].push(read_uv(uv, self.full_precision_uvs));
                    }
                }
            }
            VertexLayout::Split { tangents, uvs } => {
                for vertex in tangents.elements() {
                    let (tangent, normal) = self.unpack_tangents(vertex, signed);
                    out.tangents.push(tangent);
                    out.normals.push(normal);
                }
                for (i, uv) in uvs.elements().enumerate() {
                    if channels > 0 {
                        out.uvs[i % channels].push(read_uv(uv, self.full_precision_uvs));
                    }
                }
            }
        }
        out
    }

    /// Encode attributes in the layout `version` expects. Tangents are
    /// written packed; missing tangents default to +X with a positive sign.
    pub fn build(attrs: &VertexAttributes, full_precision_uvs: bool, version: EngineVersion) -> Self {
        let signed = uses_split_vertex_layout(version);
        let num_vertices = attrs.normals.len();
        let channels = attrs.uvs.len();
        let mut tangent_bytes = Vec::with_capacity(num_vertices * 8);
        let mut uv_bytes = Vec::with_capacity(num_vertices * channels * uv_size(full_precision_uvs));
        let mut interleaved = Vec::new();
        for (i, normal) in attrs.normals.iter().enumerate() {
            let tangent = attrs.tangents.get(i).copied().unwrap_or(DEFAULT_TANGENT);
            let (x, z) = pack_tangent_basis(tangent, *normal, signed);
            let mut vertex_uvs = Vec::new();
            for channel in &attrs.uvs {
                let uv = channel.get(i).copied().unwrap_or_default();
                write_uv(&mut vertex_uvs, uv, full_precision_uvs);
            }
            if signed {
                tangent_bytes.extend_from_slice(&x.to_le_bytes());
                tangent_bytes.extend_from_slice(&z.to_le_bytes());
                uv_bytes.extend_from_slice(&vertex_uvs);
            } else {
                interleaved.extend_from_slice(&x.to_le_bytes());
                interleaved.extend_from_slice(&z.to_le_bytes());
                interleaved.extend_from_slice(&vertex_uvs);
            }
        }
        let uv_element = uv_size(full_precision_uvs) as u32;
        let layout = if signed {
            VertexLayout::Split {
                tangents: BulkArray::from_bytes(8, tangent_bytes),
                uvs: BulkArray::from_bytes(uv_element, uv_bytes),
            }
        } else {
            let stride = 8 + uv_element * channels as u32;
            VertexLayout::Interleaved {
                stride,
                data: BulkArray {
                    element_size: stride,
                    count: num_vertices as u32,
                    data: interleaved,
                },
            }
        };
        Self {
            strip: StripFlags::COOKED,
            num_tex_coords: channels as u32,
            num_vertices: num_vertices as u32,
            full_precision_uvs,
            high_precision_tangents: false,
            layout,
        }
    }
}

/// Per-vertex colors; the bulk array is present only when `stride > 0`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColorBuffer {
    pub strip: StripFlags,
    pub stride: u32,
    pub num_vertices: u32,
    pub data: Option<BulkArray>,
}

impl ColorBuffer {
    pub fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let strip = StripFlags::read(r)?;
        let stride = r.read_u32()?;
        let num_vertices = r.read_u32()?;
        let data = if stride > 0 {
            let data = BulkArray::read(r)?;
            data.expect_element_size(4, "color buffer")?;
            Some(data)
        } else {
            None
        };
        Ok(Self {
            strip,
            stride,
            num_vertices,
            data,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        self.strip.write(w);
        w.write_u32(self.stride);
        w.write_u32(self.num_vertices);
        if let Some(data) = &self.data {
            data.write(w);
        }
    }

    /// Colors as RGBA bytes (stored BGRA).
    pub fn colors(&self) -> Vec<[u8; 4]> {
        self.data
            .iter()
            .flat_map(|d| d.elements())
            .map(|c| [c[2], c[1], c[0], c[3]])
            .collect()
    }

    pub fn from_colors(colors: &[[u8; 4]]) -> Self {
        if colors.is_empty() {
            return Self::default();
        }
        let data = colors.iter().flat_map(|c| [c[2], c[1], c[0], c[3]]).collect();
        Self {
            strip: StripFlags::COOKED,
            stride: 4,
            num_vertices: colors.len() as u32,
            data: Some(BulkArray::from_bytes(4, data)),
        }
    }
}

/// Static mesh index buffer: width flag, byte array and (4.27+) a reserved word.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawIndexBuffer {
    pub is_32bit: bool,
    pub data: BulkArray,
    pub reserved: Option<u32>,
}

impl RawIndexBuffer {
    pub fn read(r: &mut ByteReader<'_>, version: EngineVersion) -> AssetResult<Self> {
        let is_32bit = r.read_bool32()?;
        let data = BulkArray::read(r)?;
        data.expect_element_size(1, "index buffer")?;
        let reserved = if uses_split_vertex_layout(version) {
            Some(r.read_u32()?)
        } else {
            None
        };
        Ok(Self {
            is_32bit,
            data,
            reserved,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_bool32(self.is_32bit);
        self.data.write(w);
        if let Some(reserved) = self.reserved {
            w.write_u32(reserved);
        }
    }

    pub fn indices(&self) -> Vec<u32> {
        decode_indices(&self.data.data, if self.is_32bit { 4 } else { 2 })
    }

    pub fn from_indices(indices: &[u32], version: EngineVersion) -> Self {
        let is_32bit = indices.iter().any(|&i| i > u16::MAX as u32);
        let data = encode_indices(indices, if is_32bit { 4 } else { 2 });
        Self {
            is_32bit,
            data: BulkArray::from_bytes(1, data),
            reserved: uses_split_vertex_layout(version).then_some(0),
        }
    }

    /// An empty buffer of the same shape.
    pub fn cleared(&self) -> Self {
        Self {
            is_32bit: false,
            data: BulkArray::from_bytes(1, Vec::new()),
            reserved: self.reserved,
        }
    }
}

/// Skeletal mesh index buffer: index width in bytes, then the indices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkeletalIndexBuffer {
    pub index_size: u8,
    pub data: BulkArray,
}

impl SkeletalIndexBuffer {
    pub fn read(r: &mut ByteReader<'_>) -> AssetResult<Self> {
        let offset = r.position();
        let index_size = r.read_u8()?;
        if index_size != 2 && index_size != 4 {
            return Err(malformed(offset, format!("index size {index_size} is neither 2 nor 4")));
        }
        let data = BulkArray::read(r)?;
        data.expect_element_size(index_size as u32, "skeletal index buffer")?;
        Ok(Self { index_size, data })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u8(self.index_size);
        self.data.write(w);
    }

    pub fn indices(&self) -> Vec<u32> {
        decode_indices(&self.data.data, self.index_size as usize)
    }

    pub fn from_indices(indices: &[u32]) -> Self {
        let index_size: u8 = if indices.iter().any(|&i| i > u16::MAX as u32) { 4 } else { 2 };
        let data = encode_indices(indices, index_size as usize);
        Self {
            index_size,
            data: BulkArray::from_bytes(index_size as u32, data),
        }
    }
}

fn decode_indices(bytes: &[u8], width: usize) -> Vec<u32> {
    bytes
        .chunks_exact(width)
        .map(|c| match width {
            4 => read_u32_at(c, 0),
            _ => u16::from_le_bytes([c[0], c[1]]) as u32,
        })
        .collect()
}

fn encode_indices(indices: &[u32], width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len() * width);
    for &i in indices {
        if width == 4 {
            out.extend_from_slice(&i.to_le_bytes());
        } else {
            out.extend_from_slice(&(i as u16).to_le_bytes());
        }
    }
    out
}
