//! Synthetic packages for unit tests, assembled with the crate's own encoders.

use crate::data::{ByteReader, ByteWriter, FString};
use crate::objects::ObjectHeader;
use crate::objects::animation::{AnimSequence, BoneTrack, Keys};
use crate::objects::common::{
    Bounds, MaterialSlot, PositionBuffer, SkeletalIndexBuffer, StaticVertexBuffer, StripFlags, VertexAttributes,
};
use crate::objects::skeletal_mesh::{
    GpuVertexBuffer, KdiBinding, LodBuffers, SectionExtra, SkeletalLod, SkeletalMesh, SkeletalSection, SkinInfluences,
    SkinWeightBuffer,
};
use crate::objects::skeleton::{BoneInfo, BonePose, ReferenceSkeleton};
use crate::objects::static_mesh::{MAX_STATIC_LODS, ScreenSize, StaticLod, StaticMesh, StaticRenderData, StaticSection};
use crate::objects::texture::{Mip, MipStorage, PlatformData, Texture};
use crate::package::names::{NONE, NameTable};
use crate::package::summary::{
    CustomVersion, EngineStamp, Generation, LEGACY_VERSION_UE4, LEGACY_VERSION_UE5, PackageSummary,
};
use crate::package::tables::{ObjectExport, ObjectImport, PackageIndex};
use crate::package::tail::PayloadTail;
use crate::package::{AssetFile, AssetSources, SerializedAsset};
use crate::property::tag::{PropertyTag, TagData};
use crate::property::{PropertyContext, PropertyList};
use crate::version::{EngineVersion, ParseOptions};

pub fn name_table(names: &[&str]) -> NameTable {
    let mut table = NameTable::default();
    for n in names {
        table.intern(n);
    }
    table
}

pub fn sample_summary(legacy_file_version: i32) -> PackageSummary {
    let ue5 = legacy_file_version == LEGACY_VERSION_UE5;
    let stamp = EngineStamp {
        major: if ue5 { 5 } else { 4 },
        minor: if ue5 { 0 } else { 27 },
        patch: 2,
        changelist: 18319896,
        branch: FString::new(if ue5 { "++UE5+Release-5.0" } else { "++UE4+Release-4.27" }),
    };
    PackageSummary {
        legacy_file_version,
        legacy_ue3_version: 864,
        file_version_ue4: 522,
        file_version_ue5: ue5.then_some(1004),
        file_version_licensee: 0,
        custom_versions: vec![CustomVersion {
            key: [0x11; 16],
            version: 3,
        }],
        total_header_size: 0,
        folder_name: FString::new(NONE),
        package_flags: 0x8000_0000,
        name_count: 0,
        name_offset: 0,
        gatherable_text_count: 0,
        gatherable_text_offset: 0,
        export_count: 0,
        export_offset: 0,
        import_count: 0,
        import_offset: 0,
        depends_offset: 0,
        soft_package_references_count: 0,
        soft_package_references_offset: 0,
        searchable_names_offset: 0,
        thumbnail_table_offset: 0,
        guid: [0xA5; 16],
        generations: vec![Generation {
            export_count: 0,
            name_count: 0,
        }],
        saved_by_engine_version: stamp.clone(),
        compatible_with_engine_version: stamp,
        compression_flags: 0,
        package_source: 0x1DC3_7F0B,
        additional_packages_to_cook: Vec::new(),
        asset_registry_data_offset: 0,
        bulk_data_start_offset: 0,
        world_tile_info_data_offset: 0,
        chunk_ids: Vec::new(),
        preload_dependency_count: 0,
        preload_dependency_offset: 0,
        names_referenced_from_export_data_count: ue5.then_some(0),
        payload_toc_offset: ue5.then_some(-1),
    }
}

/// Builds a complete package: summary, tables, payloads and footer.
pub struct PackageBuilder {
    version: EngineVersion,
    names: NameTable,
    imports: Vec<ObjectImport>,
    exports: Vec<ObjectExport>,
    payloads: Vec<Vec<u8>>,
    split: bool,
    note: Option<String>,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self {
            version: EngineVersion::UE4_27,
            names: name_table(&[NONE]),
            imports: Vec::new(),
            exports: Vec::new(),
            payloads: Vec::new(),
            split: false,
            note: None,
        }
    }

    pub fn engine(mut self, version: EngineVersion) -> Self {
        self.version = version;
        for import in &mut self.imports {
            import.import_optional = version.is_ue5().then_some(0);
        }
        for export in &mut self.exports {
            export.generate_public_hash = version.is_ue5().then_some(0);
        }
        self
    }

    pub fn version(&self) -> EngineVersion {
        self.version
    }

    pub fn split(mut self, split: bool) -> Self {
        self.split = split;
        self
    }

    pub fn note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    /// Name table the payloads are encoded against.
    pub fn names(&mut self) -> &mut NameTable {
        &mut self.names
    }

    fn push_import(&mut self, class_package: &str, class: &str, outer: PackageIndex, name: &str) -> PackageIndex {
        let import = ObjectImport {
            class_package: self.names.intern(class_package),
            class_name: self.names.intern(class),
            outer_index: outer,
            object_name: self.names.intern(name),
            import_optional: self.version.is_ue5().then_some(0),
        };
        self.imports.push(import);
        PackageIndex::from_import(self.imports.len() - 1)
    }

    /// Import `name` of class `class` from `package`, adding the package
    /// import on first use.
    pub fn import(&mut self, package: &str, class: &str, name: &str) -> PackageIndex {
        let existing = self
            .imports
            .iter()
            .position(|i| i.object_name == *package && i.outer_index.is_null());
        let outer = match existing {
            Some(i) => PackageIndex::from_import(i),
            None => self.push_import("/Script/CoreUObject", "Package", PackageIndex::NULL, package),
        };
        self.push_import("/Script/CoreUObject", class, outer, name)
    }

    /// Import of an engine class such as `StaticMesh`.
    pub fn class(&mut self, class: &str) -> PackageIndex {
        self.import("/Script/Engine", "Class", class)
    }

    pub fn export(&mut self, name: &str, class: PackageIndex, payload: Vec<u8>) -> usize {
        let export = ObjectExport {
            class_index: class,
            super_index: PackageIndex::NULL,
            template_index: PackageIndex::NULL,
            outer_index: PackageIndex::NULL,
            object_name: self.names.intern(name),
            object_flags: 0x0000_0001,
            serial_size: 0,
            serial_offset: 0,
            forced_export: 0,
            not_for_client: 0,
            not_for_server: 0,
            package_guid: [0; 16],
            package_flags: 0,
            not_always_loaded_for_editor_game: 0,
            is_asset: 1,
            dependency_indices: [-1, 0, 0, 0, 0],
            generate_public_hash: self.version.is_ue5().then_some(0),
        };
        self.exports.push(export);
        self.payloads.push(payload);
        self.exports.len() - 1
    }

    pub fn into_asset(self) -> AssetFile {
        let legacy = if self.version.is_ue5() {
            LEGACY_VERSION_UE5
        } else {
            LEGACY_VERSION_UE4
        };
        let mut tail = PayloadTail::default();
        if let Some(note) = &self.note {
            tail.set_note(note);
        }
        AssetFile::from_parts(
            ParseOptions::for_version(self.version),
            sample_summary(legacy),
            self.names,
            self.imports,
            self.exports,
            self.payloads,
            tail,
            self.split,
        )
    }

    pub fn build(self) -> SerializedAsset {
        self.into_asset().serialize()
    }
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse serialized output, panicking on failure.
pub fn reparse(out: &SerializedAsset, options: &ParseOptions) -> AssetFile {
    let mut sources = AssetSources::new(&out.uasset);
    if let Some(uexp) = &out.uexp {
        sources = sources.with_uexp(uexp);
    }
    if let Some(ubulk) = &out.ubulk {
        sources = sources.with_ubulk(ubulk);
    }
    AssetFile::parse(sources, options).expect("serialized output must parse")
}

/// Writes a tagged property list by hand.
pub struct PropertyWriter<'a> {
    names: &'a mut NameTable,
    w: ByteWriter,
    version: EngineVersion,
}

impl<'a> PropertyWriter<'a> {
    pub fn new(names: &'a mut NameTable) -> Self {
        Self {
            names,
            w: ByteWriter::new(),
            version: EngineVersion::UE4_27,
        }
    }

    pub fn with_version(mut self, version: EngineVersion) -> Self {
        self.version = version;
        self
    }

    fn tag(&mut self, name: &str, ty: &str, size: usize, data: TagData) {
        PropertyTag {
            name: self.names.intern(name),
            type_name: self.names.intern(ty),
            size: size as i32,
            array_index: 0,
            data,
            property_guid: None,
        }
        .write(&mut self.w);
    }

    pub fn raw(mut self, name: &str, ty: &str, bytes: &[u8]) -> Self {
        self.tag(name, ty, bytes.len(), TagData::None);
        self.w.write_bytes(bytes);
        self
    }

    pub fn int(mut self, name: &str, v: i32) -> Self {
        self.tag(name, "IntProperty", 4, TagData::None);
        self.w.write_i32(v);
        self
    }

    pub fn float(mut self, name: &str, v: f32) -> Self {
        self.tag(name, "FloatProperty", 4, TagData::None);
        self.w.write_f32(v);
        self
    }

    pub fn bool(mut self, name: &str, v: bool) -> Self {
        self.tag(name, "BoolProperty", 0, TagData::Bool(v));
        self
    }

    pub fn string(mut self, name: &str, v: &str) -> Self {
        let mut body = ByteWriter::new();
        body.write_str(v);
        self.tag(name, "StrProperty", body.position(), TagData::None);
        self.w.write_bytes(body.as_slice());
        self
    }

    pub fn name(mut self, name: &str, v: &str) -> Self {
        let value = self.names.intern(v);
        self.tag(name, "NameProperty", 8, TagData::None);
        value.write(&mut self.w);
        self
    }

    pub fn enum_value(mut self, name: &str, enum_name: &str, v: &str) -> Self {
        let data = TagData::Enum(self.names.intern(enum_name));
        let value = self.names.intern(v);
        self.tag(name, "EnumProperty", 8, data);
        value.write(&mut self.w);
        self
    }

    pub fn object(mut self, name: &str, v: PackageIndex) -> Self {
        self.tag(name, "ObjectProperty", 4, TagData::None);
        v.write(&mut self.w);
        self
    }

    pub fn vector(mut self, name: &str, v: [f64; 3]) -> Self {
        let data = TagData::Struct {
            struct_name: self.names.intern("Vector"),
            struct_guid: [0; 16],
        };
        let wide = self.version.is_ue5();
        self.tag(name, "StructProperty", if wide { 24 } else { 12 }, data);
        for c in v {
            if wide {
                self.w.write_f64(c);
            } else {
                self.w.write_f32(c as f32);
            }
        }
        self
    }

    pub fn int_array(mut self, name: &str, values: &[i32]) -> Self {
        let data = TagData::Container(self.names.intern("IntProperty"));
        self.tag(name, "ArrayProperty", 4 + 4 * values.len(), data);
        self.w.write_i32_array(values);
        self
    }

    /// Array of non-native structs, each element an encoded property list.
    pub fn struct_array(mut self, name: &str, struct_name: &str, elements: &[Vec<u8>]) -> Self {
        let body_len: usize = elements.iter().map(Vec::len).sum();
        let inner = PropertyTag {
            name: self.names.intern(name),
            type_name: self.names.intern("StructProperty"),
            size: body_len as i32,
            array_index: 0,
            data: TagData::Struct {
                struct_name: self.names.intern(struct_name),
                struct_guid: [0; 16],
            },
            property_guid: None,
        };
        let mut body = ByteWriter::new();
        body.write_count(elements.len());
        inner.write(&mut body);
        for e in elements {
            body.write_bytes(e);
        }
        let data = TagData::Container(self.names.intern("StructProperty"));
        self.tag(name, "ArrayProperty", body.position(), data);
        self.w.write_bytes(body.as_slice());
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.names.intern(NONE).write(&mut self.w);
        self.w.into_inner()
    }
}

const QUAD: [[f32; 3]; 4] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

fn quad_attributes(uv_channels: usize) -> VertexAttributes {
    VertexAttributes {
        normals: vec![[0.0, 0.0, 1.0]; 4],
        tangents: vec![[1.0, 0.0, 0.0, 1.0]; 4],
        uvs: (0..uv_channels)
            .map(|c| QUAD.iter().map(|p| [p[0], p[1] + c as f32 * 0.5]).collect())
            .collect(),
    }
}

fn body_slot(names: &mut NameTable, extra: Option<u32>) -> MaterialSlot {
    MaterialSlot {
        material: PackageIndex::from_import(0),
        slot_name: names.intern("Body"),
        uv_initialized: 1,
        uv_override: 0,
        uv_densities: [1.0; 4],
        extra,
    }
}

/// Bones `bone_0..` with the given parents, each offset along x.
pub fn sample_reference(names: &mut NameTable, parents: &[i32]) -> ReferenceSkeleton {
    let mut skeleton = ReferenceSkeleton::default();
    let bones = parents
        .iter()
        .enumerate()
        .map(|(i, &parent)| BoneInfo {
            name: names.intern(&format!("bone_{i}")),
            parent,
        })
        .collect();
    let poses = (0..parents.len())
        .map(|i| BonePose {
            translation: [i as f64, 0.0, 0.5],
            ..BonePose::IDENTITY
        })
        .collect();
    skeleton.set_bones(bones, poses);
    skeleton
}

/// A quad static mesh with `lod_count` identical LODs.
pub fn sample_static_mesh(names: &mut NameTable, version: EngineVersion, lod_count: usize, uv_channels: usize) -> StaticMesh {
    let split = version >= EngineVersion::UE4_27;
    let section = StaticSection {
        material_index: 0,
        first_index: 0,
        num_triangles: 2,
        min_vertex: 0,
        max_vertex: 3,
        enable_collision: true,
        cast_shadow: true,
        extra_flags: split.then_some([0, 1]),
    };
    let attrs = quad_attributes(uv_channels);
    let lods = (0..lod_count)
        .map(|_| StaticLod::build(None, vec![section.clone()], &QUAD, &attrs, &[], &QUAD_INDICES, false, version))
        .collect();
    let mut screen_sizes = [ScreenSize::default(); MAX_STATIC_LODS];
    for (i, size) in screen_sizes.iter_mut().take(lod_count).enumerate() {
        *size = ScreenSize {
            cooked: true,
            value: 1.0 / (i + 1) as f32,
        };
    }
    StaticMesh {
        header: ObjectHeader {
            properties: PropertyList::new(names, version),
            guid: None,
        },
        strip: StripFlags::COOKED,
        body_setup: PackageIndex::NULL,
        nav_collision: PackageIndex::NULL,
        lighting_guid: [3; 16],
        sockets: Vec::new(),
        render_data: Some(StaticRenderData {
            lods,
            bounds: Bounds::from_points(&QUAD),
            lods_share_static_lighting: false,
            screen_sizes,
        }),
        has_speedtree: false,
        materials: vec![body_slot(names, None)],
        trailing: Vec::new(),
    }
}

/// A quad skinned to `parents.len()` bones, one LOD in the layout the
/// version uses.
pub fn sample_skeletal_mesh(names: &mut NameTable, version: EngineVersion, parents: &[i32]) -> SkeletalMesh {
    let split = version >= EngineVersion::UE4_27;
    let reference = sample_reference(names, parents);
    let bone_map: Vec<u16> = (0..parents.len() as u16).collect();
    let influences = SkinInfluences {
        bones: (0..4).map(|v| vec![(v % parents.len()) as u16]).collect(),
        weights: vec![vec![255]; 4],
    };
    let attrs = quad_attributes(1);
    let extra = if split {
        SectionExtra::Split {
            recompute_tangent_mask: 0,
            visible_in_ray_tracing: version.is_ue5().then_some(1),
            cloth_mapping: Vec::new(),
            duplicated_vertices: Vec::new(),
            duplicated_index: vec![[0, 0]; 4],
            disabled: 0,
        }
    } else {
        SectionExtra::Legacy {
            flags: [0; 8],
            cloth: [0; 12],
            kdi: version.game().map(|_| KdiBinding::default()),
        }
    };
    let section = SkeletalSection {
        strip: StripFlags::COOKED,
        material_index: 0,
        base_index: 0,
        num_triangles: 2,
        recompute_tangent: 0,
        cast_shadow: 1,
        base_vertex_index: 0,
        bone_map: bone_map.clone(),
        num_vertices: 4,
        max_bone_influences: 1,
        cloth_asset_index: -1,
        cloth_asset_guid: [0; 16],
        cloth_asset_lod_index: -1,
        extra,
    };
    let buffers = if split {
        LodBuffers::Split {
            cooked_out: 0,
            inlined: 1,
            block_strip: StripFlags::COOKED,
            positions: PositionBuffer::default(),
            vertices: StaticVertexBuffer::build(&VertexAttributes::default(), false, version),
            block_tail: Vec::new(),
        }
    } else {
        LodBuffers::Legacy {
            reserved: 0,
            vertex_map: Vec::new(),
            max_vertex_map_index: 0,
            vertices: GpuVertexBuffer {
                strip: StripFlags::COOKED,
                num_tex_coords: 1,
                full_precision_uvs: false,
                extension: [1.0; 3],
                origin: [0.0; 3],
                data: Default::default(),
            },
            colors: None,
            adjacency: None,
            kdi: None,
        }
    };
    let template = SkeletalLod {
        strip: StripFlags::COOKED,
        sections: Vec::new(),
        active_bones: Vec::new(),
        required_bones: Vec::new(),
        indices: SkeletalIndexBuffer::default(),
        weights: SkinWeightBuffer::build(&influences, version).expect("sample weights fit"),
        buffers,
    };
    let lod = template
        .rebuild(vec![section], bone_map, &QUAD, &attrs, &influences, &QUAD_INDICES, version)
        .expect("sample LOD builds");
    SkeletalMesh {
        header: ObjectHeader {
            properties: PropertyList::new(names, version),
            guid: None,
        },
        strip: StripFlags::COOKED,
        bounds: Bounds::from_points(&QUAD),
        materials: vec![body_slot(names, split.then_some(0))],
        reference,
        cooked: split.then_some(true),
        lods: vec![lod],
        extra_mesh: None,
        trailing: Vec::new(),
    }
}

/// An 8x8 DXT1 texture: two mips in the .ubulk, one inline.
pub fn sample_texture(names: &mut NameTable, version: EngineVersion, cube: bool) -> Texture {
    let mips = vec![
        Mip::new(vec![1; 64], 8, 8, MipStorage::Bulk, version),
        Mip::new(vec![2; 16], 4, 4, MipStorage::Bulk, version),
        Mip::new(vec![7; 4], 2, 2, MipStorage::Inline, version),
    ];
    let platform = PlatformData {
        format_name: names.intern("PF_DXT1"),
        skip_offset: 0,
        placeholder: version.is_ue5().then_some([0; 16]),
        size_x: 8,
        size_y: 8,
        packed: if cube { 6 | 1 << 31 } else { 1 },
        pixel_format: FString::new("PF_DXT1"),
        opt_data: None,
        first_mip: 0,
        mips,
        is_virtual: (version >= EngineVersion::UE4_23).then_some(0),
    };
    Texture {
        header: ObjectHeader {
            properties: PropertyList::new(names, version),
            guid: None,
        },
        strips: [StripFlags::COOKED; 2],
        cooked: true,
        platforms: vec![platform],
        terminator: names.intern(NONE),
        trailing: Vec::new(),
    }
}

/// A 4.27 sequence of `num_frames` frames over two tracks: track 0 moves
/// along x one unit per frame, track 1 holds identity rotation at scale 2.
pub fn sample_animation(names: &mut NameTable, num_frames: i32) -> AnimSequence {
    let version = EngineVersion::UE4_27;
    let bytes = PropertyWriter::new(names)
        .int("NumFrames", num_frames)
        .float("SequenceLength", 0.1)
        .object("Skeleton", PackageIndex::from_import(1))
        .finish();
    let ctx = PropertyContext { names: &*names, version };
    let properties = PropertyList::parse(&mut ByteReader::new(&bytes), ctx).expect("sample properties parse");
    let mut anim = AnimSequence {
        header: ObjectHeader { properties, guid: None },
        raw_data_guid: [0x21; 16],
        strip: StripFlags::COOKED,
        serialize_compressed: 1,
        key_encoding: 2,
        formats: [1; 3],
        track_offsets: Vec::new(),
        scale_offsets: Vec::new(),
        scale_strip_size: 1,
        track_to_skeleton: Vec::new(),
        curves: PropertyList::new(names, version),
        raw_size: 0,
        reserved: Some(0),
        stream: Vec::new(),
        trailing: Vec::new(),
    };
    let keys = num_frames.max(1) as usize;
    let interval = num_frames as f32 / (keys.max(2) - 1) as f32;
    let tracks = [
        BoneTrack {
            translation: Some(Keys {
                times: (0..keys).map(|i| interval * i as f32).collect(),
                values: (0..keys).map(|i| [i as f32, 0.0, 0.0]).collect(),
            }),
            rotation: None,
            scale: None,
        },
        BoneTrack {
            translation: None,
            rotation: Some(Keys::constant([0.0, 0.0, 0.0, 1.0])),
            scale: Some(Keys::constant([2.0; 3])),
        },
    ];
    anim.set_bone_tracks(&tracks, vec![0, 2]).expect("sample tracks encode");
    anim
}
