//! Package file summary: the fixed header at the start of every `.uasset`.

use tracing::debug;

use crate::data::parser_utils::PACKAGE_TAG;
use crate::data::{ByteReader, ByteWriter, FString};
use crate::error::{AssetError, AssetResult, unsupported_version};
use rootcause::Report;

/// Package flag marking schema-less (unversioned) property serialization.
pub const PKG_UNVERSIONED_PROPERTIES: u32 = 0x2000;

/// Legacy file versions this parser understands.
pub const LEGACY_VERSION_UE4: i32 = -7;
pub const LEGACY_VERSION_UE5: i32 = -8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomVersion {
    pub key: [u8; 16],
    pub version: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    pub export_count: i32,
    pub name_count: i32,
}

/// Engine build stamp stored twice in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineStamp {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub changelist: u32,
    pub branch: FString,
}

impl EngineStamp {
    fn parse(reader: &mut ByteReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            major: reader.read_u16()?,
            minor: reader.read_u16()?,
            patch: reader.read_u16()?,
            changelist: reader.read_u32()?,
            branch: reader.read_fstring()?,
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_u16(self.major);
        w.write_u16(self.minor);
        w.write_u16(self.patch);
        w.write_u32(self.changelist);
        w.write_fstring(&self.branch);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub legacy_file_version: i32,
    pub legacy_ue3_version: i32,
    pub file_version_ue4: i32,
    /// Present when `legacy_file_version <= -8`.
    pub file_version_ue5: Option<i32>,
    pub file_version_licensee: i32,
    pub custom_versions: Vec<CustomVersion>,
    pub total_header_size: u32,
    pub folder_name: FString,
    pub package_flags: u32,
    pub name_count: i32,
    pub name_offset: i32,
    pub gatherable_text_count: i32,
    pub gatherable_text_offset: i32,
    pub export_count: i32,
    pub export_offset: i32,
    pub import_count: i32,
    pub import_offset: i32,
    pub depends_offset: i32,
    pub soft_package_references_count: i32,
    pub soft_package_references_offset: i32,
    pub searchable_names_offset: i32,
    pub thumbnail_table_offset: i32,
    pub guid: [u8; 16],
    pub generations: Vec<Generation>,
    pub saved_by_engine_version: EngineStamp,
    pub compatible_with_engine_version: EngineStamp,
    pub compression_flags: u32,
    pub package_source: u32,
    pub additional_packages_to_cook: Vec<FString>,
    pub asset_registry_data_offset: i32,
    pub bulk_data_start_offset: i64,
    pub world_tile_info_data_offset: i32,
    pub chunk_ids: Vec<i32>,
    pub preload_dependency_count: i32,
    pub preload_dependency_offset: i32,
    /// Present when `legacy_file_version <= -8`.
    pub names_referenced_from_export_data_count: Option<i32>,
    /// Present when `legacy_file_version <= -8`.
    pub payload_toc_offset: Option<i64>,
}

impl PackageSummary {
    pub fn parse(reader: &mut ByteReader<'_>) -> AssetResult<Self> {
        let tag = reader.read_u32()?;
        if tag != PACKAGE_TAG {
            return Err(Report::new(AssetError::InvalidMagic {
                expected: PACKAGE_TAG,
                found: tag,
            }));
        }

        let legacy_file_version = reader.read_i32()?;
        if legacy_file_version != LEGACY_VERSION_UE4 && legacy_file_version != LEGACY_VERSION_UE5 {
            return Err(unsupported_version(format!(
                "legacy file version {legacy_file_version}"
            )));
        }
        let is_ue5_layout = legacy_file_version <= LEGACY_VERSION_UE5;

        let legacy_ue3_version = reader.read_i32()?;
        let file_version_ue4 = reader.read_i32()?;
        let file_version_ue5 = if is_ue5_layout {
            Some(reader.read_i32()?)
        } else {
            None
        };
        let file_version_licensee = reader.read_i32()?;
        let custom_versions = reader.read_counted(20, |r| {
            Ok(CustomVersion {
                key: r.read_guid()?,
                version: r.read_i32()?,
            })
        })?;

        let total_header_size = reader.read_u32()?;
        let folder_name = reader.read_fstring()?;
        let package_flags = reader.read_u32()?;
        let name_count = reader.read_i32()?;
        let name_offset = reader.read_i32()?;
        let gatherable_text_count = reader.read_i32()?;
        let gatherable_text_offset = reader.read_i32()?;
        let export_count = reader.read_i32()?;
        let export_offset = reader.read_i32()?;
        let import_count = reader.read_i32()?;
        let import_offset = reader.read_i32()?;
        let depends_offset = reader.read_i32()?;
        let soft_package_references_count = reader.read_i32()?;
        let soft_package_references_offset = reader.read_i32()?;
        let searchable_names_offset = reader.read_i32()?;
        let thumbnail_table_offset = reader.read_i32()?;
        let guid = reader.read_guid()?;
        let generations = reader.read_counted(8, |r| {
            Ok(Generation {
                export_count: r.read_i32()?,
                name_count: r.read_i32()?,
            })
        })?;
        let saved_by_engine_version = EngineStamp::parse(reader)?;
        let compatible_with_engine_version = EngineStamp::parse(reader)?;
        let compression_flags = reader.read_u32()?;

        let compressed_chunks = reader.read_i32()?;
        if compressed_chunks != 0 {
            return Err(unsupported_version(format!(
                "package-level compression ({compressed_chunks} chunks)"
            )));
        }

        let package_source = reader.read_u32()?;
        let additional_packages_to_cook = reader.read_counted(4, |r| r.read_fstring())?;
        let asset_registry_data_offset = reader.read_i32()?;
        let bulk_data_start_offset = reader.read_i64()?;
        let world_tile_info_data_offset = reader.read_i32()?;
        let chunk_ids = reader.read_i32_array()?;
        let preload_dependency_count = reader.read_i32()?;
        let preload_dependency_offset = reader.read_i32()?;
        let (names_referenced_from_export_data_count, payload_toc_offset) = if is_ue5_layout {
            (Some(reader.read_i32()?), Some(reader.read_i64()?))
        } else {
            (None, None)
        };

        if gatherable_text_count > 0 {
            return Err(unsupported_version(
                "editor packages with gatherable text are not supported",
            ));
        }

        let summary = Self {
            legacy_file_version,
            legacy_ue3_version,
            file_version_ue4,
            file_version_ue5,
            file_version_licensee,
            custom_versions,
            total_header_size,
            folder_name,
            package_flags,
            name_count,
            name_offset,
            gatherable_text_count,
            gatherable_text_offset,
            export_count,
            export_offset,
            import_count,
            import_offset,
            depends_offset,
            soft_package_references_count,
            soft_package_references_offset,
            searchable_names_offset,
            thumbnail_table_offset,
            guid,
            generations,
            saved_by_engine_version,
            compatible_with_engine_version,
            compression_flags,
            package_source,
            additional_packages_to_cook,
            asset_registry_data_offset,
            bulk_data_start_offset,
            world_tile_info_data_offset,
            chunk_ids,
            preload_dependency_count,
            preload_dependency_offset,
            names_referenced_from_export_data_count,
            payload_toc_offset,
        };
        debug!(
            names = name_count,
            imports = import_count,
            exports = export_count,
            header_size = total_header_size,
            "parsed package summary"
        );
        Ok(summary)
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u32(PACKAGE_TAG);
        w.write_i32(self.legacy_file_version);
        w.write_i32(self.legacy_ue3_version);
        w.write_i32(self.file_version_ue4);
        if let Some(v) = self.file_version_ue5 {
            w.write_i32(v);
        }
        w.write_i32(self.file_version_licensee);
        w.write_count(self.custom_versions.len());
        for cv in &self.custom_versions {
            w.write_guid(&cv.key);
            w.write_i32(cv.version);
        }
        w.write_u32(self.total_header_size);
        w.write_fstring(&self.folder_name);
        w.write_u32(self.package_flags);
        w.write_i32(self.name_count);
        w.write_i32(self.name_offset);
        w.write_i32(self.gatherable_text_count);
        w.write_i32(self.gatherable_text_offset);
        w.write_i32(self.export_count);
        w.write_i32(self.export_offset);
        w.write_i32(self.import_count);
        w.write_i32(self.import_offset);
        w.write_i32(self.depends_offset);
        w.write_i32(self.soft_package_references_count);
        w.write_i32(self.soft_package_references_offset);
        w.write_i32(self.searchable_names_offset);
        w.write_i32(self.thumbnail_table_offset);
        w.write_guid(&self.guid);
        w.write_count(self.generations.len());
        for g in &self.generations {
            w.write_i32(g.export_count);
            w.write_i32(g.name_count);
        }
        self.saved_by_engine_version.write(w);
        self.compatible_with_engine_version.write(w);
        w.write_u32(self.compression_flags);
        w.write_i32(0);
        w.write_u32(self.package_source);
        w.write_count(self.additional_packages_to_cook.len());
        for p in &self.additional_packages_to_cook {
            w.write_fstring(p);
        }
        w.write_i32(self.asset_registry_data_offset);
        w.write_i64(self.bulk_data_start_offset);
        w.write_i32(self.world_tile_info_data_offset);
        w.write_i32_array(&self.chunk_ids);
        w.write_i32(self.preload_dependency_count);
        w.write_i32(self.preload_dependency_offset);
        if let Some(v) = self.names_referenced_from_export_data_count {
            w.write_i32(v);
        }
        if let Some(v) = self.payload_toc_offset {
            w.write_i64(v);
        }
    }

    pub fn is_unversioned(&self) -> bool {
        self.package_flags & PKG_UNVERSIONED_PROPERTIES != 0
    }

    /// Move every header offset that points at or past `threshold` by `delta`.
    ///
    /// Used after the name/import/export tables change size; offsets into the
    /// regions that follow the export table move with them.
    pub fn shift_trailing_offsets(&mut self, threshold: i64, delta: i64) {
        let shift32 = |v: &mut i32| {
            if *v > 0 && *v as i64 >= threshold {
                *v = (*v as i64 + delta) as i32;
            }
        };
        shift32(&mut self.gatherable_text_offset);
        shift32(&mut self.depends_offset);
        shift32(&mut self.soft_package_references_offset);
        shift32(&mut self.searchable_names_offset);
        shift32(&mut self.thumbnail_table_offset);
        shift32(&mut self.asset_registry_data_offset);
        shift32(&mut self.world_tile_info_data_offset);
        shift32(&mut self.preload_dependency_offset);
        if let Some(v) = self.payload_toc_offset.as_mut() {
            if *v > 0 && *v >= threshold {
                *v += delta;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_summary;

    #[test]
    fn test_summary_round_trip() {
        let summary = sample_summary(LEGACY_VERSION_UE4);
        let mut w = ByteWriter::new();
        summary.write(&mut w);
        let data = w.into_inner();
        let mut r = ByteReader::new(&data);
        let parsed = PackageSummary::parse(&mut r).unwrap();
        assert!(r.is_at_end());
        assert_eq!(parsed, summary);
    }

    #[test]
    fn test_ue5_layout_fields() {
        let summary = sample_summary(LEGACY_VERSION_UE5);
        let mut w = ByteWriter::new();
        summary.write(&mut w);
        let parsed = PackageSummary::parse(&mut ByteReader::new(w.as_slice())).unwrap();
        assert_eq!(parsed.file_version_ue5, summary.file_version_ue5);
        assert!(parsed.payload_toc_offset.is_some());
    }

    #[test]
    fn test_bad_magic() {
        let data = [0u8; 64];
        let err = PackageSummary::parse(&mut ByteReader::new(&data)).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::InvalidMagic { .. }));
    }

    #[test]
    fn test_unknown_legacy_version() {
        let mut w = ByteWriter::new();
        w.write_u32(PACKAGE_TAG);
        w.write_i32(-3);
        w.write_zeros(32);
        let err = PackageSummary::parse(&mut ByteReader::new(w.as_slice())).unwrap_err();
        assert!(matches!(
            err.current_context(),
            AssetError::UnsupportedVersion { .. }
        ));
    }

    #[test]
    fn test_shift_trailing_offsets() {
        let mut s = sample_summary(LEGACY_VERSION_UE4);
        s.depends_offset = 500;
        s.asset_registry_data_offset = 520;
        s.thumbnail_table_offset = 0;
        s.shift_trailing_offsets(500, 12);
        assert_eq!(s.depends_offset, 512);
        assert_eq!(s.asset_registry_data_offset, 532);
        assert_eq!(s.thumbnail_table_offset, 0);
    }
}
