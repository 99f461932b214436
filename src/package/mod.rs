//! Package container: summary, tables and per-export payloads.
//!
//! A cooked asset is split over up to three buffers. The `.uasset` holds the
//! summary and the name/import/export tables; the export payloads follow
//! either in the same buffer or in a paired `.uexp`; texture mips may live in
//! a `.ubulk`. [`AssetFile::parse`] reads all of them and
//! [`AssetFile::serialize`] writes them back, recomputing every count, offset
//! and size that depends on table or payload lengths.

pub mod names;
pub mod resolver;
pub mod summary;
pub mod tables;
pub mod tail;

use tracing::{debug, warn};

use crate::data::{ByteReader, ByteWriter};
use crate::error::{AssetResult, TableKind, dangling, malformed, truncated, unsupported_version};
use crate::version::{EngineVersion, ParseOptions};

pub use names::{FName, NameEntry, NameTable};
pub use resolver::{ResolvedObject, Resolver};
pub use summary::PackageSummary;
pub use tables::{EXPORT_ENTRY_SIZE, IMPORT_ENTRY_SIZE, ObjectExport, ObjectImport, ObjectRef, PackageIndex};
pub use tail::PayloadTail;

/// Raw input buffers for one logical asset.
#[derive(Debug, Clone, Copy)]
pub struct AssetSources<'a> {
    pub uasset: &'a [u8],
    pub uexp: Option<&'a [u8]>,
    pub ubulk: Option<&'a [u8]>,
}

impl<'a> AssetSources<'a> {
    /// A single-file package.
    pub fn new(uasset: &'a [u8]) -> Self {
        Self {
            uasset,
            uexp: None,
            ubulk: None,
        }
    }

    pub fn with_uexp(mut self, uexp: &'a [u8]) -> Self {
        self.uexp = Some(uexp);
        self
    }

    pub fn with_ubulk(mut self, ubulk: &'a [u8]) -> Self {
        self.ubulk = Some(ubulk);
        self
    }
}

/// Output buffers ready to be written verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedAsset {
    pub uasset: Vec<u8>,
    pub uexp: Option<Vec<u8>>,
    pub ubulk: Option<Vec<u8>>,
}

impl SerializedAsset {
    /// `.uasset` followed by `.uexp`, the layout absolute offsets refer to.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = self.uasset.clone();
        if let Some(uexp) = &self.uexp {
            out.extend_from_slice(uexp);
        }
        out
    }
}

/// Values captured at parse time that re-serialization compares against.
#[derive(Debug, Clone, Copy)]
struct ParsedLayout {
    export_table_end: i64,
    name_count: i32,
    export_count: i32,
    total_len: i64,
}

#[derive(Debug, Clone)]
pub struct AssetFile {
    options: ParseOptions,
    summary: PackageSummary,
    /// Bytes between the end of the summary and the name table.
    summary_gap: Vec<u8>,
    names: NameTable,
    imports: Vec<ObjectImport>,
    exports: Vec<ObjectExport>,
    /// Dependency, soft-reference, preload and asset registry data.
    dependency_region: Vec<u8>,
    payloads: Vec<Vec<u8>>,
    tail: PayloadTail,
    bulk: Option<Vec<u8>>,
    split: bool,
    layout: ParsedLayout,
    resolver: Resolver,
}

impl AssetFile {
    pub fn parse(sources: AssetSources<'_>, options: &ParseOptions) -> AssetResult<Self> {
        let version = options.engine_version;
        if let Err(err) = version.ensure_supported() {
            if options.strict {
                return Err(err);
            }
            warn!(%version, "engine version outside the supported range, continuing");
        }

        let data = sources.uasset;
        let mut reader = ByteReader::new(data);
        let summary = PackageSummary::parse(&mut reader)?;
        let ue5_layout = summary.file_version_ue5.is_some();
        if ue5_layout != version.is_ue5() {
            return Err(unsupported_version(format!(
                "legacy file version {} does not match engine {version}",
                summary.legacy_file_version
            )));
        }

        let summary_end = reader.position();
        let name_offset = table_offset(summary.name_offset, summary_end, data.len(), "name")?;
        let summary_gap = data[summary_end..name_offset].to_vec();

        reader.seek(name_offset)?;
        let name_count = table_count(summary.name_count, "name")?;
        // length prefix plus hash pair
        reader.ensure(name_count.saturating_mul(8))?;
        let names = NameTable::parse(&mut reader, name_count)?;

        expect_contiguous(summary.import_offset, reader.position(), "import")?;
        let import_count = table_count(summary.import_count, "import")?;
        reader.ensure(import_count.saturating_mul(IMPORT_ENTRY_SIZE))?;
        let imports = reader.read_vec(import_count, |r| ObjectImport::parse(r, &names, version))?;

        expect_contiguous(summary.export_offset, reader.position(), "export")?;
        let export_count = table_count(summary.export_count, "export")?;
        reader.ensure(export_count.saturating_mul(EXPORT_ENTRY_SIZE))?;
        let exports = reader.read_vec(export_count, |r| ObjectExport::parse(r, &names, version))?;
        let export_table_end = reader.position();

        let header_size = summary.total_header_size as usize;
        if header_size < export_table_end {
            return Err(malformed(
                export_table_end,
                format!("total header size {header_size} ends inside the export table"),
            ));
        }
        if header_size > data.len() {
            return Err(truncated(export_table_end, header_size - export_table_end, data.len() - export_table_end));
        }
        let dependency_region = data[export_table_end..header_size].to_vec();

        let (region, split) = match sources.uexp {
            Some(uexp) => {
                if data.len() != header_size {
                    return Err(malformed(
                        header_size,
                        format!("{} bytes follow the header of a split package", data.len() - header_size),
                    ));
                }
                (uexp, true)
            }
            None => (&data[header_size..], false),
        };

        let mut payloads = Vec::with_capacity(exports.len());
        let mut cursor = 0usize;
        for (i, export) in exports.iter().enumerate() {
            let relative = export.serial_offset - header_size as i64;
            if relative != cursor as i64 || export.serial_size < 0 {
                return Err(malformed(
                    header_size + cursor,
                    format!(
                        "export {i} payload at {} (size {}) does not follow the previous export",
                        export.serial_offset, export.serial_size
                    ),
                ));
            }
            let size = export.serial_size as usize;
            let have = region.len() - cursor;
            if size > have {
                return Err(truncated(header_size + cursor, size, have));
            }
            payloads.push(region[cursor..cursor + size].to_vec());
            cursor += size;
        }
        let tail = PayloadTail::parse(region, cursor)?;

        let resolver = Resolver::build(&imports, &exports);
        let layout = ParsedLayout {
            export_table_end: export_table_end as i64,
            name_count: summary.name_count,
            export_count: summary.export_count,
            total_len: (header_size + region.len()) as i64,
        };
        debug!(
            exports = exports.len(),
            payload_bytes = cursor,
            split,
            "parsed package"
        );

        Ok(Self {
            options: options.clone(),
            summary,
            summary_gap,
            names,
            imports,
            exports,
            dependency_region,
            payloads,
            tail,
            bulk: sources.ubulk.map(<[u8]>::to_vec),
            split,
            layout,
            resolver,
        })
    }

    /// Assemble a package from its parts, filling in the layout-derived
    /// summary fields the way a cooker would.
    #[cfg(test)]
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        options: ParseOptions,
        mut summary: PackageSummary,
        names: NameTable,
        imports: Vec<ObjectImport>,
        exports: Vec<ObjectExport>,
        payloads: Vec<Vec<u8>>,
        tail: PayloadTail,
        split: bool,
    ) -> Self {
        let dependency_region = vec![0u8; 4 * (exports.len() + 1)];
        summary.generations = vec![summary::Generation {
            export_count: exports.len() as i32,
            name_count: names.len() as i32,
        }];
        if summary.names_referenced_from_export_data_count.is_some() {
            summary.names_referenced_from_export_data_count = Some(names.len() as i32);
        }
        summary.name_count = names.len() as i32;
        summary.export_count = exports.len() as i32;
        let resolver = Resolver::build(&imports, &exports);
        let mut asset = Self {
            options,
            summary,
            summary_gap: Vec::new(),
            names,
            imports,
            exports,
            dependency_region,
            payloads,
            tail,
            bulk: None,
            split,
            layout: ParsedLayout {
                export_table_end: i64::MAX,
                name_count: 0,
                export_count: 0,
                total_len: 0,
            },
            resolver,
        };
        let header_len = asset.header_len();
        let export_end = (header_len - asset.dependency_region.len()) as i32;
        let total = header_len + asset.payloads.iter().map(Vec::len).sum::<usize>() + asset.tail.len();
        asset.summary.depends_offset = export_end;
        asset.summary.asset_registry_data_offset = export_end + 4 * asset.exports.len() as i32;
        asset.summary.bulk_data_start_offset = total as i64 - 4;
        asset.layout = ParsedLayout {
            export_table_end: export_end as i64,
            name_count: asset.summary.name_count,
            export_count: asset.summary.export_count,
            total_len: total as i64,
        };
        asset
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn engine_version(&self) -> EngineVersion {
        self.options.engine_version
    }

    pub fn summary(&self) -> &PackageSummary {
        &self.summary
    }

    pub fn names(&self) -> &NameTable {
        &self.names
    }

    /// Mutable name table, for interning names that edited payloads refer to.
    pub fn names_mut(&mut self) -> &mut NameTable {
        &mut self.names
    }

    pub fn imports(&self) -> &[ObjectImport] {
        &self.imports
    }

    pub fn exports(&self) -> &[ObjectExport] {
        &self.exports
    }

    pub fn export(&self, index: usize) -> AssetResult<&ObjectExport> {
        self.exports
            .get(index)
            .ok_or_else(|| dangling(TableKind::Export, index as i64, self.exports.len()))
    }

    pub fn export_payload(&self, index: usize) -> AssetResult<&[u8]> {
        self.payloads
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| dangling(TableKind::Export, index as i64, self.exports.len()))
    }

    pub fn tail(&self) -> &PayloadTail {
        &self.tail
    }

    pub fn tail_mut(&mut self) -> &mut PayloadTail {
        &mut self.tail
    }

    /// Contents of the paired `.ubulk`, if one was supplied.
    pub fn bulk(&self) -> Option<&[u8]> {
        self.bulk.as_deref()
    }

    /// Whether payloads live in a separate `.uexp`.
    pub fn is_split(&self) -> bool {
        self.split
    }

    pub fn is_unversioned(&self) -> bool {
        self.summary.is_unversioned()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn resolve(&self, index: PackageIndex) -> AssetResult<Option<ResolvedObject<'_>>> {
        resolver::resolve(&self.imports, &self.exports, index)
    }

    /// Resolved class name of export `index`.
    pub fn export_class(&self, index: usize) -> AssetResult<String> {
        let export = self.export(index)?;
        match self.resolver.class_of(index) {
            Some(class) => Ok(class.to_string()),
            None => resolver::export_class_name(&self.imports, &self.exports, export),
        }
    }

    pub fn find_export(&self, name: &str) -> Option<usize> {
        self.resolver.export_by_name(name)
    }

    pub fn exports_of_class(&self, class: &str) -> &[usize] {
        self.resolver.exports_of_class(class)
    }

    /// Dotted path of an object following its outer chain, for example
    /// `/Game/Meshes/Chair.Chair`.
    pub fn object_path(&self, index: PackageIndex) -> AssetResult<String> {
        let mut parts = Vec::new();
        let mut current = index;
        // An outer chain longer than both tables must contain a cycle.
        for _ in 0..=(self.imports.len() + self.exports.len()) {
            match self.resolve(current)? {
                Some(obj) => {
                    parts.push(obj.name().to_string());
                    current = obj.outer();
                }
                None => {
                    parts.reverse();
                    return Ok(parts.join("."));
                }
            }
        }
        Err(malformed(0, format!("outer chain of {index} does not terminate")))
    }

    pub(crate) fn replace_payload(&mut self, index: usize, payload: Vec<u8>) -> AssetResult<()> {
        let len = self.payloads.len();
        let slot = self
            .payloads
            .get_mut(index)
            .ok_or_else(|| dangling(TableKind::Export, index as i64, len))?;
        *slot = payload;
        Ok(())
    }

    /// Rewrite every export's offset and size to follow the current
    /// payloads, exactly as the next [`AssetFile::serialize`] lays them out.
    pub(crate) fn relink(&mut self) {
        let mut offset = self.header_len() as i64;
        for (export, payload) in self.exports.iter_mut().zip(&self.payloads) {
            export.serial_offset = offset;
            export.serial_size = payload.len() as i64;
            offset += export.serial_size;
        }
    }

    pub(crate) fn set_bulk(&mut self, bulk: Option<Vec<u8>>) {
        self.bulk = bulk;
    }

    /// Append an import and return its index.
    pub(crate) fn push_import(&mut self, import: ObjectImport) -> PackageIndex {
        self.imports.push(import);
        self.resolver = Resolver::build(&self.imports, &self.exports);
        PackageIndex::from_import(self.imports.len() - 1)
    }

    fn table_bytes(&self) -> (Vec<u8>, Vec<u8>, usize) {
        let mut names = ByteWriter::new();
        self.names.write(&mut names);
        let mut imports = ByteWriter::new();
        for import in &self.imports {
            import.write(&mut imports);
        }
        let mut probe = ByteWriter::new();
        for export in &self.exports {
            export.write(&mut probe);
        }
        (names.into_inner(), imports.into_inner(), probe.position())
    }

    fn summary_len(&self) -> usize {
        let mut w = ByteWriter::new();
        self.summary.write(&mut w);
        w.position()
    }

    /// Length of the header region the next serialization will produce.
    pub fn header_len(&self) -> usize {
        let (names, imports, exports_len) = self.table_bytes();
        self.summary_len()
            + self.summary_gap.len()
            + names.len()
            + imports.len()
            + exports_len
            + self.dependency_region.len()
    }

    /// Absolute offset export `index` will be written at.
    pub fn payload_offset(&self, index: usize) -> i64 {
        let before: usize = self.payloads.iter().take(index).map(Vec::len).sum();
        (self.header_len() + before) as i64
    }

    pub fn serialize(&self) -> SerializedAsset {
        let (names, imports, exports_len) = self.table_bytes();
        let mut summary = self.summary.clone();

        let name_offset = self.summary_len() + self.summary_gap.len();
        let import_offset = name_offset + names.len();
        let export_offset = import_offset + imports.len();
        let export_end = export_offset + exports_len;
        let header_len = export_end + self.dependency_region.len();
        let payload_len: usize = self.payloads.iter().map(Vec::len).sum::<usize>() + self.tail.len();

        let name_count = self.names.len() as i32;
        let export_count = self.exports.len() as i32;
        summary.name_count = name_count;
        summary.name_offset = name_offset as i32;
        summary.import_count = self.imports.len() as i32;
        summary.import_offset = import_offset as i32;
        summary.export_count = export_count;
        summary.export_offset = export_offset as i32;
        summary.total_header_size = header_len as u32;
        summary.shift_trailing_offsets(
            self.layout.export_table_end,
            export_end as i64 - self.layout.export_table_end,
        );
        if summary.bulk_data_start_offset > 0 {
            summary.bulk_data_start_offset += (header_len + payload_len) as i64 - self.layout.total_len;
        }
        if let Some(generation) = summary.generations.last_mut() {
            if generation.name_count == self.layout.name_count {
                generation.name_count = name_count;
            }
            if generation.export_count == self.layout.export_count {
                generation.export_count = export_count;
            }
        }
        if let Some(count) = summary.names_referenced_from_export_data_count.as_mut() {
            if *count == self.layout.name_count {
                *count = name_count;
            }
        }

        let mut w = ByteWriter::with_capacity(header_len);
        summary.write(&mut w);
        w.write_bytes(&self.summary_gap);
        w.write_bytes(&names);
        w.write_bytes(&imports);
        let mut offset = header_len as i64;
        for (export, payload) in self.exports.iter().zip(&self.payloads) {
            let mut export = export.clone();
            export.serial_offset = offset;
            export.serial_size = payload.len() as i64;
            offset += export.serial_size;
            export.write(&mut w);
        }
        w.write_bytes(&self.dependency_region);
        debug_assert_eq!(w.position(), header_len);

        let mut region = Vec::with_capacity(payload_len);
        for payload in &self.payloads {
            region.extend_from_slice(payload);
        }
        self.tail.write(&mut region);

        let mut uasset = w.into_inner();
        let uexp = if self.split {
            Some(region)
        } else {
            uasset.extend_from_slice(&region);
            None
        };
        SerializedAsset {
            uasset,
            uexp,
            ubulk: self.bulk.clone(),
        }
    }
}

fn table_count(count: i32, table: &str) -> AssetResult<usize> {
    usize::try_from(count).map_err(|_| malformed(0, format!("negative {table} count {count}")))
}

fn table_offset(offset: i32, min: usize, len: usize, table: &str) -> AssetResult<usize> {
    let value = usize::try_from(offset)
        .map_err(|_| malformed(0, format!("negative {table} table offset {offset}")))?;
    if value < min {
        return Err(malformed(
            value,
            format!("{table} table starts inside the package summary"),
        ));
    }
    if value > len {
        return Err(truncated(min, value - min, len - min));
    }
    Ok(value)
}

fn expect_contiguous(declared: i32, actual: usize, table: &str) -> AssetResult<()> {
    if declared as i64 != actual as i64 {
        return Err(malformed(
            actual,
            format!("{table} table declared at {declared} but previous table ends at {actual}"),
        ));
    }
    Ok(())
}

/// Check that `exports` tile the payload region starting at `header_size`.
pub fn check_export_offsets(exports: &[ObjectExport], header_size: i64) -> AssetResult<()> {
    let mut expected = header_size;
    for (i, export) in exports.iter().enumerate() {
        if export.serial_offset != expected {
            return Err(malformed(
                export.serial_offset.max(0) as usize,
                format!("export {i} starts at {} instead of {expected}", export.serial_offset),
            ));
        }
        expected = export.serial_end();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;
    use crate::test_support::{PackageBuilder, reparse};

    fn sample() -> PackageBuilder {
        let mut b = PackageBuilder::new();
        let class = b.import("/Script/Engine", "Class", "StaticMesh");
        b.export("MeshA", class, vec![1u8; 40]);
        b.export("MeshB", class, vec![2u8; 12]);
        b
    }

    #[test]
    fn test_round_trip_single_file() {
        let bytes = sample().build();
        let asset = AssetFile::parse(AssetSources::new(&bytes.uasset), &ParseOptions::default()).unwrap();
        let out = asset.serialize();
        assert_eq!(out.uasset, bytes.uasset);
        assert!(out.uexp.is_none());
    }

    #[test]
    fn test_round_trip_split() {
        let bytes = sample().split(true).note("made by hand").build();
        let uexp = bytes.uexp.clone().unwrap();
        let sources = AssetSources::new(&bytes.uasset).with_uexp(&uexp);
        let asset = AssetFile::parse(sources, &ParseOptions::default()).unwrap();
        assert_eq!(asset.tail().note().as_deref(), Some("made by hand"));
        let out = asset.serialize();
        assert_eq!(out.uasset, bytes.uasset);
        assert_eq!(out.uexp.as_deref(), Some(uexp.as_slice()));
    }

    #[test]
    fn test_name_resolution() {
        let bytes = sample().build();
        let asset = AssetFile::parse(AssetSources::new(&bytes.uasset), &ParseOptions::default()).unwrap();
        for export in asset.exports() {
            let name = &export.object_name;
            assert!(!name.text().is_empty());
            assert_eq!(asset.names().text(name.index()).unwrap(), name.text());
        }
        assert_eq!(asset.find_export("MeshB"), Some(1));
        assert_eq!(asset.export_class(0).unwrap(), "StaticMesh");
        assert_eq!(asset.exports_of_class("StaticMesh"), &[0, 1]);
        assert_eq!(
            asset.object_path(PackageIndex::from_import(1)).unwrap(),
            "/Script/Engine.StaticMesh"
        );
        assert_eq!(asset.object_path(PackageIndex::from_export(0)).unwrap(), "MeshA");
    }

    #[test]
    fn test_offsets_follow_payload_sizes() {
        let bytes = sample().build();
        let mut asset = AssetFile::parse(AssetSources::new(&bytes.uasset), &ParseOptions::default()).unwrap();
        asset.replace_payload(0, vec![9u8; 100]).unwrap();
        let out = asset.serialize();
        let again = reparse(&out, &ParseOptions::default());
        let header = again.summary().total_header_size as i64;
        assert_eq!(again.exports()[0].serial_offset, header);
        assert_eq!(again.exports()[0].serial_size, 100);
        check_export_offsets(again.exports(), header).unwrap();
        assert_eq!(again.export_payload(1).unwrap(), &[2u8; 12]);
    }

    #[test]
    fn test_interned_name_shifts_header() {
        let bytes = sample().build();
        let mut asset = AssetFile::parse(AssetSources::new(&bytes.uasset), &ParseOptions::default()).unwrap();
        let before = asset.summary().total_header_size;
        let old_bulk = asset.summary().bulk_data_start_offset;
        asset.names_mut().intern("NewSlot");
        let out = asset.serialize();
        let again = reparse(&out, &ParseOptions::default());
        // 4-byte length + "NewSlot\0" + 4 hash bytes
        assert_eq!(again.summary().total_header_size, before + 16);
        assert_eq!(again.summary().bulk_data_start_offset, old_bulk + 16);
        assert_eq!(again.names().find("NewSlot"), Some(asset.names().len() - 1));
        assert_eq!(again.summary().generations.last().unwrap().name_count, asset.names().len() as i32);
        check_export_offsets(again.exports(), before as i64 + 16).unwrap();
    }

    #[test]
    fn test_truncated_payload_region() {
        let bytes = sample().build();
        let cut = &bytes.uasset[..bytes.uasset.len() - 10];
        let err = AssetFile::parse(AssetSources::new(cut), &ParseOptions::default()).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::TruncatedInput { .. }));
    }

    #[test]
    fn test_engine_layout_mismatch() {
        let bytes = sample().build();
        let options = ParseOptions::for_version(EngineVersion::UE5_0);
        let err = AssetFile::parse(AssetSources::new(&bytes.uasset), &options).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_ue5_round_trip() {
        let options = ParseOptions::for_version(EngineVersion::UE5_0);
        let bytes = sample().engine(EngineVersion::UE5_0).build();
        let asset = AssetFile::parse(AssetSources::new(&bytes.uasset), &options).unwrap();
        assert!(asset.imports()[0].import_optional.is_some());
        assert_eq!(asset.serialize().uasset, bytes.uasset);
    }

    #[test]
    fn test_dangling_class_is_per_export() {
        let mut b = sample();
        b.export("Broken", PackageIndex(-40), vec![0u8; 4]);
        let bytes = b.build();
        let asset = AssetFile::parse(AssetSources::new(&bytes.uasset), &ParseOptions::default()).unwrap();
        assert_eq!(asset.export_class(0).unwrap(), "StaticMesh");
        let err = asset.export_class(2).unwrap_err();
        assert!(matches!(
            err.current_context(),
            AssetError::DanglingReference { table: TableKind::Import, .. }
        ));
    }
}
