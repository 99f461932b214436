//! Import and export table rows.

use std::fmt;

use crate::data::{ByteReader, ByteWriter};
use crate::error::AssetResult;
use crate::package::names::{FName, NameTable};
use crate::version::EngineVersion;

/// Reference to an object: `0` is null, positive values are `export + 1`,
/// negative values are `-(import + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackageIndex(pub i32);

/// Decoded form of a [`PackageIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    Null,
    Import(usize),
    Export(usize),
}

impl PackageIndex {
    pub const NULL: Self = Self(0);

    pub fn from_import(index: usize) -> Self {
        Self(-(index as i32) - 1)
    }

    pub fn from_export(index: usize) -> Self {
        Self(index as i32 + 1)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn kind(self) -> ObjectRef {
        match self.0 {
            0 => ObjectRef::Null,
            i if i < 0 => ObjectRef::Import((-(i as i64) - 1) as usize),
            i => ObjectRef::Export((i - 1) as usize),
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> AssetResult<Self> {
        Ok(Self(reader.read_i32()?))
    }

    pub fn write(self, w: &mut ByteWriter) {
        w.write_i32(self.0);
    }
}

impl fmt::Display for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ObjectRef::Null => f.write_str("null"),
            ObjectRef::Import(i) => write!(f, "import[{i}]"),
            ObjectRef::Export(i) => write!(f, "export[{i}]"),
        }
    }
}

/// Reference to an object that lives in another package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectImport {
    pub class_package: FName,
    pub class_name: FName,
    pub outer_index: PackageIndex,
    pub object_name: FName,
    /// Present from 5.0.
    pub import_optional: Option<u32>,
}

impl ObjectImport {
    pub fn parse(
        reader: &mut ByteReader<'_>,
        names: &NameTable,
        version: EngineVersion,
    ) -> AssetResult<Self> {
        let class_package = names.read_fname(reader)?;
        let class_name = names.read_fname(reader)?;
        let outer_index = PackageIndex::read(reader)?;
        let object_name = names.read_fname(reader)?;
        let import_optional = if version.is_ue5() {
            Some(reader.read_u32()?)
        } else {
            None
        };
        Ok(Self {
            class_package,
            class_name,
            outer_index,
            object_name,
            import_optional,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        self.class_package.write(w);
        self.class_name.write(w);
        self.outer_index.write(w);
        self.object_name.write(w);
        if let Some(v) = self.import_optional {
            w.write_u32(v);
        }
    }
}

/// Descriptor of an object serialized in this package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectExport {
    pub class_index: PackageIndex,
    pub super_index: PackageIndex,
    pub template_index: PackageIndex,
    pub outer_index: PackageIndex,
    pub object_name: FName,
    pub object_flags: u32,
    pub serial_size: i64,
    pub serial_offset: i64,
    pub forced_export: u32,
    pub not_for_client: u32,
    pub not_for_server: u32,
    pub package_guid: [u8; 16],
    pub package_flags: u32,
    pub not_always_loaded_for_editor_game: u32,
    pub is_asset: u32,
    /// The five dependency-list indices, kept verbatim.
    pub dependency_indices: [i32; 5],
    /// Present from 5.0.
    pub generate_public_hash: Option<u32>,
}

/// Serialized size of an export row before 5.0.
pub const EXPORT_ENTRY_SIZE: usize = 104;
/// Serialized size of an import row before 5.0.
pub const IMPORT_ENTRY_SIZE: usize = 28;

impl ObjectExport {
    pub fn parse(
        reader: &mut ByteReader<'_>,
        names: &NameTable,
        version: EngineVersion,
    ) -> AssetResult<Self> {
        let class_index = PackageIndex::read(reader)?;
        let super_index = PackageIndex::read(reader)?;
        let template_index = PackageIndex::read(reader)?;
        let outer_index = PackageIndex::read(reader)?;
        let object_name = names.read_fname(reader)?;
        let object_flags = reader.read_u32()?;
        let serial_size = reader.read_i64()?;
        let serial_offset = reader.read_i64()?;
        let forced_export = reader.read_u32()?;
        let not_for_client = reader.read_u32()?;
        let not_for_server = reader.read_u32()?;
        let package_guid = reader.read_guid()?;
        let package_flags = reader.read_u32()?;
        let not_always_loaded_for_editor_game = reader.read_u32()?;
        let is_asset = reader.read_u32()?;
        let mut dependency_indices = [0i32; 5];
        for d in dependency_indices.iter_mut() {
            *d = reader.read_i32()?;
        }
        let generate_public_hash = if version.is_ue5() {
            Some(reader.read_u32()?)
        } else {
            None
        };
        Ok(Self {
            class_index,
            super_index,
            template_index,
            outer_index,
            object_name,
            object_flags,
            serial_size,
            serial_offset,
            forced_export,
            not_for_client,
            not_for_server,
            package_guid,
            package_flags,
            not_always_loaded_for_editor_game,
            is_asset,
            dependency_indices,
            generate_public_hash,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        self.class_index.write(w);
        self.super_index.write(w);
        self.template_index.write(w);
        self.outer_index.write(w);
        self.object_name.write(w);
        w.write_u32(self.object_flags);
        w.write_i64(self.serial_size);
        w.write_i64(self.serial_offset);
        w.write_u32(self.forced_export);
        w.write_u32(self.not_for_client);
        w.write_u32(self.not_for_server);
        w.write_guid(&self.package_guid);
        w.write_u32(self.package_flags);
        w.write_u32(self.not_always_loaded_for_editor_game);
        w.write_u32(self.is_asset);
        for d in self.dependency_indices {
            w.write_i32(d);
        }
        if let Some(v) = self.generate_public_hash {
            w.write_u32(v);
        }
    }

    /// Absolute end of this export's payload.
    pub fn serial_end(&self) -> i64 {
        self.serial_offset + self.serial_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_index_kinds() {
        assert_eq!(PackageIndex(0).kind(), ObjectRef::Null);
        assert_eq!(PackageIndex(-1).kind(), ObjectRef::Import(0));
        assert_eq!(PackageIndex(-3).kind(), ObjectRef::Import(2));
        assert_eq!(PackageIndex(1).kind(), ObjectRef::Export(0));
        assert_eq!(PackageIndex::from_import(4), PackageIndex(-5));
        assert_eq!(PackageIndex::from_export(4), PackageIndex(5));
        assert_eq!(PackageIndex(i32::MIN).kind(), ObjectRef::Import(2147483647));
    }
}
