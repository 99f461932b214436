use std::fmt;

use rootcause::Report;
use thiserror::Error;

/// Which table an index was resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Name,
    Import,
    Export,
    Bone,
    Material,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableKind::Name => "name",
            TableKind::Import => "import",
            TableKind::Export => "export",
            TableKind::Bone => "bone",
            TableKind::Material => "material",
        };
        f.write_str(s)
    }
}

/// Errors produced while parsing, decoding, re-encoding or injecting an asset.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    #[error("truncated input: need {need} bytes at offset 0x{offset:X}, have {have}")]
    TruncatedInput {
        offset: usize,
        need: usize,
        have: usize,
    },
    #[error("unsupported version: {detail}")]
    UnsupportedVersion { detail: String },
    #[error("dangling {table} reference {index} (table has {len} entries)")]
    DanglingReference {
        table: TableKind,
        index: i64,
        len: usize,
    },
    #[error("no decoder registered for class `{class}`")]
    UnsupportedAssetType { class: String },
    #[error("class mismatch: export is `{expected}`, payload is `{found}`")]
    ClassMismatch { expected: String, found: String },
    #[error("cannot size property `{property}` before writing it: {detail}")]
    AmbiguousPropertySize { property: String, detail: String },
    #[error("invalid magic: expected 0x{expected:08X}, found 0x{found:08X}")]
    InvalidMagic { expected: u32, found: u32 },
    #[error("malformed data at 0x{offset:X}: {detail}")]
    Malformed { offset: usize, detail: String },
    #[error("corrupt skeleton: {detail}")]
    CorruptSkeleton { detail: String },
}

pub type AssetResult<T> = Result<T, Report<AssetError>>;

pub(crate) fn truncated(offset: usize, need: usize, have: usize) -> Report<AssetError> {
    Report::new(AssetError::TruncatedInput { offset, need, have })
}

pub(crate) fn malformed(offset: usize, detail: impl Into<String>) -> Report<AssetError> {
    Report::new(AssetError::Malformed {
        offset,
        detail: detail.into(),
    })
}

pub(crate) fn unsupported_version(detail: impl Into<String>) -> Report<AssetError> {
    Report::new(AssetError::UnsupportedVersion {
        detail: detail.into(),
    })
}

pub(crate) fn dangling(table: TableKind, index: i64, len: usize) -> Report<AssetError> {
    Report::new(AssetError::DanglingReference { table, index, len })
}

pub(crate) fn ambiguous_size(property: impl Into<String>, detail: impl Into<String>) -> Report<AssetError> {
    Report::new(AssetError::AmbiguousPropertySize {
        property: property.into(),
        detail: detail.into(),
    })
}

pub(crate) fn unsupported_asset_type(class: impl Into<String>) -> Report<AssetError> {
    Report::new(AssetError::UnsupportedAssetType { class: class.into() })
}

pub(crate) fn class_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Report<AssetError> {
    Report::new(AssetError::ClassMismatch {
        expected: expected.into(),
        found: found.into(),
    })
}

pub(crate) fn corrupt_skeleton(detail: impl Into<String>) -> Report<AssetError> {
    Report::new(AssetError::CorruptSkeleton {
        detail: detail.into(),
    })
}

/// Attach a lazily built description (export, property path) to an error
/// as it crosses a decoder boundary.
pub(crate) trait Annotate<T> {
    fn annotate(self, describe: impl FnOnce() -> String) -> AssetResult<T>;
}

impl<T> Annotate<T> for AssetResult<T> {
    fn annotate(self, describe: impl FnOnce() -> String) -> AssetResult<T> {
        self.map_err(|report| report.attach(describe()))
    }
}
