//! Index resolution and name lookups over the import and export tables.

use std::collections::HashMap;

use crate::error::{AssetResult, TableKind, dangling};
use crate::package::names::FName;
use crate::package::tables::{ObjectExport, ObjectImport, ObjectRef, PackageIndex};

/// A resolved, non-null [`PackageIndex`].
#[derive(Debug, Clone, Copy)]
pub enum ResolvedObject<'a> {
    Import(usize, &'a ObjectImport),
    Export(usize, &'a ObjectExport),
}

impl<'a> ResolvedObject<'a> {
    pub fn name(&self) -> &'a FName {
        match self {
            ResolvedObject::Import(_, imp) => &imp.object_name,
            ResolvedObject::Export(_, exp) => &exp.object_name,
        }
    }

    pub fn outer(&self) -> PackageIndex {
        match self {
            ResolvedObject::Import(_, imp) => imp.outer_index,
            ResolvedObject::Export(_, exp) => exp.outer_index,
        }
    }

    pub fn index(&self) -> PackageIndex {
        match self {
            ResolvedObject::Import(i, _) => PackageIndex::from_import(*i),
            ResolvedObject::Export(i, _) => PackageIndex::from_export(*i),
        }
    }
}

pub fn resolve<'a>(
    imports: &'a [ObjectImport],
    exports: &'a [ObjectExport],
    index: PackageIndex,
) -> AssetResult<Option<ResolvedObject<'a>>> {
    match index.kind() {
        ObjectRef::Null => Ok(None),
        ObjectRef::Import(i) => imports
            .get(i)
            .map(|imp| Some(ResolvedObject::Import(i, imp)))
            .ok_or_else(|| dangling(TableKind::Import, index.0 as i64, imports.len())),
        ObjectRef::Export(i) => exports
            .get(i)
            .map(|exp| Some(ResolvedObject::Export(i, exp)))
            .ok_or_else(|| dangling(TableKind::Export, index.0 as i64, exports.len())),
    }
}

/// Class name of an export. A null class index denotes `Class` itself.
pub fn export_class_name(
    imports: &[ObjectImport],
    exports: &[ObjectExport],
    export: &ObjectExport,
) -> AssetResult<String> {
    Ok(match resolve(imports, exports, export.class_index)? {
        Some(obj) => obj.name().to_string(),
        None => "Class".to_string(),
    })
}

/// Lookup maps built once per parse.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    exports_by_name: HashMap<String, usize>,
    exports_by_class: HashMap<String, Vec<usize>>,
    imports_by_name: HashMap<String, Vec<usize>>,
    export_classes: Vec<Option<String>>,
}

impl Resolver {
    pub fn build(imports: &[ObjectImport], exports: &[ObjectExport]) -> Self {
        let mut resolver = Self::default();
        for (i, imp) in imports.iter().enumerate() {
            resolver
                .imports_by_name
                .entry(imp.object_name.to_string())
                .or_default()
                .push(i);
        }
        for (i, exp) in exports.iter().enumerate() {
            resolver
                .exports_by_name
                .entry(exp.object_name.to_string())
                .or_insert(i);
            let class = export_class_name(imports, exports, exp).ok();
            if let Some(class) = &class {
                resolver
                    .exports_by_class
                    .entry(class.clone())
                    .or_default()
                    .push(i);
            }
            resolver.export_classes.push(class);
        }
        resolver
    }

    /// First export named `name` (display form, including any instance suffix).
    pub fn export_by_name(&self, name: &str) -> Option<usize> {
        self.exports_by_name.get(name).copied()
    }

    pub fn exports_of_class(&self, class: &str) -> &[usize] {
        self.exports_by_class
            .get(class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn imports_named(&self, name: &str) -> &[usize] {
        self.imports_by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Cached class name for export `index`, `None` when its class index dangles.
    pub fn class_of(&self, index: usize) -> Option<&str> {
        self.export_classes.get(index)?.as_deref()
    }
}
