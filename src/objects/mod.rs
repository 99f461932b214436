//! Class-specific object decoders.
//!
//! Every export payload starts with a tagged property list and an optional
//! object GUID. What follows depends on the export's class, which is looked
//! up once in a fixed registry ([`AssetKind`]). Each decoder keeps whatever
//! it does not interpret as raw bytes, so decoding and re-encoding an
//! untouched object reproduces its payload exactly.

pub mod acl;
pub mod animation;
pub mod common;
pub mod skeletal_mesh;
pub mod skeleton;
pub mod static_mesh;
pub mod texture;

use tracing::{debug, warn};
use variantly::Variantly;

use crate::data::{ByteReader, ByteWriter};
use crate::error::{Annotate, AssetError, AssetResult, unsupported_asset_type, unsupported_version};
use crate::package::AssetFile;
use crate::package::names::NameTable;
use crate::property::{PropertyContext, PropertyList, PropertyValue};
use crate::version::EngineVersion;

pub use animation::AnimSequence;
pub use skeletal_mesh::SkeletalMesh;
pub use skeleton::{ReferenceSkeleton, Skeleton};
pub use static_mesh::StaticMesh;
pub use texture::Texture;

/// Classes with a dedicated decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AssetKind {
    StaticMesh,
    SkeletalMesh,
    Skeleton,
    Texture2D,
    TextureCube,
    AnimSequence,
}

impl AssetKind {
    const REGISTRY: [(AssetKind, &'static str); 6] = [
        (AssetKind::StaticMesh, "StaticMesh"),
        (AssetKind::SkeletalMesh, "SkeletalMesh"),
        (AssetKind::Skeleton, "Skeleton"),
        (AssetKind::Texture2D, "Texture2D"),
        (AssetKind::TextureCube, "TextureCube"),
        (AssetKind::AnimSequence, "AnimSequence"),
    ];

    pub fn from_class(class: &str) -> Option<Self> {
        Self::REGISTRY
            .iter()
            .find(|(_, name)| *name == class)
            .map(|(kind, _)| *kind)
    }

    pub fn class_name(self) -> &'static str {
        Self::REGISTRY
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("Object")
    }
}

/// Inputs a decoder needs besides the payload bytes.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub names: &'a NameTable,
    pub version: EngineVersion,
    /// Absolute file offset of the payload's first byte, for payloads that
    /// record offsets into themselves.
    pub payload_offset: i64,
    /// The paired `.ubulk`, if any.
    pub bulk: Option<&'a [u8]>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(names: &'a NameTable, version: EngineVersion) -> Self {
        Self {
            names,
            version,
            payload_offset: 0,
            bulk: None,
        }
    }

    pub fn properties(&self) -> PropertyContext<'a> {
        PropertyContext {
            names: self.names,
            version: self.version,
        }
    }
}

/// Output side of a re-encode: where the payload will land, and the
/// `.ubulk` being rebuilt if the object stores data there.
#[derive(Debug)]
pub struct EncodeContext {
    pub version: EngineVersion,
    pub payload_offset: i64,
    bulk: Option<Vec<u8>>,
}

impl EncodeContext {
    pub fn new(version: EngineVersion, payload_offset: i64) -> Self {
        Self {
            version,
            payload_offset,
            bulk: None,
        }
    }

    /// The `.ubulk` under construction; created on first use.
    pub fn bulk_mut(&mut self) -> &mut Vec<u8> {
        self.bulk.get_or_insert_with(Vec::new)
    }

    /// The rebuilt `.ubulk`, or `None` if the object wrote nothing there.
    pub fn into_bulk(self) -> Option<Vec<u8>> {
        self.bulk
    }
}

/// Property list plus object GUID, common to every export.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeader {
    pub properties: PropertyList,
    pub guid: Option<[u8; 16]>,
}

impl ObjectHeader {
    pub fn parse(r: &mut ByteReader<'_>, ctx: &DecodeContext<'_>) -> AssetResult<Self> {
        let properties = PropertyList::parse(r, ctx.properties()).annotate(|| "property list".to_string())?;
        let guid = if r.read_bool32()? {
            Some(r.read_guid()?)
        } else {
            None
        };
        Ok(Self { properties, guid })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        self.properties.write(w);
        match &self.guid {
            Some(guid) => {
                w.write_bool32(true);
                w.write_guid(guid);
            }
            None => w.write_bool32(false),
        }
    }
}

/// Decode and re-encode of one class's payload.
pub trait ExportCodec: Sized {
    fn decode(payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<Self>;

    fn encode(&self, ctx: &mut EncodeContext) -> AssetResult<Vec<u8>>;
}

/// An export of a class without a decoder: header plus opaque remainder.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericObject {
    pub class: String,
    pub header: ObjectHeader,
    pub trailing: Vec<u8>,
}

impl GenericObject {
    pub fn decode(class: &str, payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<Self> {
        let mut r = ByteReader::new(payload);
        let header = ObjectHeader::parse(&mut r, ctx)?;
        Ok(Self {
            class: class.to_string(),
            header,
            trailing: r.rest().to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.header.write(&mut w);
        w.write_bytes(&self.trailing);
        w.into_inner()
    }
}

/// Shorten array property `name` to at most `len` elements, if present.
pub(crate) fn truncate_array_property(properties: &mut PropertyList, name: &str, len: usize) -> AssetResult<()> {
    if let Some(PropertyValue::Array(array)) = properties.get(name) {
        if array.elements.len() > len {
            let mut array = array.clone();
            array.elements.truncate(len);
            properties.set(name, PropertyValue::Array(array))?;
        }
    }
    Ok(())
}

/// A decoded export.
#[derive(Debug, Clone, Variantly)]
pub enum DecodedExport {
    StaticMesh(StaticMesh),
    SkeletalMesh(SkeletalMesh),
    Skeleton(Skeleton),
    Texture(Texture),
    Animation(AnimSequence),
    Generic(GenericObject),
}

impl DecodedExport {
    /// Class name the payload was decoded as.
    pub fn class_name(&self) -> &str {
        match self {
            DecodedExport::StaticMesh(_) => AssetKind::StaticMesh.class_name(),
            DecodedExport::SkeletalMesh(_) => AssetKind::SkeletalMesh.class_name(),
            DecodedExport::Skeleton(_) => AssetKind::Skeleton.class_name(),
            DecodedExport::Texture(t) => t.kind().class_name(),
            DecodedExport::Animation(_) => AssetKind::AnimSequence.class_name(),
            DecodedExport::Generic(g) => &g.class,
        }
    }

    pub fn header(&self) -> &ObjectHeader {
        match self {
            DecodedExport::StaticMesh(o) => &o.header,
            DecodedExport::SkeletalMesh(o) => &o.header,
            DecodedExport::Skeleton(o) => &o.header,
            DecodedExport::Texture(o) => &o.header,
            DecodedExport::Animation(o) => &o.header,
            DecodedExport::Generic(o) => &o.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut ObjectHeader {
        match self {
            DecodedExport::StaticMesh(o) => &mut o.header,
            DecodedExport::SkeletalMesh(o) => &mut o.header,
            DecodedExport::Skeleton(o) => &mut o.header,
            DecodedExport::Texture(o) => &mut o.header,
            DecodedExport::Animation(o) => &mut o.header,
            DecodedExport::Generic(o) => &mut o.header,
        }
    }

    pub fn encode(&self, ctx: &mut EncodeContext) -> AssetResult<Vec<u8>> {
        match self {
            DecodedExport::StaticMesh(o) => o.encode(ctx),
            DecodedExport::SkeletalMesh(o) => o.encode(ctx),
            DecodedExport::Skeleton(o) => o.encode(ctx),
            DecodedExport::Texture(o) => o.encode(ctx),
            DecodedExport::Animation(o) => o.encode(ctx),
            DecodedExport::Generic(o) => Ok(o.encode()),
        }
    }
}

fn decode_kind(kind: AssetKind, payload: &[u8], ctx: &DecodeContext<'_>) -> AssetResult<DecodedExport> {
    Ok(match kind {
        AssetKind::StaticMesh => DecodedExport::StaticMesh(StaticMesh::decode(payload, ctx)?),
        AssetKind::SkeletalMesh => DecodedExport::SkeletalMesh(SkeletalMesh::decode(payload, ctx)?),
        AssetKind::Skeleton => DecodedExport::Skeleton(Skeleton::decode(payload, ctx)?),
        AssetKind::Texture2D | AssetKind::TextureCube => DecodedExport::Texture(Texture::decode(payload, ctx)?),
        AssetKind::AnimSequence => DecodedExport::Animation(AnimSequence::decode(payload, ctx)?),
    })
}

impl AssetFile {
    /// Decode context for export `index` as it was read.
    pub fn decode_context(&self, index: usize) -> AssetResult<DecodeContext<'_>> {
        let export = self.export(index)?;
        Ok(DecodeContext {
            names: self.names(),
            version: self.engine_version(),
            payload_offset: export.serial_offset,
            bulk: self.bulk(),
        })
    }

    fn ensure_versioned(&self) -> AssetResult<()> {
        if self.is_unversioned() {
            return Err(unsupported_version(
                "package uses unversioned properties, which carry no tags to decode",
            ));
        }
        Ok(())
    }

    /// Header and raw remainder of export `index`, whatever its class.
    pub fn generic_export(&self, index: usize) -> AssetResult<GenericObject> {
        self.ensure_versioned()?;
        let class = self.export_class(index)?;
        let ctx = self.decode_context(index)?;
        GenericObject::decode(&class, self.export_payload(index)?, &ctx)
            .annotate(|| format!("export {index} ({class})"))
    }

    /// Decode export `index` with the decoder registered for its class.
    ///
    /// Classes without a decoder fail with `UnsupportedAssetType`; the
    /// header is still available through [`AssetFile::generic_export`].
    /// In non-strict mode an `UnsupportedVersion` from the decoder degrades
    /// to the generic form.
    pub fn decode_export(&self, index: usize) -> AssetResult<DecodedExport> {
        let class = self.export_class(index)?;
        let Some(kind) = AssetKind::from_class(&class) else {
            debug!(index, %class, "no decoder registered");
            return Err(unsupported_asset_type(class));
        };
        self.ensure_versioned()?;
        let ctx = self.decode_context(index)?;
        let name = self.export(index)?.object_name.to_string();
        let result = decode_kind(kind, self.export_payload(index)?, &ctx)
            .annotate(|| format!("export {index} `{name}` ({class})"));
        match result {
            Err(report)
                if !self.options().strict
                    && matches!(report.current_context(), AssetError::UnsupportedVersion { .. }) =>
            {
                warn!(index, %class, error = %report.current_context(), "keeping export as generic properties");
                match self.generic_export(index) {
                    Ok(generic) => Ok(DecodedExport::Generic(generic)),
                    Err(_) => Err(report),
                }
            }
            other => other,
        }
    }
}
