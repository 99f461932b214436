//! Tagged property lists.
//!
//! Every object payload starts with a list of `(tag, value)` pairs closed by
//! a `None` name. Each value is decoded from exactly the number of bytes its
//! tag declares; when a typed decoder fails or stops short, the value is
//! kept as [`PropertyValue::Raw`] and the rest of the list still decodes.
//!
//! A property keeps the bytes it was read from until it is replaced through
//! [`PropertyList::set`], so untouched properties re-encode byte-for-byte.

pub mod native;
pub mod tag;
pub mod value;

use tracing::{debug, trace};

use crate::data::{ByteReader, ByteWriter};
use crate::error::{Annotate, AssetResult, ambiguous_size, malformed};
use crate::package::names::{FName, NONE, NameTable};
use crate::recognized::Recognized;
use crate::version::EngineVersion;

pub use native::NativeStruct;
pub use tag::{PropertyTag, PropertyType, TagData};
pub use value::{ArrayValue, MapValue, PropertyContext, PropertyValue, SetValue, StructValue};

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    tag: PropertyTag,
    value: PropertyValue,
    /// Encoded value bytes; always `tag.size` long.
    bytes: Vec<u8>,
    modified: bool,
}

impl Property {
    pub fn tag(&self) -> &PropertyTag {
        &self.tag
    }

    pub fn name(&self) -> &FName {
        &self.tag.name
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Encoded value bytes as they will be written.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the value was replaced since parsing.
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyList {
    properties: Vec<Property>,
    /// The `None` token closing the list, as read.
    terminator: FName,
    version: EngineVersion,
}

impl PropertyList {
    /// Empty list closed by the table's `None` name.
    pub fn new(names: &mut NameTable, version: EngineVersion) -> Self {
        Self {
            properties: Vec::new(),
            terminator: names.intern(NONE),
            version,
        }
    }

    pub fn parse(reader: &mut ByteReader<'_>, ctx: PropertyContext<'_>) -> AssetResult<Self> {
        let mut properties: Vec<Property> = Vec::new();
        let terminator = loop {
            let name = ctx.names.read_fname(reader)?;
            if name.is_none() {
                break name;
            }
            let tag = PropertyTag::parse_after_name(name, reader, ctx.names)
                .annotate(|| format!("tag of property #{}", properties.len()))?;
            let size = usize::try_from(tag.size).map_err(|_| {
                malformed(
                    reader.position(),
                    format!("property `{}` declares negative size {}", tag.name, tag.size),
                )
            })?;
            let bytes = reader
                .read_bytes(size)
                .annotate(|| format!("value of property `{}`", tag.name))?;
            let value = decode_exact(bytes, ctx, &tag);
            trace!(name = %tag.name, kind = %tag.kind(), size, "decoded property");
            properties.push(Property {
                tag,
                value,
                bytes: bytes.to_vec(),
                modified: false,
            });
        };
        Ok(Self {
            properties,
            terminator,
            version: ctx.version,
        })
    }

    pub fn write(&self, w: &mut ByteWriter) {
        for property in &self.properties {
            property.tag.write(w);
            w.write_bytes(&property.bytes);
        }
        self.terminator.write(w);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.write(&mut w);
        w.into_inner()
    }

    pub fn version(&self) -> EngineVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.property_at(name, 0)
    }

    /// Property `name` with the given static array index.
    pub fn property_at(&self, name: &str, array_index: i32) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.tag.name == *name && p.tag.array_index == array_index)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.property(name).map(Property::value)
    }

    /// Replace the value of an existing property and re-encode it.
    ///
    /// The list is left unchanged if the value cannot be encoded against the
    /// property's tag.
    pub fn set(&mut self, name: &str, value: PropertyValue) -> AssetResult<()> {
        let version = self.version;
        let Some(property) = self
            .properties
            .iter_mut()
            .find(|p| p.tag.name == *name && p.tag.array_index == 0)
        else {
            return Err(ambiguous_size(name, "no existing tag to size the value against"));
        };
        let mut tag = property.tag.clone();
        if let PropertyValue::Bool(v) = value {
            if tag.kind().is(&PropertyType::Bool) {
                tag.data = TagData::Bool(v);
            }
        }
        let mut w = ByteWriter::new();
        value::write_value(&mut w, &tag, &value, version)?;
        tag.size = w.position() as i32;
        debug!(property = name, size = tag.size, "re-encoded property");
        property.tag = tag;
        property.value = value;
        property.bytes = w.into_inner();
        property.modified = true;
        Ok(())
    }

    /// Append a new property, deriving its tag from the value.
    ///
    /// Only values whose tag is fully determined by the value itself can be
    /// inserted; enums, non-native structs and containers need type names
    /// the value does not carry.
    pub fn insert(
        &mut self,
        names: &mut NameTable,
        name: &str,
        value: PropertyValue,
    ) -> AssetResult<()> {
        let (ty, data) = match &value {
            PropertyValue::Bool(v) => (PropertyType::Bool, TagData::Bool(*v)),
            PropertyValue::Int8(_) => (PropertyType::Int8, TagData::None),
            PropertyValue::Int16(_) => (PropertyType::Int16, TagData::None),
            PropertyValue::Int(_) => (PropertyType::Int, TagData::None),
            PropertyValue::Int64(_) => (PropertyType::Int64, TagData::None),
            PropertyValue::UInt16(_) => (PropertyType::UInt16, TagData::None),
            PropertyValue::UInt32(_) => (PropertyType::UInt32, TagData::None),
            PropertyValue::UInt64(_) => (PropertyType::UInt64, TagData::None),
            PropertyValue::Float(_) => (PropertyType::Float, TagData::None),
            PropertyValue::Double(_) => (PropertyType::Double, TagData::None),
            PropertyValue::Str(_) => (PropertyType::Str, TagData::None),
            PropertyValue::Name(_) => (PropertyType::Name, TagData::None),
            PropertyValue::Byte(_) => (PropertyType::Byte, TagData::Enum(names.intern(NONE))),
            PropertyValue::Object(_) => (PropertyType::Object, TagData::None),
            PropertyValue::SoftObject { .. } => (PropertyType::SoftObject, TagData::None),
            PropertyValue::Struct(StructValue::Native(native)) => (
                PropertyType::Struct,
                TagData::Struct {
                    struct_name: names.intern(native.struct_name()),
                    struct_guid: [0; 16],
                },
            ),
            other => {
                return Err(ambiguous_size(
                    name,
                    format!("a new {} property needs type information", other.kind_name()),
                ));
            }
        };
        let mut tag = PropertyTag {
            name: names.intern(name),
            type_name: names.intern(ty.type_name()),
            size: 0,
            array_index: 0,
            data,
            property_guid: None,
        };
        let mut w = ByteWriter::new();
        value::write_value(&mut w, &tag, &value, self.version)?;
        tag.size = w.position() as i32;
        self.properties.push(Property {
            tag,
            value,
            bytes: w.into_inner(),
            modified: true,
        });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        let pos = self.properties.iter().position(|p| p.tag.name == *name)?;
        Some(self.properties.remove(pos))
    }
}

/// Typed decode of exactly `bytes`, falling back to raw bytes.
fn decode_exact(bytes: &[u8], ctx: PropertyContext<'_>, tag: &PropertyTag) -> PropertyValue {
    if let Recognized::Unknown(type_name) = tag.kind() {
        debug!(name = %tag.name, %type_name, "unknown property type kept as raw bytes");
        return PropertyValue::Raw(bytes.to_vec());
    }
    let mut sub = ByteReader::new(bytes);
    match value::read_value(&mut sub, ctx, tag) {
        Ok(value) if sub.is_at_end() => value,
        Ok(_) => {
            debug!(
                name = %tag.name,
                declared = bytes.len(),
                consumed = sub.position(),
                "typed decoder did not consume the declared size, keeping raw bytes"
            );
            PropertyValue::Raw(bytes.to_vec())
        }
        Err(err) => {
            debug!(name = %tag.name, error = %err, "typed decode failed, keeping raw bytes");
            PropertyValue::Raw(bytes.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;
    use crate::test_support::{PropertyWriter, name_table};

    fn ctx(names: &NameTable) -> PropertyContext<'_> {
        PropertyContext {
            names,
            version: EngineVersion::UE4_27,
        }
    }

    #[test]
    fn test_scalar_properties_decode() {
        let mut names = name_table(&["None"]);
        let bytes = PropertyWriter::new(&mut names)
            .int("LODCount", 2)
            .float("Scale", 1.5)
            .bool("bEnabled", true)
            .string("Label", "chair")
            .finish();
        let list = PropertyList::parse(&mut ByteReader::new(&bytes), ctx(&names)).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list.get("LODCount").and_then(PropertyValue::as_i64), Some(2));
        assert_eq!(list.get("Scale").and_then(PropertyValue::as_f64), Some(1.5));
        assert_eq!(list.get("bEnabled").and_then(PropertyValue::as_bool), Some(true));
        assert_eq!(list.get("Label").and_then(PropertyValue::as_str), Some("chair"));
        assert_eq!(list.to_bytes(), bytes);
    }

    #[test]
    fn test_unknown_type_round_trips_raw() {
        let mut names = name_table(&["None"]);
        let bytes = PropertyWriter::new(&mut names)
            .int("Before", 7)
            .raw("Mystery", "FancyNewProperty", &[1, 2, 3, 4, 5])
            .int("After", 9)
            .finish();
        let list = PropertyList::parse(&mut ByteReader::new(&bytes), ctx(&names)).unwrap();
        assert_eq!(list.get("Mystery"), Some(&PropertyValue::Raw(vec![1, 2, 3, 4, 5])));
        assert_eq!(list.get("Before").and_then(PropertyValue::as_i64), Some(7));
        assert_eq!(list.get("After").and_then(PropertyValue::as_i64), Some(9));
        assert_eq!(list.to_bytes(), bytes);
    }

    #[test]
    fn test_short_typed_decode_falls_back() {
        // An IntProperty claiming 6 bytes cannot be an i32.
        let mut names = name_table(&["None"]);
        let bytes = PropertyWriter::new(&mut names)
            .raw("Odd", "IntProperty", &[1, 0, 0, 0, 9, 9])
            .finish();
        let list = PropertyList::parse(&mut ByteReader::new(&bytes), ctx(&names)).unwrap();
        assert!(matches!(list.get("Odd"), Some(PropertyValue::Raw(b)) if b.len() == 6));
        assert_eq!(list.to_bytes(), bytes);
    }

    #[test]
    fn test_struct_and_array_properties() {
        let mut names = name_table(&["None"]);
        let node = PropertyWriter::new(&mut names)
            .name("Name", "root")
            .int("ParentIndex", -1)
            .finish();
        let bytes = PropertyWriter::new(&mut names)
            .vector("Offset", [1.0, 2.0, 3.0])
            .struct_array("Nodes", "BoneNode", &[node.clone(), node])
            .int_array("Indices", &[4, 5, 6])
            .finish();
        let list = PropertyList::parse(&mut ByteReader::new(&bytes), ctx(&names)).unwrap();
        assert_eq!(
            list.get("Offset").and_then(PropertyValue::as_native),
            Some(&NativeStruct::Vector([1.0, 2.0, 3.0]))
        );
        let nodes = list.get("Nodes").and_then(PropertyValue::as_array).unwrap();
        assert_eq!(nodes.len(), 2);
        let first = nodes[0].as_properties().unwrap();
        assert_eq!(first.get("ParentIndex").and_then(PropertyValue::as_i64), Some(-1));
        let indices = list.get("Indices").and_then(PropertyValue::as_array).unwrap();
        assert_eq!(indices, &[PropertyValue::Int(4), PropertyValue::Int(5), PropertyValue::Int(6)]);
        assert_eq!(list.to_bytes(), bytes);
    }

    #[test]
    fn test_set_reencodes_only_that_property() {
        let mut names = name_table(&["None"]);
        let bytes = PropertyWriter::new(&mut names)
            .string("Label", "a")
            .int("Count", 1)
            .finish();
        let mut list = PropertyList::parse(&mut ByteReader::new(&bytes), ctx(&names)).unwrap();
        list.set("Label", PropertyValue::Str(crate::data::FString::new("longer label")))
            .unwrap();
        let label = list.property("Label").unwrap();
        assert!(label.is_modified());
        // 4-byte length + 12 chars + NUL
        assert_eq!(label.tag().size, 17);
        assert!(!list.property("Count").unwrap().is_modified());
        let out = list.to_bytes();
        let again = PropertyList::parse(&mut ByteReader::new(&out), ctx(&names)).unwrap();
        assert_eq!(again.get("Label").and_then(PropertyValue::as_str), Some("longer label"));
        assert_eq!(again.get("Count").and_then(PropertyValue::as_i64), Some(1));
    }

    #[test]
    fn test_set_with_mismatched_type_is_ambiguous() {
        let mut names = name_table(&["None"]);
        let bytes = PropertyWriter::new(&mut names).int("Count", 1).finish();
        let mut list = PropertyList::parse(&mut ByteReader::new(&bytes), ctx(&names)).unwrap();
        let err = list.set("Count", PropertyValue::Float(2.0)).unwrap_err();
        assert!(matches!(
            err.current_context(),
            AssetError::AmbiguousPropertySize { .. }
        ));
        assert_eq!(list.to_bytes(), bytes);
    }

    #[test]
    fn test_insert_needs_type_information() {
        let mut names = name_table(&["None"]);
        let mut list = PropertyList::new(&mut names, EngineVersion::UE4_27);
        list.insert(&mut names, "NumFrames", PropertyValue::Int(30)).unwrap();
        assert_eq!(list.property("NumFrames").unwrap().tag().size, 4);
        let mode = names.intern("EMode::A");
        let err = list
            .insert(&mut names, "Mode", PropertyValue::Enum(mode))
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            AssetError::AmbiguousPropertySize { .. }
        ));
    }

    #[test]
    fn test_truncated_value_is_fatal() {
        let mut names = name_table(&["None"]);
        let bytes = PropertyWriter::new(&mut names).string("Label", "chair").finish();
        // drop the terminator and the last bytes of the string
        let cut = &bytes[..bytes.len() - 10];
        let err = PropertyList::parse(&mut ByteReader::new(cut), ctx(&names)).unwrap_err();
        assert!(matches!(err.current_context(), AssetError::TruncatedInput { .. }));
    }
}
