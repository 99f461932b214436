//! Property tags: the self-describing header in front of each value.

use std::fmt;

use crate::data::{ByteReader, ByteWriter};
use crate::error::AssetResult;
use crate::package::names::{FName, NameTable};
use crate::recognized::Recognized;

/// Property types with a typed decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyType {
    Bool,
    Int8,
    Int16,
    Int,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    Str,
    Name,
    Byte,
    Enum,
    Object,
    Class,
    WeakObject,
    Interface,
    SoftObject,
    SoftClass,
    Struct,
    Array,
    Set,
    Map,
    Text,
}

impl PropertyType {
    const ALL: [(PropertyType, &'static str); 25] = [
        (PropertyType::Bool, "BoolProperty"),
        (PropertyType::Int8, "Int8Property"),
        (PropertyType::Int16, "Int16Property"),
        (PropertyType::Int, "IntProperty"),
        (PropertyType::Int64, "Int64Property"),
        (PropertyType::UInt16, "UInt16Property"),
        (PropertyType::UInt32, "UInt32Property"),
        (PropertyType::UInt64, "UInt64Property"),
        (PropertyType::Float, "FloatProperty"),
        (PropertyType::Double, "DoubleProperty"),
        (PropertyType::Str, "StrProperty"),
        (PropertyType::Name, "NameProperty"),
        (PropertyType::Byte, "ByteProperty"),
        (PropertyType::Enum, "EnumProperty"),
        (PropertyType::Object, "ObjectProperty"),
        (PropertyType::Class, "ClassProperty"),
        (PropertyType::WeakObject, "WeakObjectProperty"),
        (PropertyType::Interface, "InterfaceProperty"),
        (PropertyType::SoftObject, "SoftObjectProperty"),
        (PropertyType::SoftClass, "SoftClassProperty"),
        (PropertyType::Struct, "StructProperty"),
        (PropertyType::Array, "ArrayProperty"),
        (PropertyType::Set, "SetProperty"),
        (PropertyType::Map, "MapProperty"),
        (PropertyType::Text, "TextProperty"),
    ];

    pub fn from_type_name(name: &str) -> Recognized<Self> {
        Self::ALL
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(t, _)| Recognized::Known(*t))
            .unwrap_or_else(|| Recognized::Unknown(name.to_string()))
    }

    pub fn type_name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, n)| *n)
            .unwrap_or("None")
    }

    /// Object references, stored as a package index.
    pub fn is_object_ref(self) -> bool {
        matches!(
            self,
            PropertyType::Object
                | PropertyType::Class
                | PropertyType::WeakObject
                | PropertyType::Interface
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Type-specific part of a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagData {
    None,
    Struct { struct_name: FName, struct_guid: [u8; 16] },
    /// Bool values live in the tag itself.
    Bool(bool),
    /// Enum name of a byte or enum property; `None` for plain bytes.
    Enum(FName),
    /// Element type of an array or set.
    Container(FName),
    Map { key_type: FName, value_type: FName },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyTag {
    pub name: FName,
    pub type_name: FName,
    /// Byte length of the value that follows the tag.
    pub size: i32,
    pub array_index: i32,
    pub data: TagData,
    pub property_guid: Option<[u8; 16]>,
}

impl PropertyTag {
    /// Read the rest of a tag whose name has already been read.
    pub fn parse_after_name(
        name: FName,
        reader: &mut ByteReader<'_>,
        names: &NameTable,
    ) -> AssetResult<Self> {
        let type_name = names.read_fname(reader)?;
        let size = reader.read_i32()?;
        let array_index = reader.read_i32()?;
        let data = match PropertyType::from_type_name(type_name.text()) {
            Recognized::Known(PropertyType::Struct) => TagData::Struct {
                struct_name: names.read_fname(reader)?,
                struct_guid: reader.read_guid()?,
            },
            Recognized::Known(PropertyType::Bool) => TagData::Bool(reader.read_bool8()?),
            Recognized::Known(PropertyType::Byte | PropertyType::Enum) => {
                TagData::Enum(names.read_fname(reader)?)
            }
            Recognized::Known(PropertyType::Array | PropertyType::Set) => {
                TagData::Container(names.read_fname(reader)?)
            }
            Recognized::Known(PropertyType::Map) => TagData::Map {
                key_type: names.read_fname(reader)?,
                value_type: names.read_fname(reader)?,
            },
            _ => TagData::None,
        };
        let property_guid = if reader.read_bool8()? {
            Some(reader.read_guid()?)
        } else {
            None
        };
        Ok(Self {
            name,
            type_name,
            size,
            array_index,
            data,
            property_guid,
        })
    }

    pub fn parse(reader: &mut ByteReader<'_>, names: &NameTable) -> AssetResult<Self> {
        let name = names.read_fname(reader)?;
        Self::parse_after_name(name, reader, names)
    }

    pub fn write(&self, w: &mut ByteWriter) {
        self.name.write(w);
        self.type_name.write(w);
        w.write_i32(self.size);
        w.write_i32(self.array_index);
        match &self.data {
            TagData::None => {}
            TagData::Struct {
                struct_name,
                struct_guid,
            } => {
                struct_name.write(w);
                w.write_guid(struct_guid);
            }
            TagData::Bool(v) => w.write_bool8(*v),
            TagData::Enum(n) | TagData::Container(n) => n.write(w),
            TagData::Map {
                key_type,
                value_type,
            } => {
                key_type.write(w);
                value_type.write(w);
            }
        }
        match &self.property_guid {
            Some(guid) => {
                w.write_bool8(true);
                w.write_guid(guid);
            }
            None => w.write_bool8(false),
        }
    }

    pub fn kind(&self) -> Recognized<PropertyType> {
        PropertyType::from_type_name(self.type_name.text())
    }

    /// Struct name for struct properties.
    pub fn struct_name(&self) -> Option<&FName> {
        match &self.data {
            TagData::Struct { struct_name, .. } => Some(struct_name),
            _ => None,
        }
    }

    pub fn enum_name(&self) -> Option<&FName> {
        match &self.data {
            TagData::Enum(n) => Some(n),
            _ => None,
        }
    }

    /// Element type of arrays and sets.
    pub fn inner_type(&self) -> Option<Recognized<PropertyType>> {
        match &self.data {
            TagData::Container(n) => Some(PropertyType::from_type_name(n.text())),
            _ => None,
        }
    }

    pub fn map_types(&self) -> Option<(Recognized<PropertyType>, Recognized<PropertyType>)> {
        match &self.data {
            TagData::Map {
                key_type,
                value_type,
            } => Some((
                PropertyType::from_type_name(key_type.text()),
                PropertyType::from_type_name(value_type.text()),
            )),
            _ => None,
        }
    }
}
