//! Decoded property values and their typed encoders.

use crate::data::{ByteReader, ByteWriter, FString};
use crate::error::{AssetResult, ambiguous_size, malformed};
use crate::package::names::{FName, NameTable};
use crate::package::tables::PackageIndex;
use crate::property::PropertyList;
use crate::property::native::NativeStruct;
use crate::property::tag::{PropertyTag, PropertyType, TagData};
use crate::recognized::Recognized;
use crate::version::EngineVersion;

/// What a typed decoder needs besides the bytes.
#[derive(Debug, Clone, Copy)]
pub struct PropertyContext<'a> {
    pub names: &'a NameTable,
    pub version: EngineVersion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Str(FString),
    Name(FName),
    Byte(u8),
    Enum(FName),
    Object(PackageIndex),
    SoftObject { asset_path: FName, sub_path: FString },
    Struct(StructValue),
    Array(ArrayValue),
    Set(SetValue),
    Map(MapValue),
    /// Bytes kept verbatim: text properties, unknown types, and values whose
    /// typed decode failed.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructValue {
    Native(NativeStruct),
    Properties(PropertyList),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    /// Element tag carried by struct arrays.
    pub inner_tag: Option<PropertyTag>,
    pub elements: Vec<PropertyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetValue {
    pub removed: Vec<PropertyValue>,
    pub elements: Vec<PropertyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapValue {
    pub removed: Vec<PropertyValue>,
    pub entries: Vec<(PropertyValue, PropertyValue)>,
}

impl PropertyValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int8(_) => "int8",
            PropertyValue::Int16(_) => "int16",
            PropertyValue::Int(_) => "int",
            PropertyValue::Int64(_) => "int64",
            PropertyValue::UInt16(_) => "uint16",
            PropertyValue::UInt32(_) => "uint32",
            PropertyValue::UInt64(_) => "uint64",
            PropertyValue::Float(_) => "float",
            PropertyValue::Double(_) => "double",
            PropertyValue::Str(_) => "string",
            PropertyValue::Name(_) => "name",
            PropertyValue::Byte(_) => "byte",
            PropertyValue::Enum(_) => "enum",
            PropertyValue::Object(_) => "object",
            PropertyValue::SoftObject { .. } => "soft object",
            PropertyValue::Struct(_) => "struct",
            PropertyValue::Array(_) => "array",
            PropertyValue::Set(_) => "set",
            PropertyValue::Map(_) => "map",
            PropertyValue::Raw(_) => "raw",
        }
    }

    /// Any integer variant widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int8(v) => Some(*v as i64),
            PropertyValue::Int16(v) => Some(*v as i64),
            PropertyValue::Int(v) => Some(*v as i64),
            PropertyValue::Int64(v) => Some(*v),
            PropertyValue::UInt16(v) => Some(*v as i64),
            PropertyValue::UInt32(v) => Some(*v as i64),
            PropertyValue::UInt64(v) => Some(*v as i64),
            PropertyValue::Byte(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v as f64),
            PropertyValue::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Name and enum values.
    pub fn as_name(&self) -> Option<&FName> {
        match self {
            PropertyValue::Name(n) | PropertyValue::Enum(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<PackageIndex> {
        match self {
            PropertyValue::Object(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeStruct> {
        match self {
            PropertyValue::Struct(StructValue::Native(n)) => Some(n),
            _ => None,
        }
    }

    /// Nested property list of a non-native struct.
    pub fn as_properties(&self) -> Option<&PropertyList> {
        match self {
            PropertyValue::Struct(StructValue::Properties(p)) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::Array(a) => Some(&a.elements),
            _ => None,
        }
    }
}

fn read_struct(
    r: &mut ByteReader<'_>,
    ctx: PropertyContext<'_>,
    struct_name: &str,
) -> AssetResult<PropertyValue> {
    let value = match NativeStruct::read(r, struct_name, ctx.version)? {
        Some(native) => StructValue::Native(native),
        None => StructValue::Properties(PropertyList::parse(r, ctx)?),
    };
    Ok(PropertyValue::Struct(value))
}

/// Decode one element of a container, or a scalar property value.
pub(crate) fn read_element(
    r: &mut ByteReader<'_>,
    ctx: PropertyContext<'_>,
    ty: &Recognized<PropertyType>,
    struct_name: Option<&str>,
) -> AssetResult<PropertyValue> {
    let Recognized::Known(ty) = ty else {
        return Err(malformed(r.position(), format!("no element decoder for `{ty}`")));
    };
    let value = match ty {
        PropertyType::Bool => PropertyValue::Bool(r.read_bool8()?),
        PropertyType::Int8 => PropertyValue::Int8(r.read_i8()?),
        PropertyType::Int16 => PropertyValue::Int16(r.read_i16()?),
        PropertyType::Int => PropertyValue::Int(r.read_i32()?),
        PropertyType::Int64 => PropertyValue::Int64(r.read_i64()?),
        PropertyType::UInt16 => PropertyValue::UInt16(r.read_u16()?),
        PropertyType::UInt32 => PropertyValue::UInt32(r.read_u32()?),
        PropertyType::UInt64 => PropertyValue::UInt64(r.read_u64()?),
        PropertyType::Float => PropertyValue::Float(r.read_f32()?),
        PropertyType::Double => PropertyValue::Double(r.read_f64()?),
        PropertyType::Str => PropertyValue::Str(r.read_fstring()?),
        PropertyType::Name => PropertyValue::Name(ctx.names.read_fname(r)?),
        PropertyType::Byte => PropertyValue::Byte(r.read_u8()?),
        PropertyType::Enum => PropertyValue::Enum(ctx.names.read_fname(r)?),
        PropertyType::Object
        | PropertyType::Class
        | PropertyType::WeakObject
        | PropertyType::Interface => PropertyValue::Object(PackageIndex::read(r)?),
        PropertyType::SoftObject | PropertyType::SoftClass => PropertyValue::SoftObject {
            asset_path: ctx.names.read_fname(r)?,
            sub_path: r.read_fstring()?,
        },
        PropertyType::Struct => {
            let name = struct_name.ok_or_else(|| {
                malformed(r.position(), "struct element without a struct name")
            })?;
            read_struct(r, ctx, name)?
        }
        PropertyType::Array | PropertyType::Set | PropertyType::Map | PropertyType::Text => {
            return Err(malformed(
                r.position(),
                format!("`{ty}` cannot be decoded as a bare element"),
            ));
        }
    };
    Ok(value)
}

/// Decode the value bytes that follow `tag`.
pub(crate) fn read_value(
    r: &mut ByteReader<'_>,
    ctx: PropertyContext<'_>,
    tag: &PropertyTag,
) -> AssetResult<PropertyValue> {
    let kind = tag.kind();
    match kind {
        Recognized::Known(PropertyType::Bool) => match tag.data {
            TagData::Bool(v) => Ok(PropertyValue::Bool(v)),
            _ => Err(malformed(r.position(), "bool tag without a value")),
        },
        Recognized::Known(PropertyType::Byte) => {
            if tag.size == 1 {
                Ok(PropertyValue::Byte(r.read_u8()?))
            } else {
                Ok(PropertyValue::Enum(ctx.names.read_fname(r)?))
            }
        }
        Recognized::Known(PropertyType::Struct) => {
            let name = tag.struct_name().map(|n| n.text().to_string());
            read_element(r, ctx, &kind, name.as_deref())
        }
        Recognized::Known(PropertyType::Array) => {
            let inner = tag
                .inner_type()
                .ok_or_else(|| malformed(r.position(), "array tag without an element type"))?;
            let count = r.read_count(1)?;
            if inner.is(&PropertyType::Struct) {
                let inner_tag = PropertyTag::parse(r, ctx.names)?;
                let name = inner_tag
                    .struct_name()
                    .map(|n| n.text().to_string())
                    .ok_or_else(|| malformed(r.position(), "struct array element tag is not a struct"))?;
                let elements = r.read_vec(count, |r| read_struct(r, ctx, &name))?;
                Ok(PropertyValue::Array(ArrayValue {
                    inner_tag: Some(inner_tag),
                    elements,
                }))
            } else {
                let elements = r.read_vec(count, |r| read_element(r, ctx, &inner, None))?;
                Ok(PropertyValue::Array(ArrayValue {
                    inner_tag: None,
                    elements,
                }))
            }
        }
        Recognized::Known(PropertyType::Set) => {
            let inner = tag
                .inner_type()
                .ok_or_else(|| malformed(r.position(), "set tag without an element type"))?;
            let removed = r.read_counted(1, |r| read_element(r, ctx, &inner, None))?;
            let elements = r.read_counted(1, |r| read_element(r, ctx, &inner, None))?;
            Ok(PropertyValue::Set(SetValue { removed, elements }))
        }
        Recognized::Known(PropertyType::Map) => {
            let (key, value) = tag
                .map_types()
                .ok_or_else(|| malformed(r.position(), "map tag without key and value types"))?;
            let removed = r.read_counted(1, |r| read_element(r, ctx, &key, None))?;
            let entries = r.read_counted(2, |r| {
                Ok((
                    read_element(r, ctx, &key, None)?,
                    read_element(r, ctx, &value, None)?,
                ))
            })?;
            Ok(PropertyValue::Map(MapValue { removed, entries }))
        }
        Recognized::Known(PropertyType::Text) | Recognized::Unknown(_) => {
            Ok(PropertyValue::Raw(r.rest().to_vec()))
        }
        Recognized::Known(_) => read_element(r, ctx, &kind, None),
    }
}

fn write_struct(
    w: &mut ByteWriter,
    value: &StructValue,
    expected: Option<&str>,
    version: EngineVersion,
    property: &str,
) -> AssetResult<()> {
    match value {
        StructValue::Native(native) => {
            if let Some(expected) = expected {
                if expected != native.struct_name() {
                    return Err(ambiguous_size(
                        property,
                        format!("`{}` written into a `{expected}` slot", native.struct_name()),
                    ));
                }
            }
            native.write(w, version);
        }
        StructValue::Properties(list) => list.write(w),
    }
    Ok(())
}

pub(crate) fn write_element(
    w: &mut ByteWriter,
    ty: &Recognized<PropertyType>,
    value: &PropertyValue,
    struct_name: Option<&str>,
    version: EngineVersion,
    property: &str,
) -> AssetResult<()> {
    use PropertyType as T;
    use PropertyValue as V;

    let Recognized::Known(ty) = ty else {
        return match value {
            V::Raw(bytes) => {
                w.write_bytes(bytes);
                Ok(())
            }
            _ => Err(ambiguous_size(property, format!("no encoder for `{ty}`"))),
        };
    };
    match (ty, value) {
        (T::Bool, V::Bool(v)) => w.write_bool8(*v),
        (T::Int8, V::Int8(v)) => w.write_i8(*v),
        (T::Int16, V::Int16(v)) => w.write_i16(*v),
        (T::Int, V::Int(v)) => w.write_i32(*v),
        (T::Int64, V::Int64(v)) => w.write_i64(*v),
        (T::UInt16, V::UInt16(v)) => w.write_u16(*v),
        (T::UInt32, V::UInt32(v)) => w.write_u32(*v),
        (T::UInt64, V::UInt64(v)) => w.write_u64(*v),
        (T::Float, V::Float(v)) => w.write_f32(*v),
        (T::Double, V::Double(v)) => w.write_f64(*v),
        (T::Str, V::Str(s)) => w.write_fstring(s),
        (T::Name, V::Name(n)) => n.write(w),
        (T::Byte, V::Byte(b)) => w.write_u8(*b),
        (T::Byte | T::Enum, V::Enum(n)) => n.write(w),
        (T::Object | T::Class | T::WeakObject | T::Interface, V::Object(i)) => i.write(w),
        (
            T::SoftObject | T::SoftClass,
            V::SoftObject {
                asset_path,
                sub_path,
            },
        ) => {
            asset_path.write(w);
            w.write_fstring(sub_path);
        }
        (T::Struct, V::Struct(s)) => write_struct(w, s, struct_name, version, property)?,
        (_, V::Raw(bytes)) => w.write_bytes(bytes),
        (ty, value) => {
            return Err(ambiguous_size(
                property,
                format!("{} value cannot be encoded as `{ty}`", value.kind_name()),
            ));
        }
    }
    Ok(())
}

/// Encode `value` against `tag`. The caller sets `tag.size` from the
/// number of bytes written.
pub(crate) fn write_value(
    w: &mut ByteWriter,
    tag: &PropertyTag,
    value: &PropertyValue,
    version: EngineVersion,
) -> AssetResult<()> {
    let property = tag.name.to_string();
    let kind = tag.kind();
    match (&kind, value) {
        (_, PropertyValue::Raw(bytes)) => w.write_bytes(bytes),
        (Recognized::Known(PropertyType::Bool), PropertyValue::Bool(_)) => {}
        (Recognized::Known(PropertyType::Struct), _) => {
            let name = tag.struct_name().map(|n| n.text().to_string());
            write_element(w, &kind, value, name.as_deref(), version, &property)?;
        }
        (Recognized::Known(PropertyType::Array), PropertyValue::Array(array)) => {
            let inner = tag.inner_type().ok_or_else(|| {
                ambiguous_size(&property, "array tag has no element type")
            })?;
            w.write_count(array.elements.len());
            if inner.is(&PropertyType::Struct) {
                let Some(inner_tag) = &array.inner_tag else {
                    return Err(ambiguous_size(&property, "struct array has no element tag"));
                };
                let name = inner_tag.struct_name().map(|n| n.text().to_string());
                let mut body = ByteWriter::new();
                for element in &array.elements {
                    write_element(&mut body, &inner, element, name.as_deref(), version, &property)?;
                }
                let mut inner_tag = inner_tag.clone();
                inner_tag.size = body.position() as i32;
                inner_tag.write(w);
                w.write_bytes(body.as_slice());
            } else {
                for element in &array.elements {
                    write_element(w, &inner, element, None, version, &property)?;
                }
            }
        }
        (Recognized::Known(PropertyType::Set), PropertyValue::Set(set)) => {
            let inner = tag
                .inner_type()
                .ok_or_else(|| ambiguous_size(&property, "set tag has no element type"))?;
            for list in [&set.removed, &set.elements] {
                w.write_count(list.len());
                for element in list {
                    write_element(w, &inner, element, None, version, &property)?;
                }
            }
        }
        (Recognized::Known(PropertyType::Map), PropertyValue::Map(map)) => {
            let (key, val) = tag
                .map_types()
                .ok_or_else(|| ambiguous_size(&property, "map tag has no key type"))?;
            w.write_count(map.removed.len());
            for k in &map.removed {
                write_element(w, &key, k, None, version, &property)?;
            }
            w.write_count(map.entries.len());
            for (k, v) in &map.entries {
                write_element(w, &key, k, None, version, &property)?;
                write_element(w, &val, v, None, version, &property)?;
            }
        }
        (
            Recognized::Known(
                PropertyType::Bool | PropertyType::Array | PropertyType::Set | PropertyType::Map,
            ),
            value,
        ) => {
            return Err(ambiguous_size(
                &property,
                format!("{} value cannot be encoded as `{kind}`", value.kind_name()),
            ));
        }
        _ => write_element(w, &kind, value, None, version, &property)?,
    }
    Ok(())
}
