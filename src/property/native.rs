//! Structs serialized in their native binary form instead of as a nested
//! property list.
//!
//! From 5.0 the vector-like structs store doubles; the width is chosen by
//! the engine version on both read and write.

use crate::data::{ByteReader, ByteWriter};
use crate::error::AssetResult;
use crate::version::EngineVersion;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NativeStruct {
    Vector([f64; 3]),
    Vector2D([f64; 2]),
    Vector4([f64; 4]),
    /// Pitch, yaw, roll in degrees.
    Rotator([f64; 3]),
    Quat([f64; 4]),
    /// B, G, R, A byte order as stored.
    Color([u8; 4]),
    LinearColor([f32; 4]),
    Guid([u8; 16]),
    IntPoint([i32; 2]),
    Box {
        min: [f64; 3],
        max: [f64; 3],
        valid: bool,
    },
    BoxSphereBounds {
        origin: [f64; 3],
        extent: [f64; 3],
        radius: f64,
    },
    PerPlatformFloat {
        cooked: bool,
        value: f32,
    },
    PerPlatformInt {
        cooked: bool,
        value: i32,
    },
    FrameNumber(i32),
}

struct Floats {
    wide: bool,
}

impl Floats {
    fn read<const N: usize>(&self, r: &mut ByteReader<'_>) -> AssetResult<[f64; N]> {
        let mut out = [0f64; N];
        for v in out.iter_mut() {
            *v = if self.wide {
                r.read_f64()?
            } else {
                r.read_f32()? as f64
            };
        }
        Ok(out)
    }

    fn read_one(&self, r: &mut ByteReader<'_>) -> AssetResult<f64> {
        Ok(self.read::<1>(r)?[0])
    }

    fn write(&self, w: &mut ByteWriter, values: &[f64]) {
        for v in values {
            if self.wide {
                w.write_f64(*v);
            } else {
                w.write_f32(*v as f32);
            }
        }
    }
}

impl NativeStruct {
    /// Whether `struct_name` has a native layout.
    pub fn is_native(struct_name: &str) -> bool {
        matches!(
            struct_name,
            "Vector"
                | "Vector2D"
                | "Vector4"
                | "Rotator"
                | "Quat"
                | "Color"
                | "LinearColor"
                | "Guid"
                | "IntPoint"
                | "Box"
                | "BoxSphereBounds"
                | "PerPlatformFloat"
                | "PerPlatformInt"
                | "FrameNumber"
        )
    }

    /// Decode a native struct, or `None` when `struct_name` is not native.
    pub fn read(
        r: &mut ByteReader<'_>,
        struct_name: &str,
        version: EngineVersion,
    ) -> AssetResult<Option<Self>> {
        let f = Floats {
            wide: version.is_ue5(),
        };
        let value = match struct_name {
            "Vector" => NativeStruct::Vector(f.read(r)?),
            "Vector2D" => NativeStruct::Vector2D(f.read(r)?),
            "Vector4" => NativeStruct::Vector4(f.read(r)?),
            "Rotator" => NativeStruct::Rotator(f.read(r)?),
            "Quat" => NativeStruct::Quat(f.read(r)?),
            "Color" => NativeStruct::Color(r.read_array::<4>()?),
            "LinearColor" => NativeStruct::LinearColor(r.read_f32_array::<4>()?),
            "Guid" => NativeStruct::Guid(r.read_guid()?),
            "IntPoint" => NativeStruct::IntPoint([r.read_i32()?, r.read_i32()?]),
            "Box" => NativeStruct::Box {
                min: f.read(r)?,
                max: f.read(r)?,
                valid: r.read_bool8()?,
            },
            "BoxSphereBounds" => NativeStruct::BoxSphereBounds {
                origin: f.read(r)?,
                extent: f.read(r)?,
                radius: f.read_one(r)?,
            },
            "PerPlatformFloat" => NativeStruct::PerPlatformFloat {
                cooked: r.read_bool32()?,
                value: r.read_f32()?,
            },
            "PerPlatformInt" => NativeStruct::PerPlatformInt {
                cooked: r.read_bool32()?,
                value: r.read_i32()?,
            },
            "FrameNumber" => NativeStruct::FrameNumber(r.read_i32()?),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    pub fn struct_name(&self) -> &'static str {
        match self {
            NativeStruct::Vector(_) => "Vector",
            NativeStruct::Vector2D(_) => "Vector2D",
            NativeStruct::Vector4(_) => "Vector4",
            NativeStruct::Rotator(_) => "Rotator",
            NativeStruct::Quat(_) => "Quat",
            NativeStruct::Color(_) => "Color",
            NativeStruct::LinearColor(_) => "LinearColor",
            NativeStruct::Guid(_) => "Guid",
            NativeStruct::IntPoint(_) => "IntPoint",
            NativeStruct::Box { .. } => "Box",
            NativeStruct::BoxSphereBounds { .. } => "BoxSphereBounds",
            NativeStruct::PerPlatformFloat { .. } => "PerPlatformFloat",
            NativeStruct::PerPlatformInt { .. } => "PerPlatformInt",
            NativeStruct::FrameNumber(_) => "FrameNumber",
        }
    }

    pub fn write(&self, w: &mut ByteWriter, version: EngineVersion) {
        let f = Floats {
            wide: version.is_ue5(),
        };
        match self {
            NativeStruct::Vector(v) | NativeStruct::Rotator(v) => f.write(w, v),
            NativeStruct::Vector2D(v) => f.write(w, v),
            NativeStruct::Vector4(v) | NativeStruct::Quat(v) => f.write(w, v),
            NativeStruct::Color(c) => w.write_bytes(c),
            NativeStruct::LinearColor(c) => w.write_f32_slice(c),
            NativeStruct::Guid(g) => w.write_guid(g),
            NativeStruct::IntPoint(p) => {
                w.write_i32(p[0]);
                w.write_i32(p[1]);
            }
            NativeStruct::Box { min, max, valid } => {
                f.write(w, min);
                f.write(w, max);
                w.write_bool8(*valid);
            }
            NativeStruct::BoxSphereBounds {
                origin,
                extent,
                radius,
            } => {
                f.write(w, origin);
                f.write(w, extent);
                f.write(w, &[*radius]);
            }
            NativeStruct::PerPlatformFloat { cooked, value } => {
                w.write_bool32(*cooked);
                w.write_f32(*value);
            }
            NativeStruct::PerPlatformInt { cooked, value } => {
                w.write_bool32(*cooked);
                w.write_i32(*value);
            }
            NativeStruct::FrameNumber(n) => w.write_i32(*n),
        }
    }
}
