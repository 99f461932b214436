//! Texture mip chains <-> [`TextureData`]. Pixel blocks pass through
//! untouched; converting them is left to the host.

use tracing::debug;

use crate::data::FString;
use crate::error::{AssetResult, malformed};
use crate::model::{MipData, TextureData};
use crate::objects::texture::{Mip, MipStorage, Texture};
use crate::package::names::NameTable;
use crate::property::PropertyValue;
use crate::version::EngineVersion;

pub fn texture_data(texture: &Texture) -> AssetResult<TextureData> {
    let Some(platform) = texture.primary() else {
        return Err(malformed(0, "texture has no platform data"));
    };
    let srgb = texture
        .header
        .properties
        .get("SRGB")
        .and_then(PropertyValue::as_bool)
        .unwrap_or(true);
    Ok(TextureData {
        pixel_format: platform.pixel_format.as_str().to_string(),
        width: platform.size_x,
        height: platform.size_y,
        cubemap: platform.is_cubemap(),
        slices: platform.num_slices(),
        srgb,
        mips: platform
            .mips
            .iter()
            .filter(|m| m.storage() != MipStorage::Empty)
            .map(|m| MipData {
                width: m.size_x,
                height: m.size_y,
                data: m.data.clone(),
            })
            .collect(),
    })
}

/// Replace the primary platform's mips with `data`.
///
/// The smallest mips are stored inline, as many as the texture stored
/// inline before; the rest go to the `.ubulk` if the texture had one.
pub fn apply_texture(
    texture: &mut Texture,
    names: &mut NameTable,
    data: &TextureData,
    version: EngineVersion,
) -> AssetResult<()> {
    if data.mips.is_empty() {
        return Err(malformed(0, "texture needs at least one mip"));
    }
    if let Some(i) = data.mips.iter().position(|m| m.data.is_empty()) {
        return Err(malformed(0, format!("mip {i} has no data")));
    }
    let has_bulk = texture.has_bulk_mips();
    let Some(platform) = texture.primary_mut() else {
        return Err(malformed(0, "texture has no platform data"));
    };
    let inline = if has_bulk { platform.inline_tail() } else { data.mips.len() };
    let first_inline = data.mips.len().saturating_sub(inline);
    platform.mips = data
        .mips
        .iter()
        .enumerate()
        .map(|(i, mip)| {
            let storage = if i >= first_inline { MipStorage::Inline } else { MipStorage::Bulk };
            Mip::new(mip.data.clone(), mip.width, mip.height, storage, version)
        })
        .collect();
    platform.size_x = data.width;
    platform.size_y = data.height;
    platform.first_mip = 0;
    if platform.pixel_format.as_str() != data.pixel_format {
        platform.pixel_format = FString::new(&data.pixel_format);
        platform.format_name = names.intern(&data.pixel_format);
    }
    platform.set_layout(data.slices, data.cubemap);
    debug!(
        mips = platform.mips.len(),
        inline = data.mips.len() - first_inline,
        format = %data.pixel_format,
        "applied texture mips"
    );
    Ok(())
}
