use image::{ImageBuffer, Rgba};

use super::source::SourceImage;
use crate::error::ScanError;
use crate::geometry::PixelRect;
use crate::log;

/// Decodes the whole image (`rect == None`) or one rectangle of it.
///
/// The rectangle is intersected with the image bounds first; a rectangle
/// with no area left is rejected before any pixel data is read. The crop
/// happens on the decoded image before RGBA conversion, so only the
/// requested region is converted.
pub fn decode_region(
    source: &SourceImage,
    rect: Option<PixelRect>,
) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>, ScanError> {
    let rect = rect
        .map(|r| r.clamp_to(source.size).ok_or(ScanError::EmptyRegion))
        .transpose()?;

    let img = image::open(&source.path).map_err(|e| ScanError::Decode {
        path: source.path.clone(),
        source: e,
    })?;

    let bitmap = match rect {
        Some(r) => {
            log(&format!(
                "Decoding region x={} y={} w={} h={} of {}",
                r.x,
                r.y,
                r.width,
                r.height,
                source.path.display()
            ));
            img.crop_imm(r.x, r.y, r.width, r.height).to_rgba8()
        }
        None => img.to_rgba8(),
    };

    Ok(bitmap)
}
