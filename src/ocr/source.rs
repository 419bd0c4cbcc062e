//! Source image probing: path validation, header-only dimensions and the
//! EXIF orientation of a captured photo.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::geometry::{ImageSize, Rotation};
use crate::log;

/// A captured photo on disk. Immutable once probed.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub size: ImageSize,
    /// Clockwise rotation needed to show the stored pixels upright.
    pub orientation: Rotation,
}

impl SourceImage {
    /// Validates `image_path` and reads dimensions and orientation without
    /// decoding pixel data.
    pub fn open(image_path: &str) -> Result<Self, ScanError> {
        let path = resolve_path(image_path)?;

        let (width, height) = image::image_dimensions(&path).map_err(|source| {
            ScanError::Decode {
                path: path.clone(),
                source,
            }
        })?;
        let orientation = read_orientation(&path);

        log(&format!(
            "Source {}: {}x{}, rotation {}",
            path.display(),
            width,
            height,
            orientation.degrees()
        ));

        Ok(Self {
            path,
            size: ImageSize::new(width, height),
            orientation,
        })
    }
}

/// Turns a caller-supplied path (optionally a `file://` URI) into an
/// existing file path.
pub fn resolve_path(image_path: &str) -> Result<PathBuf, ScanError> {
    let trimmed = image_path.trim();
    if trimmed.is_empty() {
        return Err(ScanError::InvalidPath(
            "Image path cannot be empty".to_string(),
        ));
    }

    let path = PathBuf::from(trimmed.strip_prefix("file://").unwrap_or(trimmed));
    if !path.is_file() {
        return Err(ScanError::FileNotFound(path));
    }
    Ok(path)
}

/// Reads the EXIF Orientation tag. Anything unreadable counts as upright.
fn read_orientation(path: &Path) -> Rotation {
    let Ok(file) = File::open(path) else {
        return Rotation::Deg0;
    };
    let mut reader = BufReader::new(file);

    match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .map(Rotation::from_exif)
            .unwrap_or_default(),
        Err(_) => Rotation::Deg0,
    }
}

/// Writes a JPEG whose APP1 segment carries the given EXIF Orientation.
#[cfg(test)]
pub(crate) fn write_oriented_jpeg(path: &Path, width: u32, height: u32, orientation: u16) {
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut jpeg = Cursor::new(Vec::new());
    img.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();
    let jpeg = jpeg.into_inner();

    // Big-endian TIFF with one IFD entry: Orientation, SHORT, count 1
    let mut tiff = b"MM\x00\x2a\x00\x00\x00\x08".to_vec();
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x0112u16.to_be_bytes());
    tiff.extend_from_slice(&3u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&orientation.to_be_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_be_bytes());

    let mut app1 = vec![0xff, 0xe1];
    app1.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    app1.extend_from_slice(b"Exif\x00\x00");
    app1.extend_from_slice(&tiff);

    // APP1 goes right after SOI
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&app1);
    out.extend_from_slice(&jpeg[2..]);
    std::fs::write(path, out).unwrap();
}
