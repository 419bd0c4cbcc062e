//! Coordinate conversion utilities.
//!
//! Three coordinate systems meet here:
//! - view fractions (0.0-1.0 of the container the photo is drawn in),
//! - image fractions (0.0-1.0 of the photo itself),
//! - source-image pixels.
//!
//! The photo is drawn with "contain" scaling, so the view and image
//! fractions only coincide when the aspect ratios match. Every fractional
//! rectangle carries a [`ReferenceFrame`] tag and the mappers refuse a
//! rectangle tagged with the wrong frame.

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Which frame a fractional rectangle is relative to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceFrame {
    /// Fractions of the source image.
    Image,
    /// Fractions of the view container that renders the image.
    View,
}

/// Size of a view container, in (possibly fractional) screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Intrinsic dimensions of a source image, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

/// Clockwise rotation needed to display a stored image upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Maps the EXIF Orientation tag onto a rotation.
    /// Mirrored orientations (2, 4, 5, 7) are treated as upright.
    pub fn from_exif(orientation: u32) -> Self {
        match orientation {
            6 => Self::Deg90,
            3 => Self::Deg180,
            8 => Self::Deg270,
            _ => Self::Deg0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Dimensions of a stored image once this rotation is applied.
    pub fn upright_size(&self, stored: ImageSize) -> ImageSize {
        match self {
            Self::Deg90 | Self::Deg270 => ImageSize::new(stored.height, stored.width),
            Self::Deg0 | Self::Deg180 => stored,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(format!("rotation must be 0, 90, 180 or 270, got {}", other)),
        }
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// A rectangle in view pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A rectangle in relative coordinates (0.0 to 1.0) of its reference frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRegion {
    /// X position of top-left corner (0.0 = left edge, 1.0 = right edge)
    pub x: f64,
    /// Y position of top-left corner (0.0 = top edge, 1.0 = bottom edge)
    pub y: f64,
    /// Width as fraction of the frame width
    pub width: f64,
    /// Height as fraction of the frame height
    pub height: f64,
    pub reference_frame: ReferenceFrame,
}

impl NormalizedRegion {
    /// Smallest width/height a crop box may shrink to.
    pub const MIN_EXTENT: f64 = 0.1;

    pub fn new(x: f64, y: f64, width: f64, height: f64, reference_frame: ReferenceFrame) -> Self {
        Self {
            x,
            y,
            width,
            height,
            reference_frame,
        }
    }

    /// The whole frame.
    pub fn full(reference_frame: ReferenceFrame) -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0, reference_frame)
    }

    /// Clamps the region into the unit square.
    ///
    /// Position is clamped to 0.0-1.0, extents to `MIN_EXTENT`-1.0, then the
    /// extents are cut back so the region ends inside the frame. Returns
    /// `None` when the input extents are not positive or the result is
    /// degenerate; callers treat that as "use the full image".
    pub fn clamped(&self) -> Option<Self> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }

        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let mut width = self.width.clamp(Self::MIN_EXTENT, 1.0);
        let mut height = self.height.clamp(Self::MIN_EXTENT, 1.0);

        if x + width > 1.0 {
            width = 1.0 - x;
        }
        if y + height > 1.0 {
            height = 1.0 - y;
        }

        if width <= 0.0 || height <= 0.0 {
            return None;
        }

        Some(Self::new(x, y, width, height, self.reference_frame))
    }

    /// Image-relative region covering a pixel rectangle.
    pub fn from_pixel_rect(rect: &PixelRect, image: ImageSize) -> Self {
        Self::new(
            rect.x as f64 / image.width as f64,
            rect.y as f64 / image.height as f64,
            rect.width as f64 / image.width as f64,
            rect.height as f64 / image.height as f64,
            ReferenceFrame::Image,
        )
    }

    /// Converts an image-relative region to pixels, clamped to image bounds.
    pub fn to_pixel_rect(&self, image: ImageSize) -> Result<PixelRect, ScanError> {
        self.expect_frame(ReferenceFrame::Image)?;

        let (w, h) = (image.width as f64, image.height as f64);
        span_to_pixels(self.x * w, (self.x + self.width) * w, image.width)
            .zip(span_to_pixels(self.y * h, (self.y + self.height) * h, image.height))
            .map(|((x, width), (y, height))| PixelRect::new(x, y, width, height))
            .ok_or(ScanError::EmptyRegion)
    }

    /// Moves the region, keeping it inside the frame (crop box drag).
    pub fn moved_by(&self, dx: f64, dy: f64) -> Self {
        let mut moved = *self;
        moved.x = (self.x + dx).clamp(0.0, (1.0 - self.width).max(0.0));
        moved.y = (self.y + dy).clamp(0.0, (1.0 - self.height).max(0.0));
        moved
    }

    /// Resizes from the bottom-right corner (crop box handle drag).
    pub fn resized_by(&self, dw: f64, dh: f64) -> Self {
        let mut resized = *self;
        resized.width = (self.width + dw).clamp(Self::MIN_EXTENT, (1.0 - self.x).max(Self::MIN_EXTENT));
        resized.height =
            (self.height + dh).clamp(Self::MIN_EXTENT, (1.0 - self.y).max(Self::MIN_EXTENT));
        resized
    }

    fn expect_frame(&self, expected: ReferenceFrame) -> Result<(), ScanError> {
        if self.reference_frame != expected {
            return Err(ScanError::FrameMismatch {
                expected,
                found: self.reference_frame,
            });
        }
        Ok(())
    }
}

/// A rectangle in integer source-image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole image.
    pub fn full(image: ImageSize) -> Self {
        Self::new(0, 0, image.width, image.height)
    }

    /// The centered rectangle covering `fraction` of each dimension.
    ///
    /// Returns `None` when the fraction covers the whole image (>= 1.0) or
    /// the result would be empty.
    pub fn centered(image: ImageSize, fraction: f64) -> Option<Self> {
        if !fraction.is_finite() || fraction >= 1.0 || fraction <= 0.0 {
            return None;
        }
        let width = (image.width as f64 * fraction) as u32;
        let height = (image.height as f64 * fraction) as u32;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::new(
            (image.width - width) / 2,
            (image.height - height) / 2,
            width,
            height,
        ))
    }

    /// Intersects the rectangle with the image bounds.
    pub fn clamp_to(&self, image: ImageSize) -> Option<Self> {
        if self.x >= image.width || self.y >= image.height {
            return None;
        }
        let width = self.width.min(image.width - self.x);
        let height = self.height.min(image.height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, width, height))
    }

    /// Maps a rectangle given in the upright frame (after `rotation` is
    /// applied to a stored image of size `stored`) back into stored pixels.
    pub fn from_upright(&self, rotation: Rotation, stored: ImageSize) -> Self {
        let upright = rotation.upright_size(stored);
        let rect = self.clamp_to(upright).unwrap_or(Self::new(0, 0, 0, 0));
        let (w, h) = (stored.width, stored.height);

        match rotation {
            Rotation::Deg0 => rect,
            Rotation::Deg90 => Self::new(
                rect.y,
                h.saturating_sub(rect.x + rect.width),
                rect.height,
                rect.width,
            ),
            Rotation::Deg180 => Self::new(
                w.saturating_sub(rect.x + rect.width),
                h.saturating_sub(rect.y + rect.height),
                rect.width,
                rect.height,
            ),
            Rotation::Deg270 => Self::new(
                w.saturating_sub(rect.y + rect.height),
                rect.x,
                rect.height,
                rect.width,
            ),
        }
    }
}

/// Computes where an image lands inside a view under "contain" scaling.
///
/// The image keeps its aspect ratio and is centered; the uncovered parts
/// of the view are letterbox bars. Returns `None` for degenerate sizes.
pub fn rendered_image_frame(view: Size, image: ImageSize) -> Option<FrameRect> {
    let image = image.as_size();
    if !view.is_usable() || !image.is_usable() {
        return None;
    }

    let image_ratio = image.width / image.height;
    let view_ratio = view.width / view.height;

    let (width, height) = if image_ratio > view_ratio {
        // Image is wider than the view: fit to width, bars top and bottom
        (view.width, view.width / image_ratio)
    } else {
        // Fit to height, bars left and right
        (view.height * image_ratio, view.height)
    };

    Some(FrameRect {
        x: (view.width - width) / 2.0,
        y: (view.height - height) / 2.0,
        width,
        height,
    })
}

/// Converts a crop box drawn over the view into source-image pixels.
///
/// The box is shifted by the letterbox offset, scaled by
/// `image / rendered frame`, and clamped to the image. A box that ends up
/// with no area (e.g. drawn entirely over a letterbox bar) yields
/// [`ScanError::EmptyRegion`].
pub fn map_view_rect_to_image_pixels(
    view_rect: &NormalizedRegion,
    view: Size,
    image: ImageSize,
) -> Result<PixelRect, ScanError> {
    view_rect.expect_frame(ReferenceFrame::View)?;
    let frame = rendered_image_frame(view, image).ok_or(ScanError::EmptyRegion)?;

    let scale_x = image.width as f64 / frame.width;
    let scale_y = image.height as f64 / frame.height;

    let left = (view_rect.x * view.width - frame.x) * scale_x;
    let top = (view_rect.y * view.height - frame.y) * scale_y;
    let right = left + view_rect.width * view.width * scale_x;
    let bottom = top + view_rect.height * view.height * scale_y;

    span_to_pixels(left, right, image.width)
        .zip(span_to_pixels(top, bottom, image.height))
        .map(|((x, width), (y, height))| PixelRect::new(x, y, width, height))
        .ok_or(ScanError::EmptyRegion)
}

/// Converts an image-relative region into the view-relative region where
/// that part of the image is drawn. Inverse of the letterbox mapping.
pub fn map_image_region_to_view(
    region: &NormalizedRegion,
    view: Size,
    image: ImageSize,
) -> Result<NormalizedRegion, ScanError> {
    region.expect_frame(ReferenceFrame::Image)?;
    let frame = rendered_image_frame(view, image).ok_or(ScanError::EmptyRegion)?;

    Ok(NormalizedRegion::new(
        (frame.x + region.x * frame.width) / view.width,
        (frame.y + region.y * frame.height) / view.height,
        region.width * frame.width / view.width,
        region.height * frame.height / view.height,
        ReferenceFrame::View,
    ))
}

/// Slack for edges that land a rounding error below a pixel boundary.
const PIXEL_EPSILON: f64 = 1e-6;

/// Clamps a `[start, end)` span to `[0, limit]` and floors both edges to
/// pixels. Returns `(offset, length)` or `None` if nothing is left.
fn span_to_pixels(start: f64, end: f64, limit: u32) -> Option<(u32, u32)> {
    let max = limit as f64;
    let start = start.clamp(0.0, max);
    let end = end.clamp(0.0, max);
    if !(end > start) {
        return None;
    }

    let offset = ((start + PIXEL_EPSILON).floor() as u32).min(limit);
    let end_px = ((end + PIXEL_EPSILON).floor() as u32).min(limit);
    let length = end_px.saturating_sub(offset);
    if length == 0 {
        return None;
    }
    Some((offset, length))
}
