//! Crop box handling: the persisted "last region" slot and the interactive
//! crop session that maps a view-drawn box onto the source image.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::error::ScanError;
use crate::geometry::{
    map_image_region_to_view, map_view_rect_to_image_pixels, ImageSize, NormalizedRegion,
    PixelRect, ReferenceFrame, Size,
};
use crate::log;
use crate::ocr::{Pipeline, TextRecognizer};
use crate::store::KeyValueStore;

const LAST_REGION_KEY: &str = "lastCropRegion";

/// Persisted form of the last region.
///
/// `normalized` is absent in records written before regions were stored as
/// fractions; those hold pixel values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
struct StoredRegion {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    normalized: bool,
}

/// The single global "last used crop region" slot.
pub struct CropRegionStore<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> CropRegionStore<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Saves an image-relative region, clamped into the unit square.
    pub fn save(&self, region: &NormalizedRegion) -> Result<(), ScanError> {
        if region.reference_frame != ReferenceFrame::Image {
            return Err(ScanError::FrameMismatch {
                expected: ReferenceFrame::Image,
                found: region.reference_frame,
            });
        }
        let clamped = region.clamped().ok_or(ScanError::EmptyRegion)?;

        let record = StoredRegion {
            x: clamped.x,
            y: clamped.y,
            width: clamped.width,
            height: clamped.height,
            normalized: true,
        };
        let json = serde_json::to_string(&record).map_err(anyhow::Error::from)?;
        self.store.set(LAST_REGION_KEY, &json)?;

        log(&format!(
            "Saved crop region x={:.3} y={:.3} w={:.3} h={:.3}",
            record.x, record.y, record.width, record.height
        ));
        Ok(())
    }

    /// Loads the last region for an image of the given size.
    ///
    /// Legacy pixel records are divided by `image`'s dimensions, which is
    /// only right if that image has the size of the one they came from.
    /// `None` means "use the full image".
    pub fn load(&self, image: ImageSize) -> Option<NormalizedRegion> {
        let raw = match self.store.get(LAST_REGION_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                log(&format!("Failed to read crop region: {:#}", e));
                return None;
            }
        };

        let record = match parse_record(&raw) {
            Ok(record) => record,
            Err(e) => {
                log(&format!("Ignoring unreadable crop region: {}", e));
                return None;
            }
        };

        let region = if record.normalized {
            NormalizedRegion::new(
                record.x,
                record.y,
                record.width,
                record.height,
                ReferenceFrame::Image,
            )
        } else {
            if image.width == 0 || image.height == 0 {
                return None;
            }
            log("Converting legacy pixel crop region with current image size");
            let (w, h) = (image.width as f64, image.height as f64);
            NormalizedRegion::new(
                record.x / w,
                record.y / h,
                record.width / w,
                record.height / h,
                ReferenceFrame::Image,
            )
        };

        region.clamped()
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(LAST_REGION_KEY)?;
        log("Cleared crop region");
        Ok(())
    }
}

/// Parses a stored record, unwrapping one level of string encoding.
fn parse_record(raw: &str) -> serde_json::Result<StoredRegion> {
    match serde_json::from_str::<Value>(raw)? {
        Value::String(inner) => serde_json::from_str(&inner),
        value => serde_json::from_value(value),
    }
}

/// Result of applying a crop box.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropOutcome {
    pub path: PathBuf,
    pub pixel_rect: PixelRect,
}

/// A crop box being adjusted over an image shown in a view.
///
/// The box is always view-relative; the image is assumed to be drawn with
/// "contain" scaling.
#[derive(Clone, Debug)]
pub struct CropSession {
    image: ImageSize,
    view: Size,
    crop_box: NormalizedRegion,
}

impl CropSession {
    /// Starts from the persisted region, or the whole view without one.
    pub fn begin(regions: &CropRegionStore<'_>, image: ImageSize, view: Size) -> Self {
        let crop_box = regions
            .load(image)
            .and_then(|region| map_image_region_to_view(&region, view, image).ok())
            .and_then(|region| region.clamped())
            .unwrap_or_else(|| NormalizedRegion::full(ReferenceFrame::View));

        Self {
            image,
            view,
            crop_box,
        }
    }

    pub fn crop_box(&self) -> NormalizedRegion {
        self.crop_box
    }

    /// Replaces the box with one drawn by the caller.
    pub fn set_box(&mut self, crop_box: NormalizedRegion) -> Result<(), ScanError> {
        if crop_box.reference_frame != ReferenceFrame::View {
            return Err(ScanError::FrameMismatch {
                expected: ReferenceFrame::View,
                found: crop_box.reference_frame,
            });
        }
        self.crop_box = crop_box.clamped().ok_or(ScanError::EmptyRegion)?;
        Ok(())
    }

    pub fn move_by(&mut self, dx: f64, dy: f64) {
        self.crop_box = self.crop_box.moved_by(dx, dy);
    }

    pub fn resize_by(&mut self, dw: f64, dh: f64) {
        self.crop_box = self.crop_box.resized_by(dw, dh);
    }

    /// The source-image pixels under the current box.
    pub fn pixel_rect(&self) -> Result<PixelRect, ScanError> {
        map_view_rect_to_image_pixels(&self.crop_box, self.view, self.image)
    }

    /// Confirms the box: remembers it as the last region and writes the crop.
    pub fn apply<R: TextRecognizer>(
        &self,
        pipeline: &Pipeline<R>,
        regions: &CropRegionStore<'_>,
        image_path: &str,
    ) -> Result<CropOutcome, ScanError> {
        let pixel_rect = self.pixel_rect()?;

        // A failed save only loses the default for next time
        if let Err(e) = regions.save(&NormalizedRegion::from_pixel_rect(&pixel_rect, self.image)) {
            log(&format!("Failed to save crop region: {}", e));
        }

        let path = pipeline.crop_image(image_path, pixel_rect)?;
        Ok(CropOutcome { path, pixel_rect })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::geometry::Rotation;
    use crate::ocr::RecognitionResult;
    use crate::store::MemoryStore;
    use image::{ImageBuffer, Rgba};
    use tempfile::tempdir;

    const EPS: f64 = 1e-9;

    fn assert_invariants(region: &NormalizedRegion) {
        assert!(region.width > 0.0 && region.height > 0.0, "{:?}", region);
        assert!(region.x >= 0.0 && region.y >= 0.0, "{:?}", region);
        assert!(region.x + region.width <= 1.0 + EPS, "{:?}", region);
        assert!(region.y + region.height <= 1.0 + EPS, "{:?}", region);
    }

    fn image_region(x: f64, y: f64, width: f64, height: f64) -> NormalizedRegion {
        NormalizedRegion::new(x, y, width, height, ReferenceFrame::Image)
    }

    #[test]
    fn test_save_load_clamps_overflow() {
        let store = MemoryStore::new();
        let regions = CropRegionStore::new(&store);

        regions.save(&image_region(0.9, 0.2, 0.5, 0.3)).unwrap();
        let loaded = regions.load(ImageSize::new(1000, 2000)).unwrap();

        assert_invariants(&loaded);
        assert!((loaded.x - 0.9).abs() < EPS);
        assert!((loaded.width - 0.1).abs() < EPS);
        assert!((loaded.height - 0.3).abs() < EPS);
    }

    #[test]
    fn test_saved_record_is_tagged() {
        let store = MemoryStore::new();
        CropRegionStore::new(&store)
            .save(&image_region(0.1, 0.2, 0.3, 0.4))
            .unwrap();

        let raw = store.get("lastCropRegion").unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["normalized"], Value::Bool(true));
        assert_eq!(value["width"].as_f64(), Some(0.3));
    }

    #[test]
    fn test_save_rejects_view_region() {
        let store = MemoryStore::new();
        let err = CropRegionStore::new(&store)
            .save(&NormalizedRegion::full(ReferenceFrame::View))
            .unwrap_err();
        assert_eq!(err.kind(), "CROP_ERROR");
        assert_eq!(store.get("lastCropRegion").unwrap(), None);
    }

    #[test]
    fn test_load_empty_slot() {
        let store = MemoryStore::new();
        assert_eq!(CropRegionStore::new(&store).load(ImageSize::new(10, 10)), None);
    }

    #[test]
    fn test_legacy_pixel_record() {
        let store = MemoryStore::new();
        store
            .set("lastCropRegion", r#"{"x":100,"y":200,"width":500,"height":400}"#)
            .unwrap();

        let loaded = CropRegionStore::new(&store)
            .load(ImageSize::new(1000, 2000))
            .unwrap();

        assert_eq!(loaded.reference_frame, ReferenceFrame::Image);
        assert!((loaded.x - 0.1).abs() < EPS);
        assert!((loaded.y - 0.1).abs() < EPS);
        assert!((loaded.width - 0.5).abs() < EPS);
        assert!((loaded.height - 0.2).abs() < EPS);
    }

    #[test]
    fn test_legacy_record_larger_than_current_image() {
        let store = MemoryStore::new();
        // Recorded against a bigger photo than the one now open
        store
            .set("lastCropRegion", r#"{"x":900,"y":50,"width":800,"height":3000}"#)
            .unwrap();

        let loaded = CropRegionStore::new(&store)
            .load(ImageSize::new(1000, 1000))
            .unwrap();
        assert_invariants(&loaded);
        assert!((loaded.width - 0.1).abs() < EPS);
        assert!((loaded.height - 0.95).abs() < EPS);
    }

    #[test]
    fn test_degenerate_record_means_full_image() {
        let store = MemoryStore::new();
        let regions = CropRegionStore::new(&store);

        store
            .set("lastCropRegion", r#"{"x":0.1,"y":0.1,"width":0,"height":0.5,"normalized":true}"#)
            .unwrap();
        assert_eq!(regions.load(ImageSize::new(100, 100)), None);

        store
            .set("lastCropRegion", r#"{"x":10,"y":10,"width":-5,"height":20}"#)
            .unwrap();
        assert_eq!(regions.load(ImageSize::new(100, 100)), None);

        store.set("lastCropRegion", "garbage").unwrap();
        assert_eq!(regions.load(ImageSize::new(100, 100)), None);
    }

    #[test]
    fn test_double_serialized_record() {
        let store = MemoryStore::new();
        let inner = r#"{"x":0.25,"y":0.25,"width":0.5,"height":0.5,"normalized":true}"#;
        store
            .set("lastCropRegion", &serde_json::to_string(inner).unwrap())
            .unwrap();

        let loaded = CropRegionStore::new(&store)
            .load(ImageSize::new(10, 10))
            .unwrap();
        assert_eq!(loaded, image_region(0.25, 0.25, 0.5, 0.5));
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new();
        let regions = CropRegionStore::new(&store);
        regions.save(&image_region(0.1, 0.1, 0.5, 0.5)).unwrap();
        regions.clear().unwrap();
        assert_eq!(regions.load(ImageSize::new(10, 10)), None);
    }

    #[test]
    fn test_session_defaults_to_full_view() {
        let store = MemoryStore::new();
        let session = CropSession::begin(
            &CropRegionStore::new(&store),
            ImageSize::new(1000, 2000),
            Size::new(500.0, 1500.0),
        );
        assert_eq!(session.crop_box(), NormalizedRegion::full(ReferenceFrame::View));
        // Whole view maps to the whole image, letterbox bars clipped away
        assert_eq!(session.pixel_rect().unwrap(), PixelRect::new(0, 0, 1000, 2000));
    }

    #[test]
    fn test_session_restores_last_region_in_view_frame() {
        let store = MemoryStore::new();
        let regions = CropRegionStore::new(&store);
        let image = ImageSize::new(1000, 2000);
        let view = Size::new(500.0, 2000.0);

        regions.save(&image_region(0.25, 0.25, 0.5, 0.5)).unwrap();
        let session = CropSession::begin(&regions, image, view);

        let crop_box = session.crop_box();
        assert_eq!(crop_box.reference_frame, ReferenceFrame::View);
        // Image drawn 500x1000 at y=500 inside the 500x2000 view
        assert!((crop_box.x - 0.25).abs() < EPS);
        assert!((crop_box.y - 0.375).abs() < EPS);
        assert!((crop_box.height - 0.25).abs() < EPS);
        assert_eq!(session.pixel_rect().unwrap(), PixelRect::new(250, 500, 500, 1000));
    }

    #[test]
    fn test_session_gestures_stay_inside() {
        let store = MemoryStore::new();
        let mut session = CropSession::begin(
            &CropRegionStore::new(&store),
            ImageSize::new(100, 100),
            Size::new(100.0, 100.0),
        );
        session
            .set_box(NormalizedRegion::new(0.2, 0.2, 0.5, 0.5, ReferenceFrame::View))
            .unwrap();

        session.move_by(0.6, -0.5);
        let moved = session.crop_box();
        assert!((moved.x - 0.5).abs() < EPS);
        assert_eq!(moved.y, 0.0);

        session.resize_by(0.4, -0.45);
        let resized = session.crop_box();
        assert!((resized.width - 0.5).abs() < EPS);
        assert!((resized.height - NormalizedRegion::MIN_EXTENT).abs() < EPS);
        assert_invariants(&resized);
    }

    #[test]
    fn test_session_set_box_rejects_image_frame() {
        let store = MemoryStore::new();
        let mut session = CropSession::begin(
            &CropRegionStore::new(&store),
            ImageSize::new(100, 100),
            Size::new(100.0, 100.0),
        );
        assert!(session.set_box(image_region(0.0, 0.0, 0.5, 0.5)).is_err());
    }

    struct NoText;

    impl TextRecognizer for NoText {
        fn recognize(
            &self,
            _bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
            _rotation: Rotation,
        ) -> anyhow::Result<RecognitionResult> {
            Ok(RecognitionResult::default())
        }
    }

    #[test]
    fn test_apply_crops_and_remembers() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("gauge.png");
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::new(200, 400);
        img.save(&image_path).unwrap();

        let config = ScanConfig {
            crop_dir: Some(dir.path().join("crops")),
            ..Default::default()
        };
        let pipeline = Pipeline::new(config, NoText);
        let store = MemoryStore::new();
        let regions = CropRegionStore::new(&store);
        let image = ImageSize::new(200, 400);

        // 200x400 drawn as 100x200 centered in a 200x200 view
        let mut session = CropSession::begin(&regions, image, Size::new(200.0, 200.0));
        session
            .set_box(NormalizedRegion::new(0.25, 0.0, 0.5, 0.5, ReferenceFrame::View))
            .unwrap();

        let outcome = session
            .apply(&pipeline, &regions, image_path.to_str().unwrap())
            .unwrap();

        assert_eq!(outcome.pixel_rect, PixelRect::new(0, 0, 200, 200));
        assert!(outcome.path.exists());

        let remembered = regions.load(image).unwrap();
        assert_eq!(remembered, image_region(0.0, 0.0, 1.0, 0.5));
    }
}
