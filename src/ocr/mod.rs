pub mod decode;
pub mod engine;
pub mod extract;
pub mod preprocess;
pub mod setup;
pub mod source;

pub use engine::{RecognitionResult, TesseractRecognizer, TextBlock, TextRecognizer};
pub use extract::{extract_measurement, parse_correction, MeasurementReading};
pub use setup::ensure_tesseract;
pub use source::SourceImage;

use chrono::Local;
use image::{ImageBuffer, Rgba};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::geometry::PixelRect;
use crate::log;
use decode::decode_region;
use preprocess::{enhance, rotate_upright};

/// The scan pipeline: decode, enhance, recognize, extract.
///
/// Holds no per-scan state; every call probes its source image afresh.
pub struct Pipeline<R> {
    config: ScanConfig,
    recognizer: R,
}

impl<R: TextRecognizer> Pipeline<R> {
    pub fn new(config: ScanConfig, recognizer: R) -> Self {
        Self { config, recognizer }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans the centered region of interest for a single reading.
    pub fn scan_measurement(&self, image_path: &str) -> Result<MeasurementReading, ScanError> {
        let source = SourceImage::open(image_path)?;
        let roi = PixelRect::centered(source.size, self.config.scan_roi_fraction);
        self.scan_source(&source, roi)
    }

    /// Scans an explicit pixel rectangle, or the whole image for `None`.
    pub fn scan_measurement_region(
        &self,
        image_path: &str,
        rect: Option<PixelRect>,
    ) -> Result<MeasurementReading, ScanError> {
        let source = SourceImage::open(image_path)?;
        self.scan_source(&source, rect)
    }

    /// Block-level recognition of the whole image.
    pub fn scan_text(&self, image_path: &str) -> Result<RecognitionResult, ScanError> {
        let source = SourceImage::open(image_path)?;
        let bitmap = self.prepare(&source, None)?;

        let result = self
            .recognizer
            .recognize(&bitmap, source.orientation)
            .map_err(ScanError::RecognitionFailed)?;

        log(&format!(
            "Recognized {} block(s) in {}",
            result.blocks.len(),
            source.path.display()
        ));
        Ok(result)
    }

    /// Writes the given pixel rectangle of the image to a new PNG in the
    /// configured crop directory and returns its path.
    pub fn crop_image(&self, image_path: &str, rect: PixelRect) -> Result<PathBuf, ScanError> {
        crop_image(image_path, rect, &self.config.crop_dir())
    }

    fn prepare(
        &self,
        source: &SourceImage,
        rect: Option<PixelRect>,
    ) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>, ScanError> {
        let bitmap = decode_region(source, rect)?;
        Ok(enhance(&bitmap, self.config.contrast))
    }

    fn scan_source(
        &self,
        source: &SourceImage,
        rect: Option<PixelRect>,
    ) -> Result<MeasurementReading, ScanError> {
        let bitmap = self.prepare(source, rect)?;

        // The rotation hint describes the capture, not the crop
        let text = self
            .recognizer
            .recognize_text(&bitmap, source.orientation)
            .map_err(ScanError::RecognitionFailed)?;

        Ok(extract_measurement(&text))
    }
}

/// Writes the given pixel rectangle of the image to a new PNG in
/// `crop_dir` and returns its path.
///
/// The source orientation is applied to the output pixels, since the PNG
/// carries no orientation metadata.
pub fn crop_image(image_path: &str, rect: PixelRect, crop_dir: &Path) -> Result<PathBuf, ScanError> {
    let source = SourceImage::open(image_path)?;
    let bitmap = decode_region(&source, Some(rect))?;
    let upright = rotate_upright(&bitmap, source.orientation);

    fs::create_dir_all(crop_dir).map_err(|e| ScanError::CropWrite {
        path: crop_dir.to_path_buf(),
        source: image::ImageError::IoError(e),
    })?;

    let file_name = format!("crop_{}.png", Local::now().format("%Y%m%d_%H%M%S_%3f"));
    let path = crop_dir.join(file_name);
    upright.save(&path).map_err(|e| ScanError::CropWrite {
        path: path.clone(),
        source: e,
    })?;

    log(&format!(
        "Cropped {}x{} from {} to {}",
        upright.width(),
        upright.height(),
        source.path.display(),
        path.display()
    ));
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rotation;
    use anyhow::{anyhow, Result};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Returns canned text and records what it was asked to read.
    struct FakeRecognizer {
        text: String,
        seen: Mutex<Vec<((u32, u32), Rotation)>>,
    }

    impl FakeRecognizer {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<((u32, u32), Rotation)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl TextRecognizer for FakeRecognizer {
        fn recognize(
            &self,
            bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
            rotation: Rotation,
        ) -> Result<RecognitionResult> {
            self.seen.lock().unwrap().push((bitmap.dimensions(), rotation));
            let (w, h) = bitmap.dimensions();
            Ok(RecognitionResult::from_blocks(vec![TextBlock {
                text: self.text.clone(),
                confidence: 0.8,
                bounding_box: PixelRect::new(0, 0, w, h),
            }]))
        }
    }

    impl TextRecognizer for &FakeRecognizer {
        fn recognize(
            &self,
            bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
            rotation: Rotation,
        ) -> Result<RecognitionResult> {
            FakeRecognizer::recognize(*self, bitmap, rotation)
        }
    }

    struct FailingRecognizer;

    impl TextRecognizer for FailingRecognizer {
        fn recognize(
            &self,
            _bitmap: &ImageBuffer<Rgba<u8>, Vec<u8>>,
            _rotation: Rotation,
        ) -> Result<RecognitionResult> {
            Err(anyhow!("engine crashed"))
        }
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> String {
        let path = dir.join(name);
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, _| Rgba([(x % 256) as u8, 90, 200, 255]));
        img.save(&path).unwrap();
        path.to_string_lossy().to_string()
    }

    fn config_in(dir: &Path) -> ScanConfig {
        ScanConfig {
            crop_dir: Some(dir.join("crops")),
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_measurement_uses_center_roi() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 200, 100);
        let recognizer = FakeRecognizer::new("THK 4,27 mm");
        let pipeline = Pipeline::new(config_in(dir.path()), &recognizer);

        let reading = pipeline.scan_measurement(&image).unwrap();

        assert_eq!(reading.value, 4.27);
        assert_eq!(reading.confidence, 0.9);
        assert_eq!(reading.raw_text, "THK 4,27 mm");
        assert_eq!(recognizer.calls(), vec![((100, 50), Rotation::Deg0)]);
    }

    #[test]
    fn test_scan_measurement_full_image_roi() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 200, 100);
        let recognizer = FakeRecognizer::new("7");
        let config = ScanConfig {
            scan_roi_fraction: 1.0,
            ..config_in(dir.path())
        };
        let pipeline = Pipeline::new(config, &recognizer);

        pipeline.scan_measurement(&image).unwrap();
        assert_eq!(recognizer.calls()[0].0, (200, 100));
    }

    #[test]
    fn test_scan_region() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 200, 100);
        let recognizer = FakeRecognizer::new("12 . 345");
        let pipeline = Pipeline::new(config_in(dir.path()), &recognizer);

        let reading = pipeline
            .scan_measurement_region(&image, Some(PixelRect::new(150, 80, 100, 100)))
            .unwrap();

        assert_eq!(reading.value, 12.345);
        // Clamped to the image
        assert_eq!(recognizer.calls()[0].0, (50, 20));
    }

    #[test]
    fn test_no_number_is_not_an_error() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 20, 20);
        let pipeline = Pipeline::new(config_in(dir.path()), FakeRecognizer::new("ERROR"));

        let reading = pipeline.scan_measurement(&image).unwrap();
        assert_eq!(reading.value, 0.0);
        assert_eq!(reading.confidence, 0.0);
        assert_eq!(reading.raw_text, "ERROR");
    }

    #[test]
    fn test_recognizer_failure() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 20, 20);
        let pipeline = Pipeline::new(config_in(dir.path()), FailingRecognizer);

        let err = pipeline.scan_measurement(&image).unwrap_err();
        assert_eq!(err.kind(), "OCR_FAILED");
        assert!(err.to_string().contains("engine crashed"));

        let err = pipeline.scan_text(&image).unwrap_err();
        assert_eq!(err.kind(), "OCR_FAILED");
    }

    #[test]
    fn test_input_errors_skip_recognition() {
        let dir = tempdir().unwrap();
        let recognizer = FakeRecognizer::new("1");
        let pipeline = Pipeline::new(config_in(dir.path()), &recognizer);

        assert_eq!(pipeline.scan_measurement("").unwrap_err().kind(), "INVALID_PATH");
        let missing = dir.path().join("nope.jpg");
        assert_eq!(
            pipeline
                .scan_measurement(missing.to_str().unwrap())
                .unwrap_err()
                .kind(),
            "FILE_NOT_FOUND"
        );
        assert!(recognizer.calls().is_empty());
    }

    #[test]
    fn test_scan_text_returns_blocks() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 64, 32);
        let pipeline = Pipeline::new(config_in(dir.path()), FakeRecognizer::new("CH 1\n3.2"));

        let result = pipeline.scan_text(&image).unwrap();
        assert_eq!(result.full_text, "CH 1\n3.2");
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].bounding_box, PixelRect::new(0, 0, 64, 32));
    }

    #[test]
    fn test_crop_image_writes_png() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 200, 100);
        let pipeline = Pipeline::new(config_in(dir.path()), FakeRecognizer::new(""));

        let cropped = pipeline
            .crop_image(&image, PixelRect::new(10, 20, 30, 40))
            .unwrap();

        assert!(cropped.starts_with(dir.path().join("crops")));
        let name = cropped.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("crop_") && name.ends_with(".png"));

        let out = image::open(&cropped).unwrap().to_rgba8();
        assert_eq!(out.dimensions(), (30, 40));
        assert_eq!(out.get_pixel(0, 0)[0], 10);
    }

    #[test]
    fn test_rotated_capture() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gauge.jpg");
        source::write_oriented_jpeg(&path, 100, 200, 6);
        let image = path.to_string_lossy().to_string();
        let recognizer = FakeRecognizer::new("3.5");
        let pipeline = Pipeline::new(config_in(dir.path()), &recognizer);

        let reading = pipeline.scan_measurement(&image).unwrap();
        assert_eq!(reading.value, 3.5);
        // Cropped bitmap keeps the rotation of the whole capture
        assert_eq!(recognizer.calls(), vec![((50, 100), Rotation::Deg90)]);

        let cropped = pipeline
            .crop_image(&image, PixelRect::new(0, 0, 40, 60))
            .unwrap();
        let out = image::open(&cropped).unwrap();
        assert_eq!((out.width(), out.height()), (60, 40));
    }

    #[test]
    fn test_crop_image_empty_region() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 20, 20);
        let pipeline = Pipeline::new(config_in(dir.path()), FakeRecognizer::new(""));

        let err = pipeline
            .crop_image(&image, PixelRect::new(25, 0, 5, 5))
            .unwrap_err();
        assert_eq!(err.kind(), "DECODE_ERROR");
    }

    #[test]
    fn test_crop_image_unwritable_dir() {
        let dir = tempdir().unwrap();
        let image = write_png(dir.path(), "gauge.png", 20, 20);
        // A file where the crop directory should be
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"").unwrap();
        let config = ScanConfig {
            crop_dir: Some(blocker),
            ..Default::default()
        };
        let pipeline = Pipeline::new(config, FakeRecognizer::new(""));

        let err = pipeline
            .crop_image(&image, PixelRect::new(0, 0, 5, 5))
            .unwrap_err();
        assert_eq!(err.kind(), "CROP_ERROR");
    }
}
