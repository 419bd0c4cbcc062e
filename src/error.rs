//! Error type surfaced by the scan pipeline.
//!
//! Each variant maps onto one of the symbolic kinds reported to callers
//! (`INVALID_PATH`, `FILE_NOT_FOUND`, `DECODE_ERROR`, `OCR_FAILED`,
//! `CROP_ERROR`, `ERROR`). Recognized text without a number is not an
//! error; see `ocr::extract`.

use std::path::PathBuf;

use thiserror::Error;

use crate::geometry::ReferenceFrame;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid image path: {0}")]
    InvalidPath(String),

    #[error("image file not found at {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to decode image {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("selected area is empty")]
    EmptyRegion,

    #[error("expected a {expected:?}-relative region, got {found:?}")]
    FrameMismatch {
        expected: ReferenceFrame,
        found: ReferenceFrame,
    },

    #[error("text recognition failed: {0:#}")]
    RecognitionFailed(anyhow::Error),

    #[error("failed to write cropped image {}", path.display())]
    CropWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("a scan is already in progress")]
    Busy,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScanError {
    /// Symbolic error kind for the UI layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::Decode { .. } | Self::EmptyRegion => "DECODE_ERROR",
            Self::RecognitionFailed(_) => "OCR_FAILED",
            Self::FrameMismatch { .. } | Self::CropWrite { .. } => "CROP_ERROR",
            Self::Busy | Self::Other(_) => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_kinds() {
        assert_eq!(ScanError::InvalidPath(String::new()).kind(), "INVALID_PATH");
        assert_eq!(
            ScanError::FileNotFound(PathBuf::from("x.jpg")).kind(),
            "FILE_NOT_FOUND"
        );
        assert_eq!(ScanError::EmptyRegion.kind(), "DECODE_ERROR");
        assert_eq!(
            ScanError::RecognitionFailed(anyhow!("timeout")).kind(),
            "OCR_FAILED"
        );
        assert_eq!(
            ScanError::FrameMismatch {
                expected: ReferenceFrame::View,
                found: ReferenceFrame::Image,
            }
            .kind(),
            "CROP_ERROR"
        );
        assert_eq!(ScanError::Busy.kind(), "ERROR");
        assert_eq!(ScanError::from(anyhow!("boom")).kind(), "ERROR");
    }

    #[test]
    fn test_recognition_message_includes_cause() {
        let err = ScanError::RecognitionFailed(anyhow!("engine crashed").context("tesseract"));
        let msg = err.to_string();
        assert!(msg.contains("tesseract"));
        assert!(msg.contains("engine crashed"));
    }
}
