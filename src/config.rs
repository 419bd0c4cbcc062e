//! Scan configuration loaded from config.json.
//!
//! Looks next to the executable unless a path is given. A missing or
//! unreadable file is not an error: defaults are used and the reason is
//! logged. Every field has a default, so partial files work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ocr::preprocess::DEFAULT_CONTRAST;
use crate::paths;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Explicit Tesseract binary; searched for when absent
    #[serde(default)]
    pub tesseract_path: Option<PathBuf>,
    /// Explicit directory holding `<language>.traineddata`
    #[serde(default)]
    pub tessdata_dir: Option<PathBuf>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Tesseract page segmentation mode (6 = single uniform block)
    #[serde(default = "default_page_segmentation_mode")]
    pub page_segmentation_mode: u32,
    /// Side fraction of the centered region scanned by default; 1.0 or
    /// more scans the whole image
    #[serde(default = "default_scan_roi_fraction")]
    pub scan_roi_fraction: f64,
    #[serde(default = "default_contrast")]
    pub contrast: f32,
    #[serde(default)]
    pub crop_dir: Option<PathBuf>,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_page_segmentation_mode() -> u32 {
    6
}

fn default_scan_roi_fraction() -> f64 {
    0.5
}

fn default_contrast() -> f32 {
    DEFAULT_CONTRAST
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            tessdata_dir: None,
            language: default_language(),
            page_segmentation_mode: default_page_segmentation_mode(),
            scan_roi_fraction: default_scan_roi_fraction(),
            contrast: default_contrast(),
            crop_dir: None,
            store_path: None,
        }
    }
}

impl ScanConfig {
    /// Loads from `path`, or from config.json next to the executable.
    pub fn load(path: Option<&Path>) -> Self {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(paths::get_config_path);

        crate::log(&format!("Looking for config at: {}", config_path.display()));

        if !config_path.exists() {
            crate::log("config.json not found. Using default config.");
            return Self::default();
        }

        match fs::read_to_string(&config_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    crate::log("Config loaded from config.json");
                    config
                }
                Err(e) => {
                    crate::log(&format!(
                        "Failed to parse config.json: {}. Using defaults.",
                        e
                    ));
                    Self::default()
                }
            },
            Err(e) => {
                crate::log(&format!(
                    "Failed to read config.json: {}. Using defaults.",
                    e
                ));
                Self::default()
            }
        }
    }

    /// Writes a pretty-printed default configuration to `path`.
    pub fn save_default(path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&Self::default())?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        crate::log(&format!("Default config written to {}", path.display()));
        Ok(())
    }

    pub fn crop_dir(&self) -> PathBuf {
        self.crop_dir.clone().unwrap_or_else(paths::get_crops_dir)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(paths::get_store_path)
    }
}
