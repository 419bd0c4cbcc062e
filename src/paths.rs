use std::path::PathBuf;
use std::sync::OnceLock;

const APP_DIR: &str = "gauge-ocr";

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the per-user data directory: `<data_local_dir>/gauge-ocr/`
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Returns the logs directory: `<data_dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Returns the app-private location for cropped images: `<cache_dir>/gauge-ocr/crops/`
pub fn get_crops_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("crops")
}

/// Returns the key-value store file: `<data_dir>/store.json`
pub fn get_store_path() -> PathBuf {
    get_data_dir().join("store.json")
}

/// Returns the tesseract directory: `<data_dir>/tesseract/`
pub fn get_tesseract_dir() -> PathBuf {
    get_data_dir().join("tesseract")
}

/// Returns the default config file: `<exe_dir>/config.json`
pub fn get_config_path() -> PathBuf {
    get_exe_dir().join("config.json")
}

/// Ensures all output directories exist. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    std::fs::create_dir_all(get_crops_dir())?;
    Ok(())
}
