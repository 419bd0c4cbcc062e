use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::log;
use crate::paths::get_tesseract_dir;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

#[cfg(windows)]
const COMMON_EXECUTABLES: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
];
#[cfg(not(windows))]
const COMMON_EXECUTABLES: &[&str] = &[
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

#[cfg(windows)]
const COMMON_TESSDATA: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
];
#[cfg(not(windows))]
const COMMON_TESSDATA: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

pub struct TesseractPaths {
    pub executable: PathBuf,
    pub tessdata: PathBuf,
}

/// Makes sure an engine binary exists and trained data for `language` is
/// available, downloading the trained data into the local data dir when no
/// configured or installed copy is found.
pub fn ensure_tesseract(
    configured: Option<&Path>,
    tessdata_dir: Option<&Path>,
    language: &str,
) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(configured)?;

    if let Some(tessdata) = find_tessdata_dir(tessdata_dir, language) {
        log(&format!("Trained data found at: {}", tessdata.display()));
        return Ok(TesseractPaths {
            executable,
            tessdata,
        });
    }

    log(&format!("{}.traineddata not found, downloading...", language));

    let tessdata = get_tesseract_dir().join("tessdata");
    fs::create_dir_all(&tessdata)
        .with_context(|| format!("Failed to create {}", tessdata.display()))?;
    download_tessdata(&tessdata, language)?;

    log(&format!("Tesseract ready at: {}", executable.display()));

    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Downloads `<language>.traineddata` from the tessdata repository.
fn download_tessdata(tessdata_dir: &Path, language: &str) -> Result<()> {
    let file_name = format!("{}.traineddata", language);
    let url = format!("{}/{}", TESSDATA_REPO, file_name);
    let target = tessdata_dir.join(&file_name);

    log(&format!("Downloading {}...", url));

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "gauge-ocr")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}: HTTP {}",
            file_name,
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    let mut file = fs::File::create(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    file.write_all(&bytes)?;

    log(&format!("Downloaded {} ({} bytes)", file_name, bytes.len()));

    Ok(())
}

fn responds_to_version(executable: &Path) -> bool {
    Command::new(executable)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Finds the Tesseract executable: the configured path, our local dir,
/// `PATH`, then common install locations.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        log(&format!(
            "Configured Tesseract {} does not exist, searching",
            path.display()
        ));
    }

    let local_exe = get_tesseract_dir().join(EXECUTABLE_NAME);
    if local_exe.exists() {
        return Ok(local_exe);
    }

    let on_path = PathBuf::from("tesseract");
    if responds_to_version(&on_path) {
        return Ok(on_path);
    }

    COMMON_EXECUTABLES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Tesseract not found. Please install Tesseract-OCR."))
}

/// Finds a directory holding `<language>.traineddata`.
///
/// `None` means the engine's compiled-in default will be used.
pub fn find_tessdata_dir(configured: Option<&Path>, language: &str) -> Option<PathBuf> {
    let file_name = format!("{}.traineddata", language);
    let has_model = |dir: &Path| dir.join(&file_name).exists();

    if let Some(dir) = configured {
        if has_model(dir) {
            return Some(dir.to_path_buf());
        }
    }

    let local = get_tesseract_dir().join("tessdata");
    if has_model(&local) {
        return Some(local);
    }

    // TESSDATA_PREFIX may point at the data dir itself or at its parent
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        for dir in [prefix.clone(), prefix.join("tessdata")] {
            if has_model(&dir) {
                return Some(dir);
            }
        }
    }

    COMMON_TESSDATA
        .iter()
        .map(PathBuf::from)
        .find(|p| has_model(p))
}
