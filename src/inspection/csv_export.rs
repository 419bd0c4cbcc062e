//! CSV export for inspection matrices.
//!
//! Layout: a header row of column labels (`,A,B,C`), then one row per grid
//! row starting with its 1-based number. Empty cells are empty fields.

use anyhow::{Context, Result};
use chrono::Local;
use regex::Regex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::{column_label, Inspection};
use crate::log;

/// Number of lines shown in a preview: header plus five rows.
const PREVIEW_LINES: usize = 6;

pub fn generate_csv(inspection: &Inspection) -> String {
    let header: Vec<String> = (0..inspection.grid_config.columns)
        .map(column_label)
        .collect();
    let mut csv = format!(",{}\n", header.join(","));

    for (row_index, row) in inspection.matrix_values.iter().enumerate() {
        let fields: Vec<String> = row
            .iter()
            .map(|value| value.map(|v| v.to_string()).unwrap_or_default())
            .collect();
        csv.push_str(&format!("{},{}\n", row_index + 1, fields.join(",")));
    }

    csv
}

/// The first lines of the CSV, for display before exporting.
pub fn csv_preview(inspection: &Inspection) -> String {
    generate_csv(inspection)
        .split('\n')
        .take(PREVIEW_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

fn unsafe_chars() -> Option<&'static Regex> {
    static UNSAFE_CHARS: OnceLock<Option<Regex>> = OnceLock::new();
    UNSAFE_CHARS
        .get_or_init(|| Regex::new("[^a-zA-Z0-9]").ok())
        .as_ref()
}

/// Inspection name made safe for a file name.
fn file_stem(name: &str) -> String {
    match unsafe_chars() {
        Some(re) => re.replace_all(name, "_").into_owned(),
        None => name.to_string(),
    }
}

/// Writes the CSV to `<dir>/<name>_<epoch ms>.csv` and returns the path.
pub fn export_csv(inspection: &Inspection, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let file_name = format!(
        "{}_{}.csv",
        file_stem(&inspection.name),
        Local::now().timestamp_millis()
    );
    let path = dir.join(file_name);

    let mut file = File::create(&path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    file.write_all(generate_csv(inspection).as_bytes())
        .context("Failed to write CSV data")?;

    log(&format!("Exported {} to {}", inspection.id, path.display()));
    Ok(path)
}
