//! Gauge OCR command-line tool
//!
//! Scans gauge photos for a numeric reading, crops regions, remembers the
//! last crop box and manages inspection grids. Results are printed as JSON.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

use gauge_ocr::crop::{CropRegionStore, CropSession};
use gauge_ocr::geometry::{NormalizedRegion, PixelRect, ReferenceFrame, Size};
use gauge_ocr::inspection::{
    self, grid_layout, parse_cell_id, GridConfig, InspectionMetadata, InspectionStore,
};
use gauge_ocr::ocr::{self, ensure_tesseract, parse_correction, SourceImage};
use gauge_ocr::store::{AppSettings, JsonFileStore};
use gauge_ocr::{log, paths, Pipeline, ScanConfig, ScanError, TesseractRecognizer};

#[derive(Parser, Debug)]
#[command(
    name = "gauge-ocr",
    version,
    about = "Read measurements from gauge photos"
)]
struct Cli {
    /// Config file (defaults to config.json next to the executable)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan an image for a single reading
    Scan {
        image: String,
        /// Scan the whole image instead of the centered region
        #[arg(long, conflicts_with = "rect")]
        full: bool,
        /// Pixel rectangle X,Y,W,H to scan
        #[arg(long, value_parser = parse_pixel_rect)]
        rect: Option<PixelRect>,
    },
    /// Recognize all text blocks in an image
    ScanText { image: String },
    /// Write a pixel rectangle of an image to a new PNG
    Crop {
        image: String,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Crop with a box drawn over a preview, remember it, and scan the crop
    CropScan {
        image: String,
        /// Preview size W,H in which the image is shown letterboxed
        #[arg(long, value_parser = parse_view_size)]
        view: Size,
        /// Crop box X,Y,W,H as fractions of the preview
        #[arg(long = "box", value_parser = parse_view_box)]
        crop_box: Option<NormalizedRegion>,
    },
    /// Show or clear the remembered crop region
    LastRegion {
        /// Forget the remembered region
        #[arg(long)]
        clear: bool,
        /// Resolve the region against this image
        #[arg(long, required_unless_present = "clear")]
        image: Option<String>,
    },
    /// Locate Tesseract, fetch trained data and write a default config
    Setup,
    /// Show or change app settings
    Settings {
        #[arg(long)]
        auto_advance: Option<bool>,
        #[arg(long)]
        default_layout: Option<String>,
    },
    /// Manage inspection grids
    Inspection {
        #[command(subcommand)]
        action: InspectionCommand,
    },
}

#[derive(Subcommand, Debug)]
enum InspectionCommand {
    /// Create an inspection from a layout preset or explicit size
    Create {
        name: String,
        /// Layout id: 3-column, 4-column or custom
        #[arg(long)]
        layout: Option<String>,
        #[arg(long)]
        columns: Option<usize>,
        #[arg(long)]
        rows: Option<usize>,
        #[arg(long)]
        zone: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        reference: Option<String>,
    },
    List,
    /// Print an inspection, or its CSV preview
    Show {
        id: String,
        #[arg(long)]
        csv: bool,
    },
    /// Set a cell (e.g. B-2) to a value; a decimal comma is accepted
    Set {
        id: String,
        cell: String,
        value: String,
        /// Image the value was read from
        #[arg(long)]
        image: Option<String>,
    },
    /// Clear a cell
    Clear { id: String, cell: String },
    AddRow { id: String },
    Delete { id: String },
    /// Write the inspection as CSV
    Export {
        id: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn parse_numbers<T: std::str::FromStr>(s: &str, count: usize) -> Result<Vec<T>, String> {
    let values = s
        .split(',')
        .map(|part| part.trim().parse::<T>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("expected {} comma-separated numbers, got {:?}", count, s))?;
    if values.len() != count {
        return Err(format!(
            "expected {} comma-separated numbers, got {:?}",
            count, s
        ));
    }
    Ok(values)
}

fn parse_pixel_rect(s: &str) -> Result<PixelRect, String> {
    let v = parse_numbers::<u32>(s, 4)?;
    Ok(PixelRect::new(v[0], v[1], v[2], v[3]))
}

fn parse_view_size(s: &str) -> Result<Size, String> {
    let v = parse_numbers::<f64>(s, 2)?;
    Ok(Size::new(v[0], v[1]))
}

fn parse_view_box(s: &str) -> Result<NormalizedRegion, String> {
    let v = parse_numbers::<f64>(s, 4)?;
    Ok(NormalizedRegion::new(v[0], v[1], v[2], v[3], ReferenceFrame::View))
}

/// Keeps the symbolic kind in the message shown to the user.
fn scan_failure(e: ScanError) -> anyhow::Error {
    let kind = e.kind();
    anyhow::Error::new(e).context(kind)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn pipeline(config: ScanConfig) -> Result<Pipeline<TesseractRecognizer>> {
    let recognizer = TesseractRecognizer::from_config(&config)?;
    Ok(Pipeline::new(config, recognizer))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = paths::ensure_directories() {
        eprintln!("Failed to create app directories: {}", e);
    }

    let config = ScanConfig::load(cli.config.as_deref());
    let store = JsonFileStore::new(config.store_path());

    match cli.command {
        Command::Scan { image, full, rect } => {
            let pipeline = pipeline(config)?;
            let reading = if full {
                pipeline.scan_measurement_region(&image, None)
            } else if rect.is_some() {
                pipeline.scan_measurement_region(&image, rect)
            } else {
                pipeline.scan_measurement(&image)
            }
            .map_err(scan_failure)?;
            print_json(&reading)
        }
        Command::ScanText { image } => {
            let result = pipeline(config)?.scan_text(&image).map_err(scan_failure)?;
            print_json(&result)
        }
        Command::Crop {
            image,
            x,
            y,
            width,
            height,
        } => {
            let path = ocr::crop_image(
                &image,
                PixelRect::new(x, y, width, height),
                &config.crop_dir(),
            )
            .map_err(scan_failure)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::CropScan {
            image,
            view,
            crop_box,
        } => {
            let source = SourceImage::open(&image).map_err(scan_failure)?;
            let regions = CropRegionStore::new(&store);
            let mut session = CropSession::begin(&regions, source.size, view);
            if let Some(crop_box) = crop_box {
                session.set_box(crop_box).map_err(scan_failure)?;
            }

            let pipeline = pipeline(config)?;
            let outcome = session
                .apply(&pipeline, &regions, &image)
                .map_err(scan_failure)?;
            let cropped = outcome.path.to_string_lossy().to_string();
            let reading = pipeline
                .scan_measurement_region(&cropped, None)
                .map_err(scan_failure)?;

            print_json(&json!({
                "path": outcome.path,
                "pixelRect": outcome.pixel_rect,
                "reading": reading,
            }))
        }
        Command::LastRegion { clear, image } => {
            let regions = CropRegionStore::new(&store);
            if clear {
                regions.clear()?;
                println!("Cleared");
                return Ok(());
            }
            let image = image.ok_or_else(|| anyhow!("--image is required"))?;
            let source = SourceImage::open(&image).map_err(scan_failure)?;
            let region = regions.load(source.size);
            let pixel_rect = region
                .map(|r| r.to_pixel_rect(source.size))
                .transpose()
                .map_err(scan_failure)?;

            print_json(&json!({
                "region": region,
                "pixelRect": pixel_rect,
            }))
        }
        Command::Setup => {
            let tesseract = ensure_tesseract(
                config.tesseract_path.as_deref(),
                config.tessdata_dir.as_deref(),
                &config.language,
            )?;
            let config_path = cli.config.unwrap_or_else(paths::get_config_path);
            if !config_path.exists() {
                ScanConfig::save_default(&config_path)?;
            }
            print_json(&json!({
                "executable": tesseract.executable,
                "tessdata": tesseract.tessdata,
                "config": config_path,
            }))
        }
        Command::Settings {
            auto_advance,
            default_layout,
        } => {
            let mut settings = AppSettings::load(&store).unwrap_or_default();
            let changed = auto_advance.is_some() || default_layout.is_some();
            if let Some(auto_advance) = auto_advance {
                settings.auto_advance = auto_advance;
            }
            if let Some(layout) = default_layout {
                if grid_layout(&layout).is_none() {
                    return Err(anyhow!("Unknown grid layout: {}", layout));
                }
                settings.default_grid_layout = layout;
            }
            if changed {
                settings.save(&store)?;
            }
            print_json(&settings)
        }
        Command::Inspection { action } => run_inspection(action, &store, &config),
    }
}

fn run_inspection(
    action: InspectionCommand,
    store: &JsonFileStore,
    config: &ScanConfig,
) -> Result<()> {
    let inspections = InspectionStore::new(store);

    match action {
        InspectionCommand::Create {
            name,
            layout,
            columns,
            rows,
            zone,
            location,
            reference,
        } => {
            let layout_id = layout.unwrap_or_else(|| {
                AppSettings::load(store)
                    .unwrap_or_default()
                    .default_grid_layout
            });
            let preset = grid_layout(&layout_id)
                .with_context(|| format!("Unknown grid layout: {}", layout_id))?;
            let grid = GridConfig {
                rows: rows.unwrap_or(preset.grid_config.rows),
                columns: columns.unwrap_or(preset.grid_config.columns),
            };

            let metadata = (zone.is_some() || location.is_some() || reference.is_some()).then(
                || InspectionMetadata {
                    zone,
                    location,
                    reference,
                },
            );

            let created = inspections.create(&name, grid, metadata)?;
            print_json(&created)
        }
        InspectionCommand::List => {
            let summary: Vec<_> = inspections
                .load_all()
                .iter()
                .map(|i| {
                    json!({
                        "id": i.id,
                        "name": i.name,
                        "status": i.status,
                        "modifiedAt": i.modified_at,
                    })
                })
                .collect();
            print_json(&summary)
        }
        InspectionCommand::Show { id, csv } => {
            let found = inspections
                .get(&id)
                .ok_or_else(|| anyhow!("No inspection with id {}", id))?;
            if csv {
                println!("{}", inspection::csv_preview(&found));
                Ok(())
            } else {
                print_json(&found)
            }
        }
        InspectionCommand::Set {
            id,
            cell,
            value,
            image,
        } => {
            let (row, column) =
                parse_cell_id(&cell).ok_or_else(|| anyhow!("Invalid cell id: {}", cell))?;
            // Not a number: nothing is committed
            let value = parse_correction(&value)
                .ok_or_else(|| anyhow!("Not a number: {:?}", value))?;
            let updated =
                inspections.update_cell(&id, row, column, Some(value), image.as_deref())?;
            print_json(&updated)
        }
        InspectionCommand::Clear { id, cell } => {
            let (row, column) =
                parse_cell_id(&cell).ok_or_else(|| anyhow!("Invalid cell id: {}", cell))?;
            let updated = inspections.update_cell(&id, row, column, None, None)?;
            print_json(&updated)
        }
        InspectionCommand::AddRow { id } => print_json(&inspections.add_row(&id)?),
        InspectionCommand::Delete { id } => {
            if !inspections.delete(&id)? {
                return Err(anyhow!("No inspection with id {}", id));
            }
            log(&format!("Deleted inspection {}", id));
            Ok(())
        }
        InspectionCommand::Export { id, dir } => {
            let found = inspections
                .get(&id)
                .ok_or_else(|| anyhow!("No inspection with id {}", id))?;
            let dir = dir.unwrap_or_else(|| {
                config
                    .store_path()
                    .parent()
                    .map(|p| p.join("exports"))
                    .unwrap_or_else(|| paths::get_data_dir().join("exports"))
            });
            let path = inspection::export_csv(&found, &dir)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}
