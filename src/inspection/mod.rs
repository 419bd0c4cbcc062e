//! Inspection documents: a grid of measurement cells filled from scans.
//!
//! This module provides:
//! - The inspection model (matrix of readings, per-cell image references)
//! - Grid layout presets
//! - Persistence of all inspections under one store key
//! - CSV export

pub mod csv_export;

pub use csv_export::{csv_preview, export_csv, generate_csv};

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::log;
use crate::store::KeyValueStore;

const INSPECTIONS_KEY: &str = "inspections";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InspectionStatus {
    Draft,
    InProgress,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    pub rows: usize,
    pub columns: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub id: String,
    pub name: String,
    pub grid_config: GridConfig,
    /// `matrix_values[row][column]`, `None` for cells not yet read
    pub matrix_values: Vec<Vec<Option<f64>>>,
    /// Cell id (`A-1`) to the image the reading came from
    #[serde(default)]
    pub image_references: BTreeMap<String, String>,
    /// Epoch milliseconds
    pub created_at: i64,
    pub modified_at: i64,
    pub status: InspectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InspectionMetadata>,
}

/// Column label: 0 -> A, 1 -> B, ...
pub fn column_label(index: usize) -> String {
    u32::try_from(index)
        .ok()
        .and_then(|i| char::from_u32('A' as u32 + i))
        .map(String::from)
        .unwrap_or_else(|| "?".to_string())
}

/// Cell id for a zero-based position, e.g. (0, 1) -> "B-1".
pub fn cell_id(row: usize, column: usize) -> String {
    format!("{}-{}", column_label(column), row + 1)
}

/// Parses a cell id like "B-5" into a zero-based (row, column).
pub fn parse_cell_id(id: &str) -> Option<(usize, usize)> {
    let (column, row) = id.trim().split_once('-')?;
    let mut letters = column.chars();
    let letter = letters.next()?.to_ascii_uppercase();
    if letters.next().is_some() || !letter.is_ascii_uppercase() {
        return None;
    }
    let row: usize = row.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, (letter as u8 - b'A') as usize))
}

fn now_millis() -> i64 {
    Local::now().timestamp_millis()
}

impl Inspection {
    pub fn new(name: &str, grid_config: GridConfig, metadata: Option<InspectionMetadata>) -> Self {
        let now = now_millis();
        Self {
            id: format!("inspection-{}", now),
            name: name.to_string(),
            grid_config,
            matrix_values: vec![vec![None; grid_config.columns]; grid_config.rows],
            image_references: BTreeMap::new(),
            created_at: now,
            modified_at: now,
            status: InspectionStatus::Draft,
            metadata,
        }
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<f64> {
        self.matrix_values
            .get(row)
            .and_then(|r| r.get(column))
            .copied()
            .flatten()
    }

    /// Sets or clears one cell.
    ///
    /// An image path is recorded for the cell when given; clearing a value
    /// without a path also drops the cell's image reference.
    pub fn update_cell(
        &mut self,
        row: usize,
        column: usize,
        value: Option<f64>,
        image_path: Option<&str>,
    ) -> Result<()> {
        let Some(cell) = self
            .matrix_values
            .get_mut(row)
            .and_then(|r| r.get_mut(column))
        else {
            bail!(
                "Cell {} is outside the {}x{} grid",
                cell_id(row, column),
                self.grid_config.rows,
                self.grid_config.columns
            );
        };
        *cell = value;

        let id = cell_id(row, column);
        match image_path {
            Some(path) if !path.is_empty() => {
                self.image_references.insert(id, path.to_string());
            }
            _ if value.is_none() => {
                self.image_references.remove(&id);
            }
            _ => {}
        }

        self.status = self.compute_status();
        self.modified_at = now_millis();
        Ok(())
    }

    /// Appends an empty row.
    pub fn add_row(&mut self) {
        self.matrix_values.push(vec![None; self.grid_config.columns]);
        self.grid_config.rows += 1;
        self.modified_at = now_millis();
    }

    fn compute_status(&self) -> InspectionStatus {
        let total = self.grid_config.rows * self.grid_config.columns;
        let filled = self
            .matrix_values
            .iter()
            .flatten()
            .filter(|v| v.is_some())
            .count();

        if filled == 0 {
            InspectionStatus::Draft
        } else if filled == total {
            InspectionStatus::Completed
        } else {
            InspectionStatus::InProgress
        }
    }
}

/// A preset grid shape offered when creating an inspection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridLayout {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub grid_config: GridConfig,
}

pub const GRID_LAYOUTS: [GridLayout; 3] = [
    GridLayout {
        id: "3-column",
        name: "3 Column",
        description: "3 Column Inspection",
        grid_config: GridConfig { rows: 1, columns: 3 },
    },
    GridLayout {
        id: "4-column",
        name: "4 Column",
        description: "4 Column Standard area",
        grid_config: GridConfig { rows: 1, columns: 4 },
    },
    GridLayout {
        id: "custom",
        name: "Custom Grid",
        description: "Define columns (rows start at 1)",
        grid_config: GridConfig { rows: 1, columns: 3 },
    },
];

pub fn grid_layout(id: &str) -> Option<&'static GridLayout> {
    GRID_LAYOUTS.iter().find(|layout| layout.id == id)
}

/// All inspections, kept as one JSON array in the key-value store.
pub struct InspectionStore<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> InspectionStore<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Loads every inspection. Unreadable data logs and yields an empty list.
    pub fn load_all(&self) -> Vec<Inspection> {
        let raw = match self.store.get(INSPECTIONS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log(&format!("Failed to read inspections: {:#}", e));
                return Vec::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            log(&format!("Failed to parse inspections: {}", e));
            Vec::new()
        })
    }

    pub fn save_all(&self, inspections: &[Inspection]) -> Result<()> {
        let json = serde_json::to_string(inspections).context("Failed to serialize inspections")?;
        self.store.set(INSPECTIONS_KEY, &json)
    }

    pub fn get(&self, id: &str) -> Option<Inspection> {
        self.load_all().into_iter().find(|i| i.id == id)
    }

    pub fn create(
        &self,
        name: &str,
        grid_config: GridConfig,
        metadata: Option<InspectionMetadata>,
    ) -> Result<Inspection> {
        if grid_config.rows == 0 || grid_config.columns == 0 {
            bail!("A grid needs at least one row and one column");
        }

        let mut inspections = self.load_all();
        let mut inspection = Inspection::new(name, grid_config, metadata);

        // Ids are timestamps; keep them unique within one millisecond
        let base = inspection.id.clone();
        let mut suffix = 1;
        while inspections.iter().any(|i| i.id == inspection.id) {
            suffix += 1;
            inspection.id = format!("{}-{}", base, suffix);
        }

        inspections.push(inspection.clone());
        self.save_all(&inspections)?;
        log(&format!("Created inspection {} ({})", inspection.id, name));
        Ok(inspection)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut inspections = self.load_all();
        let before = inspections.len();
        inspections.retain(|i| i.id != id);
        if inspections.len() == before {
            return Ok(false);
        }
        self.save_all(&inspections)?;
        Ok(true)
    }

    /// Applies `f` to one inspection and saves the result.
    pub fn modify<F>(&self, id: &str, f: F) -> Result<Inspection>
    where
        F: FnOnce(&mut Inspection) -> Result<()>,
    {
        let mut inspections = self.load_all();
        let Some(inspection) = inspections.iter_mut().find(|i| i.id == id) else {
            bail!("No inspection with id {}", id);
        };
        f(inspection)?;
        let updated = inspection.clone();
        self.save_all(&inspections)?;
        Ok(updated)
    }

    pub fn update_cell(
        &self,
        id: &str,
        row: usize,
        column: usize,
        value: Option<f64>,
        image_path: Option<&str>,
    ) -> Result<Inspection> {
        self.modify(id, |inspection| {
            inspection.update_cell(row, column, value, image_path)
        })
    }

    pub fn add_row(&self, id: &str) -> Result<Inspection> {
        self.modify(id, |inspection| {
            inspection.add_row();
            Ok(())
        })
    }
}
