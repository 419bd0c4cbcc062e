//! Small key-value persistence for app state.
//!
//! Values are strings (usually JSON documents). `JsonFileStore` keeps every
//! key in one JSON object on disk; `MemoryStore` is for tests and
//! short-lived sessions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::log;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// A store backed by a single JSON object file.
///
/// Every write reads the file, updates one key and writes it back.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Store {} is not a JSON object", self.path.display()))
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(map)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write store {}", self.path.display()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_all()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&map)?;
        log(&format!("Store: wrote {} ({} bytes)", key, value.len()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(&map)?;
            log(&format!("Store: removed {}", key));
        }
        Ok(())
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

const SETTINGS_KEY: &str = "settings";

/// User preferences for the capture flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Move to the next cell after a reading is confirmed
    #[serde(default = "default_auto_advance")]
    pub auto_advance: bool,
    /// Grid layout preselected for new inspections
    #[serde(default = "default_grid_layout")]
    pub default_grid_layout: String,
}

fn default_auto_advance() -> bool {
    true
}

fn default_grid_layout() -> String {
    "3-column".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_advance: default_auto_advance(),
            default_grid_layout: default_grid_layout(),
        }
    }
}

impl AppSettings {
    /// Reads the saved settings; `None` if nothing usable is stored.
    pub fn load(store: &dyn KeyValueStore) -> Option<Self> {
        let raw = match store.get(SETTINGS_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                log(&format!("Failed to read settings: {:#}", e));
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                log(&format!("Ignoring unreadable settings: {}", e));
                None
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(SETTINGS_KEY, &serde_json::to_string(self)?)
    }
}
