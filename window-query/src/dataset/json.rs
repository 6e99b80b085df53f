//! JSON dataset loader
//!
//! Reads a dataset directory containing:
//! - `events.json`: array of `{event_id, subject_id, timestamp, event_type}`
//! - `measurements.json` (optional): array of `{event_id, <field>: <value>, ...}`

use super::{Dataset, DatasetLoader, RawEvent, RawMeasurement};
use crate::types::{QueryError, Result};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const EVENTS_FILE: &str = "events.json";
pub const MEASUREMENTS_FILE: &str = "measurements.json";

/// Loads datasets stored as JSON arrays
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDatasetLoader;

impl JsonDatasetLoader {
    pub fn new() -> Self {
        Self
    }

    fn read_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let file = File::open(path).map_err(|e| {
            QueryError::InputError(format!("Failed to open {:?}: {}", path, e))
        })?;
        let records = serde_json::from_reader(BufReader::new(file))?;
        Ok(records)
    }
}

impl DatasetLoader for JsonDatasetLoader {
    fn load(&self, path: &Path) -> Result<Dataset> {
        log::info!("Loading dataset: {:?}", path);

        if !path.is_dir() {
            return Err(QueryError::InputError(format!(
                "Dataset directory not found: {:?}",
                path
            )));
        }

        let events: Vec<RawEvent> = Self::read_array(&path.join(EVENTS_FILE))?;

        let measurements_path = path.join(MEASUREMENTS_FILE);
        let measurements: Vec<RawMeasurement> = if measurements_path.exists() {
            Self::read_array(&measurements_path)?
        } else {
            log::debug!("No {} in {:?}", MEASUREMENTS_FILE, path);
            Vec::new()
        };

        log::info!(
            "Dataset loaded: {} events, {} measurements",
            events.len(),
            measurements.len()
        );
        Ok(Dataset {
            events,
            measurements,
        })
    }
}
