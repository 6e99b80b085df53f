//! Dataset loading
//!
//! A dataset is two record sets joinable on `event_id`: events (subject,
//! time, type) and measurements (arbitrary fields per event). Loaders read
//! the raw records; [`Dataset::into_event_table`] filters null rows, joins
//! measurements onto their events and produces the sorted [`EventTable`].

use crate::table::{EventRecord, EventTable};
use crate::types::{parse_timestamp, FieldValue, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub mod json;

pub use json::JsonDatasetLoader;

/// Common trait for dataset loaders
pub trait DatasetLoader {
    /// Load the raw event and measurement records stored at `path`
    fn load(&self, path: &Path) -> Result<Dataset>;
}

/// A raw event record; every field may be null
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event_id: Option<u64>,
    #[serde(default)]
    pub subject_id: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
}

impl RawEvent {
    fn is_null(&self) -> bool {
        self.event_id.is_none()
            && self.subject_id.is_none()
            && self.timestamp.is_none()
            && self.event_type.is_none()
    }
}

/// A raw measurement record attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    #[serde(default)]
    pub event_id: Option<u64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<FieldValue>>,
}

impl RawMeasurement {
    fn is_null(&self) -> bool {
        self.event_id.is_none() && self.fields.values().all(Option::is_none)
    }
}

/// Raw records as loaded from storage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub events: Vec<RawEvent>,
    pub measurements: Vec<RawMeasurement>,
}

impl Dataset {
    /// Join, filter and sort into an event table
    ///
    /// Each event yields one row per matching measurement, or a single row
    /// without fields if it has none. Events missing a subject or timestamp
    /// are skipped with a warning. Fails with `InputError` if nothing is left.
    pub fn into_event_table(self) -> Result<EventTable> {
        let total_events = self.events.len();
        let events: Vec<RawEvent> = self.events.into_iter().filter(|e| !e.is_null()).collect();
        let measurements: Vec<RawMeasurement> =
            self.measurements.into_iter().filter(|m| !m.is_null()).collect();
        if events.len() < total_events {
            log::debug!("Dropped {} all-null event rows", total_events - events.len());
        }

        let mut by_event: HashMap<u64, Vec<&RawMeasurement>> = HashMap::new();
        for m in &measurements {
            if let Some(id) = m.event_id {
                by_event.entry(id).or_default().push(m);
            }
        }

        let mut records = Vec::with_capacity(events.len());
        let mut incomplete = 0usize;
        for event in &events {
            let (Some(subject_id), Some(raw_ts)) = (event.subject_id, event.timestamp.as_deref()) else {
                incomplete += 1;
                continue;
            };
            let timestamp = parse_timestamp(raw_ts)?;
            let base = EventRecord::new(
                subject_id,
                timestamp,
                event.event_type.clone().unwrap_or_default(),
            );

            match event.event_id.and_then(|id| by_event.get(&id)) {
                Some(matches) => {
                    for m in matches {
                        let mut record = base.clone();
                        record.fields = m
                            .fields
                            .iter()
                            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
                            .collect();
                        records.push(record);
                    }
                }
                None => records.push(base),
            }
        }

        if incomplete > 0 {
            log::warn!(
                "Skipped {} events without a subject_id or timestamp",
                incomplete
            );
        }
        log::debug!(
            "Joined {} events with {} measurements into {} rows",
            events.len(),
            measurements.len(),
            records.len()
        );

        EventTable::new(records)
    }
}
