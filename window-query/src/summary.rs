//! Per-window predicate summaries

use crate::table::EventTable;
use serde_json::{Map, Value};
use std::ops::Range;

/// Occurrence count of every predicate inside one resolved window
///
/// Counts are aligned with the event table's predicate set. Aggregation is
/// always a count of rows with the predicate set, never a boolean union.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowSummary {
    counts: Vec<u32>,
}

impl WindowSummary {
    /// Count predicate occurrences over a range of table rows
    pub fn aggregate(table: &EventTable, rows: Range<usize>) -> Self {
        let counts = (0..table.predicates().len())
            .map(|p| {
                table.column(p)[rows.clone()]
                    .iter()
                    .filter(|set| **set)
                    .count() as u32
            })
            .collect();
        Self { counts }
    }

    pub fn from_counts(counts: Vec<u32>) -> Self {
        Self { counts }
    }

    /// Count for a predicate index
    pub fn count(&self, predicate: usize) -> u32 {
        self.counts.get(predicate).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// JSON object keyed `is_<predicate>`
    pub fn to_json(&self, predicates: &[String]) -> Value {
        let map: Map<String, Value> = predicates
            .iter()
            .zip(&self.counts)
            .map(|(name, count)| (format!("is_{}", name), Value::from(*count)))
            .collect();
        Value::Object(map)
    }
}
