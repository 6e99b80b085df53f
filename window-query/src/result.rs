//! Result assembly
//!
//! Flattens an [`EvaluatedTree`] into one wide table keyed by
//! `(subject_id, root anchor)`: the root timestamp, every window's resolved
//! timestamp and summary (in tree preorder), and the label if a label window
//! exists.

use crate::engine::EvaluatedTree;
use crate::summary::WindowSummary;
use crate::tree::WindowTree;
use crate::types::{QueryError, Result, SubjectId, Timestamp};
use serde_json::{Map, Value};

/// Output timestamp format
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One window's columns for one result row
#[derive(Debug, Clone, PartialEq)]
pub struct WindowColumns {
    pub timestamp: Timestamp,
    pub summary: WindowSummary,
}

/// One surviving root anchor instance
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub subject_id: SubjectId,
    pub trigger_timestamp: Timestamp,
    /// Windows in tree preorder
    pub windows: Vec<WindowColumns>,
    pub label: Option<u32>,
}

/// The assembled wide result table
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub root_name: String,
    /// Window names in tree preorder
    pub window_names: Vec<String>,
    pub predicates: Vec<String>,
    pub has_label: bool,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    /// Column names in output order
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec!["subject_id".to_string(), format!("{}/timestamp", self.root_name)];
        columns.extend(self.window_names.iter().map(|n| format!("{}/timestamp", n)));
        columns.extend(self.window_names.iter().map(|n| format!("{}/window_summary", n)));
        if self.has_label {
            columns.push("label".to_string());
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a window by name
    pub fn window_index(&self, name: &str) -> Option<usize> {
        self.window_names.iter().position(|n| n == name)
    }

    /// Summary of a named window on a row
    pub fn summary<'a>(&self, row: &'a ResultRow, window: &str) -> Option<&'a WindowSummary> {
        self.window_index(window).map(|idx| &row.windows[idx].summary)
    }

    /// Count of a predicate in a named window on a row
    pub fn count(&self, row: &ResultRow, window: &str, predicate: &str) -> Option<u32> {
        let p = self.predicates.iter().position(|n| n == predicate)?;
        self.summary(row, window).map(|s| s.count(p))
    }

    /// Render a row as a JSON object with the table's column names
    pub fn row_to_json(&self, row: &ResultRow) -> Value {
        let columns = self.columns();
        let mut values: Vec<Value> = vec![
            Value::from(row.subject_id),
            Value::from(row.trigger_timestamp.format(TIMESTAMP_FORMAT).to_string()),
        ];
        values.extend(
            row.windows
                .iter()
                .map(|w| Value::from(w.timestamp.format(TIMESTAMP_FORMAT).to_string())),
        );
        values.extend(row.windows.iter().map(|w| w.summary.to_json(&self.predicates)));
        if self.has_label {
            values.push(row.label.map(Value::from).unwrap_or(Value::Null));
        }

        let map: Map<String, Value> = columns.into_iter().zip(values).collect();
        Value::Object(map)
    }

    /// All rows as a JSON array
    pub fn to_json(&self) -> Value {
        Value::Array(self.rows.iter().map(|r| self.row_to_json(r)).collect())
    }
}

/// Flatten an evaluated tree into the result table
///
/// Only instances that resolved at every window are kept; the number of
/// dropped instances is logged.
pub fn assemble(tree: &WindowTree, evaluated: &EvaluatedTree, verbose: bool) -> Result<ResultTable> {
    let window_names: Vec<String> = tree.nodes().iter().map(|n| n.name.clone()).collect();
    let evaluated_names: Vec<&str> = evaluated.nodes().iter().map(|n| n.name.as_str()).collect();
    if window_names != evaluated_names {
        return Err(QueryError::InputError(format!(
            "Evaluation covers windows [{}] but the tree has [{}]",
            evaluated_names.join(", "),
            window_names.join(", ")
        )));
    }
    let label = tree.label().and_then(|(node, predicate)| {
        window_names
            .iter()
            .position(|n| *n == node.name)
            .map(|idx| (idx, predicate))
    });

    let joined = evaluated.joined();
    let total = joined.len();
    let rows: Vec<ResultRow> = joined
        .into_iter()
        .filter_map(|row| {
            let windows: Option<Vec<WindowColumns>> = row
                .windows
                .iter()
                .map(|w| {
                    w.map(|o| WindowColumns {
                        timestamp: o.timestamp,
                        summary: o.summary.clone(),
                    })
                })
                .collect();
            let windows = windows?;
            let label = label.map(|(idx, predicate)| windows[idx].summary.count(predicate));
            Some(ResultRow {
                subject_id: row.key.subject_id,
                trigger_timestamp: row.key.root_timestamp,
                windows,
                label,
            })
        })
        .collect();

    let dropped = total - rows.len();
    if dropped > 0 {
        let message = format!(
            "{} of {} trigger instances did not satisfy every window",
            dropped, total
        );
        if verbose {
            log::info!("{}", message);
        } else {
            log::debug!("{}", message);
        }
    }

    Ok(ResultTable {
        root_name: tree.root_name.clone(),
        window_names,
        predicates: tree.predicates.clone(),
        has_label: label.is_some(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaskConfig, WindowConfig};
    use crate::engine::{QueryEngine, QueryOptions};
    use crate::table::{EventRecord, EventTable};
    use crate::trigger::select_anchors;
    use chrono::NaiveDate;

    fn ts(hour: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn assemble_for(config: TaskConfig) -> ResultTable {
        let table = EventTable::new(vec![
            EventRecord::new(1, ts(0), "ADMISSION"),
            EventRecord::new(1, ts(6), "DEATH"),
            EventRecord::new(2, ts(0), "ADMISSION"),
            EventRecord::new(2, ts(8), "DISCHARGE"),
        ])
        .unwrap()
        .with_predicate("admission", vec![true, false, true, false])
        .unwrap()
        .with_predicate("death", vec![false, true, false, false])
        .unwrap()
        .with_predicate("discharge", vec![false, false, false, true])
        .unwrap();
        let tree = WindowTree::build(&config, table.predicates()).unwrap();
        let anchors = select_anchors(&tree.trigger, &table, false).unwrap();
        let evaluated = QueryEngine::new(&table, QueryOptions::new())
            .run(&tree, anchors)
            .unwrap();
        assemble(&tree, &evaluated, false).unwrap()
    }

    #[test]
    fn test_columns_in_preorder() {
        let result = assemble_for(
            TaskConfig::new("admission")
                .with_root_name("admit")
                .with_window(WindowConfig::new("gap", "2h").with_child(WindowConfig::new("target", "24h").with_label("death")))
                .with_window(WindowConfig::new("input", "-1h")),
        );
        assert_eq!(
            result.columns(),
            vec![
                "subject_id",
                "admit/timestamp",
                "gap/timestamp",
                "target/timestamp",
                "input/timestamp",
                "gap/window_summary",
                "target/window_summary",
                "input/window_summary",
                "label",
            ]
        );
    }

    #[test]
    fn test_label_matches_summary_and_defaults_to_zero() {
        let result = assemble_for(
            TaskConfig::new("admission")
                .with_window(WindowConfig::new("target", "24h").with_label("death")),
        );
        assert_eq!(result.len(), 2);
        for row in &result.rows {
            assert_eq!(row.label, result.count(row, "target", "death"));
        }
        assert_eq!(result.rows[0].label, Some(1));
        assert_eq!(result.rows[1].label, Some(0));

        let json = result.row_to_json(&result.rows[0]);
        assert_eq!(json["label"], 1);
        assert_eq!(json["target/window_summary"]["is_death"], 1);
        assert_eq!(json["trigger/timestamp"], "2021-01-01T00:00:00");
        assert_eq!(json["target/timestamp"], "2021-01-02T00:00:00");
    }

    #[test]
    fn test_incomplete_instances_dropped() {
        let result = assemble_for(
            TaskConfig::new("admission")
                .with_window(WindowConfig::until("stay", "discharge"))
                .with_window(WindowConfig::new("input", "1h")),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0].subject_id, 2);
        assert!(!result.has_label);
        assert!(!result.columns().contains(&"label".to_string()));
    }

    #[test]
    fn test_json_keys_follow_column_order() {
        let table = ResultTable {
            root_name: "trigger".to_string(),
            window_names: vec!["input".to_string()],
            predicates: vec!["zeta".to_string(), "alpha".to_string()],
            has_label: true,
            rows: vec![ResultRow {
                subject_id: 1,
                trigger_timestamp: ts(0),
                windows: vec![WindowColumns {
                    timestamp: ts(10),
                    summary: WindowSummary::from_counts(vec![2, 1]),
                }],
                label: Some(1),
            }],
        };

        let json = table.row_to_json(&table.rows[0]);
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, table.columns().iter().collect::<Vec<_>>());

        let summary_keys: Vec<&String> = json["input/window_summary"]
            .as_object()
            .unwrap()
            .keys()
            .collect();
        assert_eq!(summary_keys, vec!["is_zeta", "is_alpha"]);
        assert_eq!(json["input/window_summary"]["is_zeta"], 2);
    }
}
