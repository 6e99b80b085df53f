//! Predicate column generation
//!
//! Turns the `[predicates]` section of a task configuration into boolean
//! columns on an [`EventTable`]. Plain predicates compare one field per event;
//! derived predicates combine other predicates with OR / AND and may be
//! declared in any order.

use crate::config::PredicateConfig;
use crate::table::{EventRecord, EventTable};
use crate::types::{QueryError, Result};
use std::collections::BTreeMap;

/// Append one column per configured predicate to `table`
///
/// Plain predicates are added first (in name order), then derived predicates
/// as soon as everything they reference is available. Unknown references,
/// reference cycles and fields absent from every event are configuration
/// errors.
pub fn generate(predicates: &BTreeMap<String, PredicateConfig>, mut table: EventTable) -> Result<EventTable> {
    // (name, referenced predicates, true for OR)
    let mut derived: Vec<(&String, &Vec<String>, bool)> = Vec::new();

    for (name, config) in predicates {
        let values: Vec<bool> = match config {
            PredicateConfig::Value { column, value } => {
                check_column(&table, name, column)?;
                table
                    .records()
                    .iter()
                    .map(|r| r.field(column).is_some_and(|v| v.matches(value)))
                    .collect()
            }
            PredicateConfig::Range { column, min, max } => {
                check_column(&table, name, column)?;
                table
                    .records()
                    .iter()
                    .map(|r| in_range(r, column, *min, *max))
                    .collect()
            }
            PredicateConfig::AnyOf { any } => {
                derived.push((name, any, true));
                continue;
            }
            PredicateConfig::AllOf { all } => {
                derived.push((name, all, false));
                continue;
            }
        };
        log_column(name, &values);
        table.add_predicate(name.clone(), values)?;
    }

    // Resolve derived predicates in dependency order
    while !derived.is_empty() {
        let before = derived.len();
        let mut pending = Vec::new();

        for (name, refs, any) in derived {
            for r in refs {
                if !predicates.contains_key(r) && !table.predicates().contains(r) {
                    return Err(QueryError::ConfigurationError(format!(
                        "Predicate '{}' references unknown predicate '{}'",
                        name, r
                    )));
                }
            }
            if refs.is_empty() {
                return Err(QueryError::ConfigurationError(format!(
                    "Predicate '{}' combines no predicates",
                    name
                )));
            }

            let columns: Option<Vec<&[bool]>> =
                refs.iter().map(|r| table.column_by_name(r)).collect();
            let Some(columns) = columns else {
                pending.push((name, refs, any));
                continue;
            };

            let values: Vec<bool> = (0..table.len())
                .map(|row| {
                    if any {
                        columns.iter().any(|c| c[row])
                    } else {
                        columns.iter().all(|c| c[row])
                    }
                })
                .collect();
            log_column(name, &values);
            table.add_predicate(name.clone(), values)?;
        }

        if pending.len() == before {
            let names: Vec<&str> = pending.iter().map(|(n, _, _)| n.as_str()).collect();
            return Err(QueryError::ConfigurationError(format!(
                "Cyclic predicate definitions: {}",
                names.join(", ")
            )));
        }
        derived = pending;
    }

    Ok(table)
}

fn check_column(table: &EventTable, predicate: &str, column: &str) -> Result<()> {
    if table.records().iter().any(|r| r.has_field(column)) {
        Ok(())
    } else {
        Err(QueryError::ConfigurationError(format!(
            "Predicate '{}' references field '{}' which is absent from the events",
            predicate, column
        )))
    }
}

fn in_range(record: &EventRecord, column: &str, min: Option<f64>, max: Option<f64>) -> bool {
    let Some(value) = record.field(column).and_then(|v| v.as_f64()) else {
        return false;
    };
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value < m)
}

fn log_column(name: &str, values: &[bool]) {
    let set = values.iter().filter(|v| **v).count();
    log::debug!("Predicate '{}' set on {} of {} rows", name, set, values.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use chrono::NaiveDate;

    fn table() -> EventTable {
        let t = |h| {
            NaiveDate::from_ymd_opt(2021, 1, 1)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        };
        EventTable::new(vec![
            EventRecord::new(1, t(0), "ADMISSION"),
            EventRecord::new(1, t(1), "LAB").with_field("lactate", FieldValue::Float(3.5)),
            EventRecord::new(1, t(2), "LAB").with_field("lactate", FieldValue::Float(1.0)),
            EventRecord::new(1, t(3), "DEATH"),
        ])
        .unwrap()
    }

    #[test]
    fn test_plain_and_derived_predicates() {
        let mut predicates = BTreeMap::new();
        predicates.insert(
            "high_lactate".to_string(),
            PredicateConfig::Range {
                column: "lactate".into(),
                min: Some(2.0),
                max: None,
            },
        );
        predicates.insert("admission".to_string(), PredicateConfig::event_type("ADMISSION"));
        predicates.insert("death".to_string(), PredicateConfig::event_type("DEATH"));
        // Declared before the predicate it depends on alphabetically
        predicates.insert(
            "any_event".to_string(),
            PredicateConfig::AnyOf {
                any: vec!["admission".into(), "bad_outcome".into()],
            },
        );
        predicates.insert(
            "bad_outcome".to_string(),
            PredicateConfig::AnyOf {
                any: vec!["death".into(), "high_lactate".into()],
            },
        );

        let table = generate(&predicates, table()).unwrap();
        assert_eq!(table.column_by_name("high_lactate").unwrap(), &[false, true, false, false]);
        assert_eq!(table.column_by_name("bad_outcome").unwrap(), &[false, true, false, true]);
        assert_eq!(table.column_by_name("any_event").unwrap(), &[true, true, false, true]);
        // Plain predicates by name, then derived ones as they resolve
        assert_eq!(
            table.predicates().names(),
            &["admission", "death", "high_lactate", "bad_outcome", "any_event"]
        );
    }

    #[test]
    fn test_missing_field_is_configuration_error() {
        let mut predicates = BTreeMap::new();
        predicates.insert(
            "sepsis".to_string(),
            PredicateConfig::value("diagnosis", FieldValue::Text("A41".into())),
        );
        let err = generate(&predicates, table()).unwrap_err();
        assert!(matches!(err, QueryError::ConfigurationError(ref m) if m.contains("diagnosis")));
    }

    #[test]
    fn test_cycle_and_unknown_reference() {
        let mut predicates = BTreeMap::new();
        predicates.insert("a".to_string(), PredicateConfig::AllOf { all: vec!["b".into()] });
        predicates.insert("b".to_string(), PredicateConfig::AllOf { all: vec!["a".into()] });
        let err = generate(&predicates, table()).unwrap_err();
        assert!(err.to_string().contains("Cyclic"));

        let mut predicates = BTreeMap::new();
        predicates.insert("a".to_string(), PredicateConfig::AnyOf { any: vec!["nope".into()] });
        let err = generate(&predicates, table()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
