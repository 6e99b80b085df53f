//! Trigger selection
//!
//! The trigger decides which events become root anchors. Each qualifying
//! event yields its own anchor, so a subject with several triggering events
//! contributes several independent instances.

use crate::anchor::{AnchorRow, AnchorSet};
use crate::table::EventTable;
use crate::types::{QueryError, Result, SubjectId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Root-level trigger condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// One predicate must be set on the event
    Single(String),
    /// At least one predicate must be set on the event
    AnyOf(Vec<String>),
    /// Every predicate must be set on the event
    AllOf(Vec<String>),
}

impl Trigger {
    /// Predicate names the trigger references
    pub fn predicates(&self) -> Vec<&str> {
        match self {
            Trigger::Single(p) => vec![p.as_str()],
            Trigger::AnyOf(ps) | Trigger::AllOf(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Single(p) => write!(f, "'{}'", p),
            Trigger::AnyOf(ps) => write!(f, "any of [{}]", ps.join(", ")),
            Trigger::AllOf(ps) => write!(f, "all of [{}]", ps.join(", ")),
        }
    }
}

/// Build the root anchor set for a trigger
///
/// Conditions are applied in sequence for `Single` and `AllOf`; after each
/// one the number of subjects and rows it removed is logged. `AnyOf` is a
/// single disjunctive condition. Fails with `EmptyResultError` when no event
/// qualifies.
pub fn select_anchors(trigger: &Trigger, table: &EventTable, verbose: bool) -> Result<AnchorSet> {
    let column = |name: &str| {
        table.column_by_name(name).ok_or_else(|| {
            QueryError::ConfigurationError(format!(
                "Trigger references predicate '{}' which is not defined",
                name
            ))
        })
    };

    let mut surviving: Vec<usize> = (0..table.len()).collect();

    let conditions: Vec<(String, Vec<&[bool]>)> = match trigger {
        Trigger::Single(p) => vec![(format!("trigger event '{}'", p), vec![column(p)?])],
        Trigger::AllOf(ps) => ps
            .iter()
            .map(|p| -> Result<(String, Vec<&[bool]>)> {
                Ok((format!("trigger condition '{}'", p), vec![column(p)?]))
            })
            .collect::<Result<_>>()?,
        Trigger::AnyOf(ps) => vec![(
            format!("trigger condition {}", trigger),
            ps.iter().map(|p| column(p)).collect::<Result<_>>()?,
        )],
    };

    for (description, columns) in conditions {
        let (kept, dropped): (Vec<usize>, Vec<usize>) = surviving
            .into_iter()
            .partition(|&row| columns.iter().any(|c| c[row]));
        if !dropped.is_empty() {
            let subjects: BTreeSet<SubjectId> =
                dropped.iter().map(|&row| table.records()[row].subject_id).collect();
            let message = format!(
                "{} subjects ({} rows) were excluded due to {}",
                subjects.len(),
                dropped.len(),
                description
            );
            if verbose {
                log::info!("{}", message);
            } else {
                log::debug!("{}", message);
            }
        }
        surviving = kept;
    }

    if surviving.is_empty() {
        return Err(QueryError::EmptyResultError(trigger.to_string()));
    }

    // Ordinal = position among the subject's qualifying events
    let mut ordinals: BTreeMap<SubjectId, u32> = BTreeMap::new();
    let rows: Vec<AnchorRow> = surviving
        .into_iter()
        .map(|row| {
            let record = &table.records()[row];
            let ordinal = ordinals.entry(record.subject_id).or_insert(0);
            let anchor = AnchorRow::root(record.subject_id, record.timestamp, *ordinal);
            *ordinal += 1;
            anchor
        })
        .collect();

    let anchors = AnchorSet::new(rows);
    log::debug!(
        "Trigger {} selected {} anchors across {} subjects",
        trigger,
        anchors.len(),
        anchors.num_subjects()
    );
    Ok(anchors)
}
