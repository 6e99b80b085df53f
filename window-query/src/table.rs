//! Predicate-annotated event table
//!
//! The event table is the read-only input of every query. Rows are sorted by
//! `(subject_id, timestamp, event_type)` exactly once, when the table is
//! constructed; every consumer relies on that ordering without re-checking it.
//! Predicate columns are named explicitly through a [`PredicateSet`].

use crate::types::{FieldValue, QueryError, Result, SubjectId, Timestamp};
use std::collections::BTreeMap;
use std::ops::Range;

/// One event occurrence for one subject
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub subject_id: SubjectId,
    pub timestamp: Timestamp,
    pub event_type: String,
    /// Event-specific fields folded in from measurement records
    pub fields: BTreeMap<String, FieldValue>,
}

impl EventRecord {
    pub fn new(subject_id: SubjectId, timestamp: Timestamp, event_type: impl Into<String>) -> Self {
        Self {
            subject_id,
            timestamp,
            event_type: event_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder method: attach a field value
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a field by name; `event_type` resolves to the event type itself
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        if name == "event_type" {
            return Some(FieldValue::Text(self.event_type.clone()));
        }
        self.fields.get(name).cloned()
    }

    /// True if the named field exists on this record
    pub fn has_field(&self, name: &str) -> bool {
        name == "event_type" || self.fields.contains_key(name)
    }
}

/// Ordered list of predicate names carried alongside an event table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateSet {
    names: Vec<String>,
}

impl PredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of a predicate, if present
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn push(&mut self, name: String) {
        self.names.push(name);
    }
}

/// Time-sorted event table with boolean predicate columns
#[derive(Debug, Clone)]
pub struct EventTable {
    records: Vec<EventRecord>,
    predicates: PredicateSet,
    /// One column per predicate, aligned with `records`
    columns: Vec<Vec<bool>>,
    /// Contiguous row range for each subject, in subject order
    subjects: Vec<(SubjectId, Range<usize>)>,
}

impl EventTable {
    /// Build a table from unsorted records
    ///
    /// Sorts by `(subject_id, timestamp, event_type)`; the sort is stable so
    /// records that tie on all three keep their input order. Fails with
    /// `InputError` when there are no records.
    pub fn new(mut records: Vec<EventRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(QueryError::InputError(
                "Event table is empty".to_string(),
            ));
        }

        records.sort_by(|a, b| {
            (a.subject_id, a.timestamp, &a.event_type).cmp(&(b.subject_id, b.timestamp, &b.event_type))
        });

        let mut subjects: Vec<(SubjectId, Range<usize>)> = Vec::new();
        for (row, record) in records.iter().enumerate() {
            match subjects.last_mut() {
                Some((subject, range)) if *subject == record.subject_id => range.end = row + 1,
                _ => subjects.push((record.subject_id, row..row + 1)),
            }
        }

        log::debug!(
            "Event table built: {} rows across {} subjects",
            records.len(),
            subjects.len()
        );

        Ok(Self {
            records,
            predicates: PredicateSet::new(),
            columns: Vec::new(),
            subjects,
        })
    }

    /// Append a predicate column
    ///
    /// The column must have one entry per row and a name not already present.
    pub fn add_predicate(&mut self, name: impl Into<String>, values: Vec<bool>) -> Result<()> {
        let name = name.into();
        if values.len() != self.records.len() {
            return Err(QueryError::InputError(format!(
                "Predicate column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.records.len()
            )));
        }
        if self.predicates.contains(&name) {
            return Err(QueryError::InputError(format!(
                "Predicate column '{}' already exists",
                name
            )));
        }
        self.predicates.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Builder form of [`EventTable::add_predicate`]
    pub fn with_predicate(mut self, name: impl Into<String>, values: Vec<bool>) -> Result<Self> {
        self.add_predicate(name, values)?;
        Ok(self)
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn predicates(&self) -> &PredicateSet {
        &self.predicates
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Column of a predicate by index
    pub fn column(&self, predicate: usize) -> &[bool] {
        &self.columns[predicate]
    }

    /// Column of a predicate by name
    pub fn column_by_name(&self, name: &str) -> Option<&[bool]> {
        self.predicates.index_of(name).map(|idx| self.column(idx))
    }

    /// Whether a predicate is set on a row
    pub fn is_set(&self, predicate: usize, row: usize) -> bool {
        self.columns[predicate][row]
    }

    /// All subjects with their row ranges, in ascending subject order
    pub fn subjects(&self) -> &[(SubjectId, Range<usize>)] {
        &self.subjects
    }

    pub fn num_subjects(&self) -> usize {
        self.subjects.len()
    }

    /// Row range of a subject's events
    pub fn subject_rows(&self, subject_id: SubjectId) -> Option<Range<usize>> {
        self.subjects
            .binary_search_by_key(&subject_id, |(id, _)| *id)
            .ok()
            .map(|idx| self.subjects[idx].1.clone())
    }

    /// Timestamp of a row
    pub fn timestamp(&self, row: usize) -> Timestamp {
        self.records[row].timestamp
    }

    /// Rows of `rows` whose timestamp lies in `[start, end)`
    ///
    /// `end = None` means unbounded. `rows` must be a single subject's range,
    /// which is time-sorted by construction.
    pub fn rows_between(
        &self,
        rows: Range<usize>,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> Range<usize> {
        let slice = &self.records[rows.clone()];
        let lo = slice.partition_point(|r| r.timestamp < start);
        let hi = match end {
            Some(end) => slice.partition_point(|r| r.timestamp < end),
            None => slice.len(),
        };
        let hi = hi.max(lo);
        rows.start + lo..rows.start + hi
    }
}
