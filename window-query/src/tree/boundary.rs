//! Window boundary rules
//!
//! Each window derives its interval from its parent's resolved anchor. Rules
//! are evaluated per anchor row, because each subject's anchor and event
//! history differ.

use crate::table::EventTable;
use crate::types::{format_duration, Timestamp};
use chrono::Duration;
use std::fmt;
use std::ops::Range;

/// How a window's start is derived from the anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRule {
    /// Start at the anchor itself
    Anchor,
    /// Start at `anchor + offset` (offset may be negative)
    Offset(Duration),
    /// Start at the first event with the predicate set at or after the anchor
    NextPredicate(usize),
}

/// How a window's end is derived from its start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndRule {
    /// End point at `start + duration`; negative durations look backwards
    Duration(Duration),
    /// End at the first event with the predicate set strictly after the start
    NextPredicate(usize),
    /// Window extends past the subject's final event
    EndOfRecord,
}

/// Occurrence bounds for an `includes` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountConstraint {
    pub predicate: usize,
    pub min: u32,
    pub max: Option<u32>,
}

impl CountConstraint {
    pub fn is_satisfied(&self, count: u32) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

/// A window interval resolved for one anchor row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    /// Inclusive lower bound
    pub start: Timestamp,
    /// Exclusive upper bound; `None` means unbounded
    pub end: Option<Timestamp>,
    /// The node's own resolved timestamp, which becomes its children's anchor
    pub timestamp: Timestamp,
}

impl StartRule {
    /// Resolve the start for an anchor within a subject's rows
    pub fn resolve(&self, table: &EventTable, rows: &Range<usize>, anchor: Timestamp) -> Option<Timestamp> {
        match self {
            StartRule::Anchor => Some(anchor),
            StartRule::Offset(offset) => anchor.checked_add_signed(*offset),
            StartRule::NextPredicate(p) => {
                let candidates = table.rows_between(rows.clone(), anchor, None);
                candidates
                    .into_iter()
                    .find(|&row| table.is_set(*p, row))
                    .map(|row| table.timestamp(row))
            }
        }
    }
}

impl EndRule {
    /// Resolve the window for a start within a subject's rows
    ///
    /// Returns `None` when the rule cannot be satisfied (the predicate never
    /// occurs after `start`, or the arithmetic overflows).
    pub fn resolve(&self, table: &EventTable, rows: &Range<usize>, start: Timestamp) -> Option<ResolvedWindow> {
        match self {
            EndRule::Duration(d) => {
                let end = start.checked_add_signed(*d)?;
                let (lo, hi) = if end < start { (end, start) } else { (start, end) };
                Some(ResolvedWindow {
                    start: lo,
                    end: Some(hi),
                    timestamp: end,
                })
            }
            EndRule::NextPredicate(p) => {
                let after = table.rows_between(rows.clone(), start, None);
                let end = after
                    .into_iter()
                    .filter(|&row| table.timestamp(row) > start)
                    .find(|&row| table.is_set(*p, row))
                    .map(|row| table.timestamp(row))?;
                Some(ResolvedWindow {
                    start,
                    end: Some(end),
                    timestamp: end,
                })
            }
            EndRule::EndOfRecord => {
                let last = rows
                    .clone()
                    .last()
                    .map(|row| table.timestamp(row))
                    .unwrap_or(start);
                Some(ResolvedWindow {
                    start,
                    end: None,
                    timestamp: last.max(start),
                })
            }
        }
    }
}

/// Renders rules with predicate indices replaced by names
pub(crate) struct RuleDisplay<'a, R> {
    pub rule: &'a R,
    pub predicates: &'a [String],
}

impl fmt::Display for RuleDisplay<'_, StartRule> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rule {
            StartRule::Anchor => write!(f, "anchor"),
            StartRule::Offset(d) => write!(f, "anchor{:+}", OffsetDisplay(*d)),
            StartRule::NextPredicate(p) => write!(f, "next {}", self.predicates[*p]),
        }
    }
}

impl fmt::Display for RuleDisplay<'_, EndRule> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rule {
            EndRule::Duration(d) => write!(f, "start{:+}", OffsetDisplay(*d)),
            EndRule::NextPredicate(p) => write!(f, "next {}", self.predicates[*p]),
            EndRule::EndOfRecord => write!(f, "end of record"),
        }
    }
}

struct OffsetDisplay(Duration);

impl fmt::Display for OffsetDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `{:+}` asks for an explicit sign on non-negative offsets
        if f.sign_plus() && self.0 >= Duration::zero() {
            write!(f, "+")?;
        }
        write!(f, "{}", format_duration(self.0))
    }
}
