//! Anchor rows threaded through window evaluation

use crate::types::{SubjectId, Timestamp};
use chrono::Duration;

/// Identity of one root anchor instance
///
/// `ordinal` separates several triggering events of the same subject at the
/// same timestamp, so simultaneous triggers stay independent instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnchorKey {
    pub subject_id: SubjectId,
    pub root_timestamp: Timestamp,
    pub ordinal: u32,
}

/// One live window instance at the current tree depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorRow {
    pub key: AnchorKey,
    /// Time already consumed by ancestors, relative to the root timestamp
    pub offset: Duration,
}

impl AnchorRow {
    /// A root anchor at a triggering event
    pub fn root(subject_id: SubjectId, timestamp: Timestamp, ordinal: u32) -> Self {
        Self {
            key: AnchorKey {
                subject_id,
                root_timestamp: timestamp,
                ordinal,
            },
            offset: Duration::zero(),
        }
    }

    pub fn subject_id(&self) -> SubjectId {
        self.key.subject_id
    }

    /// Current anchor timestamp
    pub fn anchor(&self) -> Timestamp {
        self.key.root_timestamp + self.offset
    }

    /// The same instance re-anchored at `timestamp`
    pub fn reanchored(&self, timestamp: Timestamp) -> Self {
        Self {
            key: self.key,
            offset: timestamp - self.key.root_timestamp,
        }
    }
}

/// Anchor rows sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorSet {
    rows: Vec<AnchorRow>,
}

impl AnchorSet {
    pub fn new(mut rows: Vec<AnchorRow>) -> Self {
        rows.sort_by_key(|r| r.key);
        Self { rows }
    }

    pub fn rows(&self) -> &[AnchorRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_subjects(&self) -> usize {
        self.by_subject().len()
    }

    /// Rows grouped into contiguous per-subject partitions
    pub fn by_subject(&self) -> Vec<(SubjectId, &[AnchorRow])> {
        self.rows
            .chunk_by(|a, b| a.subject_id() == b.subject_id())
            .map(|chunk| (chunk[0].subject_id(), chunk))
            .collect()
    }
}
