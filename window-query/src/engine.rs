//! Window-tree query engine
//!
//! Evaluates a [`WindowTree`] against an [`EventTable`] for a set of root
//! anchors. For every node and every live anchor row the engine:
//!
//! 1. resolves the node's start and end from the row's own anchor
//! 2. selects the subject's events in the half-open interval `[start, end)`
//! 3. drops the row if an `includes` constraint fails
//! 4. drops the row if an `excluded` predicate occurs
//! 5. counts predicate occurrences into a [`WindowSummary`]
//! 6. recurses into the children with the surviving rows, re-anchored at the
//!    node's resolved timestamp
//!
//! A row dropped at a node prunes only that node's subtree; sibling branches
//! are evaluated from the same inherited rows.
//!
//! No subject's result depends on another subject's events, so the anchor
//! set is partitioned by subject and partitions are evaluated in parallel.

use crate::anchor::{AnchorKey, AnchorRow, AnchorSet};
use crate::summary::WindowSummary;
use crate::table::EventTable;
use crate::tree::{WindowNode, WindowTree};
use crate::types::{QueryError, Result, Timestamp};
use rayon::prelude::*;
use std::ops::{AddAssign, Range};
use std::time::{Duration, Instant};

/// Options controlling a query run
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Report progress and pruning at `info` instead of `debug` level
    pub verbose: bool,
    /// Abort the query if evaluation runs longer than this
    pub deadline: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: enable verbose progress logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Builder method: set an overall deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A node's result for one surviving anchor instance
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutcome {
    /// The row re-anchored at this node's resolved timestamp
    pub anchor: AnchorRow,
    /// The node's resolved timestamp
    pub timestamp: Timestamp,
    pub summary: WindowSummary,
}

/// Rows and subjects dropped at one node, by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub unresolved_rows: usize,
    pub unresolved_subjects: usize,
    pub includes_rows: usize,
    pub includes_subjects: usize,
    pub excludes_rows: usize,
    pub excludes_subjects: usize,
}

impl AddAssign for PruneStats {
    fn add_assign(&mut self, other: Self) {
        self.unresolved_rows += other.unresolved_rows;
        self.unresolved_subjects += other.unresolved_subjects;
        self.includes_rows += other.includes_rows;
        self.includes_subjects += other.includes_subjects;
        self.excludes_rows += other.excludes_rows;
        self.excludes_subjects += other.excludes_subjects;
    }
}

/// Evaluation result for one node and its subtree
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvaluation {
    pub name: String,
    /// Surviving instances, sorted by anchor key
    pub outcomes: Vec<WindowOutcome>,
    pub pruned: PruneStats,
    pub children: Vec<NodeEvaluation>,
}

impl NodeEvaluation {
    /// Outcome for an anchor instance, if it survived this node
    pub fn outcome(&self, key: &AnchorKey) -> Option<&WindowOutcome> {
        self.outcomes
            .binary_search_by_key(key, |o| o.anchor.key)
            .ok()
            .map(|idx| &self.outcomes[idx])
    }

    /// The rows this node hands to its children
    pub fn resolved_anchors(&self) -> Vec<AnchorRow> {
        self.outcomes.iter().map(|o| o.anchor).collect()
    }

    /// This node and its descendants in preorder
    pub fn preorder(&self) -> Vec<&NodeEvaluation> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.preorder());
        }
        out
    }

    /// Append another partition's results for the same node
    ///
    /// Partitions are merged in subject order, which keeps outcomes sorted.
    fn absorb(&mut self, other: NodeEvaluation) {
        self.outcomes.extend(other.outcomes);
        self.pruned += other.pruned;
        for (mine, theirs) in self.children.iter_mut().zip(other.children) {
            mine.absorb(theirs);
        }
    }
}

/// Evaluate one node against the anchor rows of a single subject
///
/// `rows` is the subject's row range in `table`. Each anchor row carries the
/// offset already consumed by its ancestors, so boundary rules compose
/// across levels.
pub fn evaluate(
    node: &WindowNode,
    anchors: &[AnchorRow],
    table: &EventTable,
    rows: &Range<usize>,
) -> NodeEvaluation {
    let mut pruned = PruneStats::default();
    let mut outcomes = Vec::with_capacity(anchors.len());

    for row in anchors {
        let window = node
            .start
            .resolve(table, rows, row.anchor())
            .and_then(|start| node.end.resolve(table, rows, start));
        let Some(window) = window else {
            pruned.unresolved_rows += 1;
            continue;
        };

        let selected = table.rows_between(rows.clone(), window.start, window.end);
        let summary = WindowSummary::aggregate(table, selected);

        if let Some(failed) = node
            .includes
            .iter()
            .find(|c| !c.is_satisfied(summary.count(c.predicate)))
        {
            log::trace!(
                "Subject {} dropped at '{}': {} occurrences of predicate #{}",
                row.subject_id(),
                node.name,
                summary.count(failed.predicate),
                failed.predicate
            );
            pruned.includes_rows += 1;
            continue;
        }

        if node.excludes.iter().any(|&p| summary.count(p) > 0) {
            pruned.excludes_rows += 1;
            continue;
        }

        outcomes.push(WindowOutcome {
            anchor: row.reanchored(window.timestamp),
            timestamp: window.timestamp,
            summary,
        });
    }

    // A partition holds a single subject
    pruned.unresolved_subjects = usize::from(pruned.unresolved_rows > 0);
    pruned.includes_subjects = usize::from(pruned.includes_rows > 0);
    pruned.excludes_subjects = usize::from(pruned.excludes_rows > 0);

    let next: Vec<AnchorRow> = outcomes.iter().map(|o| o.anchor).collect();
    let children = node
        .children
        .iter()
        .map(|child| evaluate(child, &next, table, rows))
        .collect();

    NodeEvaluation {
        name: node.name.clone(),
        outcomes,
        pruned,
        children,
    }
}

/// Full-tree evaluation result
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedTree {
    /// Root anchors the evaluation started from
    pub anchors: AnchorSet,
    /// Top-level window evaluations
    pub windows: Vec<NodeEvaluation>,
}

/// One root anchor instance joined with every node's outcome
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow<'a> {
    pub key: AnchorKey,
    /// Outcomes in node preorder; `None` where the instance was pruned
    pub windows: Vec<Option<&'a WindowOutcome>>,
}

impl JoinedRow<'_> {
    /// True if every node resolved for this instance
    pub fn is_complete(&self) -> bool {
        self.windows.iter().all(Option::is_some)
    }
}

impl EvaluatedTree {
    /// All node evaluations in preorder
    pub fn nodes(&self) -> Vec<&NodeEvaluation> {
        self.windows.iter().flat_map(|w| w.preorder()).collect()
    }

    /// Outer join of every node's outcomes on the root anchor key
    ///
    /// One row per root anchor, in key order, whether or not it survived.
    pub fn joined(&self) -> Vec<JoinedRow<'_>> {
        let nodes = self.nodes();
        self.anchors
            .rows()
            .iter()
            .map(|anchor| JoinedRow {
                key: anchor.key,
                windows: nodes.iter().map(|n| n.outcome(&anchor.key)).collect(),
            })
            .collect()
    }
}

/// Runs window trees over one event table
pub struct QueryEngine<'a> {
    table: &'a EventTable,
    options: QueryOptions,
}

impl<'a> QueryEngine<'a> {
    pub fn new(table: &'a EventTable, options: QueryOptions) -> Self {
        Self { table, options }
    }

    /// Evaluate every window of `tree` for the given root anchors
    ///
    /// Fails with `DeadlineExceeded` if the configured deadline passes before
    /// every partition has been evaluated; no partial result is returned.
    pub fn run(&self, tree: &WindowTree, anchors: AnchorSet) -> Result<EvaluatedTree> {
        let started = Instant::now();
        let partitions = anchors.by_subject();
        log::debug!(
            "Evaluating {} windows over {} partitions",
            tree.nodes().len(),
            partitions.len()
        );

        let results: Vec<Vec<NodeEvaluation>> = partitions
            .par_iter()
            .map(|(subject_id, anchor_rows)| -> Result<Vec<NodeEvaluation>> {
                self.check_deadline(started)?;
                let events = self.table.subject_rows(*subject_id).ok_or_else(|| {
                    QueryError::InputError(format!(
                        "Anchor subject {} has no events in the table",
                        subject_id
                    ))
                })?;
                Ok(tree
                    .windows
                    .iter()
                    .map(|w| evaluate(w, anchor_rows, self.table, &events))
                    .collect())
            })
            .collect::<Result<_>>()?;
        self.check_deadline(started)?;

        // Empty evaluations keep the tree's shape when there are no anchors
        let mut merged: Vec<NodeEvaluation> = tree
            .windows
            .iter()
            .map(|w| evaluate(w, &[], self.table, &(0..0)))
            .collect();
        for partition in results {
            for (mine, theirs) in merged.iter_mut().zip(partition) {
                mine.absorb(theirs);
            }
        }

        let evaluated = EvaluatedTree {
            anchors,
            windows: merged,
        };
        self.report(&evaluated);
        Ok(evaluated)
    }

    fn check_deadline(&self, started: Instant) -> Result<()> {
        match self.options.deadline {
            Some(deadline) if started.elapsed() >= deadline => {
                Err(QueryError::DeadlineExceeded(deadline))
            }
            _ => Ok(()),
        }
    }

    /// Log pruning per node once evaluation has finished
    fn report(&self, evaluated: &EvaluatedTree) {
        for node in evaluated.nodes() {
            let p = &node.pruned;
            let reasons = [
                (p.unresolved_subjects, p.unresolved_rows, "an unresolvable boundary"),
                (p.includes_subjects, p.includes_rows, "includes"),
                (p.excludes_subjects, p.excludes_rows, "excludes"),
            ];
            for (subjects, rows, reason) in reasons {
                if rows == 0 {
                    continue;
                }
                let message = format!(
                    "{} subjects ({} rows) were excluded at window '{}' due to {}",
                    subjects, rows, node.name, reason
                );
                if self.options.verbose {
                    log::info!("{}", message);
                } else {
                    log::debug!("{}", message);
                }
            }
            log::trace!("Window '{}' kept {} rows", node.name, node.outcomes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaskConfig, WindowConfig};
    use crate::table::EventRecord;
    use crate::trigger::select_anchors;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn ts(hour: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    /// Subject 1: admission at 0, lab at 5, lab at 10, discharge at 12
    /// Subject 2: admission at 0, discharge at 3
    fn table() -> EventTable {
        EventTable::new(vec![
            EventRecord::new(1, ts(0), "ADMISSION"),
            EventRecord::new(1, ts(5), "LAB"),
            EventRecord::new(1, ts(10), "LAB"),
            EventRecord::new(1, ts(12), "DISCHARGE"),
            EventRecord::new(2, ts(0), "ADMISSION"),
            EventRecord::new(2, ts(3), "DISCHARGE"),
        ])
        .unwrap()
        .with_predicate("admission", vec![true, false, false, false, true, false])
        .unwrap()
        .with_predicate("lab", vec![false, true, true, false, false, false])
        .unwrap()
        .with_predicate("discharge", vec![false, false, false, true, false, true])
        .unwrap()
    }

    fn run(config: TaskConfig) -> EvaluatedTree {
        let table = table();
        let tree = WindowTree::build(&config, table.predicates()).unwrap();
        let anchors = select_anchors(&tree.trigger, &table, false).unwrap();
        QueryEngine::new(&table, QueryOptions::new()).run(&tree, anchors).unwrap()
    }

    #[test]
    fn test_half_open_interval() {
        // [0h, 10h): lab at 5 counted, lab at exactly 10 belongs to the next window
        let evaluated = run(TaskConfig::new("admission")
            .with_window(WindowConfig::new("input", "10h").with_child(WindowConfig::new("next", "10h"))));

        let input = &evaluated.windows[0];
        let next = &input.children[0];
        assert_eq!(input.outcomes[0].summary.count(1), 1);
        assert_eq!(input.outcomes[0].timestamp, ts(10));
        assert_eq!(next.outcomes[0].summary.count(1), 1);
        assert_eq!(next.outcomes[0].summary.count(2), 1);
        assert_eq!(next.outcomes[0].timestamp, ts(20));
        assert_eq!(next.outcomes[0].anchor.offset, chrono::Duration::hours(20));
    }

    #[test]
    fn test_includes_prunes_only_own_subtree() {
        let evaluated = run(TaskConfig::new("admission")
            .with_window(
                WindowConfig::new("labs", "24h")
                    .including("lab")
                    .with_child(WindowConfig::new("after", "1h")),
            )
            .with_window(WindowConfig::until("stay", "discharge")));

        let labs = &evaluated.windows[0];
        let stay = &evaluated.windows[1];
        assert_eq!(labs.outcomes.len(), 1);
        assert_eq!(labs.pruned.includes_rows, 1);
        assert_eq!(labs.pruned.includes_subjects, 1);
        assert_eq!(labs.children[0].outcomes.len(), 1);
        // The sibling branch still sees subject 2
        assert_eq!(stay.outcomes.len(), 2);
        assert_eq!(stay.outcomes[1].timestamp, ts(3));

        let joined = evaluated.joined();
        assert_eq!(joined.len(), 2);
        assert!(joined[0].is_complete());
        assert!(!joined[1].is_complete());
        assert!(joined[1].windows[2].is_some());
    }

    #[test]
    fn test_excludes_and_unresolved_end() {
        let evaluated = run(TaskConfig::new("admission")
            .with_window(WindowConfig::new("early", "4h").excluding("discharge"))
            .with_window(
                WindowConfig::until("stay", "discharge")
                    .with_child(WindowConfig::until("readmit", "admission")),
            ));

        let early = &evaluated.windows[0];
        assert_eq!(early.outcomes.len(), 1);
        assert_eq!(early.outcomes[0].anchor.key.subject_id, 1);
        assert_eq!(early.pruned.excludes_rows, 1);

        let readmit = &evaluated.windows[1].children[0];
        assert!(readmit.outcomes.is_empty());
        assert_eq!(readmit.pruned.unresolved_rows, 2);
        assert_eq!(readmit.pruned.unresolved_subjects, 2);
    }

    #[test]
    fn test_children_never_reintroduce_rows() {
        let evaluated = run(TaskConfig::new("admission").with_window(
            WindowConfig::new("a", "24h")
                .including("lab")
                .with_child(WindowConfig::new("b", "-24h").with_child(WindowConfig::new("c", "1h"))),
        ));
        for node in evaluated.nodes() {
            let handed_down = node.resolved_anchors();
            for child in &node.children {
                for outcome in &child.outcomes {
                    assert!(handed_down.iter().any(|a| a.key == outcome.anchor.key));
                }
            }
        }
    }

    #[test]
    fn test_deadline_zero_fails() {
        let table = table();
        let config = TaskConfig::new("admission").with_window(WindowConfig::new("w", "1h"));
        let tree = WindowTree::build(&config, table.predicates()).unwrap();
        let anchors = select_anchors(&tree.trigger, &table, false).unwrap();
        let options = QueryOptions::new().with_deadline(Duration::ZERO);
        let err = QueryEngine::new(&table, options).run(&tree, anchors).unwrap_err();
        assert!(matches!(err, QueryError::DeadlineExceeded(_)));
    }

    #[test]
    fn test_summaries_match_direct_filtering() {
        let kinds = ["ADMISSION", "LAB", "VITALS"];
        let mut records = Vec::new();
        for subject in 1..=20u64 {
            for i in 0..12u64 {
                let hours = ((subject * 7 + i * 5) % 48) as i64;
                let kind = kinds[((subject + i) % 3) as usize];
                records.push(EventRecord::new(subject, ts(0) + chrono::Duration::hours(hours), kind));
            }
        }
        let mut table = EventTable::new(records).unwrap();
        for kind in kinds {
            let column: Vec<bool> = table.records().iter().map(|r| r.event_type == kind).collect();
            table.add_predicate(kind.to_lowercase(), column).unwrap();
        }

        // name -> (parent, start offset, duration) in hours
        let shapes: BTreeMap<&str, (Option<&str>, i64, i64)> = [
            ("a", (None, 1, 6)),
            ("b", (Some("a"), 0, -4)),
            ("c", (Some("b"), 0, 3)),
            ("d", (None, 0, -2)),
        ]
        .into_iter()
        .collect();
        let config = TaskConfig::new("admission")
            .with_window(
                WindowConfig::new("a", "6h")
                    .with_start_offset("1h")
                    .with_child(WindowConfig::new("b", "-4h").with_child(WindowConfig::new("c", "3h"))),
            )
            .with_window(WindowConfig::new("d", "-2h"));
        let tree = WindowTree::build(&config, table.predicates()).unwrap();
        let anchors = select_anchors(&tree.trigger, &table, false).unwrap();
        let evaluated = QueryEngine::new(&table, QueryOptions::new()).run(&tree, anchors).unwrap();
        let nodes = evaluated.nodes();

        let mut checked = 0;
        for node in &nodes {
            let (parent, offset, duration) = shapes[node.name.as_str()];
            for outcome in &node.outcomes {
                let key = outcome.anchor.key;
                let anchor = match parent {
                    None => key.root_timestamp,
                    Some(name) => {
                        let parent = nodes.iter().find(|n| n.name == name).unwrap();
                        parent.outcome(&key).unwrap().timestamp
                    }
                };
                let start = anchor + chrono::Duration::hours(offset);
                let end = start + chrono::Duration::hours(duration);
                assert_eq!(outcome.timestamp, end);
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };

                let expected: Vec<u32> = kinds
                    .iter()
                    .map(|kind| {
                        table
                            .records()
                            .iter()
                            .filter(|r| r.subject_id == key.subject_id && r.event_type == *kind)
                            .filter(|r| lo <= r.timestamp && r.timestamp < hi)
                            .count() as u32
                    })
                    .collect();
                assert_eq!(outcome.summary.counts(), expected.as_slice(), "{} {:?}", node.name, key);
                checked += 1;
            }
        }
        assert_eq!(checked, evaluated.anchors.len() * shapes.len());
    }
}
