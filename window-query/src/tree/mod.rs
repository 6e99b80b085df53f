//! Window specification tree
//!
//! The tree is built once from a [`TaskConfig`] and is read-only for the life
//! of a query. Its root is the trigger; every other node is a window whose
//! boundaries depend only on its own parent's resolved anchor.
//!
//! Building asserts everything the engine relies on:
//! - node names are unique (they become output column prefixes)
//! - every `parent` reference exists and the graph is acyclic and single-rooted
//! - every referenced predicate exists in the event table
//! - at most one node is the label source

pub mod boundary;

use crate::config::{TaskConfig, TriggerConfig, WindowConfig};
use crate::table::PredicateSet;
use crate::trigger::Trigger;
use crate::types::{parse_duration, QueryError, Result};
use boundary::{CountConstraint, EndRule, RuleDisplay, StartRule};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub use boundary::ResolvedWindow;

/// One window in the tree
#[derive(Debug, Clone, PartialEq)]
pub struct WindowNode {
    pub name: String,
    pub start: StartRule,
    pub end: EndRule,
    pub includes: Vec<CountConstraint>,
    /// Predicate indices that must not occur
    pub excludes: Vec<usize>,
    /// Predicate index whose count becomes the label
    pub label: Option<usize>,
    pub children: Vec<WindowNode>,
}

/// The full specification tree rooted at the trigger
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTree {
    pub root_name: String,
    pub trigger: Trigger,
    pub windows: Vec<WindowNode>,
    /// Predicate names, indexed as in the rules above
    pub predicates: Vec<String>,
}

impl WindowNode {
    /// This node and its descendants in preorder
    pub fn preorder(&self) -> Vec<&WindowNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.preorder());
        }
        out
    }
}

impl WindowTree {
    /// Build and validate a tree from configuration
    ///
    /// `predicates` is the set of predicate columns available on the event
    /// table the tree will run against.
    pub fn build(config: &TaskConfig, predicates: &PredicateSet) -> Result<Self> {
        let lookup = |node: &str, predicate: &str| -> Result<usize> {
            predicates.index_of(predicate).ok_or_else(|| {
                QueryError::ConfigurationError(format!(
                    "Node '{}' references predicate '{}' which is not defined",
                    node, predicate
                ))
            })
        };

        let root_name = config.trigger.name.clone();
        if root_name.is_empty() {
            return Err(QueryError::ConfigurationError(
                "Trigger node name must not be empty".to_string(),
            ));
        }
        let trigger = resolve_trigger(&config.trigger, &lookup)?;

        // Flatten nested and parent-referencing windows into (parent, config)
        let mut flat: Vec<(String, &WindowConfig)> = Vec::new();
        flatten(&config.windows, &root_name, true, &mut flat)?;

        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(&root_name);
        for (_, window) in &flat {
            if window.name.is_empty() {
                return Err(QueryError::ConfigurationError(
                    "Window name must not be empty".to_string(),
                ));
            }
            if !seen.insert(&window.name) {
                return Err(QueryError::ConfigurationError(format!(
                    "Duplicate node name '{}'",
                    window.name
                )));
            }
        }

        let mut by_parent: BTreeMap<&str, Vec<&WindowConfig>> = BTreeMap::new();
        for (parent, window) in &flat {
            if !seen.contains(parent.as_str()) {
                return Err(QueryError::ConfigurationError(format!(
                    "Window '{}' references unknown parent '{}'",
                    window.name, parent
                )));
            }
            by_parent.entry(parent.as_str()).or_default().push(window);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let windows = build_children(&root_name, &by_parent, &lookup, &mut visited)?;

        // Anything not reached from the root sits on a parent cycle
        let unreachable: Vec<&str> = flat
            .iter()
            .map(|(_, w)| w.name.as_str())
            .filter(|name| !visited.contains(name))
            .collect();
        if !unreachable.is_empty() {
            return Err(QueryError::ConfigurationError(format!(
                "Windows not reachable from trigger '{}' (parent cycle): {}",
                root_name,
                unreachable.join(", ")
            )));
        }

        let tree = Self {
            root_name,
            trigger,
            windows,
            predicates: predicates.names().to_vec(),
        };

        let labelled: Vec<&str> = tree
            .nodes()
            .into_iter()
            .filter(|n| n.label.is_some())
            .map(|n| n.name.as_str())
            .collect();
        if labelled.len() > 1 {
            return Err(QueryError::ConfigurationError(format!(
                "At most one window may carry a label, found: {}",
                labelled.join(", ")
            )));
        }

        log::debug!("Window tree built with {} windows", tree.nodes().len());
        Ok(tree)
    }

    /// All window nodes (excluding the root) in preorder
    pub fn nodes(&self) -> Vec<&WindowNode> {
        self.windows.iter().flat_map(|w| w.preorder()).collect()
    }

    /// The label node and its predicate index, if any
    pub fn label(&self) -> Option<(&WindowNode, usize)> {
        self.nodes()
            .into_iter()
            .find_map(|n| n.label.map(|p| (n, p)))
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, node: &WindowNode, depth: usize) -> fmt::Result {
        write!(
            f,
            "\n{}└── {} [{} → {}]",
            "    ".repeat(depth),
            node.name,
            RuleDisplay { rule: &node.start, predicates: &self.predicates },
            RuleDisplay { rule: &node.end, predicates: &self.predicates },
        )?;
        if node.label.is_some() {
            write!(f, " (label)")?;
        }
        for child in &node.children {
            self.fmt_node(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for WindowTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root_name)?;
        for window in &self.windows {
            self.fmt_node(f, window, 0)?;
        }
        Ok(())
    }
}

fn resolve_trigger(
    config: &TriggerConfig,
    lookup: &impl Fn(&str, &str) -> Result<usize>,
) -> Result<Trigger> {
    let name = config.name.as_str();
    let trigger = match (&config.start, &config.includes, &config.any_of) {
        (Some(p), None, None) => Trigger::Single(p.clone()),
        (None, Some(ps), None) if !ps.is_empty() => Trigger::AllOf(ps.clone()),
        (None, None, Some(ps)) if !ps.is_empty() => Trigger::AnyOf(ps.clone()),
        (None, None, None) => {
            return Err(QueryError::ConfigurationError(format!(
                "Trigger '{}' needs one of `start`, `includes` or `any_of`",
                name
            )))
        }
        _ => {
            return Err(QueryError::ConfigurationError(format!(
                "Trigger '{}' must set exactly one non-empty condition (`start`, `includes` or `any_of`)",
                name
            )))
        }
    };
    for p in trigger.predicates() {
        lookup(name, p)?;
    }
    Ok(trigger)
}

fn flatten<'a>(
    windows: &'a [WindowConfig],
    enclosing: &str,
    top_level: bool,
    out: &mut Vec<(String, &'a WindowConfig)>,
) -> Result<()> {
    for window in windows {
        let parent = match (&window.parent, top_level) {
            (Some(p), true) => p.clone(),
            (Some(p), false) if p != enclosing => {
                return Err(QueryError::ConfigurationError(format!(
                    "Window '{}' is nested under '{}' but declares parent '{}'",
                    window.name, enclosing, p
                )))
            }
            _ => enclosing.to_string(),
        };
        out.push((parent, window));
        flatten(&window.children, &window.name, false, out)?;
    }
    Ok(())
}

fn build_children<'a>(
    parent: &str,
    by_parent: &BTreeMap<&str, Vec<&'a WindowConfig>>,
    lookup: &impl Fn(&str, &str) -> Result<usize>,
    visited: &mut HashSet<&'a str>,
) -> Result<Vec<WindowNode>> {
    let mut nodes = Vec::new();
    for &window in by_parent.get(parent).into_iter().flatten() {
        visited.insert(&window.name);
        let mut node = build_node(window, lookup)?;
        node.children = build_children(&window.name, by_parent, lookup, visited)?;
        nodes.push(node);
    }
    Ok(nodes)
}

fn build_node(window: &WindowConfig, lookup: &impl Fn(&str, &str) -> Result<usize>) -> Result<WindowNode> {
    let name = window.name.as_str();
    let duration = |field: &str, value: &str| {
        parse_duration(value).ok_or_else(|| {
            QueryError::ConfigurationError(format!(
                "Window '{}' has invalid {} '{}'",
                name, field, value
            ))
        })
    };

    let start = match (&window.start_offset, &window.start_predicate) {
        (None, None) => StartRule::Anchor,
        (Some(offset), None) => StartRule::Offset(duration("start_offset", offset)?),
        (None, Some(p)) => StartRule::NextPredicate(lookup(name, p)?),
        (Some(_), Some(_)) => {
            return Err(QueryError::ConfigurationError(format!(
                "Window '{}' sets both `start_offset` and `start_predicate`",
                name
            )))
        }
    };

    let end = match (&window.duration, &window.end_predicate, window.end_of_record) {
        (Some(d), None, false) => EndRule::Duration(duration("duration", d)?),
        (None, Some(p), false) => EndRule::NextPredicate(lookup(name, p)?),
        (None, None, true) => EndRule::EndOfRecord,
        _ => {
            return Err(QueryError::ConfigurationError(format!(
                "Window '{}' must set exactly one of `duration`, `end_predicate` or `end_of_record`",
                name
            )))
        }
    };

    let includes = window
        .includes
        .iter()
        .map(|inc| {
            let (min, max) = inc.bounds();
            if max.is_some_and(|max| max < min) {
                return Err(QueryError::ConfigurationError(format!(
                    "Window '{}' requires between {} and {:?} '{}'",
                    name,
                    min,
                    max,
                    inc.predicate()
                )));
            }
            Ok(CountConstraint {
                predicate: lookup(name, inc.predicate())?,
                min,
                max,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let excludes = window
        .excludes
        .iter()
        .map(|p| lookup(name, p))
        .collect::<Result<Vec<_>>>()?;

    let label = window.label.as_deref().map(|p| lookup(name, p)).transpose()?;

    Ok(WindowNode {
        name: window.name.clone(),
        start,
        end,
        includes,
        excludes,
        label,
        children: Vec::new(),
    })
}
