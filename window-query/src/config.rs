//! Task configuration types
//!
//! A task file (TOML) names the trigger, the predicates to generate and the
//! windows to evaluate. These types are a direct image of the file; all
//! semantic validation happens when the window tree is built.

use crate::types::{FieldValue, QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Root of a task configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    pub trigger: TriggerConfig,

    /// Predicate definitions by name
    #[serde(default)]
    pub predicates: BTreeMap<String, PredicateConfig>,

    /// Top-level windows (children of the trigger unless `parent` says otherwise)
    #[serde(default)]
    pub windows: Vec<WindowConfig>,
}

/// Trigger section; exactly one of the three condition fields must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Name of the root node
    #[serde(default = "default_trigger_name")]
    pub name: String,

    /// Single trigger predicate
    pub start: Option<String>,

    /// Every listed predicate must hold on the triggering event
    pub includes: Option<Vec<String>>,

    /// Any listed predicate may hold on the triggering event
    pub any_of: Option<Vec<String>>,
}

fn default_trigger_name() -> String {
    "trigger".to_string()
}

/// A predicate definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateConfig {
    /// True where any referenced predicate is true
    AnyOf { any: Vec<String> },
    /// True where every referenced predicate is true
    AllOf { all: Vec<String> },
    /// True where `column` equals `value`
    Value { column: String, value: FieldValue },
    /// True where numeric `column` lies in `[min, max)`
    Range {
        column: String,
        min: Option<f64>,
        max: Option<f64>,
    },
}

/// One window definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowConfig {
    pub name: String,

    /// Parent window name (defaults to the trigger root, or the enclosing
    /// window for nested children)
    pub parent: Option<String>,

    /// Start at `anchor + offset`
    pub start_offset: Option<String>,

    /// Start at the first occurrence of this predicate at or after the anchor
    pub start_predicate: Option<String>,

    /// End at `start + duration`
    pub duration: Option<String>,

    /// End at the next occurrence of this predicate after the start
    pub end_predicate: Option<String>,

    /// Window runs to the end of the subject's record
    #[serde(default)]
    pub end_of_record: bool,

    /// Predicates that must occur inside the window
    #[serde(default)]
    pub includes: Vec<IncludeConfig>,

    /// Predicates that must not occur inside the window
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Marks this window as the label source for the named predicate
    pub label: Option<String>,

    #[serde(default)]
    pub children: Vec<WindowConfig>,
}

/// An `includes` entry: a bare predicate name or a count constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncludeConfig {
    Predicate(String),
    Count {
        predicate: String,
        #[serde(default = "default_min_count")]
        min: u32,
        max: Option<u32>,
    },
}

fn default_min_count() -> u32 {
    1
}

impl IncludeConfig {
    pub fn predicate(&self) -> &str {
        match self {
            IncludeConfig::Predicate(p) => p,
            IncludeConfig::Count { predicate, .. } => predicate,
        }
    }

    /// `(min, max)` occurrence bounds
    pub fn bounds(&self) -> (u32, Option<u32>) {
        match self {
            IncludeConfig::Predicate(_) => (1, None),
            IncludeConfig::Count { min, max, .. } => (*min, *max),
        }
    }
}

impl TaskConfig {
    /// Create a configuration triggered by a single predicate
    pub fn new(trigger: impl Into<String>) -> Self {
        Self {
            trigger: TriggerConfig {
                name: default_trigger_name(),
                start: Some(trigger.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Builder method: add a predicate definition
    pub fn with_predicate(mut self, name: impl Into<String>, predicate: PredicateConfig) -> Self {
        self.predicates.insert(name.into(), predicate);
        self
    }

    /// Builder method: add a top-level window
    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.windows.push(window);
        self
    }

    /// Builder method: rename the root node
    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.trigger.name = name.into();
        self
    }
}

impl PredicateConfig {
    /// Equality predicate on a field
    pub fn value(column: impl Into<String>, value: FieldValue) -> Self {
        PredicateConfig::Value {
            column: column.into(),
            value,
        }
    }

    /// Equality predicate on the event type
    pub fn event_type(event_type: impl Into<String>) -> Self {
        Self::value("event_type", FieldValue::Text(event_type.into()))
    }
}

impl WindowConfig {
    /// A window starting at its parent's anchor and lasting `duration`
    pub fn new(name: impl Into<String>, duration: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: Some(duration.into()),
            ..Default::default()
        }
    }

    /// A window ending at the next occurrence of `predicate`
    pub fn until(name: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            end_predicate: Some(predicate.into()),
            ..Default::default()
        }
    }

    /// Builder method: set the parent window
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Builder method: start at an offset from the anchor
    pub fn with_start_offset(mut self, offset: impl Into<String>) -> Self {
        self.start_offset = Some(offset.into());
        self
    }

    /// Builder method: require a predicate at least once
    pub fn including(mut self, predicate: impl Into<String>) -> Self {
        self.includes.push(IncludeConfig::Predicate(predicate.into()));
        self
    }

    /// Builder method: forbid a predicate
    pub fn excluding(mut self, predicate: impl Into<String>) -> Self {
        self.excludes.push(predicate.into());
        self
    }

    /// Builder method: mark as label source
    pub fn with_label(mut self, predicate: impl Into<String>) -> Self {
        self.label = Some(predicate.into());
        self
    }

    /// Builder method: add a nested child window
    pub fn with_child(mut self, child: WindowConfig) -> Self {
        self.children.push(child);
        self
    }
}

/// Parse a task configuration from TOML text
pub fn parse_config(content: &str) -> Result<TaskConfig> {
    toml::from_str(content)
        .map_err(|e| QueryError::ConfigurationError(format!("Failed to parse task config: {}", e)))
}

/// Load a task configuration from a TOML file
pub fn load_config(path: &Path) -> Result<TaskConfig> {
    log::debug!("Loading task config: {:?}", path);

    let content = fs::read_to_string(path).map_err(|e| {
        QueryError::ConfigurationError(format!("Failed to read config file {:?}: {}", path, e))
    })?;

    parse_config(&content).map_err(|e| match e {
        QueryError::ConfigurationError(msg) => {
            QueryError::ConfigurationError(format!("{} ({:?})", msg, path))
        }
        other => other,
    })
}
