//! Window Query Library
//!
//! Extracts cohorts from longitudinal event data by matching a tree of
//! time windows, anchored at trigger events, against each subject's event
//! stream.
//!
//! # Architecture
//!
//! A query runs as a linear pipeline:
//! - Load events and measurements into a sorted [`EventTable`]
//! - Generate one boolean column per configured predicate
//! - Build a [`WindowTree`] from the task configuration
//! - Select root anchors with the trigger condition
//! - Evaluate every window for every anchor, pruning instances whose
//!   `includes`/`excludes` constraints fail
//! - Assemble one wide result row per surviving trigger instance
//!
//! Subjects are independent, so evaluation is partitioned by subject and
//! runs on the rayon thread pool.
//!
//! # Example Usage
//!
//! ```no_run
//! use window_query::{query_task, EventSource, QueryOptions};
//! use std::path::{Path, PathBuf};
//!
//! let options = QueryOptions::new().with_verbose(true);
//! let result = query_task(
//!     Path::new("task.toml"),
//!     EventSource::Path(PathBuf::from("data/")),
//!     &options,
//! )
//! .unwrap();
//!
//! for row in &result.rows {
//!     println!("{} {:?}", row.subject_id, row.label);
//! }
//! ```

pub mod anchor;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod predicates;
pub mod query;
pub mod result;
pub mod summary;
pub mod table;
pub mod tree;
pub mod trigger;
pub mod types;

// Re-export main types for convenience
pub use anchor::{AnchorKey, AnchorRow, AnchorSet};
pub use config::{load_config, parse_config, PredicateConfig, TaskConfig, WindowConfig};
pub use dataset::{Dataset, DatasetLoader, JsonDatasetLoader};
pub use engine::{EvaluatedTree, QueryEngine, QueryOptions};
pub use query::{query_task, EventSource};
pub use result::{assemble, ResultRow, ResultTable};
pub use summary::WindowSummary;
pub use table::{EventRecord, EventTable, PredicateSet};
pub use tree::{WindowNode, WindowTree};
pub use trigger::{select_anchors, Trigger};
pub use types::{ErrorKind, FieldValue, QueryError, Result, SubjectId, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
