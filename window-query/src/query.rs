//! Query entry point
//!
//! [`query_task`] runs the whole pipeline: load data, load configuration,
//! generate predicate columns, build the window tree, select trigger anchors,
//! evaluate the tree and assemble the result table. Any stage failure aborts
//! the query and is reported wrapped with the stage's name.

use crate::config::load_config;
use crate::dataset::{DatasetLoader, JsonDatasetLoader};
use crate::engine::{QueryEngine, QueryOptions};
use crate::predicates;
use crate::result::{assemble, ResultTable};
use crate::table::EventTable;
use crate::tree::WindowTree;
use crate::trigger::select_anchors;
use crate::types::Result;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Where the query reads its events from
#[derive(Debug, Clone)]
pub enum EventSource {
    /// A dataset directory read with [`JsonDatasetLoader`]
    Path(PathBuf),
    /// An already loaded table
    Table(EventTable),
}

impl From<PathBuf> for EventSource {
    fn from(path: PathBuf) -> Self {
        EventSource::Path(path)
    }
}

impl From<EventTable> for EventSource {
    fn from(table: EventTable) -> Self {
        EventSource::Table(table)
    }
}

impl EventSource {
    fn into_table(self) -> Result<EventTable> {
        match self {
            EventSource::Path(path) => JsonDatasetLoader::new().load(&path)?.into_event_table(),
            EventSource::Table(table) => Ok(table),
        }
    }
}

macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            log::info!($($arg)+);
        } else {
            log::debug!($($arg)+);
        }
    };
}

/// Run a configured window query against a dataset
pub fn query_task(config_path: &Path, source: EventSource, options: &QueryOptions) -> Result<ResultTable> {
    let verbose = options.verbose;
    let started = Instant::now();

    let table = source.into_table().map_err(|e| e.in_stage("load dataset"))?;
    progress!(
        verbose,
        "Loaded {} events for {} subjects",
        table.len(),
        table.num_subjects()
    );

    let config = load_config(config_path).map_err(|e| e.in_stage("load configuration"))?;
    progress!(
        verbose,
        "Loaded configuration {:?}: {} predicates, {} top-level windows",
        config_path,
        config.predicates.len(),
        config.windows.len()
    );

    let table = predicates::generate(&config.predicates, table)
        .map_err(|e| e.in_stage("generate predicate columns"))?;
    progress!(verbose, "Generated {} predicate columns", table.predicates().len());

    let tree = WindowTree::build(&config, table.predicates())
        .map_err(|e| e.in_stage("build window tree"))?;
    progress!(verbose, "Window tree:\n{}", tree);

    let anchors = select_anchors(&tree.trigger, &table, verbose)
        .map_err(|e| e.in_stage("select trigger events"))?;
    progress!(
        verbose,
        "{} trigger instances across {} subjects",
        anchors.len(),
        anchors.num_subjects()
    );

    let evaluated = QueryEngine::new(&table, options.clone())
        .run(&tree, anchors)
        .map_err(|e| e.in_stage("evaluate windows"))?;

    let result = assemble(&tree, &evaluated, verbose).map_err(|e| e.in_stage("assemble results"))?;
    progress!(
        verbose,
        "Query finished: {} rows in {:.3}s",
        result.len(),
        started.elapsed().as_secs_f64()
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::EventRecord;
    use crate::types::{ErrorKind, QueryError};
    use chrono::NaiveDate;
    use std::fs;

    fn table() -> EventTable {
        let t = |h| NaiveDate::from_ymd_opt(2021, 1, 1).unwrap().and_hms_opt(h, 0, 0).unwrap();
        EventTable::new(vec![
            EventRecord::new(1, t(0), "ADMISSION"),
            EventRecord::new(1, t(3), "LAB"),
        ])
        .unwrap()
    }

    #[test]
    fn test_stage_wrapping() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("task.toml");
        fs::write(
            &config,
            r#"
[trigger]
start = "admission"

[predicates.admission]
column = "event_type"
value = "ADMISSION"

[[windows]]
name = "input"
duration = "24h"
includes = ["lab"]
"#,
        )
        .unwrap();

        let err = query_task(&config, table().into(), &QueryOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        match err {
            QueryError::StageError { stage, source } => {
                assert_eq!(stage, "build window tree");
                assert!(source.to_string().contains("lab"));
            }
            other => panic!("expected stage error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_config_file() {
        let err = query_task(
            Path::new("/nonexistent/task.toml"),
            table().into(),
            &QueryOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            QueryError::StageError { stage: "load configuration", .. }
        ));
    }
}
