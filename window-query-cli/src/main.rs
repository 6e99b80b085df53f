//! Window Query CLI Application
//!
//! Command-line front end for the window-query library:
//! - Loads a task configuration (TOML) and a dataset directory
//! - Runs the window query on a sized rayon thread pool
//! - Writes the result table as JSON, JSON lines or text

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Duration;
use window_query::{query_task, EventSource, QueryOptions};

mod report;

use report::OutputFormat;

/// Window Query - Extract cohorts from longitudinal event data
#[derive(Parser, Debug)]
#[command(name = "window-query")]
#[command(about = "Match a tree of time windows against per-subject event streams", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the task configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Dataset directory containing events.json and measurements.json
    #[arg(short, long, value_name = "DIR")]
    data: PathBuf,

    /// Output file for the result table (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Abort the query after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline_secs: Option<f64>,

    /// Number of worker threads (default: one per core)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Window Query CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using window-query library v{}", window_query::VERSION);

    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("Failed to configure worker threads")?;
        log::debug!("Using {} worker threads", jobs);
    }

    let mut options = QueryOptions::new().with_verbose(args.verbose > 0);
    if let Some(secs) = args.deadline_secs {
        let deadline = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("Invalid deadline: {} seconds", secs))?;
        options = options.with_deadline(deadline);
    }

    let table = query_task(&args.config, EventSource::Path(args.data.clone()), &options)
        .with_context(|| format!("Query {:?} failed on {:?}", args.config, args.data))?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {:?}", path))?;
            report::write_table(&table, args.format, &mut BufWriter::new(file))?;
            log::info!("Results written to {:?}", path);
        }
        None => {
            let stdout = io::stdout();
            report::write_table(&table, args.format, &mut stdout.lock())?;
        }
    }

    if !args.quiet {
        eprintln!("{}", report::summary_line(&table));
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "window-query",
            "--config",
            "task.toml",
            "--data",
            "data",
            "--format",
            "jsonl",
            "-j",
            "4",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.format, OutputFormat::Jsonl);
        assert_eq!(args.jobs, Some(4));
        assert_eq!(args.verbose, 2);
        assert!(args.output.is_none());
    }
}
