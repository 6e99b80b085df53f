//! Result table output
//!
//! Writes a [`ResultTable`] as a JSON array, JSON lines or a tab-separated
//! text table.

use anyhow::Result;
use clap::ValueEnum;
use std::io::Write;
use window_query::ResultTable;

/// Output format for the result table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON array
    #[default]
    Json,
    /// One JSON object per line
    Jsonl,
    /// Tab-separated text with a header line
    Txt,
}

/// Write the table to `out` in the requested format
pub fn write_table<W: Write>(table: &ResultTable, format: OutputFormat, out: &mut W) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &table.to_json())?;
            writeln!(out)?;
        }
        OutputFormat::Jsonl => {
            for row in &table.rows {
                serde_json::to_writer(&mut *out, &table.row_to_json(row))?;
                writeln!(out)?;
            }
        }
        OutputFormat::Txt => write_txt(table, out)?,
    }
    out.flush()?;
    Ok(())
}

fn write_txt<W: Write>(table: &ResultTable, out: &mut W) -> Result<()> {
    let columns = table.columns();
    writeln!(out, "{}", columns.join("\t"))?;
    for row in &table.rows {
        let json = table.row_to_json(row);
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match &json[c.as_str()] {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        writeln!(out, "{}", cells.join("\t"))?;
    }
    Ok(())
}

/// One-line summary printed after a run
pub fn summary_line(table: &ResultTable) -> String {
    let subjects: std::collections::BTreeSet<_> = table.rows.iter().map(|r| r.subject_id).collect();
    format!(
        "{} rows for {} subjects, {} windows",
        table.len(),
        subjects.len(),
        table.window_names.len()
    )
}
