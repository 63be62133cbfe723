//! Append-only decision and error logs.
//!
//! Every resolve-or-compute decision, copy decision, and missing-output
//! check appends one timestamped line to a plain text file. The files are
//! never truncated by the pipeline; cleanup is manual.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

/// Field separator used within one log line.
pub const SEP: &str = " | ";

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Append one timestamped line to `path`, creating the file (and its parent
/// directories) on first use.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    writeln!(file, "{}{}{}", timestamp(), SEP, line)
        .with_context(|| format!("failed to write to log file {}", path.display()))?;
    Ok(())
}

/// Read all lines of a log file. A missing file reads as empty.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line.with_context(|| format!("failed to read {}", path.display()))?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_creates_parents_and_accumulates() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("logs/decisions.log");

        append_line(&log, "first").unwrap();
        append_line(&log, "second").unwrap();

        let lines = read_lines(&log).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let lines = read_lines(&tmp.path().join("nope.log")).unwrap();
        assert!(lines.is_empty());
    }
}
