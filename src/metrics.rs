//! Shared metric tables.
//!
//! Per-subject metric CSVs are folded into shared tables by plain row
//! appends. There is no deduplication and no locking: re-running a subject
//! without clearing the shared table duplicates its rows, and concurrent
//! writers are the caller's responsibility. The intended safe pattern is
//! per-subject partial tables merged by a single `aggregate` pass.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use log::info;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to read table '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write table '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("table '{path}' has no header")]
    Empty { path: String },

    #[error("header of '{src}' does not match existing table '{dest}'")]
    HeaderMismatch { src: String, dest: String },
}

pub type Result<T> = std::result::Result<T, MetricsError>;

fn read_table(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| MetricsError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let header = reader
        .headers()
        .map_err(|source| MetricsError::Read {
            path: path.display().to_string(),
            source,
        })?
        .clone();
    if header.is_empty() {
        return Err(MetricsError::Empty {
            path: path.display().to_string(),
        });
    }
    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record.map_err(|source| MetricsError::Read {
            path: path.display().to_string(),
            source,
        })?);
    }
    Ok((header, records))
}

/// Append every row of `src` to `dest`.
///
/// The header is written only when `dest` does not exist yet; afterwards
/// the headers must agree. Returns the number of rows appended.
pub fn append_table(src: &Path, dest: &Path) -> Result<usize> {
    let (header, records) = read_table(src)?;

    let dest_exists = dest.is_file();
    if dest_exists {
        let (existing_header, _) = read_table(dest)?;
        if existing_header != header {
            return Err(MetricsError::HeaderMismatch {
                src: src.display().to_string(),
                dest: dest.display().to_string(),
            });
        }
    } else if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| MetricsError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dest)
        .map_err(|source| MetricsError::Io {
            path: dest.display().to_string(),
            source,
        })?;
    let mut writer = csv::Writer::from_writer(file);

    if !dest_exists {
        writer
            .write_record(&header)
            .map_err(|source| MetricsError::Write {
                path: dest.display().to_string(),
                source,
            })?;
    }
    for record in &records {
        writer
            .write_record(record)
            .map_err(|source| MetricsError::Write {
                path: dest.display().to_string(),
                source,
            })?;
    }
    writer.flush().map_err(|source| MetricsError::Io {
        path: dest.display().to_string(),
        source,
    })?;

    Ok(records.len())
}

/// Collect per-subject tables under `root` whose file name ends with
/// `suffix`, sorted for a stable merge order.
pub fn collect_tables(root: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut tables: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with(suffix))
                .unwrap_or(false)
        })
        .collect();
    tables.sort();
    tables
}

/// Merge per-subject partial tables into one shared table. This is the
/// single-pass alternative to appending from concurrent subject runs.
pub fn merge_tables(sources: &[PathBuf], dest: &Path) -> Result<usize> {
    let mut total = 0;
    for src in sources {
        let rows = append_table(src, dest)?;
        info!("{}: {rows} rows", src.display());
        total += rows;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE_A: &str = "subject,session,level,area\nsub-A,ses-1,C2,71.2\nsub-A,ses-1,C3,68.9\n";
    const TABLE_B: &str = "subject,session,level,area\nsub-B,ses-1,C2,74.0\n";

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_append_writes_header_once() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.csv", TABLE_A);
        let b = write(tmp.path(), "b.csv", TABLE_B);
        let dest = tmp.path().join("results/all.csv");

        assert_eq!(append_table(&a, &dest).unwrap(), 2);
        assert_eq!(append_table(&b, &dest).unwrap(), 1);

        let content = fs::read_to_string(&dest).unwrap();
        assert_eq!(content.matches("subject,session").count(), 1);
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_rerunning_duplicates_rows() {
        // Documented sharp edge: appends are not idempotent.
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.csv", TABLE_A);
        let dest = tmp.path().join("all.csv");

        append_table(&a, &dest).unwrap();
        append_table(&a, &dest).unwrap();

        let content = fs::read_to_string(&dest).unwrap();
        assert_eq!(content.matches("sub-A,ses-1,C2").count(), 2);
    }

    #[test]
    fn test_header_mismatch_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.csv", TABLE_A);
        let other = write(tmp.path(), "other.csv", "subject,fa\nsub-A,0.71\n");
        let dest = tmp.path().join("all.csv");

        append_table(&a, &dest).unwrap();
        assert!(matches!(
            append_table(&other, &dest),
            Err(MetricsError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn test_collect_and_merge() {
        let tmp = TempDir::new().unwrap();
        let sub_a = tmp.path().join("sub-A/metrics");
        let sub_b = tmp.path().join("sub-B/metrics");
        fs::create_dir_all(&sub_a).unwrap();
        fs::create_dir_all(&sub_b).unwrap();
        write(&sub_a, "sub-A_T2w_perlevel.csv", TABLE_A);
        write(&sub_b, "sub-B_T2w_perlevel.csv", TABLE_B);
        write(&sub_b, "sub-B_dwi_FA.csv", "subject,fa\nsub-B,0.7\n");

        let tables = collect_tables(tmp.path(), "_T2w_perlevel.csv");
        assert_eq!(tables.len(), 2);

        let dest = tmp.path().join("all.csv");
        assert_eq!(merge_tables(&tables, &dest).unwrap(), 3);
    }
}
