//! Shared path configuration and exclusion lists.
//!
//! The pipeline scripts do not parse shared paths from the command line;
//! they are injected as environment variables by the external batch
//! wrapper, one variable per root directory.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use log::debug;

/// Root of the BIDS dataset (inputs and manual derivatives).
pub const ENV_PATH_DATA: &str = "PATH_DATA";
/// Root where per-subject processed copies are written.
pub const ENV_PATH_DATA_PROCESSED: &str = "PATH_DATA_PROCESSED";
/// Root for shared metric tables.
pub const ENV_PATH_RESULTS: &str = "PATH_RESULTS";
/// Root for decision and error-check logs.
pub const ENV_PATH_LOG: &str = "PATH_LOG";
/// Root for toolkit QC reports.
pub const ENV_PATH_QC: &str = "PATH_QC";

/// Shared roots injected by the batch wrapper.
#[derive(Debug, Clone)]
pub struct Env {
    pub path_data: PathBuf,
    pub path_data_processed: PathBuf,
    pub path_results: PathBuf,
    pub path_log: PathBuf,
    pub path_qc: PathBuf,
}

impl Env {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            path_data: require(ENV_PATH_DATA)?,
            path_data_processed: require(ENV_PATH_DATA_PROCESSED)?,
            path_results: require(ENV_PATH_RESULTS)?,
            path_log: require(ENV_PATH_LOG)?,
            path_qc: require(ENV_PATH_QC)?,
        })
    }

    /// Manual derivatives tree checked before any automatic computation.
    pub fn manual_derivatives(&self) -> PathBuf {
        self.path_data.join("derivatives").join("labels")
    }
}

/// Install root of the external toolkit (`SCT_DIR`), which bundles the
/// template, the atlas, and the normative metric tables.
pub fn sct_dir() -> Result<PathBuf> {
    require("SCT_DIR")
}

fn require(name: &str) -> Result<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => bail!("environment variable {name} is not set (expected from the batch wrapper)"),
    }
}

/// Subjects excluded from specific analysis stages, keyed by analysis name
/// (e.g. `T2w`, `T2star`, `DWI`).
///
/// An identifier is excluded when it matches any entry of the key's list by
/// substring in either direction, so both full `sub-.../ses-...` entries and
/// bare subject IDs work.
#[derive(Debug, Default, Clone)]
pub struct ExcludeList {
    lists: HashMap<String, Vec<String>>,
}

impl ExcludeList {
    /// Load `exclude.yml`. A missing file means nothing is excluded.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            debug!("no exclusion file at {}", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let lists: HashMap<String, Vec<String>> = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Self { lists })
    }

    pub fn is_excluded(&self, key: &str, id: &str) -> bool {
        self.lists
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .any(|entry| entry.contains(id) || id.contains(entry.as_str()))
            })
            .unwrap_or(false)
    }

    pub fn entries(&self, key: &str) -> &[String] {
        self.lists.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Whether a subject list is folded into the batch-wrapper config as an
/// exclusion or an inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListMode {
    Exclude,
    Include,
}

impl ListMode {
    fn config_key(self) -> &'static str {
        match self {
            ListMode::Exclude => "exclude_list",
            ListMode::Include => "include_list",
        }
    }
}

/// Fold the subjects listed under `key` in a YAML exclusion file into the
/// batch-wrapper JSON config as an `exclude_list`/`include_list` entry.
///
/// Returns the number of subjects written.
pub fn update_batch_config(config: &Path, yml: &Path, key: &str, mode: ListMode) -> Result<usize> {
    let text = fs::read_to_string(config)
        .with_context(|| format!("failed to read {}", config.display()))?;
    let mut doc: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", config.display()))?;

    let exclusions = ExcludeList::load(yml)?;
    let subjects = exclusions.entries(key);
    if subjects.is_empty() {
        bail!("key '{}' is empty or missing in {}", key, yml.display());
    }

    let object = doc
        .as_object_mut()
        .with_context(|| format!("{} is not a JSON object", config.display()))?;
    object.insert(mode.config_key().to_string(), serde_json::json!(subjects));

    fs::write(config, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("failed to write {}", config.display()))?;
    Ok(subjects.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{content}").unwrap();
        path
    }

    #[test]
    fn test_exclude_list_substring_match() {
        let tmp = TempDir::new().unwrap();
        let yml = write_file(
            tmp.path(),
            "exclude.yml",
            "T2w:\n  - sub-2390B4949B\nDWI:\n  - sub-1836B6029B/ses-1836B\n",
        );

        let list = ExcludeList::load(&yml).unwrap();
        // Bare subject entry excludes the full subject/session identifier.
        assert!(list.is_excluded("T2w", "sub-2390B4949B/ses-2390B"));
        // Full entry excludes the bare subject identifier.
        assert!(list.is_excluded("DWI", "sub-1836B6029B"));
        assert!(!list.is_excluded("T2w", "sub-1111B2222B"));
        // Unknown keys exclude nothing.
        assert!(!list.is_excluded("T2star", "sub-2390B4949B"));
    }

    #[test]
    fn test_missing_exclude_file_excludes_nothing() {
        let tmp = TempDir::new().unwrap();
        let list = ExcludeList::load(&tmp.path().join("exclude.yml")).unwrap();
        assert!(!list.is_excluded("T2w", "sub-2390B4949B"));
    }

    #[test]
    fn test_update_batch_config_inserts_list() {
        let tmp = TempDir::new().unwrap();
        let config = write_file(
            tmp.path(),
            "config.json",
            r#"{"path_data": "~/data", "jobs": 8}"#,
        );
        let yml = write_file(tmp.path(), "exclude.yml", "csa_t1:\n  - sub-001\n  - sub-002\n");

        let n = update_batch_config(&config, &yml, "csa_t1", ListMode::Exclude).unwrap();
        assert_eq!(n, 2);

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config).unwrap()).unwrap();
        assert_eq!(doc["jobs"], 8);
        assert_eq!(doc["exclude_list"], serde_json::json!(["sub-001", "sub-002"]));
    }

    #[test]
    fn test_update_batch_config_missing_key_fails() {
        let tmp = TempDir::new().unwrap();
        let config = write_file(tmp.path(), "config.json", "{}");
        let yml = write_file(tmp.path(), "exclude.yml", "csa_t1:\n  - sub-001\n");

        assert!(update_batch_config(&config, &yml, "csa_t2", ListMode::Include).is_err());
    }
}
