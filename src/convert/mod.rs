//! DICOM-to-BIDS conversion.
//!
//! For one staged session this module scans the DICOM tree, matches every
//! series against the criteria config, and hands each matched series to
//! the external converter binary, which writes the NIfTI plus its JSON
//! sidecar into the standardized layout:
//!
//! `<bids>/sub-<p>/ses-<s>/<datatype>/sub-<p>_ses-<s>[_entities][_run-N]_<suffix>.nii.gz`

pub mod criteria;
pub mod series;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use uuid::Uuid;

use crate::roster::Subject;
use crate::runner;
pub use criteria::{Criteria, CriteriaConfig, Description};
pub use series::SeriesMeta;

/// External DICOM→NIfTI encoder.
pub const DEFAULT_CONVERTER: &str = "dcm2niix";
/// Recursion limit for the DICOM scan.
pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Default)]
pub struct ConvertOutcome {
    pub converted: usize,
    pub skipped: usize,
    /// Series descriptions that matched no criteria rule.
    pub unmatched: Vec<String>,
}

/// Convert every matched series of one session.
pub fn convert_session(
    dicom_dir: &Path,
    bids_root: &Path,
    participant: &str,
    session: &str,
    config: &CriteriaConfig,
    converter: &str,
) -> Result<ConvertOutcome> {
    let all_series = series::scan_series(dicom_dir, DEFAULT_MAX_DEPTH, true)?;
    info!(
        "{participant}/{session}: {} series found in {}",
        all_series.len(),
        dicom_dir.display()
    );

    let mut outcome = ConvertOutcome::default();
    let mut matched: Vec<(&SeriesMeta, &Description)> = Vec::new();
    for series_meta in &all_series {
        match config.match_series(series_meta) {
            Some(description) => matched.push((series_meta, description)),
            None => {
                let label = series_meta
                    .description
                    .clone()
                    .unwrap_or_else(|| series_meta.series_uid.clone());
                warn!("{participant}/{session}: no rule for series '{label}'");
                outcome.unmatched.push(label);
            }
        }
    }

    let bases: Vec<String> = matched
        .iter()
        .map(|(_, d)| bids_basename(participant, session, d.custom_entities.as_deref(), None, &d.suffix))
        .collect();
    let runs = run_numbers(&bases);

    for ((series_meta, description), run) in matched.iter().zip(runs) {
        let base = bids_basename(
            participant,
            session,
            description.custom_entities.as_deref(),
            run,
            &description.suffix,
        );
        let target_dir = bids_root
            .join(participant)
            .join(session)
            .join(&description.datatype);
        let target = target_dir.join(format!("{base}.nii.gz"));

        if target.is_file() {
            info!("{} already exists, skipping", target.display());
            outcome.skipped += 1;
            continue;
        }

        fs::create_dir_all(&target_dir)
            .with_context(|| format!("failed to create {}", target_dir.display()))?;
        let staged = stage_series_files(series_meta)?;
        let out_dir_arg = target_dir.display().to_string();
        let staged_arg = staged.display().to_string();
        runner::run(
            converter,
            [
                "-b",
                "y",
                "-z",
                "y",
                "-o",
                out_dir_arg.as_str(),
                "-f",
                base.as_str(),
                staged_arg.as_str(),
            ],
        )?;

        if !target.is_file() {
            warn!("converter reported success but {} is missing", target.display());
        }
        outcome.converted += 1;
    }

    Ok(outcome)
}

/// Convert both sessions of every roster subject found under `staging`.
pub fn convert_cohort(
    staging: &Path,
    bids_root: &Path,
    subjects: &[Subject],
    config: &CriteriaConfig,
    converter: &str,
) -> Result<ConvertOutcome> {
    let mut totals = ConvertOutcome::default();
    for subject in subjects {
        let participant = subject.id();
        for session in subject.session_ids() {
            let dicom_dir = staging.join(format!("sub-{session}"));
            if !dicom_dir.is_dir() {
                warn!("{participant}: sub-{session} does not exist in {}", staging.display());
                continue;
            }
            let outcome = convert_session(
                &dicom_dir,
                bids_root,
                &participant,
                &format!("ses-{session}"),
                config,
                converter,
            )?;
            totals.converted += outcome.converted;
            totals.skipped += outcome.skipped;
            totals.unmatched.extend(outcome.unmatched);
        }
    }
    Ok(totals)
}

/// BIDS filename stem: `sub-<p>_ses-<s>[_entities][_run-N]_<suffix>`.
fn bids_basename(
    participant: &str,
    session: &str,
    entities: Option<&str>,
    run: Option<usize>,
    suffix: &str,
) -> String {
    let mut parts = vec![participant.to_string(), session.to_string()];
    if let Some(entities) = entities {
        parts.push(entities.to_string());
    }
    if let Some(run) = run {
        parts.push(format!("run-{run}"));
    }
    parts.push(suffix.to_string());
    parts.join("_")
}

/// Assign `run-<n>` ordinals to duplicate target names, in series order.
/// Unique names get no run entity.
fn run_numbers(bases: &[String]) -> Vec<Option<usize>> {
    let mut totals: HashMap<&str, usize> = HashMap::new();
    for base in bases {
        *totals.entry(base.as_str()).or_default() += 1;
    }
    let mut seen: HashMap<&str, usize> = HashMap::new();
    bases
        .iter()
        .map(|base| {
            if totals[base.as_str()] > 1 {
                let ordinal = seen.entry(base.as_str()).or_default();
                *ordinal += 1;
                Some(*ordinal)
            } else {
                None
            }
        })
        .collect()
}

/// The converter consumes a directory, so the series' files are staged
/// into a fresh temp dir first (sessions interleave series in one folder).
fn stage_series_files(series_meta: &SeriesMeta) -> Result<PathBuf> {
    let staged = std::env::temp_dir().join(format!("series_{}", Uuid::new_v4()));
    fs::create_dir_all(&staged)?;
    for (index, file) in series_meta.files.iter().enumerate() {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "slice".to_string());
        let target = staged.join(format!("{index:05}_{name}"));
        fs::copy(file, &target)
            .with_context(|| format!("failed to stage {}", file.display()))?;
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bids_basename_layout() {
        assert_eq!(
            bids_basename("sub-2390B4949B", "ses-2390B", None, None, "T2w"),
            "sub-2390B4949B_ses-2390B_T2w"
        );
        assert_eq!(
            bids_basename("sub-2390B4949B", "ses-2390B", Some("acq-sag"), Some(2), "T2w"),
            "sub-2390B4949B_ses-2390B_acq-sag_run-2_T2w"
        );
    }

    #[test]
    fn test_run_numbers_only_for_duplicates() {
        let bases = vec![
            "sub-A_ses-1_T2w".to_string(),
            "sub-A_ses-1_dwi".to_string(),
            "sub-A_ses-1_T2w".to_string(),
            "sub-A_ses-1_T2w".to_string(),
        ];
        assert_eq!(
            run_numbers(&bases),
            vec![Some(1), None, Some(2), Some(3)]
        );
    }

    #[test]
    fn test_stage_series_files_copies_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("z.dcm");
        let b = tmp.path().join("a.dcm");
        std::fs::write(&a, b"one").unwrap();
        std::fs::write(&b, b"two").unwrap();

        let meta = SeriesMeta {
            files: vec![a, b],
            ..SeriesMeta::default()
        };
        let staged = stage_series_files(&meta).unwrap();
        assert!(staged.join("00000_z.dcm").is_file());
        assert!(staged.join("00001_a.dcm").is_file());
        std::fs::remove_dir_all(staged).unwrap();
    }
}
