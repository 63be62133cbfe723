//! Pipeline stages and final output verification.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};

use crate::logs;

/// Error-check log under the log root; one line per missing output file.
pub const ERROR_LOG: &str = "error_check.log";

/// Stages of the per-subject driver, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CopyInput,
    SegmentT2,
    LabelVertebrae,
    RegisterToTemplate,
    ComputeMetricsT2,
    SegmentT2star,
    ComputeMetricsT2star,
    DwiPreprocess,
    SegmentDwi,
    RegisterDwiToTemplate,
    WarpAtlas,
    ComputeDti,
    ExtractTractMetrics,
    VerifyOutputs,
}

impl Stage {
    pub const ORDER: [Stage; 14] = [
        Stage::CopyInput,
        Stage::SegmentT2,
        Stage::LabelVertebrae,
        Stage::RegisterToTemplate,
        Stage::ComputeMetricsT2,
        Stage::SegmentT2star,
        Stage::ComputeMetricsT2star,
        Stage::DwiPreprocess,
        Stage::SegmentDwi,
        Stage::RegisterDwiToTemplate,
        Stage::WarpAtlas,
        Stage::ComputeDti,
        Stage::ExtractTractMetrics,
        Stage::VerifyOutputs,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CopyInput => "COPY_INPUT",
            Stage::SegmentT2 => "SEGMENT_T2",
            Stage::LabelVertebrae => "LABEL_VERTEBRAE",
            Stage::RegisterToTemplate => "REGISTER_TO_TEMPLATE",
            Stage::ComputeMetricsT2 => "COMPUTE_METRICS_T2",
            Stage::SegmentT2star => "SEGMENT_T2STAR",
            Stage::ComputeMetricsT2star => "COMPUTE_METRICS_T2STAR",
            Stage::DwiPreprocess => "DWI_PREPROCESS",
            Stage::SegmentDwi => "SEGMENT_DWI",
            Stage::RegisterDwiToTemplate => "REGISTER_DWI_TO_TEMPLATE",
            Stage::WarpAtlas => "WARP_ATLAS",
            Stage::ComputeDti => "COMPUTE_DTI",
            Stage::ExtractTractMetrics => "EXTRACT_TRACT_METRICS",
            Stage::VerifyOutputs => "VERIFY_OUTPUTS",
        };
        write!(f, "{name}")
    }
}

/// Skip-if-exists probe for expensive steps. Logs when the output is
/// already there.
pub fn skip_if_exists(path: &Path, stage: Stage) -> bool {
    if path.is_file() {
        info!("{stage}: {} already exists, skipping", path.display());
        true
    } else {
        false
    }
}

/// Probe every expected output file; each missing one appends a line to
/// the error-check log. Missing outputs are recorded, not fatal.
///
/// Returns the number of missing files.
pub fn verify_outputs(expected: &[PathBuf], log_root: &Path, subject: &str) -> Result<usize> {
    let mut missing = 0;
    for file in expected {
        if !file.is_file() {
            warn!("{subject}: expected output missing: {}", file.display());
            logs::append_line(
                &log_root.join(ERROR_LOG),
                &format!(
                    "{subject}{sep}missing{sep}{path}",
                    sep = logs::SEP,
                    path = file.display()
                ),
            )?;
            missing += 1;
        }
    }
    if missing == 0 {
        info!("{subject}: all {} expected outputs present", expected.len());
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_verify_records_missing_files() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("seg.nii.gz");
        std::fs::write(&present, b"x").unwrap();
        let absent = tmp.path().join("warp.nii.gz");
        let log_root = tmp.path().join("log");

        let missing = verify_outputs(
            &[present, absent.clone()],
            &log_root,
            "sub-A/ses-1",
        )
        .unwrap();

        assert_eq!(missing, 1);
        let lines = logs::read_lines(&log_root.join(ERROR_LOG)).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("warp.nii.gz"));
        assert!(lines[0].contains("sub-A/ses-1"));
    }

    #[test]
    fn test_verify_all_present_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("seg.nii.gz");
        std::fs::write(&present, b"x").unwrap();
        let log_root = tmp.path().join("log");

        let missing = verify_outputs(&[present], &log_root, "sub-A/ses-1").unwrap();

        assert_eq!(missing, 0);
        assert!(!log_root.join(ERROR_LOG).exists());
    }

    #[test]
    fn test_skip_if_exists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.nii.gz");
        assert!(!skip_if_exists(&path, Stage::RegisterToTemplate));
        std::fs::write(&path, b"x").unwrap();
        assert!(skip_if_exists(&path, Stage::RegisterToTemplate));
    }
}
