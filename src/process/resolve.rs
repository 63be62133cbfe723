//! Manual-first artifact resolution.
//!
//! Derived labels and segmentations may have been corrected by hand under
//! the manual derivatives tree. A manual file always overrides the
//! automatic tool: if it exists at the expected path it is copied into the
//! working directory and the automatic computation is never invoked.
//! Every resolution appends one line to the per-artifact decision log.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::logs;

/// Artifact families with a manual-correction workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    DiscLabels,
    CordSeg,
    GmSeg,
}

impl ArtifactKind {
    /// Decision log file under the log root.
    pub fn log_name(self) -> &'static str {
        match self {
            ArtifactKind::DiscLabels => "manual_disc_labels.log",
            ArtifactKind::CordSeg => "manual_cord_segmentation.log",
            ArtifactKind::GmSeg => "manual_gm_segmentation.log",
        }
    }

    pub const ALL: [ArtifactKind; 3] =
        [ArtifactKind::DiscLabels, ArtifactKind::CordSeg, ArtifactKind::GmSeg];
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::DiscLabels => "disc labels",
            ArtifactKind::CordSeg => "cord segmentation",
            ArtifactKind::GmSeg => "gray matter segmentation",
        };
        write!(f, "{name}")
    }
}

/// Which path produced the working-copy artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Manual file copied from the derivatives tree.
    Manual,
    /// Automatic tool ran.
    Automatic,
    /// Working copy already present from an earlier run; nothing recomputed.
    Existing,
}

/// Resolve one artifact: prefer the existing working copy, then the manual
/// file, then the `compute` fallback (invoked at most once).
pub fn resolve_or_compute<F>(
    kind: ArtifactKind,
    manual_path: &Path,
    local_path: &Path,
    log_root: &Path,
    subject: &str,
    compute: F,
) -> Result<Resolution>
where
    F: FnOnce() -> Result<()>,
{
    let log_path = log_root.join(kind.log_name());

    if local_path.is_file() {
        info!("{subject}: {kind} already present, skipping");
        logs::append_line(
            &log_path,
            &format!("{subject}{sep}{kind}{sep}already present", sep = logs::SEP),
        )?;
        return Ok(Resolution::Existing);
    }

    if manual_path.is_file() {
        info!("{subject}: manual {kind} found");
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(manual_path, local_path).with_context(|| {
            format!(
                "failed to copy manual {kind} from {}",
                manual_path.display()
            )
        })?;
        logs::append_line(
            &log_path,
            &format!(
                "{subject}{sep}{kind}{sep}found{sep}{path}",
                sep = logs::SEP,
                path = manual_path.display()
            ),
        )?;
        return Ok(Resolution::Manual);
    }

    info!("{subject}: manual {kind} not found, computing");
    logs::append_line(
        &log_path,
        &format!(
            "{subject}{sep}{kind}{sep}not found{sep}{path}",
            sep = logs::SEP,
            path = manual_path.display()
        ),
    )?;
    compute()?;
    Ok(Resolution::Automatic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        manual: std::path::PathBuf,
        local: std::path::PathBuf,
        log_root: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let manual = tmp.path().join("derivatives/labels/sub-A/anat/sub-A_T2w_seg-manual.nii.gz");
        let local = tmp.path().join("work/anat/sub-A_T2w_seg.nii.gz");
        let log_root = tmp.path().join("log");
        Fixture { _tmp: tmp, manual, local, log_root }
    }

    fn log_content(f: &Fixture, kind: ArtifactKind) -> String {
        logs::read_lines(&f.log_root.join(kind.log_name()))
            .unwrap()
            .join("\n")
    }

    #[test]
    fn test_manual_found_skips_compute() {
        let f = fixture();
        fs::create_dir_all(f.manual.parent().unwrap()).unwrap();
        fs::write(&f.manual, b"manual mask").unwrap();

        let computed = Cell::new(false);
        let resolution = resolve_or_compute(
            ArtifactKind::CordSeg,
            &f.manual,
            &f.local,
            &f.log_root,
            "sub-A/ses-1",
            || {
                computed.set(true);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(resolution, Resolution::Manual);
        assert!(!computed.get(), "automatic path must never run when a manual file exists");
        assert!(f.local.is_file());
        assert!(log_content(&f, ArtifactKind::CordSeg).contains("found"));
    }

    #[test]
    fn test_manual_missing_computes_exactly_once() {
        let f = fixture();

        let calls = Cell::new(0u32);
        let resolution = resolve_or_compute(
            ArtifactKind::DiscLabels,
            &f.manual,
            &f.local,
            &f.log_root,
            "sub-A/ses-1",
            || {
                calls.set(calls.get() + 1);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(resolution, Resolution::Automatic);
        assert_eq!(calls.get(), 1);
        assert!(log_content(&f, ArtifactKind::DiscLabels).contains("not found"));
    }

    #[test]
    fn test_existing_working_copy_recomputes_nothing() {
        let f = fixture();
        fs::create_dir_all(f.local.parent().unwrap()).unwrap();
        fs::write(&f.local, b"already there").unwrap();

        let computed = Cell::new(false);
        let resolution = resolve_or_compute(
            ArtifactKind::GmSeg,
            &f.manual,
            &f.local,
            &f.log_root,
            "sub-A/ses-1",
            || {
                computed.set(true);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(resolution, Resolution::Existing);
        assert!(!computed.get());
        assert!(log_content(&f, ArtifactKind::GmSeg).contains("already present"));
    }

    #[test]
    fn test_compute_failure_propagates() {
        let f = fixture();
        let result = resolve_or_compute(
            ArtifactKind::CordSeg,
            &f.manual,
            &f.local,
            &f.log_root,
            "sub-A/ses-1",
            || anyhow::bail!("segmentation tool crashed"),
        );
        assert!(result.is_err());
        // The decision was still recorded before the failure.
        assert!(log_content(&f, ArtifactKind::CordSeg).contains("not found"));
    }
}
