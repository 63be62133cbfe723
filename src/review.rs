//! Manual-correction worklist.
//!
//! The per-artifact decision logs record which subjects fell back to the
//! automatic tool. This module replays those logs, keeps the latest
//! decision per (subject, artifact), and surfaces the cases that would
//! still use an automatic result on the next run, so they can be queued
//! for manual correction.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::logs;
use crate::process::resolve::ArtifactKind;

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub subject: String,
    pub artifact: String,
    pub expected_manual_path: String,
    /// A manual file has appeared at the expected path since the
    /// automatic run; the subject only needs reprocessing.
    pub manual_now_available: bool,
}

/// Collect every (subject, artifact) whose latest decision was the
/// automatic fallback.
pub fn collect_candidates(log_root: &Path) -> Result<Vec<Candidate>> {
    let mut latest: BTreeMap<(String, &'static str), Candidate> = BTreeMap::new();

    for kind in ArtifactKind::ALL {
        let log_path = log_root.join(kind.log_name());
        for line in logs::read_lines(&log_path)? {
            // timestamp | subject | artifact | decision [| manual path]
            let fields: Vec<&str> = line.split(logs::SEP).collect();
            if fields.len() < 4 {
                continue;
            }
            let subject = fields[1].to_string();
            let key = (subject.clone(), kind.log_name());
            match fields[3] {
                "not found" => {
                    let manual = fields.get(4).copied().unwrap_or("").to_string();
                    latest.insert(
                        key,
                        Candidate {
                            subject,
                            artifact: kind.to_string(),
                            manual_now_available: Path::new(&manual).is_file(),
                            expected_manual_path: manual,
                        },
                    );
                }
                // A manual file was used; the case is closed.
                "found" => {
                    latest.remove(&key);
                }
                _ => {}
            }
        }
    }

    Ok(latest.into_values().collect())
}

/// Write the pending cases as a YAML worklist, one subject list per
/// artifact, shaped like the exclusion lists so it can be reviewed and
/// edited by hand.
pub fn write_worklist(candidates: &[Candidate], out: &Path) -> Result<()> {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for candidate in candidates.iter().filter(|c| !c.manual_now_available) {
        grouped
            .entry(candidate.artifact.as_str())
            .or_default()
            .push(candidate.subject.as_str());
    }
    let yaml = serde_yaml::to_string(&grouped).context("failed to serialize worklist")?;
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(out, yaml).with_context(|| format!("failed to write {}", out.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::resolve::{resolve_or_compute, ArtifactKind};
    use tempfile::TempDir;

    #[test]
    fn test_automatic_runs_become_candidates() {
        let tmp = TempDir::new().unwrap();
        let log_root = tmp.path().join("log");
        let manual = tmp.path().join("derivatives/sub-A_T2w_seg-manual.nii.gz");
        let local = tmp.path().join("work/sub-A_T2w_seg.nii.gz");

        resolve_or_compute(
            ArtifactKind::CordSeg,
            &manual,
            &local,
            &log_root,
            "sub-A/ses-1",
            || Ok(()),
        )
        .unwrap();

        let candidates = collect_candidates(&log_root).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].subject, "sub-A/ses-1");
        assert!(!candidates[0].manual_now_available);

        // The manual file lands later: the case flips to ready-to-rerun.
        std::fs::create_dir_all(manual.parent().unwrap()).unwrap();
        std::fs::write(&manual, b"corrected").unwrap();
        let candidates = collect_candidates(&log_root).unwrap();
        assert!(candidates[0].manual_now_available);
    }

    #[test]
    fn test_manual_use_closes_the_case() {
        let tmp = TempDir::new().unwrap();
        let log_root = tmp.path().join("log");
        let manual = tmp.path().join("derivatives/sub-A_labels-disc-manual.nii.gz");
        let local = tmp.path().join("work/sub-A_labels-disc.nii.gz");

        // First run: automatic fallback.
        resolve_or_compute(ArtifactKind::DiscLabels, &manual, &local, &log_root, "sub-A/ses-1", || {
            Ok(())
        })
        .unwrap();
        assert_eq!(collect_candidates(&log_root).unwrap().len(), 1);

        // Correction lands, the working copy is cleared, the rerun uses it.
        std::fs::create_dir_all(manual.parent().unwrap()).unwrap();
        std::fs::write(&manual, b"corrected").unwrap();
        resolve_or_compute(ArtifactKind::DiscLabels, &manual, &local, &log_root, "sub-A/ses-1", || {
            Ok(())
        })
        .unwrap();

        assert!(collect_candidates(&log_root).unwrap().is_empty());
    }

    #[test]
    fn test_worklist_contains_only_pending_cases() {
        let tmp = TempDir::new().unwrap();
        let candidates = vec![
            Candidate {
                subject: "sub-A/ses-1".into(),
                artifact: "cord segmentation".into(),
                expected_manual_path: "/nowhere".into(),
                manual_now_available: false,
            },
            Candidate {
                subject: "sub-B/ses-1".into(),
                artifact: "cord segmentation".into(),
                expected_manual_path: "/nowhere".into(),
                manual_now_available: true,
            },
        ];

        let out = tmp.path().join("worklist.yml");
        write_worklist(&candidates, &out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("sub-A/ses-1"));
        assert!(!text.contains("sub-B/ses-1"));
    }
}
