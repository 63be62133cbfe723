//! Subject copier: stage DICOM folders from the acquisition source trees.
//!
//! Acquisition data is spread over several source trees on the data disc;
//! a subject session lives in exactly one of them, either as a plain
//! `dicom/sub-<id>` folder or as a `dicom/sub-<id>.zip` archive. The first
//! tree that has the session wins. Already-staged sessions are skipped, so
//! the copier can be re-run after new acquisitions land.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::logs;
use crate::roster::Subject;

/// Decision log written into the staging root.
pub const COPY_LOG: &str = "copy_source_data.log";

#[derive(Debug, Default)]
pub struct CopyReport {
    pub copied: Vec<String>,
    pub skipped: Vec<String>,
    pub missing: Vec<String>,
}

enum SourceHit {
    Dir(PathBuf),
    Archive(PathBuf),
}

/// Stage every roster session into `staging`, probing `source_trees` under
/// `disc` in order. Missing sessions are logged, not fatal.
pub fn stage_sources(
    disc: &Path,
    source_trees: &[String],
    staging: &Path,
    subjects: &[Subject],
) -> Result<CopyReport> {
    fs::create_dir_all(staging)
        .with_context(|| format!("failed to create staging root {}", staging.display()))?;
    let log_path = staging.join(COPY_LOG);
    let mut report = CopyReport::default();

    for subject in subjects {
        for session in subject.session_ids() {
            let name = format!("sub-{session}");
            let dest = staging.join(&name);
            if dest.is_dir() {
                logs::append_line(&log_path, &format!("{name}{}already staged", logs::SEP))?;
                report.skipped.push(name);
                continue;
            }
            match locate_source(disc, source_trees, &name) {
                Some((tree, SourceHit::Dir(source))) => {
                    info!("{name} found in {tree}");
                    let files = copy_tree(&source, &dest, false)?;
                    logs::append_line(
                        &log_path,
                        &format!("{name}{}copied {files} files from {tree}", logs::SEP),
                    )?;
                    report.copied.push(name);
                }
                Some((tree, SourceHit::Archive(archive))) => {
                    info!("{name} found as archive in {tree}");
                    let extracted = extract_archive(&archive)?;
                    // Archives may hold the subject folder or its bare contents.
                    let root = if extracted.join(&name).is_dir() {
                        extracted.join(&name)
                    } else {
                        extracted.clone()
                    };
                    let files = copy_tree(&root, &dest, false)?;
                    logs::append_line(
                        &log_path,
                        &format!("{name}{}extracted {files} files from {tree}", logs::SEP),
                    )?;
                    report.copied.push(name);
                }
                None => {
                    // Reported by the verification pass below.
                }
            }
        }
    }

    // Re-check every roster session made it into the staging area.
    for subject in subjects {
        for session in subject.session_ids() {
            let name = format!("sub-{session}");
            if !staging.join(&name).is_dir() {
                warn!("{name} was not staged");
                logs::append_line(&log_path, &format!("ERROR: {name} was not staged"))?;
                report.missing.push(name);
            }
        }
    }

    Ok(report)
}

fn locate_source(disc: &Path, trees: &[String], name: &str) -> Option<(String, SourceHit)> {
    for tree in trees {
        let dir = disc.join(tree).join("dicom").join(name);
        if dir.is_dir() {
            return Some((tree.clone(), SourceHit::Dir(dir)));
        }
        let archive = dir.with_extension("zip");
        if archive.is_file() {
            return Some((tree.clone(), SourceHit::Archive(archive)));
        }
    }
    None
}

/// Recursive copy; returns the number of files written. With
/// `skip_existing`, files already present at the destination are left
/// untouched (used when re-staging a partially processed subject).
pub fn copy_tree(source: &Path, dest: &Path, skip_existing: bool) -> Result<u64> {
    let mut files = 0;
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .context("walked entry outside the source root")?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else {
            if skip_existing && target.is_file() {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
            files += 1;
        }
    }
    Ok(files)
}

fn extract_archive(archive_path: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("failed to read archive {}", archive_path.display()))?;

    let temp_dir = std::env::temp_dir().join(format!("dicom_stage_{}", Uuid::new_v4()));
    fs::create_dir_all(&temp_dir)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let out_path = temp_dir.join(entry.name());
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.display()))?;
        std::io::copy(&mut entry, &mut output)?;
    }

    Ok(temp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn subject(ses1: &str, ses2: &str) -> Subject {
        Subject {
            session_1: ses1.to_string(),
            session_2: ses2.to_string(),
            surgery_date: None,
        }
    }

    fn seed_session(disc: &Path, tree: &str, session: &str) {
        let dir = disc.join(tree).join("dicom").join(format!("sub-{session}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("IM0001.dcm"), b"not really dicom").unwrap();
    }

    #[test]
    fn test_stage_copies_first_matching_tree() {
        let tmp = TempDir::new().unwrap();
        let disc = tmp.path();
        let staging = disc.join("sourcedata");
        seed_session(disc, "tree_a", "2390B");
        seed_session(disc, "tree_b", "4949B");

        let trees = vec!["tree_a".to_string(), "tree_b".to_string()];
        let report =
            stage_sources(disc, &trees, &staging, &[subject("2390B", "4949B")]).unwrap();

        assert_eq!(report.copied.len(), 2);
        assert!(report.missing.is_empty());
        assert!(staging.join("sub-2390B/IM0001.dcm").is_file());
        assert!(staging.join("sub-4949B/IM0001.dcm").is_file());
        assert!(staging.join(COPY_LOG).is_file());
    }

    #[test]
    fn test_stage_skips_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let disc = tmp.path();
        let staging = disc.join("sourcedata");
        seed_session(disc, "tree_a", "2390B");
        seed_session(disc, "tree_a", "4949B");

        let trees = vec!["tree_a".to_string()];
        let subjects = [subject("2390B", "4949B")];
        stage_sources(disc, &trees, &staging, &subjects).unwrap();
        let report = stage_sources(disc, &trees, &staging, &subjects).unwrap();

        assert!(report.copied.is_empty());
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_stage_reports_missing_sessions() {
        let tmp = TempDir::new().unwrap();
        let disc = tmp.path();
        let staging = disc.join("sourcedata");
        seed_session(disc, "tree_a", "2390B");

        let trees = vec!["tree_a".to_string()];
        let report =
            stage_sources(disc, &trees, &staging, &[subject("2390B", "9999X")]).unwrap();

        assert_eq!(report.copied, vec!["sub-2390B".to_string()]);
        assert_eq!(report.missing, vec!["sub-9999X".to_string()]);

        let log = logs::read_lines(&staging.join(COPY_LOG)).unwrap();
        assert!(log.iter().any(|l| l.contains("ERROR: sub-9999X")));
    }
}
