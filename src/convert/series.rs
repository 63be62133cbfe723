//! DICOM series discovery.
//!
//! Walks a staged subject folder, identifies DICOM files, reads the header
//! of each one, and groups the files by SeriesInstanceUID into per-series
//! metadata records for criteria matching.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::OpenFileOptions;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use walkdir::WalkDir;

/// Metadata of one acquired series, plus the files that belong to it.
#[derive(Debug, Clone, Default)]
pub struct SeriesMeta {
    pub series_uid: String,
    pub series_number: Option<u32>,
    pub description: Option<String>,
    pub protocol_name: Option<String>,
    pub slice_thickness: Option<f64>,
    pub echo_time: Option<f64>,
    pub image_type: Vec<String>,
    pub phase_encoding: Option<String>,
    pub files: Vec<PathBuf>,
}

/// Collect candidate DICOM files under `input`, by extension or by the
/// `DICM` magic at offset 128.
pub fn collect_dicom_files(input: &Path, max_depth: usize) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        bail!("input path is not a directory: {}", input.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| is_likely_dicom_file(p))
        .collect();
    files.sort();
    Ok(files)
}

pub fn is_likely_dicom_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy().to_lowercase();
        if matches!(ext.as_str(), "dcm" | "dicom" | "ima" | "img") {
            return true;
        }
    }

    if let Ok(mut file) = File::open(path) {
        let mut buffer = [0u8; 132];
        if file.read_exact(&mut buffer).is_ok() {
            return &buffer[128..132] == b"DICM";
        }
    }

    false
}

/// Scan `input` and return one [`SeriesMeta`] per series, ordered by
/// series number.
pub fn scan_series(input: &Path, max_depth: usize, show_progress: bool) -> Result<Vec<SeriesMeta>> {
    let files = collect_dicom_files(input, max_depth)?;
    if files.is_empty() {
        bail!("no DICOM files found under {}", input.display());
    }

    let progress = if show_progress {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .expect("static progress template")
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    // Unreadable files are tolerated here; a series with zero readable
    // files simply never forms.
    let per_file: Vec<(String, SeriesMeta, PathBuf)> = files
        .par_iter()
        .filter_map(|path| {
            let meta = read_file_meta(path);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            match meta {
                Ok(meta) => Some((meta.series_uid.clone(), meta, path.clone())),
                Err(e) => {
                    log::warn!("skipping {}: {e:#}", path.display());
                    None
                }
            }
        })
        .collect();

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    let mut grouped: HashMap<String, SeriesMeta> = HashMap::new();
    for (uid, meta, path) in per_file {
        let entry = grouped.entry(uid).or_insert_with(|| SeriesMeta {
            files: Vec::new(),
            ..meta
        });
        entry.files.push(path);
    }

    let mut series: Vec<SeriesMeta> = grouped.into_values().collect();
    for s in &mut series {
        s.files.sort();
    }
    series.sort_by(|a, b| {
        a.series_number
            .cmp(&b.series_number)
            .then_with(|| a.series_uid.cmp(&b.series_uid))
    });
    Ok(series)
}

fn read_file_meta(path: &Path) -> Result<SeriesMeta> {
    let obj = OpenFileOptions::new()
        .open_file(path)
        .with_context(|| format!("failed to open DICOM file {}", path.display()))?;

    let get_str = |tag: Tag| -> Option<String> {
        obj.element_opt(tag)
            .ok()
            .flatten()
            .and_then(|elem| elem.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let series_uid = get_str(tags::SERIES_INSTANCE_UID)
        .with_context(|| format!("{} has no SeriesInstanceUID", path.display()))?;

    Ok(SeriesMeta {
        series_uid,
        series_number: get_str(tags::SERIES_NUMBER).and_then(|s| s.parse().ok()),
        description: get_str(tags::SERIES_DESCRIPTION),
        protocol_name: get_str(tags::PROTOCOL_NAME),
        slice_thickness: get_str(tags::SLICE_THICKNESS).and_then(|s| s.parse().ok()),
        echo_time: get_str(tags::ECHO_TIME).and_then(|s| s.parse().ok()),
        image_type: get_str(tags::IMAGE_TYPE)
            .map(|s| s.split('\\').map(|part| part.trim().to_string()).collect())
            .unwrap_or_default(),
        phase_encoding: get_str(tags::IN_PLANE_PHASE_ENCODING_DIRECTION),
        files: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_is_likely_dicom_by_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("IM0001.dcm");
        std::fs::write(&path, b"anything").unwrap();
        assert!(is_likely_dicom_file(&path));
    }

    #[test]
    fn test_is_likely_dicom_by_magic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("IM0001");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0u8; 128]).unwrap();
        file.write_all(b"DICM").unwrap();
        assert!(is_likely_dicom_file(&path));
    }

    #[test]
    fn test_plain_file_is_not_dicom() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "just some text long enough to pass the header read if any").unwrap();
        assert!(!is_likely_dicom_file(&path));
    }

    #[test]
    fn test_collect_descends_and_filters() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("ses/anat");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("a.dcm"), b"x").unwrap();
        std::fs::write(nested.join("b.IMA"), b"x").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "nope").unwrap();

        let files = collect_dicom_files(tmp.path(), 10).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_collect_on_missing_dir_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(collect_dicom_files(&tmp.path().join("absent"), 10).is_err());
    }
}
