//! T2star branch: gray/white matter segmentation and cross-sectional areas.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use super::resolve::{self, ArtifactKind};
use super::stages::Stage;
use super::ProcessContext;
use crate::metrics;
use crate::runner;

/// Shared gray matter CSA table under the results root.
pub const CSA_GM_TABLE: &str = "T2star_csa_gm.csv";
/// Shared white matter CSA table under the results root.
pub const CSA_WM_TABLE: &str = "T2star_csa_wm.csv";

pub(super) fn run(ctx: &ProcessContext, work: &Path) -> Result<bool> {
    let id = ctx.target.id();
    if ctx.excluded("T2star") {
        info!("{id}: excluded from T2star analysis");
        return Ok(false);
    }

    let anat = work.join("anat");
    let prefix = ctx.target.file_prefix();
    let t2star = format!("{prefix}_T2star.nii.gz");
    if !anat.join(&t2star).is_file() {
        info!("{id}: no T2star image, skipping");
        return Ok(false);
    }
    let qc = ctx.env.path_qc.display().to_string();

    info!("{}", Stage::SegmentT2star);
    let seg = format!("{prefix}_T2star_seg.nii.gz");
    resolve::resolve_or_compute(
        ArtifactKind::CordSeg,
        &ctx.manual_path("anat", &format!("{prefix}_T2star_seg-manual.nii.gz")),
        &anat.join(&seg),
        &ctx.env.path_log,
        &id,
        || {
            runner::run_in(
                &anat,
                "sct_deepseg_sc",
                ["-i", t2star.as_str(), "-c", "t2s", "-o", seg.as_str(), "-qc", qc.as_str()],
            )
        },
    )?;

    let gmseg = format!("{prefix}_T2star_gmseg.nii.gz");
    resolve::resolve_or_compute(
        ArtifactKind::GmSeg,
        &ctx.manual_path("anat", &format!("{prefix}_T2star_gmseg-manual.nii.gz")),
        &anat.join(&gmseg),
        &ctx.env.path_log,
        &id,
        || {
            runner::run_in(
                &anat,
                "sct_deepseg_gm",
                ["-i", t2star.as_str(), "-o", gmseg.as_str(), "-qc", qc.as_str()],
            )
        },
    )?;

    // White matter mask: full cord minus gray matter.
    let wmseg = format!("{prefix}_T2star_wmseg.nii.gz");
    if !anat.join(&wmseg).is_file() {
        runner::run_in(
            &anat,
            "sct_maths",
            ["-i", seg.as_str(), "-sub", gmseg.as_str(), "-o", wmseg.as_str()],
        )?;
    }

    info!("{}", Stage::ComputeMetricsT2star);
    let metrics_dir = work.join("metrics");
    fs::create_dir_all(&metrics_dir)
        .with_context(|| format!("failed to create {}", metrics_dir.display()))?;

    for (mask, table) in [(&gmseg, CSA_GM_TABLE), (&wmseg, CSA_WM_TABLE)] {
        let per_subject = metrics_dir.join(format!("{prefix}_{table}"));
        if per_subject.is_file() {
            continue;
        }
        let out = per_subject.display().to_string();
        runner::run_in(
            &anat,
            "sct_process_segmentation",
            ["-i", mask.as_str(), "-angle-corr", "0", "-o", out.as_str()],
        )?;
        metrics::append_table(&per_subject, &ctx.env.path_results.join(table))?;
    }

    Ok(true)
}

pub(super) fn expected_outputs(ctx: &ProcessContext, work: &Path) -> Vec<PathBuf> {
    let anat = work.join("anat");
    let prefix = ctx.target.file_prefix();
    vec![
        anat.join(format!("{prefix}_T2star_seg.nii.gz")),
        anat.join(format!("{prefix}_T2star_gmseg.nii.gz")),
        anat.join(format!("{prefix}_T2star_wmseg.nii.gz")),
        work.join("metrics").join(format!("{prefix}_{CSA_GM_TABLE}")),
        work.join("metrics").join(format!("{prefix}_{CSA_WM_TABLE}")),
    ]
}
