//! Diffusion branch: preprocessing, cord segmentation on the motion
//! corrected mean, template/atlas warping, DTI fit, and tract metrics.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

use super::resolve::{self, ArtifactKind};
use super::stages::{self, Stage};
use super::ProcessContext;
use crate::config;
use crate::metrics;
use crate::runner;

/// DTI scalar maps and their shared tables under the results root.
pub const DTI_TABLES: [(&str, &str); 3] =
    [("FA", "DWI_FA.csv"), ("MD", "DWI_MD.csv"), ("RD", "DWI_RD.csv")];

/// Atlas label for the whole white matter.
const WM_LABEL: &str = "51";

/// Vertebral coverage of the diffusion acquisition (C2..C5).
const VERT_LEVELS: &str = "2:5";

pub(super) fn run(ctx: &ProcessContext, work: &Path) -> Result<bool> {
    let id = ctx.target.id();
    if ctx.excluded("DWI") {
        info!("{id}: excluded from DWI analysis");
        return Ok(false);
    }

    let dwi_dir = work.join("dwi");
    let prefix = ctx.target.file_prefix();
    let dwi = format!("{prefix}_dwi.nii.gz");
    if !dwi_dir.join(&dwi).is_file() {
        info!("{id}: no diffusion data, skipping");
        return Ok(false);
    }
    let bvec = format!("{prefix}_dwi.bvec");
    let bval = format!("{prefix}_dwi.bval");
    for sidecar in [&bvec, &bval] {
        if !dwi_dir.join(sidecar).is_file() {
            bail!("{id}: diffusion image present but {sidecar} is missing");
        }
    }
    let qc = ctx.env.path_qc.display().to_string();

    info!("{}", Stage::DwiPreprocess);
    let dwi_mean = format!("{prefix}_dwi_dwi_mean.nii.gz");
    if !dwi_dir.join(&dwi_mean).is_file() {
        runner::run_in(
            &dwi_dir,
            "sct_dmri_separate_b0_and_dwi",
            ["-i", dwi.as_str(), "-bvec", bvec.as_str()],
        )?;
    }
    let centerline = format!("{prefix}_dwi_centerline.nii.gz");
    if !dwi_dir.join(&centerline).is_file() {
        runner::run_in(
            &dwi_dir,
            "sct_get_centerline",
            ["-i", dwi_mean.as_str(), "-c", "dwi", "-o", centerline.as_str()],
        )?;
    }
    let mask = format!("{prefix}_dwi_mask.nii.gz");
    if !dwi_dir.join(&mask).is_file() {
        let process = format!("centerline,{centerline}");
        runner::run_in(
            &dwi_dir,
            "sct_create_mask",
            [
                "-i",
                dwi_mean.as_str(),
                "-p",
                process.as_str(),
                "-size",
                "35mm",
                "-o",
                mask.as_str(),
            ],
        )?;
    }
    let crop = format!("{prefix}_dwi_crop.nii.gz");
    if !dwi_dir.join(&crop).is_file() {
        runner::run_in(
            &dwi_dir,
            "sct_crop_image",
            ["-i", dwi.as_str(), "-m", mask.as_str(), "-o", crop.as_str()],
        )?;
    }
    let moco = format!("{prefix}_dwi_crop_moco.nii.gz");
    let moco_mean = format!("{prefix}_dwi_crop_moco_dwi_mean.nii.gz");
    if !dwi_dir.join(&moco).is_file() {
        runner::run_in(
            &dwi_dir,
            "sct_dmri_moco",
            ["-i", crop.as_str(), "-bvec", bvec.as_str(), "-x", "spline", "-qc", qc.as_str()],
        )?;
    }

    info!("{}", Stage::SegmentDwi);
    let seg = format!("{prefix}_dwi_seg.nii.gz");
    resolve::resolve_or_compute(
        ArtifactKind::CordSeg,
        &ctx.manual_path("dwi", &format!("{prefix}_dwi_seg-manual.nii.gz")),
        &dwi_dir.join(&seg),
        &ctx.env.path_log,
        &id,
        || {
            runner::run_in(
                &dwi_dir,
                "sct_deepseg_sc",
                ["-i", moco_mean.as_str(), "-c", "dwi", "-o", seg.as_str(), "-qc", qc.as_str()],
            )
        },
    )?;

    info!("{}", Stage::RegisterDwiToTemplate);
    let sct_dir = config::sct_dir()?;
    let template_t1 = sct_dir.join("data/PAM50/template/PAM50_t1.nii.gz");
    let template_cord = sct_dir.join("data/PAM50/template/PAM50_cord.nii.gz");
    // Initialized from the T2w warping field computed earlier.
    let init_warp = work.join("anat").join("warp_template2anat.nii.gz");
    if !init_warp.is_file() {
        bail!("{id}: {} not found, run the T2w branch first", init_warp.display());
    }
    let warp = "warp_template2dmri.nii.gz";
    let warpinv = "warp_dmri2template.nii.gz";
    if !stages::skip_if_exists(&dwi_dir.join(warp), Stage::RegisterDwiToTemplate) {
        let template_t1 = template_t1.display().to_string();
        let template_cord = template_cord.display().to_string();
        let init_warp = init_warp.display().to_string();
        runner::run_in(
            &dwi_dir,
            "sct_register_multimodal",
            [
                "-i",
                template_t1.as_str(),
                "-d",
                moco_mean.as_str(),
                "-iseg",
                template_cord.as_str(),
                "-dseg",
                seg.as_str(),
                "-initwarp",
                init_warp.as_str(),
                "-param",
                "step=1,type=seg,algo=centermass",
                "-owarp",
                warp,
                "-owarpinv",
                warpinv,
                "-qc",
                qc.as_str(),
            ],
        )?;
    }

    info!("{}", Stage::WarpAtlas);
    if !dwi_dir.join("label/atlas").is_dir() {
        runner::run_in(
            &dwi_dir,
            "sct_warp_template",
            ["-d", moco_mean.as_str(), "-w", warp, "-a", "1", "-ofolder", "label", "-qc", qc.as_str()],
        )?;
    }

    info!("{}", Stage::ComputeDti);
    let dti_prefix = format!("{prefix}_dti_");
    let fa = format!("{dti_prefix}FA.nii.gz");
    if !dwi_dir.join(&fa).is_file() {
        runner::run_in(
            &dwi_dir,
            "sct_dmri_compute_dti",
            [
                "-i",
                moco.as_str(),
                "-bval",
                bval.as_str(),
                "-bvec",
                bvec.as_str(),
                "-o",
                dti_prefix.as_str(),
            ],
        )?;
    }

    info!("{}", Stage::ExtractTractMetrics);
    let metrics_dir = work.join("metrics");
    fs::create_dir_all(&metrics_dir)
        .with_context(|| format!("failed to create {}", metrics_dir.display()))?;

    for (metric, table) in DTI_TABLES {
        let image = format!("{dti_prefix}{metric}.nii.gz");
        let per_subject = metrics_dir.join(format!("{prefix}_{table}"));
        if per_subject.is_file() {
            continue;
        }
        let out = per_subject.display().to_string();
        runner::run_in(
            &dwi_dir,
            "sct_extract_metric",
            [
                "-i",
                image.as_str(),
                "-f",
                "label/atlas",
                "-l",
                WM_LABEL,
                "-vert",
                VERT_LEVELS,
                "-vertfile",
                "label/template/PAM50_levels.nii.gz",
                "-perlevel",
                "1",
                "-method",
                "map",
                "-o",
                out.as_str(),
            ],
        )?;
        metrics::append_table(&per_subject, &ctx.env.path_results.join(table))?;
    }

    Ok(true)
}

pub(super) fn expected_outputs(ctx: &ProcessContext, work: &Path) -> Vec<PathBuf> {
    let dwi_dir = work.join("dwi");
    let prefix = ctx.target.file_prefix();
    let mut expected = vec![
        dwi_dir.join(format!("{prefix}_dwi_crop_moco.nii.gz")),
        dwi_dir.join(format!("{prefix}_dwi_seg.nii.gz")),
        dwi_dir.join("warp_template2dmri.nii.gz"),
    ];
    for (metric, table) in DTI_TABLES {
        expected.push(dwi_dir.join(format!("{prefix}_dti_{metric}.nii.gz")));
        expected.push(work.join("metrics").join(format!("{prefix}_{table}")));
    }
    expected
}
