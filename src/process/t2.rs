//! T2w branch: cord segmentation, vertebral labeling, template
//! registration, and shape metrics.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

use super::resolve::{self, ArtifactKind, Resolution};
use super::stages::{self, Stage};
use super::ProcessContext;
use crate::metrics;
use crate::runner;

/// Shared per-level shape metric table under the results root.
pub const PERLEVEL_TABLE: &str = "T2w_metrics_perlevel.csv";
/// Suffix of the template-normalized per-slice tables consumed by the
/// figure generator.
pub const PERSLICE_SUFFIX: &str = "_T2w_metrics_perslice_PAM50.csv";

/// Vertebral levels covered by the cervical protocol (C2..Th1).
const VERT_LEVELS: &str = "2:8";

/// Template objects warped into subject space.
const LEVELS_FILE: &str = "label/template/PAM50_levels.nii.gz";

pub(super) fn run(ctx: &ProcessContext, work: &Path) -> Result<bool> {
    let id = ctx.target.id();
    if ctx.excluded("T2w") {
        info!("{id}: excluded from T2w analysis");
        return Ok(false);
    }

    let anat = work.join("anat");
    let prefix = ctx.target.file_prefix();
    let t2 = format!("{prefix}_T2w.nii.gz");
    if !anat.join(&t2).is_file() {
        // The T2w image is the backbone of the pipeline.
        bail!("{id}: missing T2w image {}", anat.join(&t2).display());
    }
    let qc = ctx.env.path_qc.display().to_string();

    info!("{}", Stage::SegmentT2);
    let seg = format!("{prefix}_T2w_seg.nii.gz");
    resolve::resolve_or_compute(
        ArtifactKind::CordSeg,
        &ctx.manual_path("anat", &format!("{prefix}_T2w_seg-manual.nii.gz")),
        &anat.join(&seg),
        &ctx.env.path_log,
        &id,
        || match &ctx.model {
            Some(model) => {
                let script = model.script.display().to_string();
                let model_path = model.model_path.display().to_string();
                runner::run_in(
                    &anat,
                    "python",
                    [
                        script.as_str(),
                        "-i",
                        t2.as_str(),
                        "-o",
                        seg.as_str(),
                        "-m",
                        model_path.as_str(),
                    ],
                )
            }
            None => runner::run_in(
                &anat,
                "sct_deepseg_sc",
                ["-i", t2.as_str(), "-c", "t2", "-o", seg.as_str(), "-qc", qc.as_str()],
            ),
        },
    )?;

    info!("{}", Stage::LabelVertebrae);
    let disc = format!("{prefix}_T2w_labels-disc.nii.gz");
    let labeled = format!("{prefix}_T2w_seg_labeled.nii.gz");
    let resolution = resolve::resolve_or_compute(
        ArtifactKind::DiscLabels,
        &ctx.manual_path("anat", &format!("{prefix}_T2w_labels-disc-manual.nii.gz")),
        &anat.join(&disc),
        &ctx.env.path_log,
        &id,
        || {
            // Estimate the labeling from the image; the tool also emits
            // the disc positions, kept under the conventional name.
            runner::run_in(
                &anat,
                "sct_label_vertebrae",
                ["-i", t2.as_str(), "-s", seg.as_str(), "-c", "t2", "-qc", qc.as_str()],
            )?;
            let emitted = anat.join(format!("{prefix}_T2w_seg_labeled_discs.nii.gz"));
            fs::rename(&emitted, anat.join(&disc))
                .with_context(|| format!("labeling produced no disc file {}", emitted.display()))?;
            Ok(())
        },
    )?;
    if resolution != Resolution::Automatic && !stages::skip_if_exists(&anat.join(&labeled), Stage::LabelVertebrae)
    {
        // Labeling driven by the resolved disc file.
        runner::run_in(
            &anat,
            "sct_label_vertebrae",
            [
                "-i",
                t2.as_str(),
                "-s",
                seg.as_str(),
                "-c",
                "t2",
                "-discfile",
                disc.as_str(),
                "-qc",
                qc.as_str(),
            ],
        )?;
    }

    info!("{}", Stage::RegisterToTemplate);
    let warp = "warp_template2anat.nii.gz";
    if !stages::skip_if_exists(&anat.join(warp), Stage::RegisterToTemplate) {
        runner::run_in(
            &anat,
            "sct_register_to_template",
            [
                "-i",
                t2.as_str(),
                "-s",
                seg.as_str(),
                "-ldisc",
                disc.as_str(),
                "-c",
                "t2",
                "-qc",
                qc.as_str(),
            ],
        )?;
    }
    if !anat.join(LEVELS_FILE).is_file() {
        runner::run_in(
            &anat,
            "sct_warp_template",
            ["-d", t2.as_str(), "-w", warp, "-a", "0", "-ofolder", "label", "-qc", qc.as_str()],
        )?;
    }

    info!("{}", Stage::ComputeMetricsT2);
    let metrics_dir = work.join("metrics");
    fs::create_dir_all(&metrics_dir)
        .with_context(|| format!("failed to create {}", metrics_dir.display()))?;

    let perlevel = metrics_dir.join(format!("{prefix}_T2w_metrics_perlevel.csv"));
    if !perlevel.is_file() {
        let out = perlevel.display().to_string();
        runner::run_in(
            &anat,
            "sct_process_segmentation",
            [
                "-i",
                seg.as_str(),
                "-vert",
                VERT_LEVELS,
                "-vertfile",
                LEVELS_FILE,
                "-perlevel",
                "1",
                "-o",
                out.as_str(),
            ],
        )?;
        metrics::append_table(&perlevel, &ctx.env.path_results.join(PERLEVEL_TABLE))?;
    }

    let perslice_name = format!("{prefix}{PERSLICE_SUFFIX}");
    let perslice = metrics_dir.join(&perslice_name);
    if !perslice.is_file() {
        let out = perslice.display().to_string();
        runner::run_in(
            &anat,
            "sct_process_segmentation",
            [
                "-i",
                seg.as_str(),
                "-perslice",
                "1",
                "-normalize-PAM50",
                "1",
                "-vertfile",
                LEVELS_FILE,
                "-o",
                out.as_str(),
            ],
        )?;
    }
    // Publish the per-slice table where the figure loop picks it up.
    let shared = ctx.env.path_results.join(&perslice_name);
    if !shared.is_file() {
        fs::create_dir_all(&ctx.env.path_results)?;
        fs::copy(&perslice, &shared)
            .with_context(|| format!("failed to publish {}", perslice.display()))?;
    }

    Ok(true)
}

pub(super) fn expected_outputs(ctx: &ProcessContext, work: &Path) -> Vec<PathBuf> {
    let anat = work.join("anat");
    let prefix = ctx.target.file_prefix();
    vec![
        anat.join(format!("{prefix}_T2w_seg.nii.gz")),
        anat.join(format!("{prefix}_T2w_seg_labeled.nii.gz")),
        anat.join(format!("{prefix}_T2w_labels-disc.nii.gz")),
        anat.join("warp_template2anat.nii.gz"),
        anat.join("warp_anat2template.nii.gz"),
        anat.join(LEVELS_FILE),
        work.join("metrics").join(format!("{prefix}_T2w_metrics_perlevel.csv")),
        work.join("metrics").join(format!("{prefix}{PERSLICE_SUFFIX}")),
    ]
}
