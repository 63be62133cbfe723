//! Per-subject processing driver.
//!
//! One invocation processes one subject session end to end, strictly
//! sequentially: input staging, T2w segmentation/labeling/registration and
//! shape metrics, then the T2star and diffusion branches when their inputs
//! exist, then a final verification of expected outputs. Any external tool
//! failure aborts the run immediately; already-present derived files are
//! never recomputed.

pub mod resolve;
pub mod stages;

mod dwi;
mod t2;
mod t2star;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::config::{Env, ExcludeList};
use crate::copy;
use stages::Stage;

pub use t2::{PERLEVEL_TABLE, PERSLICE_SUFFIX};

/// One subject session, as handed over by the batch wrapper
/// (`sub-<id>/ses-<id>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSession {
    pub subject: String,
    pub session: String,
}

impl SubjectSession {
    pub fn parse(arg: &str) -> Result<Self> {
        let (subject, session) = arg
            .split_once('/')
            .with_context(|| format!("expected sub-<id>/ses-<id>, got '{arg}'"))?;
        if !subject.starts_with("sub-") || !session.starts_with("ses-") {
            bail!("expected sub-<id>/ses-<id>, got '{arg}'");
        }
        Ok(Self {
            subject: subject.to_string(),
            session: session.to_string(),
        })
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.subject, self.session)
    }

    /// BIDS filename prefix, e.g. `sub-2390B4949B_ses-2390B`.
    pub fn file_prefix(&self) -> String {
        format!("{}_{}", self.subject, self.session)
    }
}

/// Replacement segmentation model: one study variant ships its own deep
/// model plus the script that invokes it.
#[derive(Debug, Clone)]
pub struct CustomModel {
    pub model_path: PathBuf,
    pub script: PathBuf,
}

pub struct ProcessContext<'a> {
    pub env: &'a Env,
    pub exclude: &'a ExcludeList,
    pub target: SubjectSession,
    pub model: Option<CustomModel>,
}

impl ProcessContext<'_> {
    fn source_dir(&self) -> PathBuf {
        self.env
            .path_data
            .join(&self.target.subject)
            .join(&self.target.session)
    }

    fn work_dir(&self) -> PathBuf {
        self.env
            .path_data_processed
            .join(&self.target.subject)
            .join(&self.target.session)
    }

    /// Expected location of a manually corrected file for this session.
    fn manual_path(&self, datatype: &str, name: &str) -> PathBuf {
        self.env
            .manual_derivatives()
            .join(&self.target.subject)
            .join(&self.target.session)
            .join(datatype)
            .join(name)
    }

    fn excluded(&self, key: &str) -> bool {
        self.exclude.is_excluded(key, &self.target.id())
    }
}

/// Run the whole pipeline for one subject session.
pub fn run_subject(ctx: &ProcessContext) -> Result<()> {
    let id = ctx.target.id();
    info!("processing {id}");

    let source = ctx.source_dir();
    if !source.is_dir() {
        bail!("{id}: no input data at {}", source.display());
    }

    info!("{}", Stage::CopyInput);
    let work = ctx.work_dir();
    copy::copy_tree(&source, &work, true)
        .with_context(|| format!("{id}: failed to stage input into {}", work.display()))?;

    let t2_ran = t2::run(ctx, &work)?;
    let t2star_ran = t2star::run(ctx, &work)?;
    let dwi_ran = dwi::run(ctx, &work)?;

    info!("{}", Stage::VerifyOutputs);
    let mut expected = Vec::new();
    if t2_ran {
        expected.extend(t2::expected_outputs(ctx, &work));
    }
    if t2star_ran {
        expected.extend(t2star::expected_outputs(ctx, &work));
    }
    if dwi_ran {
        expected.extend(dwi::expected_outputs(ctx, &work));
    }
    let missing = stages::verify_outputs(&expected, &ctx.env.path_log, &id)?;
    if missing > 0 {
        warn!("{id}: {missing} expected outputs missing, see {}", stages::ERROR_LOG);
    }

    info!("{id} done");
    Ok(())
}
