//! Invocation of external toolkit binaries.
//!
//! Every external call in the pipeline goes through this module: the argv
//! is logged, stdio is inherited so toolkit output lands in the batch log,
//! and a non-zero exit aborts the current subject run immediately. There
//! is no retry and no cleanup of partial outputs.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use log::info;

/// Run `program` with `args` in the current directory.
pub fn run<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_impl(None, program, args)
}

/// Run `program` with `args` with `dir` as the working directory.
pub fn run_in<I, S>(dir: &Path, program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_impl(Some(dir), program, args)
}

fn run_impl<I, S>(dir: Option<&Path>, program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    info!(
        "$ {} {}",
        program,
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let mut command = Command::new(program);
    command.args(&args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let status = command
        .status()
        .with_context(|| format!("failed to launch '{program}' (is it on PATH?)"))?;
    if !status.success() {
        bail!("'{program}' exited with {status}");
    }
    Ok(())
}

/// Probe whether an external tool answers `-h`.
pub fn is_available(program: &str) -> bool {
    Command::new(program)
        .arg("-h")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
