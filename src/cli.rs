//! Command-line interface.
//!
//! One subcommand per pipeline script. Shared roots (data, processed,
//! results, log, QC) come from environment variables injected by the
//! batch wrapper; only pre-batch commands (`copy-source`, `convert`) take
//! their paths explicitly.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use crate::config::{self, Env, ExcludeList, ListMode};
use crate::convert;
use crate::copy;
use crate::figures;
use crate::metrics;
use crate::process::{self, CustomModel, ProcessContext, SubjectSession};
use crate::review;
use crate::roster;

#[derive(Parser)]
#[command(name = "sct-batch")]
#[command(about = "Batch orchestration of spinal cord MRI processing", version)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage subject DICOM folders from the acquisition source trees
    CopySource {
        /// Data disc holding the source trees
        #[arg(long)]
        disc: PathBuf,
        /// Source tree names, probed in order
        #[arg(long, required = true, num_args = 1..)]
        source_trees: Vec<String>,
        /// Staging directory, e.g. <dataset>/sourcedata
        #[arg(long)]
        staging: PathBuf,
        /// participants.tsv with the two session IDs per subject
        #[arg(long)]
        roster: PathBuf,
    },

    /// Convert staged DICOM sessions into the standardized layout
    Convert {
        /// Staging directory produced by copy-source
        #[arg(long)]
        staging: PathBuf,
        /// Output dataset root
        #[arg(long)]
        bids: PathBuf,
        /// participants.tsv with the two session IDs per subject
        #[arg(long)]
        roster: PathBuf,
        /// JSON criteria config mapping series metadata to output names
        #[arg(long)]
        criteria: PathBuf,
        /// External DICOM-to-NIfTI encoder
        #[arg(long, default_value = convert::DEFAULT_CONVERTER)]
        converter: String,
    },

    /// Run the processing pipeline for one subject session
    Process {
        /// Subject session, e.g. sub-2390B4949B/ses-2390B
        subject: String,
        /// Exclusion list (exclude.yml)
        #[arg(long)]
        exclude: Option<PathBuf>,
        /// Replacement cord segmentation model directory
        #[arg(long, requires = "model_script")]
        model_path: Option<PathBuf>,
        /// Script invoking the replacement model
        #[arg(long, requires = "model_path")]
        model_script: Option<PathBuf>,
    },

    /// Merge per-subject metric tables into one shared table
    Aggregate {
        /// File-name suffix of the per-subject tables,
        /// e.g. _T2w_metrics_perlevel.csv
        suffix: String,
        /// Shared table name under the results root
        #[arg(long)]
        output: Option<String>,
    },

    /// Render two-session comparison figures for the whole cohort
    Figures {
        /// participants.tsv with the two session IDs per subject
        #[arg(long)]
        roster: PathBuf,
        /// Directory of normative per-slice tables
        /// (default: the toolkit's bundled set)
        #[arg(long)]
        normative: Option<PathBuf>,
        /// Exclusion list (exclude.yml)
        #[arg(long)]
        exclude: Option<PathBuf>,
    },

    /// Surface cases that still need manual label correction
    Review {
        /// Worklist YAML destination
        /// (default: <log root>/manual_correction_worklist.yml)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fold a YAML subject list into a batch-wrapper JSON config
    UpdateConfig {
        /// Batch-wrapper JSON config to update
        #[arg(long)]
        config_file: PathBuf,
        /// YAML file listing subjects per key
        #[arg(long)]
        yml_file: PathBuf,
        /// Key to read from the YAML file, e.g. T2w
        #[arg(long)]
        key: String,
        #[arg(long, value_enum)]
        mode: ListMode,
    },
}

fn load_exclusions(path: Option<&PathBuf>) -> Result<ExcludeList> {
    match path {
        Some(path) => ExcludeList::load(path),
        None => Ok(ExcludeList::default()),
    }
}

fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("=== {title} ===");
    for (key, value) in items {
        println!("  {key:<18} {value}");
    }
    println!();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .format_timestamp_secs()
        .init();

    match cli.command {
        Commands::CopySource {
            disc,
            source_trees,
            staging,
            roster: roster_path,
        } => {
            let subjects = roster::load(&roster_path)?;
            info!("{} subjects with two sessions", subjects.len());
            let report = copy::stage_sources(&disc, &source_trees, &staging, &subjects)?;
            print_summary(
                "Copy Source Complete",
                &[
                    ("Staging", staging.display().to_string()),
                    ("Copied", report.copied.len().to_string()),
                    ("Skipped", report.skipped.len().to_string()),
                    ("Missing", report.missing.len().to_string()),
                ],
            );
            if !report.missing.is_empty() {
                warn!("missing sessions: {}", report.missing.join(", "));
            }
            Ok(())
        }

        Commands::Convert {
            staging,
            bids,
            roster: roster_path,
            criteria,
            converter,
        } => {
            let subjects = roster::load(&roster_path)?;
            let config = convert::CriteriaConfig::load(&criteria)?;
            let outcome = convert::convert_cohort(&staging, &bids, &subjects, &config, &converter)?;
            print_summary(
                "Conversion Complete",
                &[
                    ("Dataset", bids.display().to_string()),
                    ("Converted", outcome.converted.to_string()),
                    ("Skipped", outcome.skipped.to_string()),
                    ("Unmatched", outcome.unmatched.len().to_string()),
                ],
            );
            Ok(())
        }

        Commands::Process {
            subject,
            exclude,
            model_path,
            model_script,
        } => {
            let env = Env::from_env()?;
            let exclude = load_exclusions(exclude.as_ref())?;
            let target = SubjectSession::parse(&subject)?;
            let model = match (model_path, model_script) {
                (Some(model_path), Some(script)) => Some(CustomModel { model_path, script }),
                _ => None,
            };
            let ctx = ProcessContext {
                env: &env,
                exclude: &exclude,
                target,
                model,
            };
            process::run_subject(&ctx)
        }

        Commands::Aggregate { suffix, output } => {
            let env = Env::from_env()?;
            let tables = metrics::collect_tables(&env.path_data_processed, &suffix);
            if tables.is_empty() {
                bail!(
                    "no per-subject tables matching '*{suffix}' under {}",
                    env.path_data_processed.display()
                );
            }
            let name = output.unwrap_or_else(|| suffix.trim_start_matches('_').to_string());
            let dest = env.path_results.join(&name);
            let rows = metrics::merge_tables(&tables, &dest)?;
            print_summary(
                "Aggregation Complete",
                &[
                    ("Tables", tables.len().to_string()),
                    ("Rows appended", rows.to_string()),
                    ("Output", dest.display().to_string()),
                ],
            );
            Ok(())
        }

        Commands::Figures {
            roster: roster_path,
            normative,
            exclude,
        } => {
            let env = Env::from_env()?;
            let subjects = roster::load(&roster_path)?;
            let exclude = load_exclusions(exclude.as_ref())?;
            let normative = match normative {
                Some(dir) => dir,
                None => config::sct_dir()?.join("data/PAM50_normalized_metrics"),
            };
            let figures_dir = env.path_results.join("figures");
            let report = figures::generate_all(
                &env.path_results,
                &figures_dir,
                &normative,
                &subjects,
                &exclude,
            )?;
            print_summary(
                "Figures Complete",
                &[
                    ("Output", figures_dir.display().to_string()),
                    ("Generated", report.generated.len().to_string()),
                    ("Skipped", report.skipped.to_string()),
                    ("Failed", report.failed.len().to_string()),
                ],
            );
            if !report.failed.is_empty() {
                for failure in &report.failed {
                    warn!("{failure}");
                }
                bail!("{} figure(s) failed", report.failed.len());
            }
            Ok(())
        }

        Commands::Review { output } => {
            let env = Env::from_env()?;
            let candidates = review::collect_candidates(&env.path_log)?;
            if candidates.is_empty() {
                info!("no automatic-path cases recorded; nothing to review");
                return Ok(());
            }
            println!("{:<28} {:<26} {}", "SUBJECT", "ARTIFACT", "STATUS");
            for candidate in &candidates {
                let status = if candidate.manual_now_available {
                    "manual available, rerun"
                } else {
                    "needs correction"
                };
                println!(
                    "{:<28} {:<26} {}",
                    candidate.subject, candidate.artifact, status
                );
            }
            let out = output
                .unwrap_or_else(|| env.path_log.join("manual_correction_worklist.yml"));
            review::write_worklist(&candidates, &out)?;
            info!("worklist written to {}", out.display());
            Ok(())
        }

        Commands::UpdateConfig {
            config_file,
            yml_file,
            key,
            mode,
        } => {
            let count = config::update_batch_config(&config_file, &yml_file, &key, mode)
                .with_context(|| format!("failed to update {}", config_file.display()))?;
            info!(
                "{count} subjects written to {} in {}",
                match mode {
                    ListMode::Exclude => "exclude_list",
                    ListMode::Include => "include_list",
                },
                config_file.display()
            );
            Ok(())
        }
    }
}
