//! Batch orchestration of spinal cord MRI processing.
//!
//! This crate sequences an external neuroimaging toolkit across a cohort of
//! subjects scanned at two timepoints:
//! - staging DICOM folders from the acquisition source trees
//! - converting DICOM series into a BIDS-style layout
//! - driving the per-subject segmentation/labeling/registration pipeline
//! - aggregating per-subject metric tables into shared CSVs
//! - rendering two-session comparison figures against normative data
//!
//! All image processing is delegated to external binaries; this crate owns
//! only the sequencing, the file bookkeeping, and the decision logs.

pub mod cli;
pub mod config;
pub mod convert;
pub mod copy;
pub mod figures;
pub mod logs;
pub mod metrics;
pub mod process;
pub mod review;
pub mod roster;
pub mod runner;

pub use config::{Env, ExcludeList};
pub use roster::Subject;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
