//! Declarative conversion criteria.
//!
//! The criteria config is an ordered list of descriptions, each mapping a
//! set of series-metadata predicates onto a BIDS datatype/suffix (plus
//! optional extra filename entities). Matching is a pure function of the
//! series metadata: the first description (in declared order) whose
//! predicates all hold wins, and at most one description is selected.
//!
//! ```json
//! {
//!   "descriptions": [
//!     {
//!       "datatype": "anat",
//!       "suffix": "T2w",
//!       "criteria": { "SeriesDescription": "t2_tse_sag*" }
//!     }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::series::SeriesMeta;

/// Tolerance for numeric criteria such as slice thickness.
pub const NUMERIC_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("failed to read criteria config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid criteria config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("criteria config '{path}' declares no descriptions")]
    Empty { path: String },
}

/// Ordered conversion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaConfig {
    pub descriptions: Vec<Description>,
}

impl CriteriaConfig {
    pub fn load(path: &Path) -> Result<Self, CriteriaError> {
        let text = fs::read_to_string(path).map_err(|source| CriteriaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: CriteriaConfig =
            serde_json::from_str(&text).map_err(|source| CriteriaError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        if config.descriptions.is_empty() {
            return Err(CriteriaError::Empty {
                path: path.display().to_string(),
            });
        }
        Ok(config)
    }

    /// First description (declared order) matching the series, if any.
    pub fn match_series(&self, series: &SeriesMeta) -> Option<&Description> {
        self.descriptions.iter().find(|d| d.criteria.matches(series))
    }
}

/// One conversion rule: criteria plus the BIDS identity of the output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Description {
    /// BIDS datatype folder, e.g. `anat` or `dwi`.
    pub datatype: String,
    /// BIDS suffix, e.g. `T2w`.
    pub suffix: String,
    /// Extra filename entities inserted before the suffix, e.g. `acq-sag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_entities: Option<String>,
    pub criteria: Criteria,
}

/// Predicates matched against one series' metadata. Absent fields always
/// hold; string patterns support `*` and `?` wildcards; numeric fields
/// match within [`NUMERIC_TOLERANCE`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Criteria {
    pub series_description: Option<String>,
    pub protocol_name: Option<String>,
    pub slice_thickness: Option<f64>,
    pub echo_time: Option<f64>,
    pub image_type: Option<Vec<String>>,
    pub in_plane_phase_encoding_direction: Option<String>,
}

impl Criteria {
    pub fn matches(&self, series: &SeriesMeta) -> bool {
        if let Some(pattern) = &self.series_description {
            if !wildcard_match(pattern, series.description.as_deref().unwrap_or("")) {
                return false;
            }
        }
        if let Some(pattern) = &self.protocol_name {
            if !wildcard_match(pattern, series.protocol_name.as_deref().unwrap_or("")) {
                return false;
            }
        }
        if let Some(expected) = self.slice_thickness {
            match series.slice_thickness {
                Some(actual) if (actual - expected).abs() <= NUMERIC_TOLERANCE => {}
                _ => return false,
            }
        }
        if let Some(expected) = self.echo_time {
            match series.echo_time {
                Some(actual) if (actual - expected).abs() <= NUMERIC_TOLERANCE => {}
                _ => return false,
            }
        }
        if let Some(expected) = &self.image_type {
            if &series.image_type != expected {
                return false;
            }
        }
        if let Some(expected) = &self.in_plane_phase_encoding_direction {
            if series.phase_encoding.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        true
    }
}

/// fnmatch-style wildcard match: `*` spans any run of characters, `?`
/// exactly one.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut p = 0;
    let mut t = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
