//! Cohort roster: which subjects have two usable sessions.
//!
//! The roster is a tab-separated `participants.tsv` with one row per
//! subject, carrying the two MR session IDs, whether the follow-up scan
//! was actually acquired, and the surgery date when the subject underwent
//! decompression surgery between the sessions.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RosterRow {
    session_1: String,
    session_2: String,
    followup_done: String,
    #[serde(default)]
    surgery_date: Option<String>,
}

/// One subject with two imaging sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub session_1: String,
    pub session_2: String,
    /// Date of decompression surgery, if any (`n/a` in the table means none).
    pub surgery_date: Option<String>,
}

impl Subject {
    /// BIDS participant ID, the two session IDs concatenated.
    pub fn id(&self) -> String {
        format!("sub-{}{}", self.session_1, self.session_2)
    }

    pub fn session_ids(&self) -> [&str; 2] {
        [&self.session_1, &self.session_2]
    }

    pub fn had_surgery(&self) -> bool {
        self.surgery_date.is_some()
    }
}

/// Load the roster, keeping only subjects whose follow-up session was
/// acquired (`followup_done == yes`).
pub fn load(path: &Path) -> Result<Vec<Subject>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("failed to open roster {}", path.display()))?;

    let mut subjects = Vec::new();
    for (index, row) in reader.deserialize::<RosterRow>().enumerate() {
        // +2: header line plus 1-based numbering
        let row = row.with_context(|| format!("malformed roster row {} in {}", index + 2, path.display()))?;
        if !row.followup_done.eq_ignore_ascii_case("yes") {
            continue;
        }
        subjects.push(Subject {
            session_1: row.session_1,
            session_2: row.session_2,
            surgery_date: normalize_date(row.surgery_date),
        });
    }
    Ok(subjects)
}

/// Find the subject whose first session matches `session_1`.
pub fn find_by_session1<'a>(subjects: &'a [Subject], session_1: &str) -> Option<&'a Subject> {
    subjects.iter().find(|s| s.session_1 == session_1)
}

fn normalize_date(value: Option<String>) -> Option<String> {
    match value {
        Some(v) if v.trim().is_empty() || v.trim().eq_ignore_ascii_case("n/a") => None,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const ROSTER: &str = "\
session_1\tsession_2\tfollowup_done\tsurgery_date
2390B\t4949B\tyes\tn/a
1836B\t6029B\tyes\t2019-04-23
1111B\t2222B\tno\tn/a
";

    fn write_roster(content: &str) -> (TempDir, std::path::PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("participants.tsv");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{content}").unwrap();
        (tmp, path)
    }

    #[test]
    fn test_load_filters_missing_followup() {
        let (_tmp, path) = write_roster(ROSTER);
        let subjects = load(&path).unwrap();

        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].id(), "sub-2390B4949B");
        assert_eq!(subjects[0].session_ids(), ["2390B", "4949B"]);
        assert!(!subjects[0].had_surgery());
        assert_eq!(subjects[1].surgery_date.as_deref(), Some("2019-04-23"));
    }

    #[test]
    fn test_find_by_session1() {
        let (_tmp, path) = write_roster(ROSTER);
        let subjects = load(&path).unwrap();

        assert!(find_by_session1(&subjects, "1836B").unwrap().had_surgery());
        assert!(find_by_session1(&subjects, "0000B").is_none());
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let (_tmp, path) = write_roster("session_1\tsession_2\tfollowup_done\tsurgery_date\nonly-one-field\n");
        assert!(load(&path).is_err());
    }
}
