//! Two-session comparison figures.
//!
//! For one subject, the per-slice template-normalized shape metrics of
//! both sessions are plotted against a normative band (mean ± std across
//! the normative per-slice tables). One PNG per subject, six panels:
//! cross-sectional area, AP diameter, transverse diameter, compression
//! ratio, eccentricity, solidity.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result as AnyResult;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use plotters::prelude::*;
use thiserror::Error;

use crate::config::ExcludeList;
use crate::process::PERSLICE_SUFFIX;
use crate::roster::{self, Subject};

/// Errors that can occur during figure generation.
#[derive(Error, Debug)]
pub enum FigureError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse table '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("required input table is missing: {0}")]
    MissingInput(PathBuf),

    #[error("table '{path}' has no '{column}' column")]
    MissingColumn { path: String, column: String },

    #[error("no usable rows in table '{0}'")]
    EmptyTable(PathBuf),

    #[error("no normative tables found under '{0}'")]
    EmptyNormative(PathBuf),

    #[error("cannot derive subject/session from file name '{0}'")]
    BadFileName(String),

    #[error("plotting error: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, FigureError>;

/// Panel order within the figure.
pub const METRICS: [Metric; 6] = [
    Metric::Area,
    Metric::DiameterAp,
    Metric::DiameterRl,
    Metric::CompressionRatio,
    Metric::Eccentricity,
    Metric::Solidity,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Area,
    DiameterAp,
    DiameterRl,
    /// AP diameter / transverse diameter, derived at load time.
    CompressionRatio,
    Eccentricity,
    Solidity,
}

/// Highest vertebral level kept (C1..Th1), matching the normative tables.
const MAX_VERT_LEVEL: i64 = 8;

const FIGURE_WIDTH: u32 = 1800;
const FIGURE_HEIGHT: u32 = 1000;

const SESSION1_COLOR: RGBColor = RGBColor(55, 126, 184);
const SESSION2_COLOR: RGBColor = RGBColor(228, 26, 28);
const NORMATIVE_COLOR: RGBColor = RGBColor(128, 128, 128);

/// One per-slice row of a shape-metric table.
#[derive(Debug, Clone)]
pub struct SliceRecord {
    pub slice: i64,
    pub vert_level: i64,
    area: f64,
    diameter_ap: f64,
    diameter_rl: f64,
    eccentricity: f64,
    solidity: f64,
}

impl SliceRecord {
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Area => self.area,
            Metric::DiameterAp => self.diameter_ap,
            Metric::DiameterRl => self.diameter_rl,
            Metric::CompressionRatio => self.diameter_ap / self.diameter_rl,
            Metric::Eccentricity => self.eccentricity,
            Metric::Solidity => self.solidity,
        }
    }
}

/// Per-slice mean ± std across the normative cohort.
#[derive(Debug)]
pub struct NormativeStats {
    pub slice_min: i64,
    pub slice_max: i64,
    per_slice: BTreeMap<i64, [(f64, f64); 6]>,
}

impl NormativeStats {
    pub fn band(&self, slice: i64, metric: Metric) -> Option<(f64, f64)> {
        let index = METRICS.iter().position(|m| *m == metric)?;
        self.per_slice.get(&slice).map(|stats| stats[index])
    }
}

fn column_index(header: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    header
        .iter()
        .position(|column| column == name)
        .ok_or_else(|| FigureError::MissingColumn {
            path: path.display().to_string(),
            column: name.to_string(),
        })
}

/// Load one per-slice table. Rows with unparsable or non-finite values are
/// dropped; solidity is rescaled from the 0-1 interval to percent.
pub fn load_table(path: &Path) -> Result<Vec<SliceRecord>> {
    if !path.is_file() {
        return Err(FigureError::MissingInput(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|source| FigureError::Csv {
        path: path.display().to_string(),
        source,
    })?;
    let header = reader
        .headers()
        .map_err(|source| FigureError::Csv {
            path: path.display().to_string(),
            source,
        })?
        .clone();

    let slice_col = column_index(&header, "Slice (I->S)", path)?;
    let level_col = column_index(&header, "VertLevel", path)?;
    let area_col = column_index(&header, "MEAN(area)", path)?;
    let ap_col = column_index(&header, "MEAN(diameter_AP)", path)?;
    let rl_col = column_index(&header, "MEAN(diameter_RL)", path)?;
    let ecc_col = column_index(&header, "MEAN(eccentricity)", path)?;
    let sol_col = column_index(&header, "MEAN(solidity)", path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| FigureError::Csv {
            path: path.display().to_string(),
            source,
        })?;
        let number = |col: usize| -> Option<f64> {
            record.get(col)?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
        };
        let (Some(slice), Some(level), Some(area), Some(ap), Some(rl), Some(ecc), Some(sol)) = (
            number(slice_col),
            number(level_col),
            number(area_col),
            number(ap_col),
            number(rl_col),
            number(ecc_col),
            number(sol_col),
        ) else {
            continue;
        };
        rows.push(SliceRecord {
            slice: slice as i64,
            vert_level: level as i64,
            area,
            diameter_ap: ap,
            diameter_rl: rl,
            eccentricity: ecc,
            solidity: sol * 100.0,
        });
    }
    if rows.is_empty() {
        return Err(FigureError::EmptyTable(path.to_path_buf()));
    }
    Ok(rows)
}

/// Load every `*PAM50.csv` under `dir` and reduce to per-slice statistics.
pub fn load_normative(dir: &Path) -> Result<NormativeStats> {
    let mut tables: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| FigureError::Io {
            path: dir.display().to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with("PAM50.csv"))
                .unwrap_or(false)
        })
        .collect();
    tables.sort();
    if tables.is_empty() {
        return Err(FigureError::EmptyNormative(dir.to_path_buf()));
    }

    let mut values: BTreeMap<i64, [Vec<f64>; 6]> = BTreeMap::new();
    for table in &tables {
        for row in load_table(table)? {
            if row.vert_level > MAX_VERT_LEVEL {
                continue;
            }
            let entry = values.entry(row.slice).or_default();
            for (index, metric) in METRICS.iter().enumerate() {
                let value = row.metric(*metric);
                if value.is_finite() {
                    entry[index].push(value);
                }
            }
        }
    }

    if values.is_empty() {
        return Err(FigureError::EmptyNormative(dir.to_path_buf()));
    }
    let slice_min = *values.keys().next().expect("checked non-empty above");
    let slice_max = *values.keys().last().expect("checked non-empty above");
    let per_slice = values
        .into_iter()
        .map(|(slice, metric_values)| {
            let mut stats = [(0.0, 0.0); 6];
            for (index, samples) in metric_values.iter().enumerate() {
                stats[index] = mean_std(samples);
            }
            (slice, stats)
        })
        .collect();

    Ok(NormativeStats {
        slice_min,
        slice_max,
        per_slice,
    })
}

fn mean_std(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if samples.len() < 2 {
        return (mean, 0.0);
    }
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Derive `(subject, bare session id)` from a per-slice table name, e.g.
/// `sub-2390B4949B_ses-2390B_T2w_metrics_perslice_PAM50.csv`.
pub fn subject_and_session(file_name: &str) -> Result<(String, String)> {
    let mut parts = file_name.split('_');
    let subject = parts
        .next()
        .filter(|p| p.starts_with("sub-"))
        .ok_or_else(|| FigureError::BadFileName(file_name.to_string()))?;
    let session = parts
        .next()
        .and_then(|p| p.strip_prefix("ses-"))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| FigureError::BadFileName(file_name.to_string()))?;
    Ok((subject.to_string(), session.to_string()))
}

/// Slice indices where the vertebral level changes, used as level
/// boundary marks.
fn level_boundaries(rows: &[SliceRecord]) -> Vec<i64> {
    let mut boundaries = Vec::new();
    let mut rows: Vec<&SliceRecord> = rows.iter().collect();
    rows.sort_by_key(|r| r.slice);
    for pair in rows.windows(2) {
        if pair[0].vert_level != pair[1].vert_level {
            boundaries.push(pair[1].slice);
        }
    }
    boundaries
}

/// Render the comparison figure for one subject and return the PNG path.
///
/// The panels carry no text: batch machines routinely lack fonts, so the
/// layout mirrors the session/normative encoding by color only.
pub fn generate_figure(
    ses1_table: &Path,
    ses2_table: &Path,
    normative_dir: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    let normative = load_normative(normative_dir)?;

    let clamp = |rows: Vec<SliceRecord>| -> Vec<SliceRecord> {
        rows.into_iter()
            .filter(|r| r.slice >= normative.slice_min && r.slice <= normative.slice_max)
            .collect()
    };
    let ses1_rows = clamp(load_table(ses1_table)?);
    let ses2_rows = clamp(load_table(ses2_table)?);
    if ses1_rows.is_empty() {
        return Err(FigureError::EmptyTable(ses1_table.to_path_buf()));
    }

    let file_name = ses1_table
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (_, session1) = subject_and_session(&file_name)?;
    let file_name2 = ses2_table
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (_, session2) = subject_and_session(&file_name2)?;

    fs::create_dir_all(out_dir).map_err(|source| FigureError::Io {
        path: out_dir.display().to_string(),
        source,
    })?;
    let out_path = out_dir.join(format!("{session1}{session2}_T2w_lineplot_PAM50.png"));

    let root = BitMapBackend::new(&out_path, (FIGURE_WIDTH, FIGURE_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| FigureError::Plot(e.to_string()))?;
    let panels = root.split_evenly((2, 3));

    let boundaries = level_boundaries(&ses1_rows);

    for (panel, metric) in panels.iter().zip(METRICS) {
        draw_panel(panel, metric, &normative, &ses1_rows, &ses2_rows, &boundaries)?;
    }

    root.present().map_err(|e| FigureError::Plot(e.to_string()))?;
    drop(panels);
    drop(root);
    Ok(out_path)
}

fn draw_panel(
    panel: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    metric: Metric,
    normative: &NormativeStats,
    ses1_rows: &[SliceRecord],
    ses2_rows: &[SliceRecord],
    boundaries: &[i64],
) -> Result<()> {
    let slices: Vec<i64> = (normative.slice_min..=normative.slice_max).collect();

    let band: Vec<(i64, f64, f64)> = slices
        .iter()
        .filter_map(|&slice| {
            let (mean, std) = normative.band(slice, metric)?;
            if mean.is_finite() && std.is_finite() {
                Some((slice, mean - std, mean + std))
            } else {
                None
            }
        })
        .collect();

    let series1: Vec<(f64, f64)> = ses1_rows
        .iter()
        .map(|r| (r.slice as f64, r.metric(metric)))
        .filter(|(_, v)| v.is_finite())
        .collect();
    let series2: Vec<(f64, f64)> = ses2_rows
        .iter()
        .map(|r| (r.slice as f64, r.metric(metric)))
        .filter(|(_, v)| v.is_finite())
        .collect();

    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;
    for (_, low, high) in &band {
        y_min = y_min.min(*low);
        y_max = y_max.max(*high);
    }
    for (_, value) in series1.iter().chain(series2.iter()) {
        y_min = y_min.min(*value);
        y_max = y_max.max(*value);
    }
    if !(y_min.is_finite() && y_max.is_finite()) {
        y_min = 0.0;
        y_max = 1.0;
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }
    let padding = (y_max - y_min) * 0.05;
    let y_range = (y_min - padding)..(y_max + padding);
    let x_range = (normative.slice_min as f64)..(normative.slice_max as f64);

    let mut chart = ChartBuilder::on(panel)
        .margin(12)
        .build_cartesian_2d(x_range, y_range.clone())
        .map_err(|e| FigureError::Plot(e.to_string()))?;

    // Normative band: mean ± std polygon.
    if !band.is_empty() {
        let mut polygon: Vec<(f64, f64)> = band.iter().map(|(s, low, _)| (*s as f64, *low)).collect();
        polygon.extend(band.iter().rev().map(|(s, _, high)| (*s as f64, *high)));
        chart
            .draw_series(std::iter::once(Polygon::new(
                polygon,
                NORMATIVE_COLOR.mix(0.25).filled(),
            )))
            .map_err(|e| FigureError::Plot(e.to_string()))?;
        chart
            .draw_series(LineSeries::new(
                band.iter().map(|(s, low, high)| (*s as f64, (low + high) / 2.0)),
                NORMATIVE_COLOR.stroke_width(2),
            ))
            .map_err(|e| FigureError::Plot(e.to_string()))?;
    }

    // Vertebral level boundaries.
    for boundary in boundaries {
        chart
            .draw_series(LineSeries::new(
                [
                    (*boundary as f64, y_range.start),
                    (*boundary as f64, y_range.end),
                ],
                NORMATIVE_COLOR.mix(0.5).stroke_width(1),
            ))
            .map_err(|e| FigureError::Plot(e.to_string()))?;
    }

    chart
        .draw_series(LineSeries::new(series1, SESSION1_COLOR.stroke_width(2)))
        .map_err(|e| FigureError::Plot(e.to_string()))?;
    chart
        .draw_series(LineSeries::new(series2, SESSION2_COLOR.stroke_width(2)))
        .map_err(|e| FigureError::Plot(e.to_string()))?;

    Ok(())
}

#[derive(Debug, Default)]
pub struct FigureReport {
    pub generated: Vec<PathBuf>,
    pub skipped: usize,
    pub failed: Vec<String>,
}

/// Batch loop: render one figure per roster subject with a per-slice table
/// under `results_dir`. Excluded subjects and already-rendered figures are
/// skipped; subjects with a surgery date go to `figures/surgery`. Failures
/// are recorded and the loop continues.
pub fn generate_all(
    results_dir: &Path,
    figures_dir: &Path,
    normative_dir: &Path,
    subjects: &[Subject],
    exclude: &ExcludeList,
) -> AnyResult<FigureReport> {
    let mut tables: Vec<PathBuf> = fs::read_dir(results_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().ends_with(PERSLICE_SUFFIX))
                .unwrap_or(false)
        })
        .collect();
    tables.sort();

    let progress = ProgressBar::new(tables.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("static progress template")
            .progress_chars("#>-"),
    );

    let mut report = FigureReport::default();
    for table in &tables {
        progress.inc(1);
        let file_name = table
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Ok((subject_id, session)) = subject_and_session(&file_name) else {
            warn!("cannot parse table name '{file_name}', skipping");
            report.skipped += 1;
            continue;
        };

        // Each subject is rendered once, driven by its first-session table.
        let Some(subject) = roster::find_by_session1(subjects, &session) else {
            report.skipped += 1;
            continue;
        };

        if exclude.is_excluded("T2w", &subject_id) {
            info!("{subject_id} is listed in the exclusion list, skipping");
            report.skipped += 1;
            continue;
        }

        let out_dir = if subject.had_surgery() {
            figures_dir.join("surgery")
        } else {
            figures_dir.to_path_buf()
        };
        let figure_name = format!("{}{}_T2w_lineplot_PAM50.png", subject.session_1, subject.session_2);
        if out_dir.join(&figure_name).is_file() {
            info!("figure {figure_name} already exists, skipping");
            report.skipped += 1;
            continue;
        }

        let ses2_table = results_dir.join(format!(
            "{subject_id}_ses-{}{PERSLICE_SUFFIX}",
            subject.session_2
        ));
        match generate_figure(table, &ses2_table, normative_dir, &out_dir) {
            Ok(path) => {
                info!("generated {}", path.display());
                report.generated.push(path);
            }
            Err(e) => {
                warn!("{subject_id}: figure generation failed: {e}");
                report.failed.push(format!("{subject_id}: {e}"));
            }
        }
    }
    progress.finish_and_clear();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str =
        "Filename,Slice (I->S),VertLevel,MEAN(area),MEAN(diameter_AP),MEAN(diameter_RL),MEAN(eccentricity),MEAN(solidity)";

    fn write_table(dir: &Path, name: &str, rows: &[(i64, i64, f64)]) -> PathBuf {
        let mut content = String::from(HEADER);
        content.push('\n');
        for (slice, level, area) in rows {
            content.push_str(&format!(
                "sub-x/anat/img.nii.gz,{slice},{level},{area},8.2,12.4,0.75,0.95\n"
            ));
        }
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn normative_fixture(dir: &Path) {
        write_table(dir, "sub-hc01_PAM50.csv", &[(800, 2, 70.0), (801, 2, 72.0), (802, 3, 74.0)]);
        write_table(dir, "sub-hc02_PAM50.csv", &[(800, 2, 74.0), (801, 2, 76.0), (802, 3, 78.0)]);
    }

    #[test]
    fn test_missing_input_fails_loudly() {
        let tmp = TempDir::new().unwrap();
        let err = load_table(&tmp.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, FigureError::MissingInput(_)));
    }

    #[test]
    fn test_load_table_scales_solidity_and_drops_bad_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.csv");
        fs::write(
            &path,
            format!("{HEADER}\nf,800,2,70.0,8.2,12.4,0.75,0.95\nf,801,2,nan,8.2,12.4,0.75,0.95\n"),
        )
        .unwrap();

        let rows = load_table(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].solidity - 95.0).abs() < 1e-9);
        assert!((rows[0].metric(Metric::CompressionRatio) - 8.2 / 12.4).abs() < 1e-9);
    }

    #[test]
    fn test_normative_stats() {
        let tmp = TempDir::new().unwrap();
        normative_fixture(tmp.path());

        let stats = load_normative(tmp.path()).unwrap();
        assert_eq!(stats.slice_min, 800);
        assert_eq!(stats.slice_max, 802);
        let (mean, std) = stats.band(800, Metric::Area).unwrap();
        assert!((mean - 72.0).abs() < 1e-9);
        assert!(std > 0.0);
    }

    #[test]
    fn test_empty_normative_dir_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            load_normative(tmp.path()),
            Err(FigureError::EmptyNormative(_))
        ));
    }

    #[test]
    fn test_subject_and_session_from_name() {
        let (subject, session) =
            subject_and_session("sub-2390B4949B_ses-2390B_T2w_metrics_perslice_PAM50.csv").unwrap();
        assert_eq!(subject, "sub-2390B4949B");
        assert_eq!(session, "2390B");
        assert!(subject_and_session("morning_notes.csv").is_err());
    }

    #[test]
    fn test_generate_figure_writes_png() {
        let tmp = TempDir::new().unwrap();
        let normative = tmp.path().join("normative");
        fs::create_dir_all(&normative).unwrap();
        normative_fixture(&normative);

        let ses1 = write_table(
            tmp.path(),
            "sub-2390B4949B_ses-2390B_T2w_metrics_perslice_PAM50.csv",
            &[(800, 2, 65.0), (801, 2, 64.0), (802, 3, 62.0)],
        );
        let ses2 = write_table(
            tmp.path(),
            "sub-2390B4949B_ses-4949B_T2w_metrics_perslice_PAM50.csv",
            &[(800, 2, 61.0), (801, 2, 60.0), (802, 3, 58.0)],
        );

        let out_dir = tmp.path().join("figures");
        let png = generate_figure(&ses1, &ses2, &normative, &out_dir).unwrap();
        assert_eq!(
            png.file_name().unwrap().to_string_lossy(),
            "2390B4949B_T2w_lineplot_PAM50.png"
        );
        assert!(png.metadata().unwrap().len() > 0);
    }

    #[test]
    fn test_generate_all_skips_excluded_and_existing() {
        let tmp = TempDir::new().unwrap();
        let results = tmp.path().join("results");
        let figures = tmp.path().join("figures");
        let normative = tmp.path().join("normative");
        fs::create_dir_all(&results).unwrap();
        fs::create_dir_all(&normative).unwrap();
        normative_fixture(&normative);

        for (subject, session) in [
            ("sub-2390B4949B", "2390B"),
            ("sub-2390B4949B", "4949B"),
            ("sub-1836B6029B", "1836B"),
            ("sub-1836B6029B", "6029B"),
        ] {
            write_table(
                &results,
                &format!("{subject}_ses-{session}_T2w_metrics_perslice_PAM50.csv"),
                &[(800, 2, 65.0), (801, 2, 64.0), (802, 3, 62.0)],
            );
        }

        let subjects = vec![
            Subject {
                session_1: "2390B".into(),
                session_2: "4949B".into(),
                surgery_date: None,
            },
            Subject {
                session_1: "1836B".into(),
                session_2: "6029B".into(),
                surgery_date: Some("2019-04-23".into()),
            },
        ];

        let mut yml = tmp.path().join("exclude.yml");
        fs::write(&yml, "T2w:\n  - sub-2390B4949B\n").unwrap();
        let exclude = ExcludeList::load(&yml).unwrap();

        let report = generate_all(&results, &figures, &normative, &subjects, &exclude).unwrap();

        // Excluded subject skipped; surgery subject routed to the subfolder.
        assert_eq!(report.generated.len(), 1);
        assert!(figures.join("surgery/1836B6029B_T2w_lineplot_PAM50.png").is_file());
        assert!(!figures.join("2390B4949B_T2w_lineplot_PAM50.png").exists());
        assert!(report.failed.is_empty());

        // Second run: the figure already exists, nothing is regenerated.
        yml = tmp.path().join("none.yml");
        let none = ExcludeList::load(&yml).unwrap();
        let rerun = generate_all(&results, &figures, &normative, &subjects, &none).unwrap();
        assert!(rerun
            .generated
            .iter()
            .all(|p| !p.ends_with("surgery/1836B6029B_T2w_lineplot_PAM50.png")));
    }

    #[test]
    fn test_generate_all_records_missing_second_session() {
        let tmp = TempDir::new().unwrap();
        let results = tmp.path().join("results");
        let figures = tmp.path().join("figures");
        let normative = tmp.path().join("normative");
        fs::create_dir_all(&results).unwrap();
        fs::create_dir_all(&normative).unwrap();
        normative_fixture(&normative);

        write_table(
            &results,
            "sub-2390B4949B_ses-2390B_T2w_metrics_perslice_PAM50.csv",
            &[(800, 2, 65.0), (801, 2, 64.0)],
        );

        let subjects = vec![Subject {
            session_1: "2390B".into(),
            session_2: "4949B".into(),
            surgery_date: None,
        }];
        let exclude = ExcludeList::default();

        let report = generate_all(&results, &figures, &normative, &subjects, &exclude).unwrap();
        assert!(report.generated.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].contains("sub-2390B4949B"));
    }
}
