//! Report generation
//!
//! Turns a reloaded metrics table into what the presentation needs:
//!
//! - **Metric groups**: metric columns grouped by base name
//!   (`PSNR`, `PSNR-Red`, ... → `PSNR`)
//! - **Rows**: sorted by format, then best quality first, with artifact
//!   paths re-based so they resolve from the report's own directory
//! - **Charts**: declarative series handed to [`chart`] for SVG rendering
//!
//! and then writes the outputs:
//!
//! - `graphs/*.svg` (plus `_dark` variants)
//! - `index.html`
//! - `report.json` next to the metrics table
//!
//! # Usage
//!
//! ```ignore
//! use squashlab::report::{self, ReportOptions};
//!
//! let output = report::generate(
//!     "run/images/original.png".as_ref(),
//!     "run/data/metrics.csv".as_ref(),
//!     "run".as_ref(),
//!     "run".as_ref(),
//!     &ReportOptions::default(),
//! )?;
//! ```

pub mod chart;
pub mod html;
pub mod json;

use crate::error::{Error, Result};
use crate::metrics::parse::canonical_channel;
use crate::metrics::{MetricRow, MetricValue};
use crate::paths;
use crate::table::ResultTable;
use chart::{ChartSpec, Theme};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn};

pub const INDEX_FILE: &str = "index.html";
pub const JSON_FILE: &str = "report.json";
pub const GRAPHS_DIR: &str = "graphs";

/// Base metric name of a column: a trailing `-<Channel>` is stripped and the
/// result upper-cased.
pub fn base_metric_name(column: &str) -> String {
    match column.rsplit_once('-') {
        Some((base, suffix)) if canonical_channel(suffix).is_some() => base.to_uppercase(),
        _ => column.to_uppercase(),
    }
}

/// Channel a column reports on; bare metric names are the aggregate.
pub fn channel_of(column: &str) -> &'static str {
    column
        .rsplit_once('-')
        .and_then(|(_, suffix)| canonical_channel(suffix))
        .unwrap_or("All")
}

/// A base metric and the columns reporting it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricGroup {
    pub name: String,
    pub columns: Vec<String>,
}

impl MetricGroup {
    /// The bare (all-channel) column, if the table has one
    pub fn aggregate_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(&self.name))
            .map(String::as_str)
    }

    /// Column shown as the group's single headline value
    pub fn headline_column(&self) -> &str {
        self.aggregate_column()
            .or_else(|| self.columns.first().map(String::as_str))
            .unwrap_or(&self.name)
    }
}

/// Group metric columns by base name. Groups come out sorted by name;
/// columns keep their input order within a group.
pub fn group_metric_columns<S: AsRef<str>>(columns: &[S]) -> Vec<MetricGroup> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for column in columns {
        let column = column.as_ref();
        groups
            .entry(base_metric_name(column))
            .or_default()
            .push(column.to_string());
    }
    groups
        .into_iter()
        .map(|(name, columns)| MetricGroup { name, columns })
        .collect()
}

/// Display order: format ascending, then quality descending. At equal
/// quality a lossless variant comes before the lossy one.
pub fn display_order(a: &MetricRow, b: &MetricRow) -> Ordering {
    a.format
        .cmp(&b.format)
        .then_with(|| b.quality.cmp(&a.quality))
        .then_with(|| b.is_lossless().cmp(&a.is_lossless()))
        .then_with(|| a.filename.cmp(&b.filename))
}

pub fn sort_rows(rows: &mut [MetricRow]) {
    rows.sort_by(display_order);
}

/// Attributes recorded by the inspection tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDetails {
    #[serde(default)]
    pub width: Option<u64>,
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(default)]
    pub depth: Option<u64>,
    #[serde(default)]
    pub colorspace: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl ImageDetails {
    pub fn parse(blob: &str) -> Option<Self> {
        serde_json::from_str(blob).ok()
    }

    /// `1000x1000 sRGB 8bit`
    pub fn label(&self) -> String {
        let dim = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string());
        let mut parts = vec![format!("{}x{}", dim(self.width), dim(self.height))];
        if let Some(ref colorspace) = self.colorspace {
            parts.push(colorspace.clone());
        }
        if let Some(depth) = self.depth {
            parts.push(format!("{}bit", depth));
        }
        parts.join(" ")
    }
}

/// Presentation row: a metric row with paths re-based to the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub index: usize,
    pub filename: String,
    pub format: String,
    pub quality: u32,
    pub lossless: bool,
    pub params: String,
    pub size_kb: f64,
    pub details: Option<ImageDetails>,
    pub details_label: String,
    pub image_src: String,
    /// Empty when no diff image exists
    pub diff_src: String,
    pub metrics: BTreeMap<String, MetricValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub input_name: String,
    pub total: usize,
    pub formats: Vec<String>,
    pub metrics: Vec<String>,
    pub missing_diffs: usize,
}

impl Summary {
    pub fn from_rows(input_name: &str, rows: &[MetricRow], groups: &[MetricGroup]) -> Self {
        Self {
            input_name: input_name.to_string(),
            total: rows.len(),
            formats: formats_of(rows),
            metrics: groups.iter().map(|g| g.name.clone()).collect(),
            missing_diffs: rows.iter().filter(|r| r.diff_path.is_empty()).count(),
        }
    }
}

/// Everything the HTML and JSON writers need
#[derive(Debug, Clone, Serialize)]
pub struct ReportModel {
    pub generated: String,
    pub summary: Summary,
    pub groups: Vec<MetricGroup>,
    pub rows: Vec<ReportRow>,
    pub charts: Vec<ChartSpec>,
}

/// Distinct formats, sorted
pub fn formats_of(rows: &[MetricRow]) -> Vec<String> {
    rows.iter()
        .map(|r| r.format.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Builds a [`ReportModel`] for a report written to `report_dir` from a
/// table whose paths are relative to `root`.
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    root: PathBuf,
    report_dir: PathBuf,
}

impl ReportAggregator {
    pub fn new(root: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            report_dir: report_dir.into(),
        }
    }

    pub fn resolve(&self, stored: &str) -> String {
        paths::rebase(stored, &self.root, &self.report_dir)
    }

    pub fn aggregate(&self, original: &Path, table: &ResultTable) -> ReportModel {
        let groups = group_metric_columns(table.metric_columns());

        let mut sorted = table.rows().to_vec();
        sort_rows(&mut sorted);

        let input_name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let summary = Summary::from_rows(&input_name, &sorted, &groups);
        let charts = chart::build_charts(&sorted, &groups);

        let rows = sorted
            .into_iter()
            .enumerate()
            .map(|(index, row)| self.report_row(index, row))
            .collect();

        ReportModel {
            generated: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            summary,
            groups,
            rows,
            charts,
        }
    }

    fn report_row(&self, index: usize, row: MetricRow) -> ReportRow {
        let details = ImageDetails::parse(&row.details);
        let details_label = details
            .as_ref()
            .map(ImageDetails::label)
            .unwrap_or_else(|| "N/A".to_string());

        ReportRow {
            index,
            lossless: row.is_lossless(),
            image_src: self.resolve(&row.relative_path),
            diff_src: self.resolve(&row.diff_path),
            filename: row.filename,
            format: row.format,
            quality: row.quality,
            params: row.params,
            size_kb: row.size_kb,
            details,
            details_label,
            metrics: row.metrics,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Also render a `_dark` copy of every chart
    pub dark_charts: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self { dark_charts: true }
    }
}

/// Files written by [`generate`]
#[derive(Debug, Clone)]
pub struct ReportOutput {
    pub index: PathBuf,
    pub charts: Vec<PathBuf>,
    pub json: Option<PathBuf>,
    pub rows: usize,
}

/// Chart files that made it to disk, as referenced from the HTML
#[derive(Debug, Clone, PartialEq)]
pub struct ChartImage {
    pub title: String,
    pub src: String,
    pub dark_src: Option<String>,
}

/// Load the table at `table_path` and write charts, HTML and JSON into
/// `report_dir`. A chart that fails to write is left out; failing to write
/// `index.html` is fatal.
pub fn generate(
    original: &Path,
    table_path: &Path,
    report_dir: &Path,
    root: &Path,
    options: &ReportOptions,
) -> Result<ReportOutput> {
    let _span = info_span!("report").entered();

    let table = ResultTable::load(table_path)?;
    let model = ReportAggregator::new(root, report_dir).aggregate(original, &table);

    let graph_dir = report_dir.join(GRAPHS_DIR);
    std::fs::create_dir_all(&graph_dir).map_err(|source| Error::Report {
        path: graph_dir.clone(),
        source,
    })?;

    let mut written = Vec::new();
    let mut images = Vec::new();
    for spec in &model.charts {
        let light = spec.file_name(Theme::Light);
        let light_path = graph_dir.join(&light);
        if let Err(e) = std::fs::write(&light_path, chart::render_svg(spec, Theme::Light)) {
            error!("failed to write chart {}: {}", light_path.display(), e);
            continue;
        }
        written.push(light_path);

        let mut dark_src = None;
        if options.dark_charts {
            let dark = spec.file_name(Theme::Dark);
            let dark_path = graph_dir.join(&dark);
            match std::fs::write(&dark_path, chart::render_svg(spec, Theme::Dark)) {
                Ok(()) => {
                    dark_src = Some(format!("{}/{}", GRAPHS_DIR, dark));
                    written.push(dark_path);
                }
                Err(e) => warn!("failed to write chart {}: {}", dark_path.display(), e),
            }
        }

        images.push(ChartImage {
            title: spec.title.clone(),
            src: format!("{}/{}", GRAPHS_DIR, light),
            dark_src,
        });
    }

    let index = report_dir.join(INDEX_FILE);
    let write_index = || -> std::io::Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(&index)?);
        html::write(&mut file, &model, &images)?;
        std::io::Write::flush(&mut file)
    };
    write_index().map_err(|source| Error::Report {
        path: index.clone(),
        source,
    })?;
    info!("report written to {}", index.display());

    let json_path = table_path
        .parent()
        .unwrap_or(report_dir)
        .join(JSON_FILE);
    let json = match std::fs::File::create(&json_path).and_then(|f| json::write(f, &model)) {
        Ok(()) => Some(json_path),
        Err(e) => {
            warn!("failed to write {}: {}", json_path.display(), e);
            None
        }
    };

    Ok(ReportOutput {
        index,
        charts: written,
        json,
        rows: model.rows.len(),
    })
}

/// Minimal escaping for text placed in HTML or SVG
pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ResultTable;
    use proptest::prelude::*;

    pub(crate) fn test_row(format: &str, quality: u32, metrics: &[(&str, f64)]) -> MetricRow {
        let name = format!("img_q{}.{}", quality, format);
        MetricRow {
            filename: name.clone(),
            format: format.to_string(),
            quality,
            params: format!("-q {}", quality),
            size_kb: f64::from(quality) / 2.0,
            relative_path: format!("images/{}", name),
            diff_path: format!("diffs/diff_{}", name),
            details: r#"{"width": 1000, "height": 800, "depth": 8, "colorspace": "sRGB", "format": "WEBP"}"#
                .to_string(),
            metrics: metrics
                .iter()
                .map(|(k, v)| (k.to_string(), MetricValue::Number(*v)))
                .collect(),
        }
    }

    // ==========================================================================
    // CHANNEL GROUPING
    // ==========================================================================

    #[test]
    fn test_grouping_by_base_name() {
        let groups = group_metric_columns(&["PSNR", "PSNR-Red", "PSNR-Green", "SSIM-Blue"]);
        assert_eq!(
            groups,
            vec![
                MetricGroup {
                    name: "PSNR".to_string(),
                    columns: vec!["PSNR".into(), "PSNR-Red".into(), "PSNR-Green".into()],
                },
                MetricGroup {
                    name: "SSIM".to_string(),
                    columns: vec!["SSIM-Blue".into()],
                },
            ]
        );
    }

    #[test]
    fn test_grouping_is_case_normalized() {
        let groups = group_metric_columns(&["psnr-red", "PSNR"]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "PSNR");
        assert_eq!(groups[0].aggregate_column(), Some("PSNR"));
    }

    #[test]
    fn test_non_channel_suffix_is_kept() {
        assert_eq!(base_metric_name("FUZZ-X"), "FUZZ-X");
        assert_eq!(base_metric_name("MAE-alpha"), "MAE");
        assert_eq!(channel_of("MAE-alpha"), "Alpha");
        assert_eq!(channel_of("MAE"), "All");
    }

    #[test]
    fn test_headline_column_without_aggregate() {
        let groups = group_metric_columns(&["SSIM-Blue", "SSIM-Red"]);
        assert_eq!(groups[0].aggregate_column(), None);
        assert_eq!(groups[0].headline_column(), "SSIM-Blue");
    }

    proptest! {
        #[test]
        fn prop_grouping_partitions_columns(
            bases in proptest::collection::vec("[A-Z]{2,5}", 1..4),
            picks in proptest::collection::vec((0usize..4, 0usize..5), 0..12),
        ) {
            let channels = ["", "-Red", "-Green", "-Blue", "-Alpha"];
            let columns: Vec<String> = picks
                .iter()
                .map(|(b, c)| format!("{}{}", bases[b % bases.len()], channels[*c]))
                .collect();
            let groups = group_metric_columns(&columns);

            let total: usize = groups.iter().map(|g| g.columns.len()).sum();
            prop_assert_eq!(total, columns.len());
            for g in &groups {
                for c in &g.columns {
                    prop_assert_eq!(&base_metric_name(c), &g.name);
                }
            }
        }
    }

    // ==========================================================================
    // SORTING
    // ==========================================================================

    #[test]
    fn test_sort_format_then_quality_desc() {
        let mut rows = vec![];
        for fmt in ["webp", "jpeg"] {
            for q in [50, 90, 10] {
                rows.push(test_row(fmt, q, &[]));
            }
        }
        sort_rows(&mut rows);
        let order: Vec<(String, u32)> = rows.iter().map(|r| (r.format.clone(), r.quality)).collect();
        assert_eq!(
            order,
            vec![
                ("jpeg".to_string(), 90),
                ("jpeg".to_string(), 50),
                ("jpeg".to_string(), 10),
                ("webp".to_string(), 90),
                ("webp".to_string(), 50),
                ("webp".to_string(), 10),
            ]
        );
    }

    #[test]
    fn test_lossless_sorts_before_quality_100() {
        let lossy = test_row("webp", 100, &[]);
        let mut lossless = test_row("webp", 100, &[]);
        lossless.params = "-lossless".to_string();
        lossless.filename = "img_lossless.webp".to_string();

        let mut rows = vec![lossy, lossless];
        sort_rows(&mut rows);
        assert!(rows[0].is_lossless());
        assert!(!rows[1].is_lossless());
    }

    // ==========================================================================
    // AGGREGATION
    // ==========================================================================

    #[cfg(unix)]
    #[test]
    fn test_aggregate_rebases_paths_for_nested_report() {
        let table = ResultTable::from_rows(vec![test_row("webp", 50, &[("PSNR", 30.0)])]);
        let model = ReportAggregator::new("/a/b", "/a/b/sub")
            .aggregate(Path::new("/a/b/images/original.png"), &table);

        let row = &model.rows[0];
        assert_eq!(row.image_src, "../images/img_q50.webp");
        assert_eq!(row.diff_src, "../diffs/diff_img_q50.webp");
        assert_eq!(row.details_label, "1000x800 sRGB 8bit");
        assert_eq!(model.summary.input_name, "original.png");
    }

    #[test]
    fn test_aggregate_indexes_in_display_order() {
        let table = ResultTable::from_rows(vec![
            test_row("webp", 10, &[("SSIM", 0.8)]),
            test_row("webp", 90, &[("SSIM", 0.99)]),
        ]);
        let model = ReportAggregator::new("run", "run").aggregate(Path::new("original.png"), &table);
        assert_eq!(model.rows[0].quality, 90);
        assert_eq!(model.rows[0].index, 0);
        assert_eq!(model.rows[1].index, 1);
        assert_eq!(model.summary.total, 2);
        assert_eq!(model.summary.metrics, vec!["SSIM"]);
    }

    #[test]
    fn test_missing_diff_is_counted_and_empty() {
        let mut row = test_row("jpeg", 40, &[]);
        row.diff_path.clear();
        let table = ResultTable::from_rows(vec![row]);
        let model = ReportAggregator::new("run", "run").aggregate(Path::new("o.png"), &table);
        assert_eq!(model.rows[0].diff_src, "");
        assert_eq!(model.summary.missing_diffs, 1);
    }

    #[test]
    fn test_details_label() {
        assert_eq!(
            ImageDetails::parse(r#"{"width": 4, "height": 3, "depth": 16, "colorspace": "Gray"}"#)
                .unwrap()
                .label(),
            "4x3 Gray 16bit"
        );
        assert_eq!(ImageDetails::parse("{}").unwrap().label(), "?x?");
        assert!(ImageDetails::parse("not json").is_none());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
