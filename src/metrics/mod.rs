//! Fidelity measurement
//!
//! For every encoded variant the collector asks the comparison tool for a
//! difference image and, one call per metric, for the numeric scores. It
//! also records file size and basic image attributes. Every sub-step is
//! allowed to fail on its own: the variant still gets a row, with an empty
//! diff path or a missing metric key where something went wrong.

pub mod parse;

use crate::paths;
use crate::tools::ImageTools;
use crate::variant::VariantDescriptor;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, info_span, warn};

pub use parse::{parse_metric_output, INF_SENTINEL};

/// Metrics collected when none are configured explicitly
pub const DEFAULT_METRICS: [&str; 5] = ["MAE", "RMSE", "PSNR", "SSIM", "NCC"];

/// Colour distance below which pixels count as unchanged in diff images
pub const DEFAULT_FUZZ_PERCENT: f64 = 5.0;

/// Details blob stored when the image could not be inspected
pub const EMPTY_DETAILS: &str = "{}";

/// A metric cell: numeric when it parses, otherwise kept as text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }

    /// Read a serialized cell back, preferring a number.
    pub fn from_cell(cell: &str) -> Self {
        match cell.trim().parse::<f64>() {
            Ok(v) => MetricValue::Number(v),
            Err(_) => MetricValue::Text(cell.to_string()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(v) => write!(f, "{}", v),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

/// One measured variant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub filename: String,
    pub format: String,
    pub quality: u32,
    pub params: String,
    pub size_kb: f64,
    /// Variant location relative to the run root, `/`-separated
    pub relative_path: String,
    /// Diff image relative to the run root; empty when none was produced
    pub diff_path: String,
    /// JSON object text from the inspection tool
    pub details: String,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl MetricRow {
    /// Lossless rows share quality 100 with lossy ones; the encoder flags
    /// tell them apart.
    pub fn is_lossless(&self) -> bool {
        self.params.split_whitespace().any(|p| p == "-lossless")
    }

    pub fn metric(&self, column: &str) -> Option<f64> {
        self.metrics.get(column).and_then(MetricValue::as_f64)
    }
}

/// Bytes to kilobytes, rounded to two decimals
pub fn size_kb(bytes: u64) -> f64 {
    round2(bytes as f64 / 1024.0)
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct MetricCollector<'a> {
    tools: &'a dyn ImageTools,
    root: PathBuf,
    diff_dir: PathBuf,
    metrics: Vec<String>,
    fuzz_percent: f64,
    jobs: usize,
    progress: Option<ProgressBar>,
}

impl<'a> MetricCollector<'a> {
    /// `root` is the directory stored paths are made relative to; diff
    /// images are written into `diff_dir`.
    pub fn new(tools: &'a dyn ImageTools, root: impl Into<PathBuf>, diff_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools,
            root: root.into(),
            diff_dir: diff_dir.into(),
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
            fuzz_percent: DEFAULT_FUZZ_PERCENT,
            jobs: 1,
            progress: None,
        }
    }

    pub fn with_metrics<S: AsRef<str>>(mut self, metrics: &[S]) -> Self {
        self.metrics = metrics.iter().map(|m| m.as_ref().to_string()).collect();
        self
    }

    pub fn with_fuzz_percent(mut self, fuzz_percent: f64) -> Self {
        self.fuzz_percent = fuzz_percent;
        self
    }

    /// Number of variants measured concurrently. 1 keeps everything on the
    /// calling thread.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Measure every variant. Always returns one row per variant, in input
    /// order.
    pub fn collect(&self, original: &Path, variants: &[VariantDescriptor]) -> Vec<MetricRow> {
        if self.jobs > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(self.jobs).build() {
                Ok(pool) => {
                    return pool.install(|| {
                        variants
                            .par_iter()
                            .map(|v| self.measure(original, v))
                            .collect()
                    })
                }
                Err(e) => warn!("could not start {} workers, measuring sequentially: {}", self.jobs, e),
            }
        }
        variants.iter().map(|v| self.measure(original, v)).collect()
    }

    fn measure(&self, original: &Path, variant: &VariantDescriptor) -> MetricRow {
        let row = self.collect_one(original, variant);
        if let Some(ref pb) = self.progress {
            pb.inc(1);
            pb.set_message(row.filename.clone());
        }
        row
    }

    /// Measure a single variant.
    pub fn collect_one(&self, original: &Path, variant: &VariantDescriptor) -> MetricRow {
        let filename = variant.file_name();
        let _span = info_span!("collect", file = %filename).entered();
        info!("analyzing {}", filename);

        let size = match std::fs::metadata(&variant.path) {
            Ok(meta) => size_kb(meta.len()),
            Err(e) => {
                warn!("cannot stat {}: {}", variant.path.display(), e);
                0.0
            }
        };

        let mut row = MetricRow {
            filename: filename.clone(),
            format: variant.format().to_string(),
            quality: u32::from(variant.quality()),
            params: variant.params.clone(),
            size_kb: size,
            relative_path: self.stored_path(&variant.path),
            diff_path: String::new(),
            details: self.details(&variant.path),
            metrics: BTreeMap::new(),
        };

        let diff = self.diff_dir.join(format!("diff_{}", filename));
        match self.tools.diff(original, &variant.path, self.fuzz_percent, &diff) {
            Ok(()) => row.diff_path = self.stored_path(&diff),
            Err(e) => error!("error creating diff image for {}: {}", filename, e),
        }

        for metric in &self.metrics {
            let output = match self.tools.compare(original, &variant.path, metric, true) {
                Ok(output) => output,
                Err(e) => {
                    warn!("failed to calc {} for {}: {}", metric, filename, e);
                    continue;
                }
            };
            match parse_metric_output(&output, metric) {
                Ok(values) => {
                    debug!(metric = %metric, count = values.len(), "parsed");
                    row.metrics
                        .extend(values.into_iter().map(|(k, v)| (k, MetricValue::Number(v))));
                }
                Err(e) => warn!("failed to calc {} for {}: {}", metric, filename, e),
            }
        }

        row
    }

    fn details(&self, path: &Path) -> String {
        match self.tools.identify(path) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => EMPTY_DETAILS.to_string(),
            Err(e) => {
                error!("failed to identify {}: {}", path.display(), e);
                EMPTY_DETAILS.to_string()
            }
        }
    }

    fn stored_path(&self, path: &Path) -> String {
        match paths::relative_to(path, &self.root) {
            Some(rel) => paths::to_slash(&rel),
            None => paths::absolutize(path).display().to_string(),
        }
    }
}
