//! A complete run: scaffold, encode, measure, persist, report

use crate::error::Result;
use crate::metrics::{MetricCollector, DEFAULT_FUZZ_PERCENT, DEFAULT_METRICS};
use crate::report::{self, ReportOptions, ReportOutput};
use crate::table::ResultTable;
use crate::tools::{ImageTools, DEFAULT_TIMEOUT};
use crate::variant::{Codec, VariantGenerator};
use crate::workspace::Workspace;
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_STEPS: u32 = 10;

/// Settings for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    /// Parent of the timestamped run directory
    pub output_dir: PathBuf,
    pub formats: Vec<Codec>,
    pub steps: u32,
    pub metrics: Vec<String>,
    pub fuzz_percent: f64,
    /// Per external invocation
    pub timeout: Duration,
    pub jobs: usize,
    pub dark_charts: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output_dir: PathBuf::from("."),
            formats: Codec::ALL.to_vec(),
            steps: DEFAULT_STEPS,
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
            fuzz_percent: DEFAULT_FUZZ_PERCENT,
            timeout: DEFAULT_TIMEOUT,
            jobs: 1,
            dark_charts: true,
        }
    }
}

impl RunConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_formats(mut self, formats: Vec<Codec>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_metrics<S: AsRef<str>>(mut self, metrics: &[S]) -> Self {
        self.metrics = metrics.iter().map(|m| m.as_ref().to_string()).collect();
        self
    }

    pub fn with_fuzz_percent(mut self, fuzz_percent: f64) -> Self {
        self.fuzz_percent = fuzz_percent;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_dark_charts(mut self, dark: bool) -> Self {
        self.dark_charts = dark;
        self
    }
}

/// What a finished run left behind
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub workspace: Workspace,
    pub table_path: PathBuf,
    pub report: ReportOutput,
    /// Variants that were encoded successfully
    pub variants: usize,
    pub missing_diffs: usize,
}

pub struct Pipeline<'a> {
    config: RunConfig,
    tools: &'a dyn ImageTools,
    progress: Option<ProgressBar>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: RunConfig, tools: &'a dyn ImageTools) -> Self {
        Self {
            config,
            tools,
            progress: None,
        }
    }

    /// Report metric collection on `progress`; its length is set once the
    /// number of variants is known.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run every stage. Per-variant failures are logged and leave gaps in
    /// the report; only scaffolding, table and report I/O errors abort.
    pub fn run(&self) -> Result<RunSummary> {
        let config = &self.config;
        let workspace = Workspace::create(&config.input, &config.output_dir)?;

        let variants = VariantGenerator::new(self.tools).generate(
            &workspace.original,
            &workspace.images,
            &config.formats,
            config.steps,
        );
        info!("{} variant(s) encoded", variants.len());
        if variants.is_empty() {
            warn!("no variants were produced; the report will be empty");
        }

        let mut collector = MetricCollector::new(self.tools, &workspace.root, &workspace.diffs)
            .with_metrics(&config.metrics)
            .with_fuzz_percent(config.fuzz_percent)
            .with_jobs(config.jobs);
        if let Some(ref pb) = self.progress {
            pb.set_length(variants.len() as u64);
            collector = collector.with_progress(pb.clone());
        }
        let rows = collector.collect(&workspace.original, &variants);
        if let Some(ref pb) = self.progress {
            pb.finish_and_clear();
        }

        let missing_diffs = rows.iter().filter(|r| r.diff_path.is_empty()).count();
        let table = ResultTable::from_rows(rows);
        let table_path = workspace.table_path();
        table.save(&table_path)?;
        info!("metrics table written to {}", table_path.display());

        let options = ReportOptions {
            dark_charts: config.dark_charts,
        };
        let report = report::generate(
            &workspace.original,
            &table_path,
            &workspace.root,
            &workspace.root,
            &options,
        )?;

        Ok(RunSummary {
            variants: variants.len(),
            missing_diffs,
            table_path,
            report,
            workspace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_cli_defaults() {
        let config = RunConfig::new("a.png");
        assert_eq!(config.steps, 10);
        assert_eq!(config.formats, vec![Codec::Webp, Codec::Jpeg]);
        assert_eq!(config.metrics, vec!["MAE", "RMSE", "PSNR", "SSIM", "NCC"]);
        assert_eq!(config.fuzz_percent, 5.0);
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.jobs, 1);
        assert!(config.dark_charts);
    }

    #[test]
    fn test_builders() {
        let config = RunConfig::new("a.png")
            .with_steps(4)
            .with_formats(vec![Codec::Jpeg])
            .with_metrics(&["PSNR"])
            .with_jobs(0)
            .with_dark_charts(false)
            .with_output_dir("/tmp/out");
        assert_eq!(config.steps, 4);
        assert_eq!(config.formats, vec![Codec::Jpeg]);
        assert_eq!(config.metrics, vec!["PSNR"]);
        assert_eq!(config.jobs, 1);
        assert!(!config.dark_charts);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    }
}
