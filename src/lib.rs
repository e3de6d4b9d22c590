//! Squashlab - How much does compression really cost?
//!
//! Squashlab encodes one image across codecs and quality levels, measures
//! how far each result drifted from the original, and writes a browsable
//! report with charts and side-by-side difference images.
//!
//! # Overview
//!
//! A run is a straight batch pipeline:
//!
//! 1. **Variants**: the input is encoded once per (codec, quality) pair. The
//!    quality ladder splits 1..=100 into even steps plus a low floor sample;
//!    WebP also gets a lossless variant.
//! 2. **Metrics**: for every variant the comparison tool produces a diff
//!    image and one score per configured metric, per colour channel when the
//!    tool reports them.
//! 3. **Table**: rows are reconciled to a common column set and written to
//!    `data/metrics.csv`.
//! 4. **Report**: the table is reloaded, grouped, sorted and rendered as
//!    SVG charts plus `index.html`.
//!
//! Nothing short of an unusable input or output directory stops a run. A
//! variant that fails to encode is left out; a failed diff or metric leaves
//! a gap in that row only.
//!
//! # Quick Start
//!
//! ```no_run
//! use squashlab::{Codec, MagickTools, Pipeline, RunConfig, ToolRunner};
//! use std::time::Duration;
//!
//! let config = RunConfig::new("photo.png")
//!     .with_formats(vec![Codec::Webp])
//!     .with_steps(4);
//! let tools = MagickTools::new(ToolRunner::new(Duration::from_secs(60)));
//!
//! let summary = Pipeline::new(config, &tools).run()?;
//! println!("{} variants, report at {}", summary.variants, summary.report.index.display());
//! # Ok::<(), squashlab::Error>(())
//! ```
//!
//! # Output Layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `images/` | copy of the input and every variant |
//! | `diffs/` | `diff_<variant>` difference images |
//! | `data/metrics.csv` | one row per variant |
//! | `data/report.json` | the report model |
//! | `graphs/` | SVG charts, light and `_dark` |
//! | `index.html` | the report |
//!
//! # Modules
//!
//! - [`tools`]: external process plumbing and the [`ImageTools`] seam
//! - [`variant`]: quality ladder and encoding
//! - [`metrics`]: diff, metric and attribute collection
//! - [`table`]: the persisted metrics table
//! - [`report`]: grouping, sorting, charts, HTML and JSON
//! - [`workspace`]: the per-run output tree
//! - [`pipeline`]: everything wired together

pub mod error;
pub mod metrics;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod table;
pub mod tools;
pub mod variant;
pub mod workspace;

pub use error::{Error, Result};
pub use metrics::{MetricCollector, MetricRow, MetricValue};
pub use pipeline::{Pipeline, RunConfig, RunSummary};
pub use report::{MetricGroup, ReportAggregator, ReportModel, ReportRow};
pub use table::ResultTable;
pub use tools::{ImageTools, MagickTools, ToolRunner};
pub use variant::{Codec, QualitySetting, VariantDescriptor, VariantGenerator};
pub use workspace::Workspace;

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // PUBLIC API TESTS
    // ==========================================================================

    #[test]
    fn test_public_exports() {
        let _tools = MagickTools::new(ToolRunner::default());
        let _config = RunConfig::new("input.png");
        let _ = ResultTable::from_rows(Vec::new());
    }

    #[test]
    fn test_quality_setting_variants() {
        let _ = QualitySetting::Lossy(50);
        let _ = QualitySetting::Lossless;
        assert!(QualitySetting::Lossless.is_lossless());
    }

    #[test]
    fn test_codec_variants() {
        assert_eq!("webp".parse::<Codec>(), Ok(Codec::Webp));
        assert_eq!("jpg".parse::<Codec>(), Ok(Codec::Jpeg));
    }
}
