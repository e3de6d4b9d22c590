use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use squashlab::variant::resolve_formats;
use squashlab::{Codec, MagickTools, Pipeline, RunConfig, ToolRunner};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "squashlab")]
#[command(author, version, about = "Compress an image across codecs and quality levels and report the fidelity cost")]
struct Args {
    /// Image to analyze (optional in GUI mode)
    image: Option<PathBuf>,

    /// Launch GUI file picker (auto-enabled when no image is given)
    #[arg(long)]
    gui: bool,

    /// Number of quality steps between 1 and 100
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=100))]
    steps: u32,

    /// Formats to test (webp, jpeg)
    #[arg(long, num_args = 1.., default_values = ["webp", "jpeg"])]
    formats: Vec<String>,

    /// Metrics to compute
    #[arg(long, num_args = 1.., default_values = ["MAE", "RMSE", "PSNR", "SSIM", "NCC"])]
    metrics: Vec<String>,

    /// Directory the timestamped run directory is created in
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Fuzz percentage for difference images
    #[arg(long, default_value = "5")]
    fuzz: f64,

    /// Seconds before an external tool is killed
    #[arg(long, default_value = "120")]
    timeout: u64,

    /// Variants measured in parallel (1 = sequential)
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Don't render the dark chart set
    #[arg(long)]
    no_dark: bool,

    /// Don't prompt to open the report
    #[arg(long)]
    no_open: bool,

    /// Increase log detail (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let args = Args::parse();

    let level = match (args.quiet, args.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    #[cfg(feature = "gui")]
    let use_gui = args.gui || args.image.is_none();
    #[cfg(not(feature = "gui"))]
    let use_gui = false;

    let image = if use_gui { pick_image() } else { args.image.clone() };
    let image = match image {
        Some(p) => p,
        None if use_gui => {
            eprintln!("No image selected.");
            std::process::exit(0);
        }
        None => {
            eprintln!("Usage: squashlab <IMAGE>");
            eprintln!("Run 'squashlab --help' for more options.");
            eprintln!("Note: GUI mode not available in this build.");
            std::process::exit(1);
        }
    };

    let formats = resolve_formats(&args.formats);
    if formats.is_empty() {
        let supported: Vec<&str> = Codec::ALL.iter().map(|c| c.as_str()).collect();
        eprintln!("No supported formats requested (supported: {})", supported.join(", "));
        std::process::exit(1);
    }

    let config = RunConfig::new(&image)
        .with_output_dir(&args.output_dir)
        .with_formats(formats)
        .with_steps(args.steps)
        .with_metrics(&args.metrics)
        .with_fuzz_percent(args.fuzz)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_jobs(args.jobs)
        .with_dark_charts(!args.no_dark);

    let tools = MagickTools::new(ToolRunner::new(config.timeout));

    if !args.quiet {
        eprintln!("\x1b[1mSquashlab - Compression Cost Report\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        eprintln!("Input: {}\n", image.display());
    }

    let mut pipeline = Pipeline::new(config, &tools);
    if !args.quiet {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pipeline = pipeline.with_progress(pb);
    }

    let summary = match pipeline.run() {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            std::process::exit(1);
        }
    };

    if !args.quiet {
        eprintln!("\n{}", "─".repeat(70));
        eprintln!("\x1b[1mSummary:\x1b[0m");
        eprintln!("  \x1b[32m✓ Variants:\x1b[0m      {}", summary.variants);
        eprintln!("  \x1b[32m✓ Charts:\x1b[0m        {}", summary.report.charts.len());
        if summary.missing_diffs > 0 {
            eprintln!("  \x1b[33m? Missing diffs:\x1b[0m {}", summary.missing_diffs);
        }
        eprintln!("\n\x1b[32mReport saved: {}\x1b[0m", summary.report.index.display());
        eprintln!("\x1b[90mMetrics table: {}\x1b[0m", summary.table_path.display());
    }

    let index = &summary.report.index;
    if !args.no_open && !args.quiet {
        if use_gui {
            let _ = open::that(index);
        } else {
            eprint!("\nOpen report in browser? [Y/n] ");
            io::stderr().flush().ok();
            let mut input = String::new();
            if io::stdin().read_line(&mut input).is_ok() {
                let input = input.trim().to_lowercase();
                if input.is_empty() || input == "y" || input == "yes" {
                    if let Err(e) = open::that(index) {
                        eprintln!("Failed to open report: {}", e);
                    }
                }
            }
        }
    }

    if !args.quiet {
        eprintln!("\n\x1b[90mAnalysis complete.\x1b[0m");
    }
}

#[cfg(feature = "gui")]
fn pick_image() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Select image to analyze")
        .add_filter("Images", &["png", "jpg", "jpeg", "webp", "tif", "tiff", "bmp", "gif"])
        .pick_file()
}

#[cfg(not(feature = "gui"))]
fn pick_image() -> Option<PathBuf> {
    None
}
