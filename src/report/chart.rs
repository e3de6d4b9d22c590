//! Chart definitions and SVG rendering
//!
//! The aggregator decides *what* to plot as [`ChartSpec`]s: one
//! size-vs-quality chart, and per metric group an efficiency chart (size vs
//! the aggregate value) and a channel-detail chart (quality vs every
//! channel column). [`render_svg`] draws a spec as a standalone SVG line
//! chart in either theme.

use super::{channel_of, escape, formats_of, MetricGroup};
use crate::metrics::MetricRow;
use serde::Serialize;
use std::fmt::Write;

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 600.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 190.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 60.0;
const TICKS: usize = 5;

const FORMAT_PALETTE: [&str; 5] = ["#3182ce", "#dd6b20", "#38a169", "#805ad5", "#d53f8c"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

struct Colors {
    background: &'static str,
    foreground: &'static str,
    muted: &'static str,
    grid: &'static str,
}

impl Theme {
    fn colors(self) -> Colors {
        match self {
            Theme::Light => Colors {
                background: "#ffffff",
                foreground: "#1a202c",
                muted: "#4a5568",
                grid: "#e2e8f0",
            },
            Theme::Dark => Colors {
                background: "#1a202c",
                foreground: "#f7fafc",
                muted: "#a0aec0",
                grid: "#4a5568",
            },
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Theme::Light => "",
            Theme::Dark => "_dark",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

impl LineStyle {
    /// Dash pattern per format, so formats stay apart when colours encode
    /// channels.
    pub fn for_format(format: &str) -> Self {
        match format {
            "jpeg" => LineStyle::Dashed,
            "png" => LineStyle::Dotted,
            _ => LineStyle::Solid,
        }
    }

    fn dasharray(self) -> Option<&'static str> {
        match self {
            LineStyle::Solid => None,
            LineStyle::Dashed => Some("8,5"),
            LineStyle::Dotted => Some("2,4"),
        }
    }
}

/// How a series picks its colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stroke {
    /// Nth entry of the format palette
    Palette(usize),
    /// Fixed colour of a channel
    Channel(String),
}

impl Stroke {
    fn color(&self, colors: &Colors) -> &'static str {
        match self {
            Stroke::Palette(i) => FORMAT_PALETTE[i % FORMAT_PALETTE.len()],
            Stroke::Channel(channel) => match channel.as_str() {
                "Red" => "#e53e3e",
                "Green" => "#38a169",
                "Blue" => "#3182ce",
                "Alpha" => "#00b5d8",
                "All" => colors.foreground,
                _ => colors.muted,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub label: String,
    pub format: String,
    pub points: Vec<(f64, f64)>,
    pub stroke: Stroke,
    pub line: LineStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub file_stem: String,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<Series>,
}

impl ChartSpec {
    pub fn file_name(&self, theme: Theme) -> String {
        format!("{}{}.svg", self.file_stem, theme.suffix())
    }
}

/// File-name-safe form of a metric name
fn stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Rows of one format, stably sorted by `key`
fn subset<'r>(rows: &'r [MetricRow], format: &str, key: impl Fn(&MetricRow) -> f64) -> Vec<&'r MetricRow> {
    let mut subset: Vec<&MetricRow> = rows.iter().filter(|r| r.format == format).collect();
    subset.sort_by(|a, b| key(a).total_cmp(&key(b)));
    subset
}

pub fn size_vs_quality(rows: &[MetricRow], formats: &[String]) -> ChartSpec {
    let series = formats
        .iter()
        .enumerate()
        .map(|(i, fmt)| Series {
            label: fmt.clone(),
            format: fmt.clone(),
            points: subset(rows, fmt, |r| f64::from(r.quality))
                .iter()
                .map(|r| (f64::from(r.quality), r.size_kb))
                .collect(),
            stroke: Stroke::Palette(i),
            line: LineStyle::Solid,
        })
        .collect();

    ChartSpec {
        file_stem: "size_vs_quality".to_string(),
        title: "Quality Setting vs File Size".to_string(),
        x_label: "Quality".to_string(),
        y_label: "Size (KB)".to_string(),
        series,
    }
}

/// Size vs the group's aggregate value; `None` when the group has no
/// aggregate column.
pub fn efficiency(rows: &[MetricRow], formats: &[String], group: &MetricGroup) -> Option<ChartSpec> {
    let column = group.aggregate_column()?;

    let series = formats
        .iter()
        .enumerate()
        .map(|(i, fmt)| Series {
            label: fmt.clone(),
            format: fmt.clone(),
            points: subset(rows, fmt, |r| r.size_kb)
                .iter()
                .filter_map(|r| r.metric(column).map(|v| (r.size_kb, v)))
                .collect(),
            stroke: Stroke::Palette(i),
            line: LineStyle::Solid,
        })
        .collect();

    Some(ChartSpec {
        file_stem: format!("{}_efficiency", stem(&group.name)),
        title: format!("{} Efficiency (vs Size)", group.name),
        x_label: "Size (KB)".to_string(),
        y_label: group.name.clone(),
        series,
    })
}

/// Quality vs every column of the group. Missing values plot as 0 so every
/// series has one point per variant.
pub fn channel_detail(rows: &[MetricRow], formats: &[String], group: &MetricGroup) -> ChartSpec {
    let mut series = Vec::new();
    for fmt in formats {
        let subset = subset(rows, fmt, |r| f64::from(r.quality));
        for column in &group.columns {
            let channel = channel_of(column);
            series.push(Series {
                label: format!("{} {}", fmt, channel),
                format: fmt.clone(),
                points: subset
                    .iter()
                    .map(|r| (f64::from(r.quality), r.metric(column).unwrap_or(0.0)))
                    .collect(),
                stroke: Stroke::Channel(channel.to_string()),
                line: LineStyle::for_format(fmt),
            });
        }
    }

    ChartSpec {
        file_stem: format!("{}_channels", stem(&group.name)),
        title: format!("{} Detail (Channels)", group.name),
        x_label: "Quality".to_string(),
        y_label: group.name.clone(),
        series,
    }
}

pub fn build_charts(rows: &[MetricRow], groups: &[MetricGroup]) -> Vec<ChartSpec> {
    let formats = formats_of(rows);
    let mut charts = vec![size_vs_quality(rows, &formats)];
    for group in groups {
        if let Some(chart) = efficiency(rows, &formats, group) {
            charts.push(chart);
        }
        charts.push(channel_detail(rows, &formats, group));
    }
    charts
}

// ============================================================================
// SVG rendering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    min: f64,
    max: f64,
}

impl Range {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if min > max {
            return Range { min: 0.0, max: 1.0 };
        }
        if (max - min).abs() < f64::EPSILON {
            return Range {
                min: min - 1.0,
                max: max + 1.0,
            };
        }
        let pad = (max - min) * 0.05;
        Range {
            min: min - pad,
            max: max + pad,
        }
    }

    fn scale(&self, v: f64, from: f64, to: f64) -> f64 {
        from + (v - self.min) / (self.max - self.min) * (to - from)
    }

    fn ticks(&self) -> Vec<f64> {
        let step = (self.max - self.min) / (TICKS - 1) as f64;
        (0..TICKS).map(|i| self.min + step * i as f64).collect()
    }
}

fn format_tick(v: f64, span: f64) -> String {
    if span >= 20.0 {
        format!("{:.0}", v)
    } else if span >= 2.0 {
        format!("{:.1}", v)
    } else {
        format!("{:.3}", v)
    }
}

pub fn render_svg(spec: &ChartSpec, theme: Theme) -> String {
    let colors = theme.colors();
    let left = MARGIN_LEFT;
    let right = WIDTH - MARGIN_RIGHT;
    let top = MARGIN_TOP;
    let bottom = HEIGHT - MARGIN_BOTTOM;

    let points = || spec.series.iter().flat_map(|s| s.points.iter());
    let xr = Range::of(points().map(|p| p.0));
    let yr = Range::of(points().map(|p| p.1));
    let x_of = |x: f64| xr.scale(x, left, right);
    let y_of = |y: f64| yr.scale(y, bottom, top);

    let mut svg = String::with_capacity(8192);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{WIDTH}" height="{HEIGHT}" fill="{}"/>"#,
        colors.background
    );

    // Grid and tick labels
    for x in xr.ticks() {
        let px = x_of(x);
        let _ = write!(
            svg,
            r#"<line x1="{px:.1}" y1="{top}" x2="{px:.1}" y2="{bottom}" stroke="{}" stroke-dasharray="4,4"/>"#,
            colors.grid
        );
        let _ = write!(
            svg,
            r#"<text x="{px:.1}" y="{:.1}" fill="{}" text-anchor="middle">{}</text>"#,
            bottom + 18.0,
            colors.muted,
            format_tick(x, xr.max - xr.min)
        );
    }
    for y in yr.ticks() {
        let py = y_of(y);
        let _ = write!(
            svg,
            r#"<line x1="{left}" y1="{py:.1}" x2="{right}" y2="{py:.1}" stroke="{}" stroke-dasharray="4,4"/>"#,
            colors.grid
        );
        let _ = write!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" fill="{}" text-anchor="end">{}</text>"#,
            left - 8.0,
            py + 4.0,
            colors.muted,
            format_tick(y, yr.max - yr.min)
        );
    }

    // Frame
    let _ = write!(
        svg,
        r#"<rect x="{left}" y="{top}" width="{:.1}" height="{:.1}" fill="none" stroke="{}"/>"#,
        right - left,
        bottom - top,
        colors.muted
    );

    // Series
    for series in &spec.series {
        let color = series.stroke.color(&colors);
        if series.points.len() >= 2 {
            let mut d = String::new();
            for (i, (x, y)) in series.points.iter().enumerate() {
                let cmd = if i == 0 { "M" } else { " L" };
                let _ = write!(d, "{}{:.1},{:.1}", cmd, x_of(*x), y_of(*y));
            }
            let dash = series
                .line
                .dasharray()
                .map(|d| format!(r#" stroke-dasharray="{}""#, d))
                .unwrap_or_default();
            let _ = write!(
                svg,
                r#"<path d="{d}" fill="none" stroke="{color}" stroke-width="2" stroke-linejoin="round" opacity="0.85"{dash}/>"#
            );
        }
        for (x, y) in &series.points {
            let _ = write!(
                svg,
                r#"<circle cx="{:.1}" cy="{:.1}" r="3" fill="{color}"/>"#,
                x_of(*x),
                y_of(*y)
            );
        }
    }

    if spec.series.iter().all(|s| s.points.is_empty()) {
        let _ = write!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" fill="{}" text-anchor="middle">no data</text>"#,
            (left + right) / 2.0,
            (top + bottom) / 2.0,
            colors.muted
        );
    }

    // Legend
    for (i, series) in spec.series.iter().enumerate() {
        let y = top + 10.0 + i as f64 * 18.0;
        let x = right + 20.0;
        let dash = series
            .line
            .dasharray()
            .map(|d| format!(r#" stroke-dasharray="{}""#, d))
            .unwrap_or_default();
        let _ = write!(
            svg,
            r#"<line x1="{x:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="{}" stroke-width="2"{dash}/>"#,
            x + 24.0,
            series.stroke.color(&colors)
        );
        let _ = write!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" fill="{}">{}</text>"#,
            x + 30.0,
            y + 4.0,
            colors.foreground,
            escape(&series.label)
        );
    }

    // Labels
    let _ = write!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" fill="{}" text-anchor="middle" font-size="13">{}</text>"#,
        (left + right) / 2.0,
        HEIGHT - 15.0,
        colors.foreground,
        escape(&spec.x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{cy:.1}" fill="{}" text-anchor="middle" font-size="13" transform="rotate(-90,20,{cy:.1})">{}</text>"#,
        colors.foreground,
        escape(&spec.y_label),
        cy = (top + bottom) / 2.0
    );
    let _ = write!(
        svg,
        r#"<text x="{:.1}" y="30" fill="{}" text-anchor="middle" font-size="16" font-weight="bold">{}</text>"#,
        (left + right) / 2.0,
        colors.foreground,
        escape(&spec.title)
    );

    svg.push_str("</svg>");
    svg
}
