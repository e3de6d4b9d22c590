//! Parsing of `magick compare` metric output
//!
//! Two shapes show up in practice:
//!
//! ```text
//! 40.1234 (0.00982)
//! ```
//!
//! for a plain comparison, and a verbose per-channel listing
//!
//! ```text
//! Image: original.png
//!   Channel distortion: PSNR
//!     red: 40.0101 (0.00998)
//!     green: 41.2 (0.0087)
//!     blue: inf
//!     all: 40.5
//! ```
//!
//! Channel lines become `<METRIC>-<Channel>` keys, except the aggregate
//! `all` line which becomes the bare metric name. `inf` is capped at
//! [`INF_SENTINEL`] so charts stay bounded; `nan` reads as 0.

use crate::error::ParseError;
use std::collections::BTreeMap;

/// Stand-in for an infinite score (identical images under PSNR)
pub const INF_SENTINEL: f64 = 999.0;

/// Name of the aggregate channel; folded into the bare metric name
pub const AGGREGATE_CHANNEL: &str = "All";

/// Channel names a verbose listing may contain
pub const KNOWN_CHANNELS: [&str; 10] = [
    "All", "Red", "Green", "Blue", "Alpha", "Gray", "Cyan", "Magenta", "Yellow", "Black",
];

/// `"red"` → `"Red"`, `"ALL"` → `"All"`
pub fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Canonical channel name if `s` names a known channel
pub fn canonical_channel(s: &str) -> Option<&'static str> {
    KNOWN_CHANNELS
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(s.trim()))
}

/// Column name for a metric on a channel
pub fn metric_key(metric: &str, channel: &str) -> String {
    if channel.eq_ignore_ascii_case(AGGREGATE_CHANNEL) {
        metric.to_string()
    } else {
        format!("{}-{}", metric, title_case(channel))
    }
}

/// Parse one numeric token, dropping any trailing parenthesised annotation.
pub fn parse_value(token: &str) -> Option<f64> {
    let lower = token.trim().to_ascii_lowercase();
    if lower.contains("inf") {
        return Some(INF_SENTINEL);
    }
    if lower.contains("nan") {
        return Some(0.0);
    }

    let number = lower.split('(').next().unwrap_or("").trim();
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extract per-channel values from a verbose listing. Lines that don't name
/// a known channel or don't carry a number are ignored.
pub fn parse_channel_output(output: &str, metric: &str) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.contains("Channel distortion") || line.starts_with("Image:") {
            continue;
        }
        let Some((label, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(channel) = canonical_channel(label) else {
            continue;
        };
        let Some(token) = rest.split_whitespace().next() else {
            continue;
        };
        if let Some(value) = parse_value(token) {
            values.insert(metric_key(metric, channel), value);
        }
    }

    values
}

/// Parse compare output for `metric` into named values.
///
/// Falls back to reading the first token as a single scalar when no
/// channel lines are found.
pub fn parse_metric_output(output: &str, metric: &str) -> Result<BTreeMap<String, f64>, ParseError> {
    let channels = parse_channel_output(output, metric);
    if !channels.is_empty() {
        return Ok(channels);
    }

    let token = output.split_whitespace().next().ok_or_else(|| ParseError::Empty {
        metric: metric.to_string(),
    })?;
    let value = parse_value(token).ok_or_else(|| ParseError::NotANumber {
        metric: metric.to_string(),
        value: token.to_string(),
    })?;

    Ok(BTreeMap::from([(metric.to_string(), value)]))
}
