//! Error types
//!
//! Per-variant problems (a failed encode, a missing diff, an unparseable
//! metric) are reported through [`ToolError`] and [`ParseError`] and are
//! absorbed by the stage that hit them. Only [`Error`] escapes a run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single external tool invocation
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("i/o error while waiting on `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Metric output that could not be turned into a number
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("no output for metric {metric}")]
    Empty { metric: String },

    #[error("unparseable value {value:?} for metric {metric}")]
    NotANumber { metric: String, value: String },
}

/// Problems reading or writing the persisted metrics table
#[derive(Debug, Error)]
pub enum TableError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing column `{0}` in table header")]
    MissingColumn(&'static str),

    #[error("row {row}: invalid quality {value:?}")]
    InvalidQuality { row: usize, value: String },
}

/// Fatal errors that abort a run before (or instead of) writing a report
#[derive(Debug, Error)]
pub enum Error {
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("could not prepare output directory {path}: {source}")]
    Scaffold {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("could not write report file {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
