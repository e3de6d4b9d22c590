//! Output tree for a single run
//!
//! ```text
//! <parent>/<stem>_<YYYYmmdd_HHMMSS>/
//!     images/original.<ext>   copy of the input, plus one file per variant
//!     diffs/                  diff_<variant>
//!     data/metrics.csv        persisted table (and report.json)
//!     graphs/                 charts
//!     index.html
//! ```

use crate::error::{Error, Result};
use crate::paths;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

pub const IMAGES_DIR: &str = "images";
pub const DIFFS_DIR: &str = "diffs";
pub const DATA_DIR: &str = "data";
pub const TABLE_FILE: &str = "metrics.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    /// Run root; stored paths are relative to it and the report lives here
    pub root: PathBuf,
    pub images: PathBuf,
    pub diffs: PathBuf,
    pub data: PathBuf,
    pub graphs: PathBuf,
    /// The input copied into `images/`
    pub original: PathBuf,
}

impl Workspace {
    /// Scaffold a fresh run directory under `parent` and copy `input` into it.
    pub fn create(input: &Path, parent: &Path) -> Result<Self> {
        if !input.is_file() {
            return Err(Error::InputNotFound(input.to_path_buf()));
        }

        let name = run_dir_name(input, &Local::now().format("%Y%m%d_%H%M%S").to_string());
        let root = paths::absolutize(&unique_dir(parent, &name));

        let workspace = Self {
            images: root.join(IMAGES_DIR),
            diffs: root.join(DIFFS_DIR),
            data: root.join(DATA_DIR),
            graphs: root.join(crate::report::GRAPHS_DIR),
            original: root.join(IMAGES_DIR).join(original_name(input)),
            root,
        };

        for dir in [&workspace.images, &workspace.diffs, &workspace.data, &workspace.graphs] {
            std::fs::create_dir_all(dir).map_err(|source| Error::Scaffold {
                path: dir.clone(),
                source,
            })?;
        }

        std::fs::copy(input, &workspace.original).map_err(|source| Error::Scaffold {
            path: workspace.original.clone(),
            source,
        })?;

        info!("output directory {}", workspace.root.display());
        Ok(workspace)
    }

    pub fn table_path(&self) -> PathBuf {
        self.data.join(TABLE_FILE)
    }
}

/// `<stem>_<timestamp>`
pub fn run_dir_name(input: &Path, timestamp: &str) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{}_{}", stem, timestamp)
}

/// `original.<ext>`, keeping the input's extension
fn original_name(input: &Path) -> String {
    match input.extension() {
        Some(ext) => format!("original.{}", ext.to_string_lossy()),
        None => "original".to_string(),
    }
}

/// `parent/name`, or `parent/name_<n>` for the first `n` not already taken.
pub fn unique_dir(parent: &Path, name: &str) -> PathBuf {
    let candidate = parent.join(name);
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| parent.join(format!("{}_{}", name, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
