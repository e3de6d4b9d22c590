//! Path helpers for the output tree
//!
//! Stored paths are relative to the run root; the report may sit somewhere
//! else, so they get re-based before landing in HTML. Everything here is
//! lexical: nothing touches the filesystem beyond reading the working
//! directory.

use std::path::{Component, Path, PathBuf};

/// Make `path` absolute against the working directory and fold `.`/`..`.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        match std::env::current_dir() {
            Ok(cwd) => normalize(&cwd.join(path)),
            Err(_) => normalize(path),
        }
    }
}

/// Lexically remove `.` components and resolve `..` against the preceding
/// component where possible.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last().copied() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Path of `target` as seen from directory `base`, or `None` when the two
/// live under different roots (e.g. different drives).
pub fn relative_to(target: &Path, base: &Path) -> Option<PathBuf> {
    let target = absolutize(target);
    let base = absolutize(base);

    let t: Vec<Component> = target.components().collect();
    let b: Vec<Component> = base.components().collect();

    if t.first() != b.first() {
        return None;
    }

    let common = t.iter().zip(&b).take_while(|(x, y)| x == y).count();

    let mut rel = PathBuf::new();
    for _ in common..b.len() {
        rel.push("..");
    }
    for component in &t[common..] {
        rel.push(component.as_os_str());
    }

    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Some(rel)
}

/// Render a relative path with `/` separators, as HTML and the CSV expect.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Re-base a path stored relative to `root` so it resolves from
/// `report_dir`. Falls back to the absolute path when no relative form
/// exists. Empty input stays empty.
pub fn rebase(stored: &str, root: &Path, report_dir: &Path) -> String {
    if stored.is_empty() {
        return String::new();
    }
    let absolute = absolutize(&absolutize(root).join(stored));
    match relative_to(&absolute, report_dir) {
        Some(rel) => to_slash(&rel),
        None => absolute.display().to_string(),
    }
}
