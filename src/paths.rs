//! Model directory resolution
//!
//! Maps the configured model directories to short, human-selectable labels and
//! locates files across the whole directory set. The directory list is always
//! passed in explicitly so tests can run against temporary trees.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Derive a stable short label for each configured model directory
///
/// The label is the directory's basename; when two directories share a
/// basename, later ones are disambiguated with their parent directory
/// (`parent/basename`) and, failing that, a numeric suffix. Assignment is
/// driven by the configured order, so labels are stable across calls.
pub fn short_labels(paths: &[PathBuf]) -> BTreeMap<String, PathBuf> {
    let mut labels: BTreeMap<String, PathBuf> = BTreeMap::new();

    for path in paths {
        let base = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let mut label = base.clone();
        if labels.contains_key(&label)
            && let Some(parent) = path.parent().and_then(Path::file_name)
        {
            label = format!("{}/{}", parent.to_string_lossy(), base);
        }
        let mut counter = 2;
        while labels.contains_key(&label) {
            label = format!("{base} ({counter})");
            counter += 1;
        }

        labels.insert(label, path.clone());
    }

    labels
}

/// Resolve the directory a download should land in
///
/// A selection matching a known label wins; anything else (including no
/// selection) falls back to the first configured directory.
pub fn resolve_download_dir(selection: Option<&str>, paths: &[PathBuf]) -> Option<PathBuf> {
    if let Some(selection) = selection {
        let labels = short_labels(paths);
        if let Some(path) = labels.get(selection) {
            return Some(path.clone());
        }
    }
    paths.first().cloned()
}

/// Find a file by name across all configured model directories
///
/// Directories are scanned in configured order, so a file present in more than
/// one root resolves to the first-configured one.
pub fn find_existing_file(file_name: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    for dir in paths {
        let candidate = dir.join(file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// List the file names present across all configured model directories
///
/// Names are deduplicated and sorted for presentation.
pub fn list_local_files(paths: &[PathBuf]) -> Vec<String> {
    let mut names = Vec::new();

    for dir in paths {
        let Ok(entries) = std::fs::read_dir(dir) else {
            tracing::debug!(dir = %dir.display(), "model directory not readable, skipping");
            continue;
        };
        for entry in entries.flatten() {
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
    }

    names.sort();
    names.dedup();
    names
}
