//! Locating the accompaniment stem the separation tool wrote
//!
//! The tool documents `<output_dir>/<profile>/<input_stem>/no_vocals.<ext>`,
//! but the nesting has changed between versions (and with some model
//! bundles), so a recursive search of the whole output directory is the
//! fallback. Both searches are deterministic: the lexicographically first
//! match wins.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// File-name prefix of the non-vocal stem
pub const ARTIFACT_PREFIX: &str = "no_vocals.";

/// True for `no_vocals.<anything>`
pub fn is_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(ARTIFACT_PREFIX) && name.len() > ARTIFACT_PREFIX.len())
        .unwrap_or(false)
}

/// Documented location of the artifact directory
pub fn expected_dir(output_dir: &Path, profile: &str, input_stem: &str) -> PathBuf {
    output_dir.join(profile).join(input_stem)
}

/// Find the non-vocal stem, trying the documented layout first
pub fn find_artifact(output_dir: &Path, profile: &str, input_stem: &str) -> Option<PathBuf> {
    let expected = expected_dir(output_dir, profile, input_stem);
    if let Some(found) = first_in_dir(&expected) {
        return Some(found);
    }

    log::warn!(
        "No {}* under {:?}, searching {:?} recursively",
        ARTIFACT_PREFIX,
        expected,
        output_dir
    );
    first_recursive(output_dir)
}

fn first_in_dir(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_artifact(path))
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn first_recursive(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .find(|path| is_artifact(path))
}
