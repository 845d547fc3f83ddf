use crate::error::{Result, SamError};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory and file constants
// ---------------------------------------------------------------------------

pub const SAM_DIR: &str = ".sam";
pub const TEMPLATES_DIR: &str = "templates";

pub const TECHNICAL_SPEC: &str = "TECHNICAL_SPEC.md";
pub const TASKS_FILE: &str = "TASKS.json";
pub const CONTEXT_FILE: &str = "CONTEXT.yaml";
pub const FEATURE_DOC: &str = "FEATURE_DOCUMENTATION.md";
pub const IMPLEMENTATION_TASKS_DIR: &str = "IMPLEMENTATION_TASKS";
pub const IMPLEMENTATION_TASKS_SUMMARY: &str = "IMPLEMENTATION_TASKS.md";
pub const BACKUP_SUFFIX: &str = ".backup";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn sam_dir(root: &Path) -> PathBuf {
    root.join(SAM_DIR)
}

pub fn spec_path(feature_dir: &Path) -> PathBuf {
    feature_dir.join(TECHNICAL_SPEC)
}

pub fn tasks_path(feature_dir: &Path) -> PathBuf {
    feature_dir.join(TASKS_FILE)
}

pub fn feature_context_path(feature_dir: &Path) -> PathBuf {
    feature_dir.join(CONTEXT_FILE)
}

pub fn feature_doc_path(feature_dir: &Path) -> PathBuf {
    feature_dir.join(FEATURE_DOC)
}

pub fn implementation_tasks_dir(feature_dir: &Path) -> PathBuf {
    feature_dir.join(IMPLEMENTATION_TASKS_DIR)
}

/// Resolve a feature argument to its directory.
///
/// Accepts either a path to an existing directory or a feature id living
/// under `<root>/.sam/`.
pub fn resolve_feature_dir(root: &Path, feature: &str) -> Result<PathBuf> {
    let direct = Path::new(feature);
    if direct.is_dir() {
        return Ok(direct.to_path_buf());
    }
    let under_root = root.join(feature);
    if under_root.is_dir() {
        return Ok(under_root);
    }
    let under_sam = sam_dir(root).join(feature);
    if under_sam.is_dir() {
        return Ok(under_sam);
    }
    Err(SamError::FeatureNotFound(feature.to_string()))
}

/// The feature id is the directory name (`.sam/001_user_auth` → `001_user_auth`).
pub fn feature_id(feature_dir: &Path) -> String {
    feature_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "feature".to_string())
}

/// Locate the global context layer for a feature.
///
/// Walks upward from the feature directory's parent, preferring
/// `templates/CONTEXT.yaml` over a bare `CONTEXT.yaml` at each level.
pub fn find_global_context(feature_dir: &Path) -> Option<PathBuf> {
    let mut dir = feature_dir.parent();
    while let Some(d) = dir {
        for candidate in [d.join(TEMPLATES_DIR).join(CONTEXT_FILE), d.join(CONTEXT_FILE)] {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        dir = d.parent();
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
