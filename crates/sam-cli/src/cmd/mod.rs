pub mod context;
pub mod migrate;
pub mod outline;
pub mod parse;
pub mod task;

use anyhow::Context;
use std::path::{Path, PathBuf};

/// Resolve a feature argument (path or id under `.sam/`) to its directory.
pub(crate) fn feature_dir(root: &Path, feature: &str) -> anyhow::Result<PathBuf> {
    sam_core::paths::resolve_feature_dir(root, feature)
        .with_context(|| format!("no feature directory for '{feature}' under {}", root.display()))
}
