use crate::error::{Result, SamError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting registry and spec files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Read a file to a string, mapping a missing file to `SamError::NotFound`.
pub fn read_text(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SamError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Read a file if it exists. `Ok(None)` when it does not.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Copy `path` verbatim to `<path><suffix>` and return the backup location.
/// An existing backup is never replaced: later copies go to `<path><suffix>.1`,
/// `<path><suffix>.2` and so on.
///
/// The backup is written before the caller replaces the original, so a failed
/// rewrite never leaves the document without a copy.
pub fn backup_file(path: &Path, suffix: &str) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| SamError::NotFound(path.to_path_buf()))?;
    name.push(suffix);
    let mut backup = path.with_file_name(&name);
    let mut n = 1;
    while backup.exists() {
        let mut numbered = name.clone();
        numbered.push(format!(".{n}"));
        backup = path.with_file_name(numbered);
        n += 1;
    }
    let data = std::fs::read(path)?;
    atomic_write(&backup, &data)?;
    Ok(backup)
}
