//! Atomic file replacement

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;

/// Temp path used while replacing `path`
///
/// Unique per write (pid plus a random suffix), hidden, and ending in `.tmp`
/// so directory scans skip it.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let file = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let suffix: u32 = rand::rng().random();
    path.with_file_name(format!(".{}.{}.{:08x}.tmp", file, std::process::id(), suffix))
}

/// Write `contents` to `path` so readers see either the old or the new file
///
/// Creates the parent directory if needed.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
