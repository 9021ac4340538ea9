//! Flat listing of the mirror's content for downstream consumers.

use std::io;
use std::path::{Path, PathBuf};

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// Recursively list regular files under `root`, relative to `root`, sorted.
///
/// Any entry whose name starts with `.` is skipped along with everything
/// below it, which also keeps `.git` out of the listing. Symlinks are not
/// followed.
pub fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let entries = std::fs::read_dir(root.join(&relative))?;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if is_hidden(&name) {
                continue;
            }

            let file_type = entry.file_type()?;
            let child = relative.join(&name);
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }

    files.sort();
    Ok(files)
}
