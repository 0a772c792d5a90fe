//! Expands command-line paths into upload sources.
//!
//! Directories are walked recursively. Files found inside a directory keep
//! a relative path that starts with the directory's own name, so the
//! endpoint recreates the same tree.

use std::path::Path;

use chunkferry_transfer::LocalFile;

/// Scans every path in order. Plain files are taken as-is.
pub fn scan_paths<P: AsRef<Path>>(paths: &[P]) -> std::io::Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if metadata.is_dir() {
            let base = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            walk_dir(path, path, &base, &mut files)?;
        } else if metadata.is_file() {
            files.push(LocalFile::new(path, metadata.len()));
        }
    }
    Ok(files)
}

fn walk_dir(root: &Path, current: &Path, base: &str, files: &mut Vec<LocalFile>) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(current)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, base, files)?;
        } else if metadata.is_file() {
            let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;

            // Normalize to forward slashes.
            let rel_str = rel_path.to_string_lossy().replace('\\', "/");
            let relative = if base.is_empty() {
                rel_str
            } else {
                format!("{base}/{rel_str}")
            };
            files.push(LocalFile::new(&path, metadata.len()).with_relative_path(relative));
        }
    }

    Ok(())
}
