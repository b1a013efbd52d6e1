//! Repository file walker.

use std::path::{Path, PathBuf};

use crate::chunking::Language;
use crate::error::Result;

/// Directory names never descended into.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
];

/// Walks a working tree for supported source files.
///
/// Returns paths relative to `root`, sorted, skipping dependency
/// directories and files larger than `max_file_size_bytes`. A file at
/// exactly the limit is included; one byte over is skipped.
///
/// # Errors
///
/// Returns an error if the root directory cannot be read.
pub fn walk_source_files(root: &Path, max_file_size_bytes: u64) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_dir(root, root, max_file_size_bytes, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_dir(
    root: &Path,
    dir: &Path,
    max_size: u64,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if SKIP_DIRS.contains(&name.as_ref()) || name.starts_with('.') {
                continue;
            }
            walk_dir(root, &path, max_size, files)?;
        } else if file_type.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            let rel_str = rel.to_string_lossy();
            if !Language::from_path(&rel_str).is_supported() {
                continue;
            }
            let size = entry.metadata()?.len();
            if size > max_size {
                tracing::warn!(file = %rel_str, size, "skipping oversized file");
                continue;
            }
            files.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_walk_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(root, "src/b.py", b"x");
        touch(root, "src/a.py", b"x");
        touch(root, "README.md", b"x");
        touch(root, "node_modules/dep/index.js", b"x");
        touch(root, ".git/config", b"x");
        touch(root, "app.ts", b"x");

        let files = walk_source_files(root, 1024).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["app.ts", "src/a.py", "src/b.py"]);
    }

    #[test]
    fn test_walk_size_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(root, "at_limit.py", &vec![b'x'; 100]);
        touch(root, "over_limit.py", &vec![b'x'; 101]);

        let files = walk_source_files(root, 100).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["at_limit.py"]);
    }

    #[test]
    fn test_walk_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(walk_source_files(tmp.path(), 1024).unwrap().is_empty());
    }
}
