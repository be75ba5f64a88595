//! Inventory of the working directory.

use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Totals for a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Relative paths (with `/` separators) of every regular file under `root`, sorted.
pub fn list_files(root: &Path) -> io::Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        files.push(parts.join("/"));
    }

    files.sort();
    Ok(files)
}

/// Count files and bytes under `root`. A missing root is an empty tree.
pub fn summarize(root: &Path) -> io::Result<TreeSummary> {
    let mut summary = TreeSummary::default();
    if !root.exists() {
        return Ok(summary);
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            summary.files += 1;
            summary.bytes += entry.metadata()?.len();
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_files_nested() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("sub/inner"))?;
        fs::write(temp_dir.path().join("b.txt"), b"b")?;
        fs::write(temp_dir.path().join("sub/inner/a.txt"), b"a")?;
        fs::create_dir(temp_dir.path().join("empty"))?;

        let files = list_files(temp_dir.path())?;
        assert_eq!(files, vec!["b.txt", "sub/inner/a.txt"]);

        Ok(())
    }

    #[test]
    fn test_summarize() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("file1.txt"), b"12345")?;
        fs::create_dir(temp_dir.path().join("sub"))?;
        fs::write(temp_dir.path().join("sub/file2.txt"), b"1234567")?;

        let summary = summarize(temp_dir.path())?;
        assert_eq!(summary, TreeSummary { files: 2, bytes: 12 });

        Ok(())
    }

    #[test]
    fn test_summarize_missing_root() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let summary = summarize(&temp_dir.path().join("nope"))?;
        assert_eq!(summary, TreeSummary::default());
        Ok(())
    }
}
