//! Resolution of package-relative paths against the working directory.

use crate::utils::errors::{ReloadError, Result};
use std::path::{Component, Path, PathBuf};

/// Join `relative` onto `root`, refusing anything that could land outside it.
///
/// Absolute paths, `..` and drive prefixes are rejected; `.` components are
/// dropped. Package paths always use `/` as separator.
pub fn resolve_target(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut target = root.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                target.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ReloadError::UnsafePath(relative.to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(ReloadError::UnsafePath(relative.to_string()));
    }

    Ok(target)
}
