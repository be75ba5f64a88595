//! Custom error types for the reload server.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed package: {0}")]
    MalformedPackage(String),

    #[error("Failed to apply {path}: {reason}")]
    FileApply { path: String, reason: String },

    #[error("Refusing path outside the working directory: {0}")]
    UnsafePath(String),

    #[error("No manifest found at {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    #[error("No [project.scripts] declared in manifest")]
    NoScriptsDeclared,

    #[error("Launcher not found at {}", .0.display())]
    LauncherMissing(PathBuf),

    #[error("Failed to launch app: {0}")]
    ProcessLaunch(#[source] std::io::Error),
}

impl ReloadError {
    pub fn file_apply(path: impl Into<String>, reason: impl ToString) -> Self {
        ReloadError::FileApply {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReloadError>;
