//! Project manifest (`pyproject.toml`) script discovery.
//!
//! Only `[project.scripts]` is read. Declaration order matters: the first
//! script is the one launched, so tables are parsed order-preserving.

use crate::utils::errors::{ReloadError, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct PyProject {
    #[serde(default)]
    project: ProjectTable,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectTable {
    #[serde(default)]
    scripts: toml::Table,
}

/// Declared scripts, in manifest order: name → entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestScripts {
    entries: Vec<(String, String)>,
}

impl ManifestScripts {
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: PyProject =
            toml::from_str(content).map_err(|e| ReloadError::ManifestParse(e.to_string()))?;

        let entries = manifest
            .project
            .scripts
            .into_iter()
            .map(|(name, target)| {
                let target = match target {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (name, target)
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// The script to launch: the first one declared.
    pub fn first(&self) -> Option<(&str, &str)> {
        self.entries
            .first()
            .map(|(name, target)| (name.as_str(), target.as_str()))
    }
}

/// Read the manifest at `path` fresh from disk.
pub fn read_scripts(path: &Path) -> Result<ManifestScripts> {
    if !path.is_file() {
        return Err(ReloadError::ManifestMissing(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    ManifestScripts::parse(&content)
}
