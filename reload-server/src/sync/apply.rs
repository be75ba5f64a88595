//! Application of update packages to the working directory.
//!
//! Packages with metadata are applied file by file: each write or delete
//! succeeds or fails on its own and the batch always runs to the end.
//! Packages without metadata are extracted verbatim, and any I/O failure
//! there fails the whole update.

use crate::package::{UpdateMetadata, UpdatePackage, UpdateType, METADATA_ENTRY};
use crate::sync::paths::resolve_target;
use crate::utils::errors::{ReloadError, Result};
use chrono::DateTime;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{error, info, warn};

/// What happened to a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    Written { bytes: u64 },
    Deleted,
    /// Listed for deletion but nothing was there
    Absent,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: String,
    pub action: FileAction,
}

/// How the package was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyMode {
    /// Driven by the metadata entry
    Listed(UpdateType),
    /// No metadata: whole archive extracted
    Extracted,
}

/// Per-file results of applying one package.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub mode: ApplyMode,
    pub outcomes: Vec<FileOutcome>,
}

impl ApplyReport {
    fn new(mode: ApplyMode) -> Self {
        Self {
            mode,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, path: &str, action: FileAction) {
        self.outcomes.push(FileOutcome {
            path: path.to_string(),
            action,
        });
    }

    pub fn written(&self) -> usize {
        self.count(|a| matches!(a, FileAction::Written { .. }))
    }

    pub fn deleted(&self) -> usize {
        self.count(|a| matches!(a, FileAction::Deleted))
    }

    pub fn failed(&self) -> usize {
        self.count(|a| matches!(a, FileAction::Failed(_)))
    }

    /// Whether this was a full deployment that should (re)start the app.
    pub fn restart_requested(&self) -> bool {
        self.mode == ApplyMode::Listed(UpdateType::Full)
    }

    #[cfg(test)]
    fn outcome(&self, path: &str) -> Option<&FileAction> {
        self.outcomes
            .iter()
            .rev()
            .find(|o| o.path == path)
            .map(|o| &o.action)
    }

    fn count(&self, pred: impl Fn(&FileAction) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.action)).count()
    }
}

/// Apply a decoded package under `work_dir`.
///
/// Returns `Err` only when the archive cannot be extracted as a whole;
/// individual file failures are reported in the [`ApplyReport`].
pub fn apply_package(work_dir: &Path, package: &mut UpdatePackage) -> Result<ApplyReport> {
    info!(
        "Received {} bytes ({} entries), extracting...",
        package.size(),
        package.entry_count()
    );

    match package.metadata().cloned() {
        Some(metadata) => Ok(apply_listed(work_dir, package, &metadata)),
        None => extract_all(work_dir, package),
    }
}

fn apply_listed(
    work_dir: &Path,
    package: &mut UpdatePackage,
    metadata: &UpdateMetadata,
) -> ApplyReport {
    info!(
        "Processing {} update with {} file(s)",
        metadata.update_type, metadata.file_count
    );
    if let Some(created) = metadata
        .timestamp
        .and_then(|ts| DateTime::from_timestamp(ts.trunc() as i64, 0))
    {
        info!("Package created at {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    let mut report = ApplyReport::new(ApplyMode::Listed(metadata.update_type.clone()));

    for name in metadata.files.iter().filter(|n| n.as_str() != METADATA_ENTRY) {
        match write_entry(work_dir, package, name) {
            Ok(bytes) => {
                info!("  ✓ Updated: {}", name);
                report.record(name, FileAction::Written { bytes });
            }
            Err(e) => {
                error!("  ✗ Error updating {}: {}", name, e);
                report.record(name, FileAction::Failed(e.to_string()));
            }
        }
    }

    for name in &metadata.deleted_files {
        match delete_entry(work_dir, name) {
            Ok(true) => {
                info!("  ✓ Deleted: {}", name);
                report.record(name, FileAction::Deleted);
            }
            Ok(false) => report.record(name, FileAction::Absent),
            Err(e) => {
                error!("  ✗ Error deleting {}: {}", name, e);
                report.record(name, FileAction::Failed(e.to_string()));
            }
        }
    }

    info!(
        "Applied {} update: {} written, {} deleted",
        metadata.update_type,
        report.written(),
        report.deleted()
    );
    if report.failed() > 0 {
        warn!(
            "{} of {} file operation(s) failed",
            report.failed(),
            report.outcomes.len()
        );
    }

    report
}

fn write_entry(work_dir: &Path, package: &mut UpdatePackage, name: &str) -> Result<u64> {
    let target = resolve_target(work_dir, name)?;
    let contents = package.read_entry(name)?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| ReloadError::file_apply(name, e))?;
    }
    fs::write(&target, &contents).map_err(|e| ReloadError::file_apply(name, e))?;

    Ok(contents.len() as u64)
}

/// Remove the file at `name`; `Ok(false)` if nothing exists there.
fn delete_entry(work_dir: &Path, name: &str) -> Result<bool> {
    let target = resolve_target(work_dir, name)?;

    match fs::symlink_metadata(&target) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ReloadError::file_apply(name, e)),
        Ok(meta) if meta.is_dir() => Err(ReloadError::file_apply(name, "is a directory")),
        Ok(_) => {
            fs::remove_file(&target).map_err(|e| ReloadError::file_apply(name, e))?;
            Ok(true)
        }
    }
}

fn extract_all(work_dir: &Path, package: &mut UpdatePackage) -> Result<ApplyReport> {
    info!("Processing full update (no metadata)");
    fs::create_dir_all(work_dir)?;

    let mut report = ApplyReport::new(ApplyMode::Extracted);
    let archive = package.archive_mut();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ReloadError::MalformedPackage(format!("entry {index}: {e}")))?;
        let name = entry.name().to_string();

        let Some(relative) = entry.enclosed_name() else {
            warn!("  ✗ Skipping unsafe entry name: {}", name);
            report.record(&name, FileAction::Failed("unsafe entry name".into()));
            continue;
        };
        let target = work_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&target)?;
        let bytes = io::copy(&mut entry, &mut file)?;
        report.record(&name, FileAction::Written { bytes });
    }

    info!("  ✓ Extracted {} file(s)", report.written());
    Ok(report)
}
