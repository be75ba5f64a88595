//! Update package decoding.
//!
//! A package is a ZIP archive of application files. It may carry a
//! `_delta_metadata.json` entry describing which files changed or were
//! removed; without it the archive is an image of the whole working directory.

use crate::utils::errors::{ReloadError, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Reserved entry name holding the update metadata.
pub const METADATA_ENTRY: &str = "_delta_metadata.json";

/// Kind of update declared by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum UpdateType {
    /// Complete project upload; triggers an app (re)start
    Full,
    /// Changed files only
    Delta,
    Other(String),
}

impl From<String> for UpdateType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "full" => UpdateType::Full,
            "delta" => UpdateType::Delta,
            _ => UpdateType::Other(value),
        }
    }
}

impl Default for UpdateType {
    fn default() -> Self {
        UpdateType::Other("unknown".to_string())
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateType::Full => f.write_str("full"),
            UpdateType::Delta => f.write_str("delta"),
            UpdateType::Other(other) => f.write_str(other),
        }
    }
}

/// Contents of the metadata entry.
///
/// Unknown fields are ignored. Only `files` and `deleted_files` must be
/// well-typed; `type`, `file_count` and `timestamp` fall back to their
/// defaults when the client sends something unexpected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMetadata {
    #[serde(rename = "type", default, deserialize_with = "lenient_type")]
    pub update_type: UpdateType,

    /// Informational; the client's count of `files`
    #[serde(default, deserialize_with = "lenient_count")]
    pub file_count: u64,

    /// Relative paths to write, in order
    #[serde(default)]
    pub files: Vec<String>,

    /// Relative paths to remove, in order
    #[serde(default)]
    pub deleted_files: Vec<String>,

    /// Client-side creation time (UNIX seconds)
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<f64>,
}

fn lenient_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<UpdateType, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => UpdateType::from(s),
        _ => UpdateType::default(),
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        _ => None,
    })
}

impl UpdateMetadata {
    pub fn is_full(&self) -> bool {
        self.update_type == UpdateType::Full
    }
}

/// A decoded update package.
///
/// Entry contents are read lazily, so one unreadable entry does not prevent
/// the others from being consumed.
pub struct UpdatePackage {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    metadata: Option<UpdateMetadata>,
    size: usize,
}

impl UpdatePackage {
    /// Open `bytes` as an archive and parse the metadata entry if present.
    pub fn decode(bytes: Vec<u8>) -> Result<Self> {
        let size = bytes.len();
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ReloadError::MalformedPackage(format!("cannot open archive: {e}")))?;

        let metadata = if archive.index_for_name(METADATA_ENTRY).is_some() {
            let raw = read_named(&mut archive, METADATA_ENTRY)
                .map_err(|e| ReloadError::MalformedPackage(e.to_string()))?;
            let metadata = serde_json::from_slice::<UpdateMetadata>(&raw).map_err(|e| {
                ReloadError::MalformedPackage(format!("invalid {METADATA_ENTRY}: {e}"))
            })?;
            Some(metadata)
        } else {
            None
        };

        Ok(Self {
            archive,
            metadata,
            size,
        })
    }

    pub fn metadata(&self) -> Option<&UpdateMetadata> {
        self.metadata.as_ref()
    }

    /// Size of the encoded archive in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of entries in the archive, metadata included
    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    #[cfg(test)]
    fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.archive.file_names()
    }

    /// Read the full contents of the entry called `name`.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        read_named(&mut self.archive, name)
    }

    pub(crate) fn archive_mut(&mut self) -> &mut ZipArchive<Cursor<Vec<u8>>> {
        &mut self.archive
    }
}

impl fmt::Debug for UpdatePackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatePackage")
            .field("entries", &self.archive.len())
            .field("size", &self.size)
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn read_named(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ReloadError::file_apply(name, e))?;
    let mut contents = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut contents)
        .map_err(|e| ReloadError::file_apply(name, e))?;
    Ok(contents)
}
