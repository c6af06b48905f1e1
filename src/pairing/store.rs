//! Durable storage for the device registry.
//!
//! The registry is kept in a single JSON document holding two maps keyed by
//! device id: issued device credentials and device records. Every save
//! rewrites the whole document (temp file + rename), so a reader sees either
//! the previous snapshot or the next one, never a mix.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::pairing::device::{DeviceCredential, DeviceRecord};

/// Full persisted state of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Device credentials by device id.
    #[serde(default)]
    pub permanent_tokens: BTreeMap<String, DeviceCredential>,
    /// Device records by device id.
    #[serde(default)]
    pub connected_devices: BTreeMap<String, DeviceRecord>,
}

impl RegistrySnapshot {
    /// True when neither map holds an entry.
    pub fn is_empty(&self) -> bool {
        self.permanent_tokens.is_empty() && self.connected_devices.is_empty()
    }
}

/// Reads and writes [`RegistrySnapshot`]s at a fixed path.
///
/// Holds no state of its own; the registry owns the data.
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    path: PathBuf,
}

impl PersistenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default registry location (`~/.hostpair/auth_data.json`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hostpair")
            .join("auth_data.json")
    }

    /// Read the document.
    ///
    /// `Ok(None)` means there is no document yet.
    pub fn try_load(&self) -> Result<Option<RegistrySnapshot>, PersistenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PersistenceError::Io {
                    path: self.path.display().to_string(),
                    source: e,
                });
            }
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                path: self.path.display().to_string(),
                source: e,
            })
    }

    /// Read the document, treating a missing or unreadable one as empty.
    pub fn load(&self) -> RegistrySnapshot {
        match self.try_load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => RegistrySnapshot::default(),
            Err(e) => {
                tracing::error!(error = %e, "Error loading registry, starting empty");
                RegistrySnapshot::default()
            }
        }
    }

    /// Overwrite the document with `snapshot`.
    pub fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), PersistenceError> {
        let io_err = |path: &Path, source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let body = serde_json::to_string_pretty(snapshot)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, body).map_err(|e| io_err(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| io_err(&self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            devices = snapshot.connected_devices.len(),
            "Registry saved"
        );
        Ok(())
    }

    /// Modification time of the document, if it exists.
    pub fn modified(&self) -> Option<std::time::SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "auth_data.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
