//! File-backed persistence for session envelopes.
//!
//! One JSON file per key under `<state_dir>/sessions/`, named by a
//! deterministic UUIDv5 hash of the key so arbitrary key strings map to
//! fixed-length, filename-safe stems:
//!
//! ```text
//! <state_dir>/sessions/
//! ├── 8c4f7a2e-5d01-5f3b-9c1a-7e2d4b6f8a90.json
//! ├── 1b9e6d3c-2a85-5e47-b061-9f4c8d2e7a13.json
//! └── ...
//! ```
//!
//! Writes go to a uniquely-suffixed temporary file in the same directory and
//! are renamed into place, so a concurrent reader never observes a partially
//! written file. There is no index file; `scan_keys` reconstructs the
//! key-to-file association from each file's embedded `key` field.

use crate::core::{Envelope, Result, StoreError};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use uuid::Uuid;

const SESSIONS_SUBDIR: &str = "sessions";

/// Minimal view of an envelope, enough to recover the key without parsing
/// the payload.
#[derive(Deserialize)]
struct EnvelopeHead {
    key: String,
}

pub(crate) struct SessionFileStore {
    sessions_dir: PathBuf,
}

impl SessionFileStore {
    /// Creates the sessions directory if needed.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let sessions_dir = state_dir.join(SESSIONS_SUBDIR);
        fs::create_dir_all(&sessions_dir)?;
        Ok(Self { sessions_dir })
    }

    /// Deterministic file path for a key. UUIDv5 keeps the stem fixed-length
    /// and filename-safe regardless of what the key contains.
    pub fn file_path(&self, key: &str) -> PathBuf {
        let stem = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
        self.sessions_dir.join(format!("{stem}.json"))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).exists()
    }

    /// Atomic write: serialize, write to a unique temp file in the sessions
    /// directory, rename over the final path. On failure the temp file is
    /// removed when the handle drops.
    pub fn write<T, R>(&self, envelope: &Envelope<T, R>) -> Result<()>
    where
        T: serde::Serialize,
        R: serde::Serialize,
    {
        let json = serde_json::to_vec(envelope)
            .map_err(|err| StoreError::Serialize(err.to_string()))?;

        let mut tmp = NamedTempFile::new_in(&self.sessions_dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.file_path(&envelope.key))
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    /// Single-file read for the not-yet-in-memory case. `Ok(None)` when the
    /// key was never persisted.
    pub fn load<T, R>(&self, key: &str) -> Result<Option<Envelope<T, R>>>
    where
        T: DeserializeOwned,
        R: DeserializeOwned,
    {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_file(&path)?))
    }

    pub fn read_file<T, R>(&self, path: &Path) -> Result<Envelope<T, R>>
    where
        T: DeserializeOwned,
        R: DeserializeOwned,
    {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::Corrupt(path.display().to_string(), err.to_string()))
    }

    /// Idempotent delete; a missing file is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.file_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Candidate session files, most recently modified first. Dotfiles
    /// (in-flight temp files) and non-JSON entries are skipped.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.sessions_dir) else {
            return Vec::new();
        };

        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension() != Some(std::ffi::OsStr::new("json")) {
                continue;
            }
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
            {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, modified));
        }

        files.sort_by(|a, b| b.1.cmp(&a.1));
        files.into_iter().map(|(path, _)| path).collect()
    }

    /// Best-effort key listing: reads each file's embedded `key` field and
    /// skips anything that fails to parse.
    pub fn scan_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for path in self.candidates() {
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<EnvelopeHead>(&bytes) {
                    Ok(head) => keys.push(head.key),
                    Err(err) => {
                        tracing::debug!(file = %path.display(), error = %err, "skipping unparsable session file");
                    }
                },
                Err(err) => {
                    tracing::debug!(file = %path.display(), error = %err, "skipping unreadable session file");
                }
            }
        }
        keys
    }
}
