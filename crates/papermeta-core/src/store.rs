//! Durable run state: the checkpoint set and the result list.
//!
//! Both stores are plain JSON files. Saves go through a temporary file in the
//! same directory that is then renamed over the target, so a process killed
//! mid-write leaves the previous committed version intact.

use std::collections::{BTreeSet, HashSet};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::MetadataRecord;
use crate::response::record_from_object;

/// File name of the result store inside the state directory.
pub const METADATA_FILE: &str = "metadata.json";

/// File name of the checkpoint store inside the state directory.
pub const PROCESSED_FILE: &str = "processed_files.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a readable state file ({source}); move it aside or delete it to start fresh", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot serialize state for {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read a JSON document, treating a missing or blank file as `T::default()`.
fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` to `path` via write-to-temp-then-rename.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| {
            StoreError::Serialize {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
        writer.flush().map_err(|e| StoreError::io(path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// The set of relative paths that reached a terminal outcome.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    processed: BTreeSet<String>,
}

impl CheckpointStore {
    /// Load from `path`; a missing or empty file means nothing was processed yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries: Vec<String> = read_json(&path)?;
        Ok(Self {
            path,
            processed: entries.into_iter().collect(),
        })
    }

    /// Load `processed_files.json` from a state directory.
    pub fn in_dir(dir: &Path) -> Result<Self, StoreError> {
        Self::load(dir.join(PROCESSED_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.processed.contains(relative_path)
    }

    /// Record a terminal outcome. Returns `false` if it was already recorded.
    pub fn mark_processed(&mut self, relative_path: impl Into<String>) -> bool {
        self.processed.insert(relative_path.into())
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.processed.iter().map(String::as_str)
    }

    /// Persist as a sorted JSON array of strings.
    pub fn save(&self) -> Result<(), StoreError> {
        let entries: Vec<&String> = self.processed.iter().collect();
        write_json_atomic(&self.path, &entries)
    }
}

/// Rebuild a saved record from a loosely typed JSON entry.
///
/// Older result files store fields exactly as the model returned them, so a
/// year may be a number and any field may be `null` or missing. Unknown keys
/// such as `full_path` are ignored.
fn record_from_saved(entry: Value) -> Option<MetadataRecord> {
    let Value::Object(obj) = entry else {
        return None;
    };
    let source = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let (filename, relative_path) = (source("filename"), source("relative_path"));
    Some(record_from_object(&obj).with_source(filename, relative_path))
}

/// Append-only list of extracted records, unique by `relative_path`.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    records: Vec<MetadataRecord>,
    seen: HashSet<String>,
}

impl ResultStore {
    /// Load from `path`; a missing or empty file means no records yet.
    ///
    /// Entries that are not JSON objects are skipped with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries: Vec<Value> = read_json(&path)?;
        let total = entries.len();
        let records: Vec<MetadataRecord> =
            entries.into_iter().filter_map(record_from_saved).collect();
        if records.len() < total {
            tracing::warn!(
                path = %path.display(),
                skipped = total - records.len(),
                "ignoring result entries that are not objects"
            );
        }
        let seen = records.iter().map(|r| r.relative_path.clone()).collect();
        Ok(Self {
            path,
            records,
            seen,
        })
    }

    /// Load `metadata.json` from a state directory.
    pub fn in_dir(dir: &Path) -> Result<Self, StoreError> {
        Self::load(dir.join(METADATA_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record. A second record for the same relative path is ignored
    /// and `false` is returned.
    pub fn append(&mut self, record: MetadataRecord) -> bool {
        if !self.seen.insert(record.relative_path.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.seen.contains(relative_path)
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &self.records)
    }
}

/// Checkpoint every path that already has a record.
///
/// Records are saved before checkpoints, so a crash between the two writes
/// leaves a record without its checkpoint. Returns how many were added.
pub fn reconcile(checkpoints: &mut CheckpointStore, results: &ResultStore) -> usize {
    results
        .records()
        .iter()
        .filter(|r| checkpoints.mark_processed(r.relative_path.clone()))
        .count()
}

/// Forget all progress in `dir`.
///
/// Deletes the checkpoint file and moves the result file aside to
/// `metadata_backup_<unix-seconds>.json`, whose path is returned. An existing
/// backup is never replaced: a `_<n>` suffix is added until the name is free.
pub fn reset_state(dir: &Path) -> Result<Option<PathBuf>, StoreError> {
    let processed = dir.join(PROCESSED_FILE);
    match std::fs::remove_file(&processed) {
        Ok(()) => tracing::info!(path = %processed.display(), "removed checkpoint file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io(&processed, e)),
    }

    let metadata = dir.join(METADATA_FILE);
    if !metadata.exists() {
        return Ok(None);
    }
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let backup = free_backup_path(dir, secs);
    std::fs::rename(&metadata, &backup).map_err(|e| StoreError::io(&metadata, e))?;
    tracing::info!(backup = %backup.display(), "backed up previous results");
    Ok(Some(backup))
}

fn free_backup_path(dir: &Path, secs: u64) -> PathBuf {
    let first = dir.join(format!("metadata_backup_{}.json", secs));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("metadata_backup_{}_{}.json", secs, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Whether `dir` holds state from a previous run.
pub fn has_prior_state(dir: &Path) -> bool {
    dir.join(PROCESSED_FILE).exists() || dir.join(METADATA_FILE).exists()
}
