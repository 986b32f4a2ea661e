//! Session Info Store — loads and atomically persists per-session metadata.
//!
//! One JSON file per session (`session.json`, alongside the recording).
//! Writes go through a `.tmp` file + `rename` so concurrent readers never
//! observe a partially written record, the same durability shape the
//! ancestor library uses for its view snapshots.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Per-session metadata the Core reads and conditionally writes.
///
/// `lastClearOffset` is monotonically non-decreasing and bounded above by
/// the current recording file size — `load` clamps it if a caller's
/// bookkeeping has drifted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Byte offset just past the newline of the most recent clear-bearing
    /// event the Pruner has observed for this session.
    #[serde(rename = "lastClearOffset")]
    pub last_clear_offset: u64,

    /// Any other fields the PTY spawner (or other collaborators) store
    /// alongside — passed through unmodified.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn record_path(session_dir: &Path) -> PathBuf {
    session_dir.join("session.json")
}

/// Loads a session record from `session_dir/session.json`.
///
/// Returns `Ok(None)` if the file doesn't exist. A corrupt record is logged
/// at debug and also treated as absent — callers fall back to "no metadata
/// yet" rather than propagating a parse error for something only the Pruner
/// updates.
pub fn load(session_dir: &Path) -> Result<Option<SessionRecord>, StoreError> {
    let path = record_path(session_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Io(e)),
    };

    match serde_json::from_str::<SessionRecord>(&contents) {
        Ok(mut record) => {
            if let Ok(metadata) = fs::metadata(session_dir.join("recording.jsonl")) {
                let file_size = metadata.len();
                if record.last_clear_offset > file_size {
                    log::debug!(
                        "[store] {}: lastClearOffset {} exceeds file size {}, clamping",
                        path.display(),
                        record.last_clear_offset,
                        file_size
                    );
                    record.last_clear_offset = file_size;
                }
            }
            Ok(Some(record))
        }
        Err(e) => {
            log::debug!("[store] {}: corrupt record ({e}), treating as absent", path.display());
            Ok(None)
        }
    }
}

/// Persists a session record, but only if one already exists on disk.
///
/// The Core never originates a session record — that's the PTY spawner's
/// job. Calling `save` for a session with no existing record is a
/// [`StoreError::NotFound`], not a write.
pub fn save(session_dir: &Path, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
    let path = record_path(session_dir);
    if !path.exists() {
        return Err(StoreError::NotFound(session_id.to_string()));
    }

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| StoreError::Corrupt(path.clone(), e))?;

    fs::write(&tmp_path, json.as_bytes()).map_err(StoreError::Io)?;
    fs::rename(&tmp_path, &path).map_err(StoreError::Io)?;
    Ok(())
}
