//! Tail Reader — watches one recording file for growth and turns newly
//! appended bytes into complete lines.
//!
//! Reads are always positional and byte-counted, never character-counted,
//! so a multi-byte UTF-8 character split across two read cycles is
//! buffered whole rather than corrupted.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::StreamError;

/// Per-session tail bookkeeping a `WatcherInfo` carries.
#[derive(Debug, Clone)]
pub struct TailState {
    /// Bytes of the file already consumed into `line_buffer` or emitted.
    pub last_offset: u64,
    /// File size as of the last successful read.
    pub last_size: u64,
    /// File mtime as of the last successful read.
    pub last_mtime: Option<SystemTime>,
    /// Residual bytes of an incomplete trailing line. Never contains `\n`.
    pub line_buffer: Vec<u8>,
}

impl TailState {
    /// Bookkeeping initialized from a `stat()` taken at attach time.
    pub fn new(last_offset: u64, last_size: u64, last_mtime: Option<SystemTime>) -> Self {
        TailState {
            last_offset,
            last_size,
            last_mtime,
            line_buffer: Vec::new(),
        }
    }
}

impl Default for TailState {
    fn default() -> Self {
        TailState::new(0, 0, None)
    }
}

/// Result of one stat-and-read cycle.
pub enum TailOutcome {
    /// No growth since the last read — a stale or spurious notification.
    Unchanged,
    /// Newly completed lines, in file order. May be empty if the new bytes
    /// only extended the buffered partial line.
    Lines(Vec<String>),
    /// The file shrank. Not expected from an append-only writer; treated
    /// as the session having ended.
    Truncated,
}

/// Performs one stat-and-read cycle: stat, compare against bookkeeping,
/// positional read of exactly the new bytes, split on `\n`.
pub fn poll_once(stream_path: &Path, state: &mut TailState) -> Result<TailOutcome, StreamError> {
    let metadata = match fs::metadata(stream_path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TailOutcome::Unchanged),
        Err(e) => return Err(StreamError::Io(e)),
    };
    let size = metadata.len();
    let mtime = metadata.modified().ok();

    if size < state.last_size {
        log::warn!(
            "[tail] {}: size shrank ({} -> {} bytes), treating as truncation",
            stream_path.display(),
            state.last_size,
            size
        );
        return Ok(TailOutcome::Truncated);
    }

    let grew = size > state.last_size;
    let touched = matches!((mtime, state.last_mtime), (Some(m), Some(last)) if m > last);
    if !grew && !touched {
        return Ok(TailOutcome::Unchanged);
    }

    let to_read = size.saturating_sub(state.last_offset);
    let mut lines = Vec::new();

    if to_read > 0 {
        let mut file = File::open(stream_path).map_err(StreamError::Io)?;
        file.seek(SeekFrom::Start(state.last_offset)).map_err(StreamError::Io)?;
        let mut buf = vec![0u8; to_read as usize];
        file.read_exact(&mut buf).map_err(StreamError::Io)?;
        state.line_buffer.extend_from_slice(&buf);

        let mut start = 0;
        while let Some(rel) = state.line_buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            match std::str::from_utf8(&state.line_buffer[start..end]) {
                Ok(line) => lines.push(line.to_string()),
                Err(e) => log::debug!("[tail] {}: skipping non-UTF-8 line: {e}", stream_path.display()),
            }
            start = end + 1;
        }
        state.line_buffer.drain(..start);
    }

    state.last_offset = size;
    state.last_size = size;
    state.last_mtime = mtime;

    Ok(TailOutcome::Lines(lines))
}

/// Establishes an OS-level watch on `stream_path`'s parent directory and
/// invokes `on_change` whenever `stream_path` itself is modified or
/// created. The directory (rather than the file) is watched so that the
/// watch survives the file not existing yet at attach time.
pub fn watch(
    stream_path: &Path,
    on_change: impl Fn() + Send + 'static,
) -> Result<RecommendedWatcher, StreamError> {
    let target = stream_path.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event.paths.iter().any(|p| p == &target)
            {
                on_change();
            }
        }
    })
    .map_err(|source| StreamError::Watch {
        path: stream_path.to_path_buf(),
        source,
    })?;

    let watch_dir = stream_path.parent().unwrap_or(stream_path);
    watcher
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .map_err(|source| StreamError::Watch {
            path: stream_path.to_path_buf(),
            source,
        })?;

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn stat(path: &Path) -> (u64, Option<SystemTime>) {
        let m = fs::metadata(path).unwrap();
        (m.len(), m.modified().ok())
    }

    #[test]
    fn reads_only_newly_appended_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.jsonl");
        fs::write(&path, b"line-one\n").unwrap();

        let (size, mtime) = stat(&path);
        let mut state = TailState::new(size, size, mtime);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"line-two\n").unwrap();
        drop(file);

        match poll_once(&path, &mut state).unwrap() {
            TailOutcome::Lines(lines) => assert_eq!(lines, vec!["line-two".to_string()]),
            _ => panic!("expected new lines"),
        }
    }

    #[test]
    fn partial_trailing_line_is_buffered_not_emitted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.jsonl");
        fs::write(&path, b"").unwrap();
        let mut state = TailState::new(0, 0, None);

        fs::write(&path, b"partial-no-newline").unwrap();
        match poll_once(&path, &mut state).unwrap() {
            TailOutcome::Lines(lines) => assert!(lines.is_empty()),
            _ => panic!("expected an (empty) lines outcome"),
        }
        assert_eq!(state.line_buffer, b"partial-no-newline");

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"-finished\n").unwrap();
        drop(file);

        match poll_once(&path, &mut state).unwrap() {
            TailOutcome::Lines(lines) => assert_eq!(lines, vec!["partial-no-newline-finished".to_string()]),
            _ => panic!("expected completed line"),
        }
        assert!(state.line_buffer.is_empty());
    }

    #[test]
    fn unrelated_stat_unchanged_produces_no_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.jsonl");
        fs::write(&path, b"line\n").unwrap();
        let (size, mtime) = stat(&path);
        let mut state = TailState::new(size, size, mtime);

        assert!(matches!(poll_once(&path, &mut state).unwrap(), TailOutcome::Unchanged));
    }

    #[test]
    fn shrinking_file_is_reported_as_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.jsonl");
        fs::write(&path, b"a long first line\n").unwrap();
        let (size, mtime) = stat(&path);
        let mut state = TailState::new(size, size, mtime);

        fs::write(&path, b"short\n").unwrap();
        assert!(matches!(poll_once(&path, &mut state).unwrap(), TailOutcome::Truncated));
    }

    #[test]
    fn missing_file_is_unchanged_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.jsonl");
        let mut state = TailState::new(0, 0, None);
        assert!(matches!(poll_once(&path, &mut state).unwrap(), TailOutcome::Unchanged));
    }

    #[test]
    fn multibyte_character_split_across_reads_is_not_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recording.jsonl");
        // "日" is E6 97 A5 in UTF-8; write the first two bytes, then the rest.
        let full = "日本\n".as_bytes().to_vec();
        let (first, rest) = full.split_at(2);

        fs::write(&path, b"").unwrap();
        let mut state = TailState::new(0, 0, None);

        fs::write(&path, first).unwrap();
        match poll_once(&path, &mut state).unwrap() {
            TailOutcome::Lines(lines) => assert!(lines.is_empty()),
            _ => panic!("expected a (buffered, line-less) read"),
        }
        assert_eq!(state.line_buffer, first);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(rest).unwrap();
        drop(file);

        match poll_once(&path, &mut state).unwrap() {
            TailOutcome::Lines(lines) => assert_eq!(lines, vec!["日本".to_string()]),
            _ => panic!("expected the completed multibyte line"),
        }
    }
}
