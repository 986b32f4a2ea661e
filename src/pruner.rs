//! Pruner — computes the pruned replay for a newly attached subscriber.
//!
//! Implements the streaming two-pass approach noted as the production
//! answer to unbounded replay: pass 1 walks the file from `start_offset`
//! tracking only the byte offset of the last clear and the resize that
//! preceded it (O(1) memory, no event buffering); pass 2 re-reads from
//! that offset and streams events straight to the sink.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::clear::contains_clear;
use crate::event::{parse_line, Header, Parsed, RecordedEvent};

/// Where a pruned (or fallback) replay is written.
///
/// Implementations never need to report errors back to the Pruner — per
/// the error handling design, a sink write failure is the Fan-out layer's
/// concern (logged there, the broadcast simply stops writing to that
/// sink). The Pruner's job ends at "here is the next frame".
pub trait PruneSink {
    /// Called exactly once, first, if a header could be read.
    fn header(&mut self, header: &Header);
    /// Called for each event in the pruned (or fallback) replay, in order.
    fn event(&mut self, event: &RecordedEvent);
}

/// Outcome of a prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Whether an exit event was part of the replayed slice — if so, the
    /// caller should close the subscriber's sink immediately after
    /// flushing these frames.
    pub saw_exit: bool,
    /// Whether a clear event was observed (and thus `lastClearOffset`
    /// should be considered for persistence by the caller).
    pub saw_clear: bool,
    /// The byte offset just past the newline of the last clear-bearing
    /// event observed, valid only when `saw_clear` is true.
    pub last_clear_offset: u64,
}

/// Computes and emits the pruned replay for `stream_path` starting at
/// `start_offset`.
///
/// Never returns an error: any I/O failure degrades to the documented
/// fallback (non-pruning replay from offset 0), and if even that can't
/// open the file (e.g. the recording hasn't been created yet), the sink
/// simply receives nothing — the live Tail Reader will pick up the file
/// once it exists.
pub fn prune<S: PruneSink>(stream_path: &Path, start_offset: u64, sink: &mut S) -> PruneOutcome {
    let header = read_header(stream_path);

    match scan_and_emit(stream_path, start_offset, header.as_ref(), sink) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::debug!(
                "[pruner] {}: replay pass failed ({e}), falling back to non-pruning replay from offset 0",
                stream_path.display()
            );
            match fallback_replay(stream_path, header.as_ref(), sink) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::debug!(
                        "[pruner] {}: fallback replay also failed ({e}), emitting nothing",
                        stream_path.display()
                    );
                    PruneOutcome::default()
                }
            }
        }
    }
}

fn read_header(stream_path: &Path) -> Option<Header> {
    let file = match File::open(stream_path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("[pruner] {}: header probe failed: {e}", stream_path.display());
            return None;
        }
    };
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => match parse_line(&line) {
            Ok(Parsed::Header(h)) => Some(h),
            _ => {
                log::debug!("[pruner] {}: first line is not a header", stream_path.display());
                None
            }
        },
        Err(e) => {
            log::debug!("[pruner] {}: header probe read failed: {e}", stream_path.display());
            None
        }
    }
}

struct ClearScan {
    last_clear_offset: u64,
    last_resize_before_clear: Option<(u32, u32)>,
    saw_clear: bool,
}

/// Pass 1: locate the last clear-bearing event at or after `start_offset`
/// without buffering event bodies.
fn scan_for_last_clear(stream_path: &Path, start_offset: u64) -> io::Result<ClearScan> {
    let file = File::open(stream_path)?;
    let file_len = file.metadata()?.len();
    let clamped_start = start_offset.min(file_len);

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(clamped_start))?;

    let mut pos = clamped_start;
    let mut current_resize: Option<(u32, u32)> = None;
    let mut last_clear_offset = clamped_start;
    let mut last_resize_before_clear = None;
    let mut saw_clear = false;

    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        if !line.ends_with('\n') {
            // Partial trailing line (crash mid-write) — not a complete event.
            break;
        }
        pos += n as u64;

        match parse_line(&line) {
            Ok(Parsed::Event(event)) => {
                if let RecordedEvent::Resize { cols, rows, .. } = &event {
                    current_resize = Some((*cols, *rows));
                }
                if contains_clear(&event) {
                    saw_clear = true;
                    last_clear_offset = pos;
                    last_resize_before_clear = current_resize;
                }
            }
            Ok(_) => {}
            Err(e) => log::debug!("[pruner] {}: skipping malformed line: {e}", stream_path.display()),
        }
    }

    Ok(ClearScan {
        last_clear_offset,
        last_resize_before_clear,
        saw_clear,
    })
}

fn scan_and_emit<S: PruneSink>(
    stream_path: &Path,
    start_offset: u64,
    header: Option<&Header>,
    sink: &mut S,
) -> io::Result<PruneOutcome> {
    let scan = scan_for_last_clear(stream_path, start_offset)?;

    let emit_from = if scan.saw_clear {
        scan.last_clear_offset
    } else {
        let file_len = File::open(stream_path)?.metadata()?.len();
        start_offset.min(file_len)
    };

    if let Some(h) = header {
        let rewritten = match (scan.saw_clear, scan.last_resize_before_clear) {
            (true, Some((cols, rows))) => h.with_dimensions(cols, rows),
            _ => h.clone(),
        };
        sink.header(&rewritten);
    }

    let saw_exit = emit_events_from(stream_path, emit_from, sink)?;

    Ok(PruneOutcome {
        saw_exit,
        saw_clear: scan.saw_clear,
        last_clear_offset: scan.last_clear_offset,
    })
}

/// Non-pruning fallback: every event from offset 0, timestamps zeroed.
fn fallback_replay<S: PruneSink>(
    stream_path: &Path,
    header: Option<&Header>,
    sink: &mut S,
) -> io::Result<PruneOutcome> {
    if let Some(h) = header {
        sink.header(h);
    }
    let saw_exit = emit_events_from(stream_path, 0, sink)?;
    Ok(PruneOutcome {
        saw_exit,
        saw_clear: false,
        last_clear_offset: 0,
    })
}

/// Streams every event from `offset` to EOF, with timestamps zeroed,
/// stopping (and returning `true`) the moment an exit event is emitted.
fn emit_events_from<S: PruneSink>(stream_path: &Path, offset: u64, sink: &mut S) -> io::Result<bool> {
    let mut file = File::open(stream_path)?;
    let file_len = file.metadata()?.len();
    let clamped = offset.min(file_len);
    file.seek(SeekFrom::Start(clamped))?;
    let mut reader = BufReader::new(file);

    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        if !line.ends_with('\n') {
            break;
        }
        match parse_line(&line) {
            Ok(Parsed::Event(event)) => {
                let zeroed = event.with_timestamp(0.0);
                sink.event(&zeroed);
                if matches!(zeroed, RecordedEvent::Exit { .. }) {
                    return Ok(true);
                }
            }
            Ok(_) => {}
            Err(e) => log::debug!("[pruner] {}: skipping malformed line: {e}", stream_path.display()),
        }
    }
    Ok(false)
}

#[allow(dead_code)]
fn _assert_read_trait_bound<R: Read>() {}
