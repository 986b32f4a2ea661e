//! Subscriber Registry — for each session, the set of connected clients
//! and the single shared Tail Reader behind them.
//!
//! Concurrency shape: a top-level `Mutex<HashMap<SessionId, Arc<Mutex<WatcherInfo>>>>`
//! guarding registry membership, with one `tokio::sync::Mutex` per session
//! guarding that session's `WatcherInfo` — the same "mutex-guarded map of
//! mutex-guarded records" shape this crate's ancestor uses for its view
//! registry (`HashMap<String, Box<dyn ViewOps>>`). Tail-read-and-broadcast
//! only ever takes the inner lock; the outer lock is held just long enough
//! to create or remove a session's entry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use notify::RecommendedWatcher;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::StreamError;
use crate::event::{parse_line, Parsed, RecordedEvent};
use crate::pruner::{self, PruneOutcome, PruneSink};
use crate::sse;
use crate::store;
use crate::tail::{self, TailOutcome, TailState};

/// Capability a connected SSE viewer exposes to the Fan-out layer.
///
/// Implementations live at the HTTP boundary (see [`crate::http`]); the
/// Registry only ever calls these three methods.
pub trait SseSink: Send + 'static {
    /// Writes one already-framed SSE chunk (`data: ...\n\n`).
    fn write(&mut self, frame: String) -> std::io::Result<()>;
    /// Reports a write failure so the caller can log it with context the
    /// sink has but the Registry doesn't (e.g. a connection id).
    fn on_error(&mut self, err: &std::io::Error);
    /// Signals no further frames will be written; the sink may close the
    /// underlying response body.
    fn end(&mut self);
}

struct Subscriber {
    id: u64,
    sink: Box<dyn SseSink>,
    start_time: Instant,
    /// Whether this subscriber has already received its one-and-only
    /// header frame. Ordinarily that happens during `attach`'s replay; a
    /// subscriber that attached before the recording file existed hasn't,
    /// and picks one up from the live tail the moment the writer creates
    /// the file and its header line arrives.
    header_sent: bool,
}

struct WatcherInfo {
    session_id: String,
    stream_path: PathBuf,
    subscribers: Vec<Subscriber>,
    tail_state: TailState,
    poll_task: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

impl Drop for WatcherInfo {
    fn drop(&mut self) {
        self.poll_task.abort();
    }
}

/// Owns every session currently being tailed.
pub struct Registry {
    sessions_dir: PathBuf,
    sessions: Mutex<HashMap<String, Arc<Mutex<WatcherInfo>>>>,
    next_subscriber_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry rooted at `sessions_dir` (one
    /// subdirectory per session, each containing `recording.jsonl` and
    /// optionally `session.json`).
    pub fn new(sessions_dir: PathBuf) -> Self {
        Registry {
            sessions_dir,
            sessions: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    fn stream_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id).join("recording.jsonl")
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    /// Registers a new subscriber for `session_id`, creating its
    /// `WatcherInfo` (and starting the shared Tail Reader) if this is the
    /// first subscriber. Sends the pruned backlog to `sink` before
    /// returning.
    pub async fn attach(
        self: &Arc<Self>,
        session_id: &str,
        sink: Box<dyn SseSink>,
    ) -> Result<u64, StreamError> {
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let stream_path = self.stream_path(session_id);
        let session_dir = self.session_dir(session_id);

        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(session_id).cloned() {
            drop(sessions);

            // Hold the per-session lock across the whole replay, not just
            // the final push — otherwise a concurrent tail-read-and-broadcast
            // for this session (which takes this same lock in
            // `poll_and_broadcast`) can interleave with the backlog replay,
            // delivering backlog and live frames out of order to the new
            // subscriber.
            let mut info = existing.lock().await;

            let session_id_owned = session_id.to_string();
            let path = stream_path.clone();
            let dir = session_dir.clone();
            let (outcome, mut sink, header_sent) = tokio::task::spawn_blocking(move || {
                let mut sink = sink;
                let mut adapter = AttachSink { sink: sink.as_mut(), header_sent: false };
                let start_offset = stored_offset(&dir);
                let outcome = pruner::prune(&path, start_offset, &mut adapter);
                persist_offset_if_clear(&dir, &session_id_owned, &outcome);
                let header_sent = adapter.header_sent;
                (outcome, sink, header_sent)
            })
            .await
            .expect("attach (re-attach) blocking task panicked");

            if outcome.saw_exit {
                sink.end();
            }

            info.subscribers.push(Subscriber {
                id: subscriber_id,
                sink,
                start_time: Instant::now(),
                header_sent,
            });
            return Ok(subscriber_id);
        }

        log::debug!("[registry] {session_id}: first subscriber, starting tail reader");

        let session_id_owned = session_id.to_string();
        let path = stream_path.clone();
        let dir = session_dir.clone();
        let (outcome, mut sink, header_sent, size, mtime) = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            let (outcome, header_sent) = {
                let mut adapter = AttachSink { sink: sink.as_mut(), header_sent: false };
                let start_offset = stored_offset(&dir);
                let outcome = pruner::prune(&path, start_offset, &mut adapter);
                persist_offset_if_clear(&dir, &session_id_owned, &outcome);
                (outcome, adapter.header_sent)
            };
            let (size, mtime) = match std::fs::metadata(&path) {
                Ok(m) => (m.len(), m.modified().ok()),
                Err(_) => (0, None),
            };
            (outcome, sink, header_sent, size, mtime)
        })
        .await
        .expect("attach blocking task panicked");

        let backlog_saw_exit = outcome.saw_exit;
        let tail_state = TailState::new(size, size, mtime);

        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<()>();
        let mut notify_rx = notify_rx;
        let path_for_watch = stream_path.clone();
        let watcher = tokio::task::spawn_blocking(move || {
            tail::watch(&path_for_watch, move || {
                let _ = notify_tx.send(());
            })
        })
        .await
        .expect("watcher setup task panicked")?;

        let registry = Arc::clone(self);
        let session_id_owned = session_id.to_string();
        let poll_task = tokio::spawn(async move {
            while notify_rx.recv().await.is_some() {
                registry.poll_and_broadcast(&session_id_owned).await;
            }
        });

        let info = WatcherInfo {
            session_id: session_id.to_string(),
            stream_path,
            subscribers: vec![Subscriber {
                id: subscriber_id,
                sink,
                start_time: Instant::now(),
                header_sent,
            }],
            tail_state,
            poll_task,
            _watcher: watcher,
        };

        if backlog_saw_exit {
            info.subscribers[0].sink.end();
        }

        sessions.insert(session_id.to_string(), Arc::new(Mutex::new(info)));
        Ok(subscriber_id)
    }

    /// Closes every watcher and clears the registry. Used by the
    /// Lifecycle Controller on process shutdown.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        log::info!("[registry] closing {} session watcher(s)", sessions.len());
        sessions.clear();
    }

    /// Removes a subscriber. If this was the last subscriber for its
    /// session, the watcher and `WatcherInfo` are torn down.
    pub async fn detach(&self, session_id: &str, subscriber_id: u64) {
        let mut sessions = self.sessions.lock().await;
        let Some(arc) = sessions.get(session_id).cloned() else {
            return;
        };

        let should_remove = {
            let mut info = arc.lock().await;
            info.subscribers.retain(|s| s.id != subscriber_id);
            info.subscribers.is_empty()
        };

        if should_remove {
            log::debug!("[registry] {session_id}: last subscriber detached, tearing down watcher");
            sessions.remove(session_id);
        }
    }

    async fn poll_and_broadcast(&self, session_id: &str) {
        let arc = {
            let sessions = self.sessions.lock().await;
            match sessions.get(session_id) {
                Some(a) => Arc::clone(a),
                None => return,
            }
        };

        let mut info = arc.lock().await;
        let stream_path = info.stream_path.clone();
        let mut tail_state = std::mem::take(&mut info.tail_state);
        let (result, tail_state) = tokio::task::spawn_blocking(move || {
            let result = tail::poll_once(&stream_path, &mut tail_state);
            (result, tail_state)
        })
        .await
        .expect("tail poll blocking task panicked");
        info.tail_state = tail_state;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("[registry] {session_id}: tail read failed: {e}");
                return;
            }
        };

        match outcome {
            TailOutcome::Unchanged => {}
            TailOutcome::Lines(lines) => {
                for line in lines {
                    self.broadcast_line(&mut info, &line);
                }
            }
            TailOutcome::Truncated => {
                let exit = RecordedEvent::Exit {
                    code: -1,
                    session_id: session_id.to_string(),
                };
                broadcast_event(&mut info, &exit);
                for subscriber in &mut info.subscribers {
                    subscriber.sink.end();
                }
                drop(info);
                let mut sessions = self.sessions.lock().await;
                sessions.remove(session_id);
            }
        }
    }

    fn broadcast_line(&self, info: &mut WatcherInfo, line: &str) {
        match parse_line(line) {
            Ok(Parsed::Header(header)) => {
                // Most subscribers already received their header during
                // attach's replay. The exception is a subscriber that
                // attached before the recording file existed at all — it
                // gets its one-and-only header from this live line instead.
                let frame = sse::format_json_frame(
                    &serde_json::to_value(&header).unwrap_or(serde_json::Value::Null),
                );
                for subscriber in info.subscribers.iter_mut().filter(|s| !s.header_sent) {
                    write_frame(subscriber, frame.clone());
                    subscriber.header_sent = true;
                }
            }
            Ok(Parsed::Blank) => {}
            Ok(Parsed::Event(event)) => {
                let is_exit = matches!(event, RecordedEvent::Exit { .. });
                broadcast_event(info, &event);
                if is_exit {
                    for subscriber in &mut info.subscribers {
                        subscriber.sink.end();
                    }
                }
            }
            Err(e) => {
                log::debug!(
                    "[registry] {}: forwarding unparseable line as raw output ({e})",
                    info.session_id
                );
                for subscriber in &mut info.subscribers {
                    let elapsed = subscriber.start_time.elapsed();
                    let frame = sse::format_raw_passthrough_frame(line, elapsed);
                    write_frame(subscriber, frame);
                }
            }
        }
    }
}

fn broadcast_event(info: &mut WatcherInfo, event: &RecordedEvent) {
    for subscriber in &mut info.subscribers {
        let elapsed = subscriber.start_time.elapsed();
        let frame = sse::format_live_event_frame(event, elapsed);
        write_frame(subscriber, frame);
    }
}

fn write_frame(subscriber: &mut Subscriber, frame: String) {
    if let Err(e) = subscriber.sink.write(frame) {
        log::debug!("[registry] subscriber {}: write failed ({e}), abandoning for this broadcast", subscriber.id);
        subscriber.sink.on_error(&e);
    }
}

fn stored_offset(session_dir: &std::path::Path) -> u64 {
    match store::load(session_dir) {
        Ok(Some(record)) => record.last_clear_offset,
        Ok(None) => 0,
        Err(e) => {
            log::debug!("[registry] {}: failed to load session record ({e}), replaying from 0", session_dir.display());
            0
        }
    }
}

fn persist_offset_if_clear(session_dir: &std::path::Path, session_id: &str, outcome: &PruneOutcome) {
    if !outcome.saw_clear {
        return;
    }
    match store::load(session_dir) {
        Ok(Some(mut record)) => {
            record.last_clear_offset = outcome.last_clear_offset;
            if let Err(e) = store::save(session_dir, session_id, &record) {
                log::error!("[registry] {session_id}: failed to persist lastClearOffset: {e}");
            }
        }
        Ok(None) => {
            log::debug!("[registry] {session_id}: no existing session record, skipping offset persistence");
        }
        Err(e) => {
            log::debug!("[registry] {session_id}: failed to load session record for offset persistence: {e}");
        }
    }
}

/// Adapts a subscriber's [`SseSink`] to the Pruner's [`PruneSink`] trait,
/// framing each piece as it arrives rather than buffering the replay.
struct AttachSink<'a> {
    sink: &'a mut dyn SseSink,
    header_sent: bool,
}

impl PruneSink for AttachSink<'_> {
    fn header(&mut self, header: &crate::event::Header) {
        let frame = sse::format_json_frame(&serde_json::to_value(header).unwrap_or(serde_json::Value::Null));
        if let Err(e) = self.sink.write(frame) {
            self.sink.on_error(&e);
        }
        self.header_sent = true;
    }

    fn event(&mut self, event: &RecordedEvent) {
        let frame = sse::format_backlog_frame(event);
        if let Err(e) = self.sink.write(frame) {
            self.sink.on_error(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct CollectingSink {
        frames: Arc<StdMutex<Vec<String>>>,
        ended: Arc<StdMutex<bool>>,
    }

    impl SseSink for CollectingSink {
        fn write(&mut self, frame: String) -> std::io::Result<()> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
        fn on_error(&mut self, _err: &std::io::Error) {}
        fn end(&mut self) {
            *self.ended.lock().unwrap() = true;
        }
    }

    fn write_recording(session_dir: &std::path::Path, lines: &[&str]) {
        fs::create_dir_all(session_dir).unwrap();
        let content = lines.join("\n") + "\n";
        fs::write(session_dir.join("recording.jsonl"), content).unwrap();
    }

    #[tokio::test]
    async fn attach_delivers_header_then_backlog() {
        let dir = tempdir().unwrap();
        write_recording(
            &dir.path().join("sess-1"),
            &[r#"{"version":2,"width":80,"height":24}"#, r#"[0.1,"o","hi"]"#],
        );

        let registry = Arc::new(Registry::new(dir.path().to_path_buf()));
        let frames = Arc::new(StdMutex::new(Vec::new()));
        let ended = Arc::new(StdMutex::new(false));
        let sink = CollectingSink {
            frames: Arc::clone(&frames),
            ended: Arc::clone(&ended),
        };

        registry.attach("sess-1", Box::new(sink)).await.unwrap();

        let collected = frames.lock().unwrap();
        assert_eq!(collected.len(), 2);
        assert!(collected[0].contains("\"version\":2"));
        assert!(collected[1].contains("\"hi\""));
    }

    #[tokio::test]
    async fn second_attach_reuses_existing_watcher_info() {
        let dir = tempdir().unwrap();
        write_recording(&dir.path().join("sess-1"), &[r#"{"version":2,"width":80,"height":24}"#]);

        let registry = Arc::new(Registry::new(dir.path().to_path_buf()));
        let sink_a = CollectingSink::default();
        let sink_b = CollectingSink::default();

        let id_a = registry.attach("sess-1", Box::new(sink_a)).await.unwrap();
        let id_b = registry.attach("sess-1", Box::new(sink_b)).await.unwrap();
        assert_ne!(id_a, id_b);

        let sessions = registry.sessions.lock().await;
        assert_eq!(sessions.len(), 1);
        let info = sessions.get("sess-1").unwrap().lock().await;
        assert_eq!(info.subscribers.len(), 2);
    }

    #[tokio::test]
    async fn detach_down_to_zero_removes_watcher_info() {
        let dir = tempdir().unwrap();
        write_recording(&dir.path().join("sess-1"), &[r#"{"version":2,"width":80,"height":24}"#]);

        let registry = Arc::new(Registry::new(dir.path().to_path_buf()));
        let sink = CollectingSink::default();
        let id = registry.attach("sess-1", Box::new(sink)).await.unwrap();

        registry.detach("sess-1", id).await;
        let sessions = registry.sessions.lock().await;
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn attach_for_missing_file_still_creates_watcher_info() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sess-1")).unwrap();

        let registry = Arc::new(Registry::new(dir.path().to_path_buf()));
        let sink = CollectingSink::default();
        registry.attach("sess-1", Box::new(sink)).await.unwrap();

        let sessions = registry.sessions.lock().await;
        assert_eq!(sessions.len(), 1);
    }
}
