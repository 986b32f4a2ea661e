#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vibetunnel_stream::SseSink;

/// An `SseSink` that records every frame it's handed, for black-box
/// assertions against what a real SSE client would have received.
#[derive(Clone, Default)]
pub struct CollectingSink {
    pub frames: Arc<Mutex<Vec<String>>>,
    pub ended: Arc<Mutex<bool>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub fn is_ended(&self) -> bool {
        *self.ended.lock().unwrap()
    }
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

/// Writes a session directory containing `recording.jsonl` with the given
/// lines, each newline-terminated.
pub fn write_recording(sessions_dir: &Path, session_id: &str, lines: &[&str]) {
    let session_dir = sessions_dir.join(session_id);
    fs::create_dir_all(&session_dir).unwrap();
    let content = lines.iter().map(|l| format!("{l}\n")).collect::<String>();
    fs::write(session_dir.join("recording.jsonl"), content).unwrap();
}

/// Appends one already-newline-terminated line to an existing recording,
/// as the PTY spawner would.
pub fn append_line(sessions_dir: &Path, session_id: &str, line: &str) {
    let path = sessions_dir.join(session_id).join("recording.jsonl");
    let mut file = fs::OpenOptions::new().append(true).open(path).unwrap();
    writeln!(file, "{line}").unwrap();
    file.sync_data().unwrap();
}

/// Polls `predicate` until it's true or `timeout` elapses, yielding to the
/// runtime between attempts so the Tail Reader's watcher/poll task gets a
/// chance to run.
pub async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
