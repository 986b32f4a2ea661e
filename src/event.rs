//! Event Codec — parses and classifies one line of an asciinema-format
//! recording file.
//!
//! A line is either the header object, one of four event array shapes, or
//! blank (skipped). Anything else is a [`CodecError`] that the caller is
//! expected to log at debug and skip — a single bad line never aborts a
//! tail or prune pass.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// The first line of a recording: `{"version":2,"width":80,"height":24,...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Recording format version. Always `2` in practice.
    pub version: u32,
    /// Terminal width in columns at recording start.
    pub width: u32,
    /// Terminal height in rows at recording start.
    pub height: u32,
    /// Any additional header fields (e.g. `env`, `title`), passed through
    /// unmodified — the Core only ever rewrites `width`/`height`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Header {
    /// Returns a copy of this header with `width`/`height` replaced.
    pub fn with_dimensions(&self, width: u32, height: u32) -> Header {
        Header {
            version: self.version,
            width,
            height,
            extra: self.extra.clone(),
        }
    }
}

/// One parsed event line, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    /// `[t, "o", payload]` — PTY output.
    Output {
        /// Elapsed seconds since recording start.
        t: f64,
        /// UTF-8 output payload.
        payload: String,
    },
    /// `[t, "i", payload]` — input; ignored by replay but still classified.
    Input {
        /// Elapsed seconds since recording start.
        t: f64,
        /// UTF-8 input payload.
        payload: String,
    },
    /// `[t, "r", "COLSxROWS"]` — terminal resize.
    Resize {
        /// Elapsed seconds since recording start.
        t: f64,
        /// New column count.
        cols: u32,
        /// New row count.
        rows: u32,
    },
    /// `["exit", code, sessionId]` — synthesized PTY termination sentinel.
    Exit {
        /// Process exit code.
        code: i64,
        /// The session this recording belongs to.
        session_id: String,
    },
}

impl RecordedEvent {
    /// Returns a copy of this event with its timestamp replaced.
    ///
    /// Exit events carry no timestamp and are returned unchanged.
    pub fn with_timestamp(&self, t: f64) -> RecordedEvent {
        match self {
            RecordedEvent::Output { payload, .. } => RecordedEvent::Output {
                t,
                payload: payload.clone(),
            },
            RecordedEvent::Input { payload, .. } => RecordedEvent::Input {
                t,
                payload: payload.clone(),
            },
            RecordedEvent::Resize { cols, rows, .. } => RecordedEvent::Resize {
                t,
                cols: *cols,
                rows: *rows,
            },
            RecordedEvent::Exit { .. } => self.clone(),
        }
    }

    /// Serializes this event back to its asciinema array form.
    pub fn to_json(&self) -> Value {
        match self {
            RecordedEvent::Output { t, payload } => Value::Array(vec![
                json_number(*t),
                Value::String("o".to_string()),
                Value::String(payload.clone()),
            ]),
            RecordedEvent::Input { t, payload } => Value::Array(vec![
                json_number(*t),
                Value::String("i".to_string()),
                Value::String(payload.clone()),
            ]),
            RecordedEvent::Resize { t, cols, rows } => Value::Array(vec![
                json_number(*t),
                Value::String("r".to_string()),
                Value::String(format!("{cols}x{rows}")),
            ]),
            RecordedEvent::Exit { code, session_id } => Value::Array(vec![
                Value::String("exit".to_string()),
                Value::Number((*code).into()),
                Value::String(session_id.clone()),
            ]),
        }
    }
}

fn json_number(t: f64) -> Value {
    serde_json::Number::from_f64(t)
        .map(Value::Number)
        .unwrap_or(Value::Number(0.into()))
}

/// The outcome of classifying one line of a recording file.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// Line 1 of a recording.
    Header(Header),
    /// A classified event line.
    Event(RecordedEvent),
    /// An empty (whitespace-only) line; skip silently, not an error.
    Blank,
}

/// Parses and classifies a single line of a recording file.
///
/// Trailing `\n`/`\r\n` is tolerated. Blank lines are reported as
/// [`Parsed::Blank`] rather than an error. Any other line that isn't valid
/// JSON, or is valid JSON but matches neither the header object shape nor
/// one of the event array shapes, is a [`CodecError`].
pub fn parse_line(line: &str) -> Result<Parsed, CodecError> {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.trim().is_empty() {
        return Ok(Parsed::Blank);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    classify(value)
}

fn classify(value: Value) -> Result<Parsed, CodecError> {
    match value {
        Value::Object(ref map) => {
            if map.contains_key("version") && map.contains_key("width") && map.contains_key("height") {
                let header: Header = serde_json::from_value(value)?;
                Ok(Parsed::Header(header))
            } else {
                Err(CodecError::Unrecognized)
            }
        }
        Value::Array(arr) => classify_array(arr),
        _ => Err(CodecError::Unrecognized),
    }
}

fn classify_array(arr: Vec<Value>) -> Result<Parsed, CodecError> {
    if arr.len() < 3 {
        return Err(CodecError::Unrecognized);
    }

    if arr[0] == Value::String("exit".to_string()) {
        let code = arr[1].as_i64().ok_or(CodecError::Unrecognized)?;
        let session_id = arr[2].as_str().ok_or(CodecError::Unrecognized)?.to_string();
        return Ok(Parsed::Event(RecordedEvent::Exit { code, session_id }));
    }

    let t = arr[0].as_f64().ok_or(CodecError::Unrecognized)?;
    let kind = arr[1].as_str().ok_or(CodecError::Unrecognized)?;
    let payload = arr[2].as_str().ok_or(CodecError::Unrecognized)?;

    match kind {
        "o" => Ok(Parsed::Event(RecordedEvent::Output {
            t,
            payload: payload.to_string(),
        })),
        "i" => Ok(Parsed::Event(RecordedEvent::Input {
            t,
            payload: payload.to_string(),
        })),
        "r" => {
            let (cols, rows) = parse_dims(payload).ok_or(CodecError::Unrecognized)?;
            Ok(Parsed::Event(RecordedEvent::Resize { t, cols, rows }))
        }
        _ => Err(CodecError::Unrecognized),
    }
}

/// Parses a `"COLSxROWS"` resize payload into `(cols, rows)`.
pub fn parse_dims(s: &str) -> Option<(u32, u32)> {
    let (cols, rows) = s.split_once('x')?;
    Some((cols.parse().ok()?, rows.parse().ok()?))
}
