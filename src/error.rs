//! Typed error hierarchy for the stream core.
//!
//! Every fallible component returns a narrow error type; [`StreamError`] is
//! the umbrella a caller at the Subscriber Registry / HTTP boundary actually
//! has to handle. Variants line up with the taxonomy documented for the
//! error handling design: callers can match on kind instead of parsing
//! messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error parsing or classifying one line of the recording format.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The line is not valid JSON.
    #[error("invalid JSON on line: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The line parsed as JSON but matched neither header nor event shape.
    #[error("line did not match header or event shape")]
    Unrecognized,
}

/// Error reading or writing per-session metadata.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem operation failed.
    #[error("session store I/O error: {0}")]
    Io(#[from] io::Error),

    /// The record's JSON was unreadable; treated as absent by readers.
    #[error("session record at {0} is corrupt: {1}")]
    Corrupt(PathBuf, serde_json::Error),

    /// `save` was asked to write a record that doesn't already exist on disk.
    #[error("no existing session record for session {0}; refusing to create one")]
    NotFound(String),
}

/// Error loading and validating [`crate::config::StreamConfig`] at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was set but couldn't be parsed.
    #[error("invalid value for {var}: {message}")]
    InvalidValue {
        /// The environment variable name.
        var: &'static str,
        /// Human-readable explanation of why it was rejected.
        message: String,
    },

    /// The configured sessions directory doesn't exist and couldn't be created.
    #[error("sessions directory {0} does not exist and could not be created: {1}")]
    SessionsDirUnavailable(PathBuf, io::Error),
}

/// Umbrella error for the stream core's public operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// I/O failure reading the recording file (stat, positional read, watcher setup).
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// The event codec rejected a line badly enough to abort the whole operation
    /// (individual malformed lines are skipped, not surfaced here).
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Session metadata store failure.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// A file watcher could not be established for a session.
    #[error("failed to watch {path}: {source}")]
    Watch {
        /// Path the watcher was being set up for.
        path: PathBuf,
        /// Underlying `notify` error.
        source: notify::Error,
    },
}
