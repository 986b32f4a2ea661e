#![warn(missing_docs)]

//! # vibetunnel-stream
//!
//! Tails asciinema-format terminal recording files on disk and fans out
//! live and backlog events to Server-Sent Events (SSE) subscribers.
//!
//! A recording is an append-only JSON-lines file: a header object
//! (`{version, width, height}`) followed by event arrays for output,
//! input, resize, and exit. A newly attached subscriber doesn't want the
//! whole history — it wants the *currently visible* screen, so this crate
//! prunes backlog to whatever followed the most recent terminal-clear
//! control sequence, rewriting the header's dimensions to whatever resize
//! preceded that clear.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vibetunnel_stream::config::StreamConfig;
//! use vibetunnel_stream::http::{self, AppState};
//! use vibetunnel_stream::registry::Registry;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::from_env()?;
//! let registry = Arc::new(Registry::new(config.sessions_dir.clone()));
//! let state = Arc::new(AppState { registry, config });
//! let _router = http::router(state);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! - **Recording** — one append-only JSON-lines file per session.
//! - **Pruning** — skipping backlog to the event after the last clear.
//! - **Subscriber Registry** — one shared Tail Reader per session, fanned
//!   out to however many SSE subscribers are attached.
//!
//! Everything except [`http`] is usable as a standalone library with no
//! HTTP dependency.

/// Environment-driven configuration, validated eagerly at startup.
pub mod config;

/// Typed error hierarchy (`StreamError` and its component-level sources).
pub mod error;

/// Event Codec — parses and classifies one line of the recording format.
pub mod event;

/// Clear Scanner — recognizes the terminal-clear control sequence.
pub mod clear;

/// Pruner — computes the pruned replay for a newly attached subscriber.
pub mod pruner;

/// Tail Reader — watches a recording file for growth and yields new lines.
pub mod tail;

/// Session Info Store — loads and atomically persists per-session metadata.
pub mod store;

/// Subscriber Registry — per-session watcher lifecycle and fan-out.
pub mod registry;

/// SSE Fan-out — frames events as `data: <json>\n\n`.
pub mod sse;

/// Lifecycle Controller — graceful shutdown via signal + cancellation token.
pub mod lifecycle;

/// HTTP Wiring — the `axum` router exposing the Consumer API over SSE.
pub mod http;

pub use error::{CodecError, ConfigError, StoreError, StreamError};
pub use event::{Header, Parsed, RecordedEvent};
pub use registry::{Registry, SseSink};
