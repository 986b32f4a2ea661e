//! HTTP Wiring — exposes the Consumer API (`attach`/`detach`) as an SSE
//! route. This is the only component that talks to the outside HTTP
//! world; the Subscriber Registry and everything below it has no HTTP
//! dependency and is usable as a standalone library.
//!
//! Assumes it is mounted behind the (out-of-scope) auth middleware of the
//! parent service — requests reaching these handlers are already
//! authorized.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::{mpsc, oneshot};

use crate::config::StreamConfig;
use crate::registry::{Registry, SseSink};

/// Shared state handed to every route.
pub struct AppState {
    /// The Subscriber Registry backing every `/stream` route.
    pub registry: Arc<Registry>,
    /// Configuration loaded at startup (only `sse_keepalive_secs` is read
    /// by this layer; the rest informs how `registry` was constructed).
    pub config: StreamConfig,
}

/// Builds the router exposing the Session Stream Core over HTTP.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sessions/:id/stream", get(stream_handler))
        .with_state(state)
}

/// An [`SseSink`] that forwards framed SSE chunks over an unbounded
/// channel to the response body stream.
struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl SseSink for ChannelSink {
    fn write(&mut self, frame: String) -> std::io::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "subscriber channel closed")),
            None => Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "sink already ended")),
        }
    }

    fn on_error(&mut self, err: &std::io::Error) {
        log::debug!("[http] sink write failed: {err}");
    }

    fn end(&mut self) {
        // Dropping the sender closes the channel, which ends the body
        // stream's receive loop below without waiting for `detach`.
        self.tx = None;
    }
}

async fn stream_handler(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> Response {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let sink = ChannelSink { tx: Some(tx) };

    let subscriber_id = match state.registry.attach(&session_id, Box::new(sink)).await {
        Ok(id) => id,
        Err(e) => {
            log::error!("[http] {session_id}: attach failed: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to attach to session").into_response();
        }
    };

    let registry = Arc::clone(&state.registry);
    let session_id_for_cleanup = session_id.clone();
    let (drop_tx, drop_rx) = oneshot::channel::<()>();

    // The HTTP layer must call `detach` exactly once per successful
    // `attach`; this task fires when the body stream below is dropped,
    // whether that's client disconnect or a normal exit-event close.
    tokio::spawn(async move {
        let _ = drop_rx.await;
        registry.detach(&session_id_for_cleanup, subscriber_id).await;
    });

    let keepalive = Duration::from_secs(state.config.sse_keepalive_secs.max(1));

    let body_stream = async_stream::stream! {
        let _drop_guard = drop_tx;
        let mut ticker = tokio::time::interval(keepalive);
        ticker.tick().await; // first tick is immediate; consume it before looping

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(f) => yield Ok::<_, Infallible>(f.into_bytes()),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    yield Ok::<_, Infallible>(b": keepalive\n\n".to_vec());
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|e| {
            log::error!("[http] failed to build SSE response: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to build stream").into_response()
        })
}
