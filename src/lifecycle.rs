//! Lifecycle Controller — coordinates graceful shutdown.
//!
//! The distilled design leaned on a process-exit hook; this implementation
//! uses an explicit [`tokio_util::sync::CancellationToken`] driven by
//! `SIGINT`/`SIGTERM` instead; a test can cancel the token directly
//! without touching the process, and it mirrors the pack's own pattern
//! for tearing down background watchers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::registry::Registry;

/// Waits for `SIGINT` or `SIGTERM`, then cancels `token`.
///
/// Intended to be spawned once at startup: `tokio::spawn(lifecycle::watch_for_shutdown(token))`.
pub async fn watch_for_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => log::error!("[lifecycle] failed to install SIGTERM handler: {e}"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("[lifecycle] received SIGINT, shutting down"),
        _ = terminate => log::info!("[lifecycle] received SIGTERM, shutting down"),
    }

    token.cancel();
}

/// Tears down every `WatcherInfo` in `registry`, closing OS watch handles.
///
/// Individual subscriber sinks are not explicitly closed here — the HTTP
/// layer owns their termination (the response future being dropped as the
/// process exits is enough).
pub async fn shutdown(registry: &Arc<Registry>) {
    log::info!("[lifecycle] closing all session watchers");
    registry.close_all().await;
}
