use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vibetunnel_stream::config::StreamConfig;
use vibetunnel_stream::http::{self, AppState};
use vibetunnel_stream::lifecycle;
use vibetunnel_stream::registry::Registry;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match StreamConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("[main] configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "[main] starting on {} (sessions dir: {})",
        config.bind_addr,
        config.sessions_dir.display()
    );

    let registry = Arc::new(Registry::new(config.sessions_dir.clone()));
    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        config,
    });

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("[main] failed to bind {bind_addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown_token = CancellationToken::new();
    tokio::spawn(lifecycle::watch_for_shutdown(shutdown_token.clone()));

    let app = http::router(state);
    let shutdown_signal = shutdown_token.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal.cancelled().await;
        })
        .await;

    lifecycle::shutdown(&registry).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[main] server error: {e}");
            ExitCode::FAILURE
        }
    }
}
