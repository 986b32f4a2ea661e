//! Configuration — environment-driven settings, validated eagerly at
//! startup rather than discovered as panics later.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

const VAR_BIND_ADDR: &str = "VT_BIND_ADDR";
const VAR_SESSIONS_DIR: &str = "VT_SESSIONS_DIR";
const VAR_SSE_KEEPALIVE_SECS: &str = "VT_SSE_KEEPALIVE_SECS";
const VAR_MAX_BACKLOG_EVENTS: &str = "VT_MAX_BACKLOG_EVENTS";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4020";
const DEFAULT_SESSIONS_DIR: &str = "./sessions";
const DEFAULT_SSE_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_MAX_BACKLOG_EVENTS: u64 = 0;

/// Settings for one run of the service, loaded once from `VT_`-prefixed
/// environment variables.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Root directory containing one subdirectory per session.
    pub sessions_dir: PathBuf,
    /// Interval between SSE keepalive comment frames.
    pub sse_keepalive_secs: u64,
    /// Optional cap on events replayed during a prune pass. `0` means
    /// unbounded (the default).
    pub max_backlog_events: u64,
}

impl StreamConfig {
    /// Loads configuration from the environment, applying documented
    /// defaults for anything unset, and validates it eagerly.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = parse_env_or(VAR_BIND_ADDR, DEFAULT_BIND_ADDR, |s| {
            s.parse::<SocketAddr>()
                .map_err(|e| format!("not a valid socket address: {e}"))
        })?;

        let sessions_dir = PathBuf::from(env::var(VAR_SESSIONS_DIR).unwrap_or_else(|_| DEFAULT_SESSIONS_DIR.to_string()));
        if !sessions_dir.exists() {
            fs::create_dir_all(&sessions_dir)
                .map_err(|e| ConfigError::SessionsDirUnavailable(sessions_dir.clone(), e))?;
        }

        let sse_keepalive_secs = parse_env_or(VAR_SSE_KEEPALIVE_SECS, &DEFAULT_SSE_KEEPALIVE_SECS.to_string(), |s| {
            s.parse::<u64>().map_err(|e| format!("not a valid integer: {e}"))
        })?;

        let max_backlog_events = parse_env_or(VAR_MAX_BACKLOG_EVENTS, &DEFAULT_MAX_BACKLOG_EVENTS.to_string(), |s| {
            s.parse::<u64>().map_err(|e| format!("not a valid integer: {e}"))
        })?;

        Ok(StreamConfig {
            bind_addr,
            sessions_dir,
            sse_keepalive_secs,
            max_backlog_events,
        })
    }
}

fn parse_env_or<T>(var: &'static str, default: &str, parse: impl Fn(&str) -> Result<T, String>) -> Result<T, ConfigError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    parse(&raw).map_err(|message| ConfigError::InvalidValue { var, message })
}
