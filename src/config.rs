//! Client configuration from the environment

use crate::engine::EngineOptions;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the answering service, e.g. `http://localhost:8000/api/v1`
    pub backend_url: String,
    pub db_path: PathBuf,
    /// Subject to open at startup
    pub subject: Option<String>,
    pub streaming: bool,
    /// `None` disables the idle timeout
    pub idle_timeout: Option<Duration>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unparsable values fall back
    /// to their defaults
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str, default: u64| -> u64 {
            var(name)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let db_path = var("TUTOR_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".tutor-chat").join("history.db")
            },
            PathBuf::from,
        );

        let streaming = var("TUTOR_STREAMING").map_or(true, |v| {
            !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
        });

        let idle_secs = secs("TUTOR_IDLE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);

        Self {
            backend_url: var("TUTOR_BACKEND_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            db_path,
            subject: var("TUTOR_SUBJECT").filter(|v| !v.trim().is_empty()),
            streaming,
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            request_timeout: Duration::from_secs(secs(
                "TUTOR_REQUEST_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
            connect_timeout: Duration::from_secs(secs(
                "TUTOR_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            streaming: self.streaming,
            idle_timeout: self.idle_timeout,
        }
    }
}
