use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::telemetry::logging::{LogConfig, LogLevel};

/// Bridge configuration, read from `PLAUD_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_debug_host")]
    pub debug_host: String,
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    /// Substring of the desktop app's executable path.
    #[serde(default = "default_process_pattern")]
    pub process_pattern: String,
    /// Dotted global path of the app's authenticated fetch function.
    #[serde(default = "default_fetch_function")]
    pub fetch_function: String,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
    #[serde(default = "default_activation_wait_ms")]
    pub activation_wait_ms: u64,
    #[serde(default = "default_content_timeout_ms")]
    pub content_timeout_ms: u64,
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
    #[serde(default = "default_search_candidate_limit")]
    pub search_candidate_limit: u32,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl BridgeConfig {
    /// Defaults stand in for the whole environment when any variable fails to parse.
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_default()
    }

    pub fn try_from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("PLAUD").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map(BridgeConfig::normalize)
    }

    fn normalize(mut self) -> Self {
        self.debug_host = Self::normalize_opt(Some(self.debug_host))
            .unwrap_or_else(default_debug_host);
        self.process_pattern = Self::normalize_opt(Some(self.process_pattern))
            .unwrap_or_else(default_process_pattern);
        self.fetch_function = Self::normalize_opt(Some(self.fetch_function))
            .unwrap_or_else(default_fetch_function);
        self.log_level = Self::normalize_opt(self.log_level.take());
        self.log_file = Self::normalize_opt(self.log_file.take());
        if self.search_concurrency == 0 {
            self.search_concurrency = default_search_concurrency();
        }
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn activation_wait(&self) -> Duration {
        Duration::from_millis(self.activation_wait_ms)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_millis(self.content_timeout_ms)
    }

    pub fn log_config(&self) -> LogConfig {
        let level = self
            .log_level
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or_default();
        LogConfig {
            level,
            file: self.log_file.as_ref().map(PathBuf::from),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debug_host: default_debug_host(),
            debug_port: default_debug_port(),
            process_pattern: default_process_pattern(),
            fetch_function: default_fetch_function(),
            call_timeout_ms: default_call_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            activation_wait_ms: default_activation_wait_ms(),
            content_timeout_ms: default_content_timeout_ms(),
            search_concurrency: default_search_concurrency(),
            search_candidate_limit: default_search_candidate_limit(),
            log_level: None,
            log_file: None,
        }
    }
}

fn default_debug_host() -> String {
    "127.0.0.1".to_string()
}

// Node's inspector port, opened by SIGUSR1.
fn default_debug_port() -> u16 {
    9229
}

fn default_process_pattern() -> String {
    "Plaud.app/Contents/MacOS/Plaud".to_string()
}

fn default_fetch_function() -> String {
    "plaud.request".to_string()
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_socket_timeout_ms() -> u64 {
    5_000
}

fn default_activation_wait_ms() -> u64 {
    1_000
}

fn default_content_timeout_ms() -> u64 {
    30_000
}

fn default_search_concurrency() -> usize {
    5
}

fn default_search_candidate_limit() -> u32 {
    100
}
