//! # Runtime Configuration Module
//!
//! Tuning for the coroutine pools and the dispatch path, loaded from YAML
//! and/or environment variables.
//!
//! ## Environment Variables
//!
//! | Variable                        | Field               | Default   |
//! |---------------------------------|---------------------|-----------|
//! | `RESUMABLE_STACK_SIZE`          | `stack_size`        | `0x10000` |
//! | `RESUMABLE_IO_WORKERS`          | `io_workers`        | `4`       |
//! | `RESUMABLE_DISPATCH_WORKERS`    | `dispatch_workers`  | `4`       |
//! | `RESUMABLE_RESUME_TIMEOUT_MS`   | `resume_timeout_ms` | none      |
//! | `RESUMABLE_SHUTDOWN_GRACE_MS`   | `shutdown_grace_ms` | `5000`    |
//!
//! `RESUMABLE_STACK_SIZE` accepts decimal (`65536`) or hexadecimal (`0x10000`).
//! With no resume timeout a suspended exchange waits until it is settled,
//! cancelled, or the dispatcher shuts down.
//!
//! ## Usage
//!
//! ```rust
//! use resumable::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_yaml_str("io_workers: 2\nresume_timeout_ms: 250\n")
//!     .unwrap();
//! assert_eq!(config.io_workers, 2);
//! assert_eq!(config.stack_size, 0x10000);
//! ```
//!
//! ## Stack size
//!
//! Every pool worker is a `may` coroutine with its own stack. Memory use is
//! roughly `stack_size × (io_workers + dispatch_workers)`; handlers with deep
//! call chains need the larger end (`0x10000` and up).

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

const DEFAULT_STACK_SIZE: usize = 0x10000;
const DEFAULT_IO_WORKERS: usize = 4;
const DEFAULT_DISPATCH_WORKERS: usize = 4;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;

/// Runtime configuration for a dispatcher and its pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Stack size for pool coroutines in bytes
    pub stack_size: usize,
    /// Workers delivering resumptions and running future listeners
    pub io_workers: usize,
    /// Workers re-polling woken coroutine handlers
    pub dispatch_workers: usize,
    /// Cancel a suspended exchange (503) if it is not settled in time
    pub resume_timeout_ms: Option<u64>,
    /// How long shutdown waits for cancelled exchanges to drain
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            io_workers: DEFAULT_IO_WORKERS,
            dispatch_workers: DEFAULT_DISPATCH_WORKERS,
            resume_timeout_ms: None,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a YAML document; missing fields keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("invalid runtime configuration")
    }

    /// Load a YAML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        let config = Self::from_yaml_str(&text)
            .with_context(|| format!("failed to parse runtime config {}", path.display()))?;
        Ok(config.with_env_overrides())
    }

    /// Apply any `RESUMABLE_*` variables that are set and parse.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parsed("RESUMABLE_STACK_SIZE", parse_size) {
            self.stack_size = v;
        }
        if let Some(v) = env_parsed("RESUMABLE_IO_WORKERS", |s| s.parse().ok()) {
            self.io_workers = v;
        }
        if let Some(v) = env_parsed("RESUMABLE_DISPATCH_WORKERS", |s| s.parse().ok()) {
            self.dispatch_workers = v;
        }
        if let Ok(raw) = env::var("RESUMABLE_RESUME_TIMEOUT_MS") {
            let raw = raw.trim();
            if raw.is_empty() || raw == "0" || raw.eq_ignore_ascii_case("none") {
                self.resume_timeout_ms = None;
            } else if let Ok(ms) = raw.parse() {
                self.resume_timeout_ms = Some(ms);
            }
        }
        if let Some(v) = env_parsed("RESUMABLE_SHUTDOWN_GRACE_MS", |s| s.parse().ok()) {
            self.shutdown_grace_ms = v;
        }
        self
    }

    #[must_use]
    pub fn resume_timeout(&self) -> Option<Duration> {
        self.resume_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn env_parsed<T>(key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    env::var(key).ok().and_then(|s| parse(s.trim()))
}

/// Parse a byte count given in decimal or `0x` hexadecimal.
#[must_use]
pub fn parse_size(s: &str) -> Option<usize> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}
