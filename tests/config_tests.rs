#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Tests for runtime and logging configuration loading
//!
//! These tests touch process-wide environment variables, so they serialize
//! on `ENV_MUTEX` and clear every `RESUMABLE_*` variable they use.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use resumable::logging::{LogConfig, LogFormat};
use resumable::RuntimeConfig;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

const VARS: [&str; 10] = [
    "RESUMABLE_STACK_SIZE",
    "RESUMABLE_IO_WORKERS",
    "RESUMABLE_DISPATCH_WORKERS",
    "RESUMABLE_RESUME_TIMEOUT_MS",
    "RESUMABLE_SHUTDOWN_GRACE_MS",
    "RESUMABLE_LOG_LEVEL",
    "RESUMABLE_LOG_FORMAT",
    "RESUMABLE_LOG_FILTER",
    "RESUMABLE_LOG_ASYNC",
    "RESUMABLE_LOG_LOCATION",
];

fn clean_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
fn test_defaults_without_env() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env();

    let config = RuntimeConfig::from_env();
    assert_eq!(config, RuntimeConfig::default());
    assert_eq!(config.stack_size, 0x10000);
    assert_eq!(config.resume_timeout(), None);
    assert_eq!(config.shutdown_grace(), Duration::from_millis(5000));
}

#[test]
fn test_env_overrides() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env();
    std::env::set_var("RESUMABLE_STACK_SIZE", "0x8000");
    std::env::set_var("RESUMABLE_IO_WORKERS", "2");
    std::env::set_var("RESUMABLE_DISPATCH_WORKERS", " 6 ");
    std::env::set_var("RESUMABLE_RESUME_TIMEOUT_MS", "1500");

    let config = RuntimeConfig::from_env();
    clean_env();

    assert_eq!(config.stack_size, 0x8000);
    assert_eq!(config.io_workers, 2);
    assert_eq!(config.dispatch_workers, 6);
    assert_eq!(config.resume_timeout(), Some(Duration::from_millis(1500)));
}

#[test]
fn test_invalid_env_values_are_ignored() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env();
    std::env::set_var("RESUMABLE_IO_WORKERS", "many");
    std::env::set_var("RESUMABLE_STACK_SIZE", "0xnope");

    let config = RuntimeConfig::from_env();
    clean_env();

    assert_eq!(config.io_workers, RuntimeConfig::default().io_workers);
    assert_eq!(config.stack_size, RuntimeConfig::default().stack_size);
}

#[test]
fn test_env_can_disable_timeout_from_file() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "resume_timeout_ms: 250").unwrap();
    writeln!(file, "io_workers: 3").unwrap();

    let from_file = RuntimeConfig::load(file.path()).unwrap();
    assert_eq!(from_file.resume_timeout(), Some(Duration::from_millis(250)));
    assert_eq!(from_file.io_workers, 3);

    std::env::set_var("RESUMABLE_RESUME_TIMEOUT_MS", "none");
    let overridden = RuntimeConfig::load(file.path()).unwrap();
    clean_env();

    assert_eq!(overridden.resume_timeout(), None);
    assert_eq!(overridden.io_workers, 3);
}

#[test]
fn test_load_reports_path_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.yaml");

    let missing = RuntimeConfig::load(&path).unwrap_err();
    assert!(format!("{missing:#}").contains("runtime.yaml"));

    std::fs::write(&path, "io_workers: [1, 2]\n").unwrap();
    let invalid = RuntimeConfig::load(&path).unwrap_err();
    assert!(format!("{invalid:#}").contains("failed to parse runtime config"));
}

#[test]
fn test_log_config_from_env() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_env();

    let defaults = LogConfig::from_env();
    assert_eq!(defaults.log_level, "info");
    assert_eq!(defaults.format, LogFormat::Json);
    assert!(defaults.async_logging);

    std::env::set_var("RESUMABLE_LOG_LEVEL", "debug");
    std::env::set_var("RESUMABLE_LOG_FORMAT", "pretty");
    std::env::set_var("RESUMABLE_LOG_FILTER", "resumable::coroutine=trace");
    std::env::set_var("RESUMABLE_LOG_ASYNC", "false");
    std::env::set_var("RESUMABLE_LOG_LOCATION", "true");
    let config = LogConfig::from_env();
    clean_env();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.format, LogFormat::Pretty);
    assert_eq!(
        config.target_filter.as_deref(),
        Some("resumable::coroutine=trace")
    );
    assert!(!config.async_logging);
    assert!(config.include_location);
}
