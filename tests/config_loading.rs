use std::io::Write;
use std::time::Duration;

use parasel_core::config::{AppConfig, ErrorMode};
use parasel_core::error::ParaselError;
use parasel_engine::ExecutionPolicy;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
timeout_secs = 30.0
retry_backoff_secs = 0.5
error_mode = "collect"
max_concurrency = 8

[gateway]
bind = "0.0.0.0:9999"

[log]
filter = "parasel=debug"

[hooks]
on_step_start = ["echo starting"]
on_step_end = []
on_step_error = ["logger -t parasel failed"]
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.timeout_secs, Some(30.0));
    assert_eq!(config.engine.retry_backoff_secs, 0.5);
    assert_eq!(config.engine.error_mode, ErrorMode::Collect);
    assert_eq!(config.engine.max_concurrency, Some(8));
    assert_eq!(config.gateway.bind, "0.0.0.0:9999");
    assert_eq!(config.log.filter, "parasel=debug");

    let hooks = config.hooks.as_ref().expect("hooks section");
    assert_eq!(hooks.on_step_start, vec!["echo starting"]);
    assert!(hooks.on_step_end.is_empty());
    assert_eq!(hooks.on_step_error.len(), 1);

    let policy = ExecutionPolicy::from_config(&config.engine);
    assert_eq!(policy.timeout, Some(Duration::from_secs(30)));
    assert_eq!(policy.retry_backoff, Duration::from_millis(500));
    assert_eq!(policy.error_mode, ErrorMode::Collect);
    assert_eq!(policy.max_concurrency, Some(8));
}

#[test]
fn test_load_expands_env_vars() {
    std::env::set_var("PARASEL_TEST_BIND", "127.0.0.1:4321");
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[gateway]\nbind = \"${PARASEL_TEST_BIND}\"\n")
        .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.gateway.bind, "127.0.0.1:4321");
    std::env::remove_var("PARASEL_TEST_BIND");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ParaselError::ConfigNotFound(_)));
}

#[test]
fn test_malformed_file_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine\ntimeout_secs = ").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, ParaselError::Config(_)));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = AppConfig::parse("[engine]\nmax_concurrency = 3\n").unwrap();
    let text = toml::to_string_pretty(&config).unwrap();
    let reparsed = AppConfig::parse(&text).unwrap();
    assert_eq!(reparsed.engine.max_concurrency, Some(3));
    assert_eq!(reparsed.gateway.bind, config.gateway.bind);
}
