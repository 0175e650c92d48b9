//! Loading harness configuration from disk.

mod common;

use common::init_test_logging;
use gridtest_common::config::EnvParser;
use gridtest_common::{ErrorCode, HarnessConfig};
use std::io::Write;
use std::time::Duration;

#[test]
fn loads_toml_file() {
    init_test_logging();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
broker_host = "wallaby.example.com"
broker_port = 5673
username = "grid"
namespace = "com.example.grid"
preload_snapshot = "baseline"
activation_timeout_secs = 120
schedd_name = "SCHEDD000@cm"
"#
    )
    .unwrap();

    let config = HarnessConfig::from_file(file.path()).unwrap();
    assert_eq!(config.broker_url(), "grid@wallaby.example.com:5673");
    assert_eq!(config.namespace, "com.example.grid");
    assert_eq!(config.preload_snapshot.as_deref(), Some("baseline"));
    assert_eq!(config.activation_timeout(), Duration::from_secs(120));
    assert_eq!(config.schedd_name.as_deref(), Some("SCHEDD000@cm"));
    // unspecified fields keep their defaults
    assert_eq!(config.snapshot_prefix, "gridtest");
    assert!(config.validate().is_ok());
}

#[test]
fn malformed_file_is_config_error() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "broker_port = \"not a number\"\n").unwrap();

    let err = HarnessConfig::from_file(&path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn missing_file_is_config_error() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let err = HarnessConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigInvalid);
}

#[test]
fn file_then_environment() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "namespace = \"from.file\"\nno_restore = true\n").unwrap();

    let mut config = HarnessConfig::from_file(&path).unwrap();
    let mut env = EnvParser::from_vars([
        ("GRIDTEST_NO_RESTORE", "false"),
        ("GRIDTEST_COLLECTOR_HOST", "cm.example:9618"),
    ]);
    config.apply_env(&mut env).unwrap();

    assert_eq!(config.namespace, "from.file");
    assert!(config.restore());
    assert_eq!(config.collector_host.as_deref(), Some("cm.example:9618"));
}
