//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use raknet_relay::config::{RelayConfig, DEFAULT_BAN_THRESHOLD, DEFAULT_IDLE_TIMEOUT};
use raknet_relay::error::ProtocolError;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = RelayConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert_eq!(config.server.listen_address, "0.0.0.0:19132");
    assert_eq!(config.server.upstream_address, "127.0.0.1:19134");
    assert_eq!(config.server.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    assert_eq!(config.guard.ban_threshold, DEFAULT_BAN_THRESHOLD);
    assert_eq!(config.guard.history_len, 5);
}

#[test]
fn test_invalid_upstream_address() {
    let mut config = RelayConfig::default();
    config.server.upstream_address = "not-an-address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid upstream address")));
    assert!(config.server.upstream_addr().is_err());
}

#[test]
fn test_empty_listen_address() {
    let mut config = RelayConfig::default();
    config.server.listen_address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_idle_timeout_bounds() {
    let mut config = RelayConfig::default();
    config.server.idle_timeout = Duration::from_millis(50);
    assert!(config.validate().iter().any(|e| e.contains("Idle timeout too short")));

    config.server.idle_timeout = Duration::from_secs(301);
    assert!(config.validate().iter().any(|e| e.contains("Idle timeout too long")));
}

#[test]
fn test_zero_max_connections() {
    let config = RelayConfig::default_with_overrides(|c| c.server.max_connections = 0);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_datagram_size_bounds() {
    let mut config = RelayConfig::default();
    config.server.max_datagram_size = 100;
    assert!(config.validate().iter().any(|e| e.contains("too small")));

    config.server.max_datagram_size = 70_000;
    assert!(config.validate().iter().any(|e| e.contains("too large")));
}

#[test]
fn test_guard_validation() {
    let config = RelayConfig::default_with_overrides(|c| {
        c.guard.ban_threshold = 0;
        c.guard.history_len = 0;
        c.guard.rate_window = Duration::from_millis(1);
    });
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Ban threshold must be greater than 0")));
    assert!(errors.iter().any(|e| e.contains("History length")));
    assert!(errors.iter().any(|e| e.contains("Rate window too short")));
    assert!(errors.iter().any(|e| e.contains("Noise floor")));
}

#[test]
fn test_protocol_limits_validation() {
    let config = RelayConfig::default_with_overrides(|c| {
        c.protocol.max_decompressed_size = 10;
        c.protocol.max_open_compounds = 0;
        c.protocol.max_fragments_per_compound = 0;
        c.protocol.max_pending_fragment_bytes = 1024;
    });
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max decompressed size too small")));
    assert!(errors.iter().any(|e| e.contains("Max open compounds")));
    assert!(errors.iter().any(|e| e.contains("Max fragments per compound")));
    assert!(errors.iter().any(|e| e.contains("Max pending fragment bytes")));
}

#[test]
fn test_app_name_length() {
    let config = RelayConfig::default_with_overrides(|c| c.logging.app_name = "x".repeat(65));
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Application name too long")));
}

#[test]
fn test_validate_strict_lists_every_problem() {
    let config = RelayConfig::default_with_overrides(|c| {
        c.server.max_connections = 0;
        c.guard.history_len = 0;
    });
    match config.validate_strict() {
        Err(ProtocolError::ConfigError(msg)) => {
            assert!(msg.contains("Max connections"));
            assert!(msg.contains("History length"));
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = RelayConfig::from_toml(
        r#"
        [server]
        upstream_address = "10.1.2.3:19134"
        idle_timeout = 2500

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("partial config should parse");

    assert_eq!(config.server.upstream_address, "10.1.2.3:19134");
    assert_eq!(config.server.idle_timeout, Duration::from_millis(2500));
    assert_eq!(config.server.listen_address, "0.0.0.0:19132");
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(config.guard.ban_threshold, 600);
}

#[test]
fn test_invalid_toml() {
    assert!(matches!(
        RelayConfig::from_toml("[server\nlisten = "),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_example_config_roundtrip() {
    let example = RelayConfig::example_config();
    let parsed = RelayConfig::from_toml(&example).expect("example config should parse");
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.guard.rate_window, Duration::from_millis(1000));
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("raknet-relay-{}.toml", std::process::id()));
    let config = RelayConfig::default_with_overrides(|c| c.guard.ban_threshold = 1200);
    config.save_to_file(&path).unwrap();
    let loaded = RelayConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded.guard.ban_threshold, 1200);
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        RelayConfig::from_file("/definitely/not/here.toml"),
        Err(ProtocolError::ConfigError(_))
    ));
}
