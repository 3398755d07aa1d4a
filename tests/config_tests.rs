//! Integration tests for configuration loading

use promptcast::config::Config;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.server.base_url, "http://127.0.0.1:8000");
    assert_eq!(config.connection.heartbeat_interval(), Duration::from_secs(30));
    assert_eq!(config.connection.liveness_timeout(), Duration::from_secs(90));
    assert!(config.connection.token_in_query);
    assert_eq!(config.reconnect.max_attempts, 5);
    assert_eq!(config.timer.tick_interval(), Duration::from_secs(1));
}

#[test]
fn test_load_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        [server]
        base_url = "https://class.example.org"

        [connection]
        heartbeat_interval_secs = 10
        token_in_query = false

        [reconnect]
        max_delay_ms = 5000
        "#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();

    assert_eq!(config.server.base_url, "https://class.example.org");
    assert_eq!(config.connection.heartbeat_interval(), Duration::from_secs(10));
    assert!(!config.connection.token_in_query);
    assert_eq!(config.reconnect.max_delay_ms, 5000);
    assert_eq!(config.reconnect.base_delay_ms, 1000);
}

#[test]
fn test_invalid_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[server\nbase_url = 3").unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid config"));
}

#[test]
fn test_config_path_is_namespaced() {
    let path = Config::config_path();
    assert!(path.ends_with("promptcast/config.toml"));
}

#[test]
fn test_zero_periods_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    for body in [
        "[connection]\nheartbeat_interval_secs = 0\n",
        "[connection]\nliveness_timeout_secs = 0\n",
        "[timer]\ntick_interval_ms = 0\n",
    ] {
        std::fs::write(&path, body).unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config"), "{}", body);
        assert!(format!("{:#}", err).contains("must be at least 1"), "{}", body);
    }

    assert!(Config::default().validate().is_ok());
}
