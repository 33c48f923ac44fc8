use bytewatt_bridge::config::Config;
use std::fs;

fn valid_config() -> Config {
    let mut cfg = Config::default();
    cfg.account.username = "owner@example.com".to_string();
    cfg.account.password = "secret".to_string();
    cfg
}

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = valid_config();
    cfg.account.station_id = "st-42".to_string();
    cfg.poll.statistics_every = 4;
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.account.station_id, "st-42");
    assert_eq!(loaded.poll.statistics_every, 4);
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn partial_yaml_fills_defaults() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        b"account:\n  username: owner@example.com\n  password: secret\npoll:\n  interval_ms: 15000\n",
    )
    .unwrap();
    let cfg = Config::from_file(tmp.path()).unwrap();
    assert_eq!(cfg.poll.interval_ms, 15_000);
    assert_eq!(cfg.poll.statistics_every, 10);
    assert_eq!(cfg.retry.max_attempts, 5);
    assert_eq!(cfg.web.port, 8089);
    assert!(cfg.validate().is_ok());
}

#[test]
fn config_validation_errors() {
    let mut cfg = valid_config();
    assert!(cfg.validate().is_ok());

    // Missing credentials
    cfg.account.username.clear();
    assert!(cfg.validate().is_err());

    cfg = valid_config();
    cfg.account.password.clear();
    assert!(cfg.validate().is_err());

    // Not an http(s) URL
    cfg = valid_config();
    cfg.account.base_url = "ftp://monitor".to_string();
    assert!(cfg.validate().is_err());

    // Poll interval zero
    cfg = valid_config();
    cfg.poll.interval_ms = 0;
    assert!(cfg.validate().is_err());

    // Backoff cap below base
    cfg = valid_config();
    cfg.retry.base_delay_ms = 5_000;
    cfg.retry.max_delay_ms = 1_000;
    assert!(cfg.validate().is_err());

    cfg = valid_config();
    cfg.poll.statistics_tolerance_kwh = -1.0;
    assert!(cfg.validate().is_err());
}

#[test]
fn saved_redacted_config_has_no_password() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    valid_config().redacted().save_to_file(tmp.path()).unwrap();
    let text = fs::read_to_string(tmp.path()).unwrap();
    assert!(!text.contains("secret"));
    assert!(text.contains("owner@example.com"));
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}
