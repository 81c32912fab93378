//! Integration tests for configuration loading from the environment.

use std::env;
use std::fs;
use std::sync::Mutex;

use tempfile::TempDir;

use chatline::Config;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 6] = [
    "CHATLINE_CONFIG_DIR",
    "CHATLINE_SERVER",
    "CHATLINE_PORT",
    "CHATLINE_TLS",
    "CHATLINE_USERNAME",
    "CHATLINE_PASSWORD",
];

/// Helper to set up a temporary config directory for tests
fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().unwrap();

    for var in VARS {
        env::remove_var(var);
    }
    env::set_var("CHATLINE_CONFIG_DIR", temp_dir.path());

    (temp_dir, guard)
}

#[test]
fn test_load_without_file_uses_defaults() {
    let (_dir, _guard) = setup_test_env();
    let config = Config::load().unwrap();
    assert_eq!(config.server, "c1.chatango.com");
    assert_eq!(config.port, 443);
    assert!(config.username.is_empty());
}

#[test]
fn test_env_overrides_file() {
    let (dir, _guard) = setup_test_env();
    fs::write(
        dir.path().join("config.json"),
        serde_json::to_string_pretty(&serde_json::json!({
            "server": "c2.example.com",
            "port": 8080,
            "username": "from-file"
        }))
        .unwrap(),
    )
    .unwrap();

    env::set_var("CHATLINE_PORT", "5222");
    env::set_var("CHATLINE_PASSWORD", "secret");

    let config = Config::load().unwrap();
    assert_eq!(config.server, "c2.example.com");
    assert_eq!(config.port, 5222);
    assert_eq!(config.username, "from-file");
    assert_eq!(config.password, "secret");
    assert!(config.has_credentials());
}

#[test]
fn test_save_writes_into_config_dir() {
    let (dir, _guard) = setup_test_env();
    let mut config = Config::default();
    config.username = "alice".into();
    config.password = "secret".into();
    config.save().unwrap();

    let written = fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(written.contains("alice"));
    assert!(!written.contains("secret"));
}

#[test]
fn test_corrupt_file_falls_back_to_defaults() {
    let (dir, _guard) = setup_test_env();
    fs::write(dir.path().join("config.json"), "{ not json").unwrap();
    env::set_var("CHATLINE_SERVER", "localhost");

    let config = Config::load().unwrap();
    assert_eq!(config.server, "localhost");
    assert_eq!(config.port, 443);
}
