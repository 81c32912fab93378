//! Configuration loading and persistence.
//!
//! Handles reading and writing the chatline configuration file.
//! The password is never written to disk; supply it through
//! `CHATLINE_PASSWORD` or set it on the loaded config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::chunk::MessageStyle;
use crate::constants::{
    DEFAULT_LOGIN_URL, DEFAULT_PM_PORT, DEFAULT_PM_SERVER, MAX_MESSAGE_LEN, RECONNECT_DELAY,
};

const CONFIG_FILE: &str = "config.json";

/// Configuration for a chatline client.
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// PM server host.
    pub server: String,
    /// PM server port.
    pub port: u16,
    /// Wrap the connection in TLS.
    pub tls: bool,
    /// Login endpoint of the HTTP token service.
    pub login_url: String,
    /// Account name.
    pub username: String,
    /// Account password - NOT serialized to disk.
    #[serde(skip)]
    pub password: String,
    /// Maximum characters per outbound message chunk.
    pub max_message_len: usize,
    /// Delay between reconnection attempts, in seconds.
    pub reconnect_delay_secs: u64,
    /// Style attached to outbound messages.
    pub style: MessageStyle,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("max_message_len", &self.max_message_len)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("style", &self.style)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_PM_SERVER.to_string(),
            port: DEFAULT_PM_PORT,
            tls: false,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            username: String::new(),
            password: String::new(),
            max_message_len: MAX_MESSAGE_LEN,
            reconnect_delay_secs: RECONNECT_DELAY.as_secs(),
            style: MessageStyle::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `CHATLINE_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir + `chatline`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("CHATLINE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("chatline")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = Self::load_from(&dir).unwrap_or_else(|e| {
            log::debug!("[Config] Using defaults: {e:#}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read `config.json` from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        if config.max_message_len == 0 {
            log::warn!("[Config] max_message_len must be > 0, using {MAX_MESSAGE_LEN}");
            config.max_message_len = MAX_MESSAGE_LEN;
        }
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    /// Values that do not parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup("CHATLINE_SERVER") {
            self.server = server;
        }

        if let Some(port) = lookup("CHATLINE_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("[Config] Ignoring invalid CHATLINE_PORT={port:?}"),
            }
        }

        if let Some(tls) = lookup("CHATLINE_TLS") {
            match tls.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.tls = true,
                "0" | "false" | "no" | "off" => self.tls = false,
                _ => log::warn!("[Config] Ignoring invalid CHATLINE_TLS={tls:?}"),
            }
        }

        if let Some(username) = lookup("CHATLINE_USERNAME") {
            self.username = username;
        }

        if let Some(password) = lookup("CHATLINE_PASSWORD") {
            self.password = password;
        }
    }

    /// Persists the current configuration to the config directory.
    /// Note: the password is NOT saved.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Write `config.json` into `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Reconnection backoff as a [`Duration`].
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Chunk length for outbound messages; `0` falls back to the default.
    #[must_use]
    pub fn chunk_len(&self) -> usize {
        if self.max_message_len == 0 {
            MAX_MESSAGE_LEN
        } else {
            self.max_message_len
        }
    }

    /// True if both username and password are set.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}
