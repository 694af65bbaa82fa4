//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/snipsync/config.toml)
//! 3. Environment variables (SNIPSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::{RelayConfig, TransportConfig};

/// Environment variable prefix
const ENV_PREFIX: &str = "SNIPSYNC";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Relay URL peers connect to
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Address `snipsync relay` listens on
    #[serde(default = "default_relay_bind_addr")]
    pub relay_bind_addr: String,

    /// Seconds to wait for the relay during connect and join
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Largest number of peers the relay admits to one session
    #[serde(default = "default_max_peers_per_session")]
    pub max_peers_per_session: usize,

    /// Name recorded as `updated_by` on snippets
    #[serde(default)]
    pub display_name: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            relay_bind_addr: default_relay_bind_addr(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            max_peers_per_session: default_max_peers_per_session(),
            display_name: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SNIPSYNC_RELAY_URL, SNIPSYNC_LOG_LEVEL, ...)
    /// 2. Config file (~/.config/snipsync/config.toml or SNIPSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `--config` when given, otherwise the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_RELAY_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.relay_url = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_RELAY_BIND", ENV_PREFIX)) {
            if !val.is_empty() {
                self.relay_bind_addr = val;
            }
        }

        // Unparseable values are ignored
        if let Ok(val) = std::env::var(format!("{}_HANDSHAKE_TIMEOUT", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.handshake_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_DISPLAY_NAME", ENV_PREFIX)) {
            self.display_name = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with SNIPSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snipsync")
            .join("config.toml")
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Settings for joining sessions as a peer
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            relay_url: self.relay_url.clone(),
            handshake_timeout: self.handshake_timeout(),
        }
    }

    /// Settings for running the relay
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            bind_addr: self.relay_bind_addr.clone(),
            max_peers_per_session: self.max_peers_per_session,
            handshake_timeout: self.handshake_timeout(),
            ..RelayConfig::default()
        }
    }

    /// Name to record on snippets: configured name, else the login name
    pub fn author(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:4444".to_string()
}

fn default_relay_bind_addr() -> String {
    "127.0.0.1:4444".to_string()
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_max_peers_per_session() -> usize {
    32
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "SNIPSYNC_RELAY_URL",
        "SNIPSYNC_RELAY_BIND",
        "SNIPSYNC_HANDSHAKE_TIMEOUT",
        "SNIPSYNC_DISPLAY_NAME",
        "SNIPSYNC_LOG_LEVEL",
        "SNIPSYNC_CONFIG",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay_url, "ws://127.0.0.1:4444");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_peers_per_session, 32);
        assert!(config.display_name.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_derived_configs() {
        let config = Config {
            relay_url: "wss://relay.example.com".to_string(),
            relay_bind_addr: "0.0.0.0:9000".to_string(),
            handshake_timeout_secs: 3,
            max_peers_per_session: 4,
            ..Config::default()
        };

        let transport = config.transport_config();
        assert_eq!(transport.relay_url, "wss://relay.example.com");
        assert_eq!(transport.handshake_timeout, Duration::from_secs(3));

        let relay = config.relay_config();
        assert_eq!(relay.bind_addr, "0.0.0.0:9000");
        assert_eq!(relay.max_peers_per_session, 4);
    }

    #[test]
    fn test_env_override_relay_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("SNIPSYNC_RELAY_URL", "ws://relay:4444");
        config.apply_env_overrides();
        assert_eq!(config.relay_url, "ws://relay:4444");

        // Empty string keeps the current value
        env::set_var("SNIPSYNC_RELAY_URL", "");
        config.apply_env_overrides();
        assert_eq!(config.relay_url, "ws://relay:4444");
    }

    #[test]
    fn test_env_override_timeout_ignores_garbage() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("SNIPSYNC_HANDSHAKE_TIMEOUT", "soon");
        config.apply_env_overrides();
        assert_eq!(config.handshake_timeout_secs, 10);

        env::set_var("SNIPSYNC_HANDSHAKE_TIMEOUT", "2");
        config.apply_env_overrides();
        assert_eq!(config.handshake_timeout_secs, 2);
    }

    #[test]
    fn test_env_override_display_name() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("SNIPSYNC_DISPLAY_NAME", "alice");
        config.apply_env_overrides();
        assert_eq!(config.display_name.as_deref(), Some("alice"));
        assert_eq!(config.author(), "alice");

        env::set_var("SNIPSYNC_DISPLAY_NAME", "");
        config.apply_env_overrides();
        assert!(config.display_name.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            relay_url = "ws://example.com:4444"
            display_name = "bob"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.relay_url, "ws://example.com:4444");
        assert_eq!(config.display_name.as_deref(), Some("bob"));
        // Missing keys fall back to defaults
        assert_eq!(config.relay_bind_addr, "127.0.0.1:4444");
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            display_name: Some("carol".to_string()),
            log_level: "debug".to_string(),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_with_cli_override(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_path_env_override() {
        let _guard = EnvGuard::new(ENV_VARS);

        assert!(Config::config_file_path().ends_with("snipsync/config.toml"));

        env::set_var("SNIPSYNC_CONFIG", "/tmp/snipsync-test.toml");
        assert_eq!(
            Config::config_file_path(),
            PathBuf::from("/tmp/snipsync-test.toml")
        );
    }
}
