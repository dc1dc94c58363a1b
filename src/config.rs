//! Persisted application configuration
//!
//! A small JSON file next to the executable holding the listener ports and
//! the HTTPS settings. Loading never fails: a missing or unreadable file
//! yields the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_HTTP_PORT: &str = "8080";
pub const DEFAULT_RTMP_PORT: &str = "1935";
pub const DEFAULT_SSL_CERT: &str = "cert.pem";
pub const DEFAULT_SSL_KEY: &str = "key.pem";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http_port: String,
    #[serde(default)]
    pub rtmp_port: String,
    /// Serve HTTP over TLS
    #[serde(default)]
    pub ssl_enabled: bool,
    /// Public host name shown in playback URLs
    #[serde(default)]
    pub ssl_domain: String,
    /// PEM certificate chain
    #[serde(default)]
    pub ssl_cert: String,
    /// PEM private key
    #[serde(default)]
    pub ssl_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT.to_string(),
            rtmp_port: DEFAULT_RTMP_PORT.to_string(),
            ssl_enabled: false,
            ssl_domain: String::new(),
            ssl_cert: DEFAULT_SSL_CERT.to_string(),
            ssl_key: DEFAULT_SSL_KEY.to_string(),
        }
    }
}

impl AppConfig {
    /// `config.json` in the executable's directory
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default()
            .join(CONFIG_FILE_NAME)
    }

    /// Read `path`, falling back to defaults for a missing or invalid file
    /// and for empty fields
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No config file, using defaults");
                return Self::default();
            }
        };

        let mut config: Self = match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                return Self::default();
            }
        };

        if config.http_port.is_empty() {
            config.http_port = DEFAULT_HTTP_PORT.to_string();
        }
        if config.rtmp_port.is_empty() {
            config.rtmp_port = DEFAULT_RTMP_PORT.to_string();
        }
        if config.ssl_cert.is_empty() {
            config.ssl_cert = DEFAULT_SSL_CERT.to_string();
        }
        if config.ssl_key.is_empty() {
            config.ssl_key = DEFAULT_SSL_KEY.to_string();
        }
        config
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn http_port(&self) -> Option<u16> {
        self.http_port.parse().ok()
    }

    pub fn rtmp_port(&self) -> Option<u16> {
        self.rtmp_port.parse().ok()
    }

    /// Host shown to viewers: the TLS domain when HTTPS is on
    pub fn display_host(&self) -> String {
        if self.ssl_enabled && !self.ssl_domain.is_empty() {
            self.ssl_domain.clone()
        } else {
            format!("localhost:{}", self.http_port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json"));
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.rtmp_port(), Some(1935));
        assert_eq!(config.http_port(), Some(8080));
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppConfig::load(&path), AppConfig::default());
    }

    #[test]
    fn test_empty_fields_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"http_port": "", "rtmp_port": "1936"}"#).unwrap();

        let config = AppConfig::load(&path);
        assert_eq!(config.http_port, "8080");
        assert_eq!(config.rtmp_port, "1936");

        std::fs::write(&path, r#"{"http_port": "9000"}"#).unwrap();
        let config = AppConfig::load(&path);
        assert_eq!(config.http_port, "9000");
        assert_eq!(config.rtmp_port, "1935");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = AppConfig {
            http_port: "8081".into(),
            rtmp_port: "1940".into(),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"http_port\": \"8081\""));
        assert_eq!(AppConfig::load(&path), config);
    }

    #[test]
    fn test_non_numeric_port() {
        let config = AppConfig {
            http_port: "http".into(),
            ..Default::default()
        };
        assert_eq!(config.http_port(), None);
    }

    #[test]
    fn test_ssl_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = AppConfig {
            ssl_enabled: true,
            ssl_domain: "live.example.org".into(),
            ssl_cert: "/etc/certs/fullchain.pem".into(),
            ssl_key: "/etc/certs/privkey.pem".into(),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.display_host(), "live.example.org");
    }

    #[test]
    fn test_ssl_defaults_for_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"http_port": "8080", "rtmp_port": "1935", "ssl_cert": ""}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path);
        assert!(!config.ssl_enabled);
        assert_eq!(config.ssl_domain, "");
        assert_eq!(config.ssl_cert, DEFAULT_SSL_CERT);
        assert_eq!(config.ssl_key, DEFAULT_SSL_KEY);
        assert_eq!(config.display_host(), "localhost:8080");
    }
}
