//! Server settings loaded from `config.json`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// PEM private key used to decrypt the login block
    pub rsa_key_file: PathBuf,
    /// Directory searched for `<session>.cam` / `<session>.cam.gz`
    pub recordings_dir: PathBuf,
    /// Played when the requested session has no recording of its own
    pub default_recording: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub status_interval_ms: u64,
    pub read_timeout_secs: u64,
    pub grace_period_secs: u64,
    pub command_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7172,
            rsa_key_file: PathBuf::from("key.pem"),
            recordings_dir: PathBuf::from("recordings"),
            default_recording: None,
            poll_interval_ms: 5,
            status_interval_ms: 100,
            read_timeout_secs: 10,
            grace_period_secs: 5,
            command_queue: 32,
        }
    }
}

impl Config {
    /// Default location, e.g. `~/.config/camplayer/config.json`
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("camplayer").join("config.json"))
    }

    /// Load from an explicit path, or from the default location if present
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": 7200, "default_recording": "demo.cam.gz" }}"#).unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 7200);
        assert_eq!(config.default_recording, Some(PathBuf::from("demo.cam.gz")));
        assert_eq!(config.status_interval(), Duration::from_millis(100));
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/config.json"))).is_err());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "port = 7200").unwrap();
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
