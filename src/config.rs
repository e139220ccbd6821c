use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::catalogue::ConfigCatalogue;
use crate::controller::SessionOptions;

const CONFIG_DIR: &str = "gamepad-decode";
const CONFIG_FILE: &str = "config.toml";

/// Optional application settings, read from `<config dir>/gamepad-decode/config.toml`
///
/// Every field may be omitted; command line flags take precedence.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the controller catalogue
    pub controllers_dir: Option<PathBuf>,
    pub debug: bool,
    pub read_timeout_ms: i32,
    pub report_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            controllers_dir: None,
            debug: options.debug,
            read_timeout_ms: options.read_timeout_ms,
            report_buffer: options.report_buffer,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the file at `path`, or the defaults if it does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        if config.read_timeout_ms <= 0 {
            return Err(eyre!(
                "read_timeout_ms must be positive, got {}",
                config.read_timeout_ms
            ));
        }

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Catalogue root: `cli`, then this file, then the environment, then `./controllers`
    pub fn catalogue_root(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.controllers_dir.clone())
            .unwrap_or_else(ConfigCatalogue::default_root)
    }

    /// Session options seeded from this file, without ID overrides
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            debug: self.debug,
            read_timeout_ms: self.read_timeout_ms,
            report_buffer: self.report_buffer,
            ..SessionOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.read_timeout_ms, 100);
        assert_eq!(config.report_buffer, 1000);
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debug = true\ncontrollers_dir = \"/opt/pads\"\n").unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert!(config.debug);
        assert_eq!(config.read_timeout_ms, 100);
        assert_eq!(config.catalogue_root(None), PathBuf::from("/opt/pads"));
        assert_eq!(config.catalogue_root(Some(PathBuf::from("cli"))), PathBuf::from("cli"));

        let options = config.session_options();
        assert!(options.debug);
        assert_eq!(options.vendor_id, None);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debug = \"maybe\"").unwrap();
        assert!(AppConfig::load(&path).await.is_err());

        std::fs::write(&path, "read_timeout_ms = 0").unwrap();
        assert!(AppConfig::load(&path).await.is_err());
    }
}
