//! Controller configuration catalogue
//!
//! Configurations live on disk grouped by vendor:
//!
//! ```text
//! <root>/<vendor>.toml            vendor-level configuration
//! <root>/<vendor>/<model>.toml    one file per device model
//! ```
//!
//! Every configuration is parsed and validated once, then served from an
//! in-memory cache for the lifetime of the catalogue.

pub mod controller_config;

pub use controller_config::{
    ButtonSpec, ConfigParseError, ControllerConfig, JoystickSpec, PinRef, StatusLabel, StatusSpec,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const CONFIG_EXTENSION: &str = "toml";

/// Environment variable consulted for the catalogue root
pub const CONTROLLERS_DIR_ENV: &str = "GAMEPAD_CONTROLLERS_DIR";
const DEFAULT_CONTROLLERS_DIR: &str = "controllers";

#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("The controller configuration for \"{key}\" does not exist")]
    ConfigNotFound { key: String },

    #[error("The vendor \"{vendor}\" does not exist")]
    VendorNotFound { vendor: String },

    #[error("Invalid catalogue key \"{key}\"")]
    InvalidKey { key: String },

    #[error("Could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration \"{key}\" is invalid: {reason}")]
    InvalidConfig { key: String, reason: String },
}

/// Loads and caches controller configurations by vendor and model key
#[derive(Debug)]
pub struct ConfigCatalogue {
    root: PathBuf,
    cache: RwLock<HashMap<String, Arc<ControllerConfig>>>,
}

impl ConfigCatalogue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("Opening controller catalogue at {}", root.display());
        Self {
            root,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Catalogue root from the environment, falling back to `./controllers`
    pub fn default_root() -> PathBuf {
        std::env::var_os(CONTROLLERS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTROLLERS_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads the vendor-level configuration `<root>/<vendor>.toml`
    pub async fn load_vendor(
        &self,
        vendor: &str,
    ) -> Result<Arc<ControllerConfig>, CatalogueError> {
        validate_key(vendor)?;
        let path = self.root.join(format!("{}.{}", vendor, CONFIG_EXTENSION));
        self.load_cached(vendor.to_string(), path).await
    }

    /// Loads the model configuration `<root>/<vendor>/<model>.toml`
    pub async fn load_model(
        &self,
        vendor: &str,
        model: &str,
    ) -> Result<Arc<ControllerConfig>, CatalogueError> {
        validate_key(vendor)?;
        validate_key(model)?;
        let path = self
            .root
            .join(vendor)
            .join(format!("{}.{}", model, CONFIG_EXTENSION));
        self.load_cached(format!("{}/{}", vendor, model), path).await
    }

    /// Model keys filed under a vendor, in catalogue order (sorted by name)
    pub async fn list_models(&self, vendor: &str) -> Result<Vec<String>, CatalogueError> {
        validate_key(vendor)?;
        let dir = self.root.join(vendor);

        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CatalogueError::VendorNotFound {
                    vendor: vendor.to_string(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogueError::VendorNotFound {
                    vendor: vendor.to_string(),
                })
            }
            Err(source) => return Err(CatalogueError::Io { path: dir, source }),
        }

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| CatalogueError::Io {
                path: dir.clone(),
                source,
            })?;

        let mut models = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(CatalogueError::Io {
                        path: dir.clone(),
                        source,
                    })
                }
            };

            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CONFIG_EXTENSION) {
                debug!("Skipping non-configuration entry {}", path.display());
                continue;
            }
            match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) if validate_key(stem).is_ok() => models.push(stem.to_string()),
                _ => warn!("Skipping configuration with unusable name {}", path.display()),
            }
        }

        models.sort();
        debug!("Vendor {} has {} models: {:?}", vendor, models.len(), models);
        Ok(models)
    }

    /// Number of configurations currently cached
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn load_cached(
        &self,
        key: String,
        path: PathBuf,
    ) -> Result<Arc<ControllerConfig>, CatalogueError> {
        if let Some(config) = self.cache.read().await.get(&key) {
            debug!("Configuration {} served from cache", key);
            return Ok(config.clone());
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogueError::ConfigNotFound { key })
            }
            Err(source) => return Err(CatalogueError::Io { path, source }),
        };

        let config = match ControllerConfig::from_toml(&content) {
            Ok(config) => config,
            Err(ConfigParseError::Toml(source)) => {
                return Err(CatalogueError::Parse { path, source })
            }
            Err(ConfigParseError::Invalid(reason)) => {
                return Err(CatalogueError::InvalidConfig { key, reason })
            }
        };

        info!(
            "Loaded configuration {} ({:04x}:{:04x}) with {} joysticks, {} buttons, {} statuses",
            key,
            config.vendor_id,
            config.product_id,
            config.joysticks.len(),
            config.buttons.len(),
            config.statuses.len()
        );

        // A concurrent loader may have won the race; keep whichever landed first.
        let mut cache = self.cache.write().await;
        let config = cache.entry(key).or_insert_with(|| Arc::new(config)).clone();
        Ok(config)
    }
}

fn validate_key(key: &str) -> Result<(), CatalogueError> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if invalid {
        return Err(CatalogueError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PAD: &str = r#"
vendorID = 1
productID = 2
[[buttons]]
name = "a"
pin = 0
value = 1
"#;

    fn catalogue_with(files: &[(&str, &str)]) -> (TempDir, ConfigCatalogue) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let catalogue = ConfigCatalogue::new(dir.path());
        (dir, catalogue)
    }

    #[tokio::test]
    async fn loads_vendor_and_model_configs() {
        let (_dir, catalogue) = catalogue_with(&[("acme.toml", PAD), ("acme/pad.toml", PAD)]);

        let vendor = catalogue.load_vendor("acme").await.unwrap();
        let model = catalogue.load_model("acme", "pad").await.unwrap();
        assert_eq!(vendor.buttons[0].name, "a");
        assert_eq!(*vendor, *model);
        assert_eq!(catalogue.cached_len().await, 2);
    }

    #[tokio::test]
    async fn cached_config_survives_storage_removal() {
        let (dir, catalogue) = catalogue_with(&[("acme/pad.toml", PAD)]);

        let first = catalogue.load_model("acme", "pad").await.unwrap();
        std::fs::remove_file(dir.path().join("acme/pad.toml")).unwrap();
        let second = catalogue.load_model("acme", "pad").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn missing_config_is_reported_by_key() {
        let (_dir, catalogue) = catalogue_with(&[("acme/pad.toml", PAD)]);

        match catalogue.load_model("acme", "stick").await {
            Err(CatalogueError::ConfigNotFound { key }) => assert_eq!(key, "acme/stick"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            catalogue.load_vendor("acme").await,
            Err(CatalogueError::ConfigNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn lists_models_in_name_order() {
        let (_dir, catalogue) = catalogue_with(&[
            ("acme/zeta.toml", PAD),
            ("acme/alpha.toml", PAD),
            ("acme/README.md", "not a config"),
        ]);

        let models = catalogue.list_models("acme").await.unwrap();
        assert_eq!(models, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn unknown_vendor_directory() {
        let (_dir, catalogue) = catalogue_with(&[("acme.toml", PAD)]);

        assert!(matches!(
            catalogue.list_models("globex").await,
            Err(CatalogueError::VendorNotFound { .. })
        ));
        assert!(matches!(
            catalogue.list_models("acme.toml").await,
            Err(CatalogueError::VendorNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_path_like_keys() {
        let (_dir, catalogue) = catalogue_with(&[]);

        for key in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                catalogue.load_vendor(key).await,
                Err(CatalogueError::InvalidKey { .. })
            ));
        }
        assert!(matches!(
            catalogue.load_model("acme", "..").await,
            Err(CatalogueError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_and_invalid_configs_are_rejected() {
        let duplicate = "vendorID = 1\nproductID = 2\n[[buttons]]\nname = \"a\"\npin = 0\nvalue = 1\n[[buttons]]\nname = \"a\"\npin = 1\nvalue = 1\n";
        let (_dir, catalogue) = catalogue_with(&[
            ("acme/broken.toml", "vendorID = \"one\""),
            ("acme/dupe.toml", duplicate),
        ]);

        assert!(matches!(
            catalogue.load_model("acme", "broken").await,
            Err(CatalogueError::Parse { .. })
        ));
        assert!(matches!(
            catalogue.load_model("acme", "dupe").await,
            Err(CatalogueError::InvalidConfig { .. })
        ));
        assert_eq!(catalogue.cached_len().await, 0);
    }
}
