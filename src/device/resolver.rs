//! Identifier to configuration resolution
//!
//! A qualified identifier (`vendor/model`) names its configuration directly. A
//! bare vendor is resolved by scanning that vendor's models in catalogue order
//! against the attached devices; the first model with a matching
//! `(vendorID, productID)` wins. A vendor without a model directory may still be
//! described by a single vendor-level configuration, which is used as is. Caller
//! overrides are applied after detection.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::hid::{DeviceError, HidBackend, HidDeviceInfo};
use super::identity::DeviceIdentity;
use crate::catalogue::{CatalogueError, ConfigCatalogue, ControllerConfig};

/// Caller supplied identifiers that replace the packaged ones
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdOverrides {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

/// What to open once resolution succeeded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Path of the attached device that matched during a vendor scan. Unset when
    /// an override changed the identifiers to open.
    pub path: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Resolution {
    /// Qualified `vendor/model` identity of the selected configuration
    pub identity: DeviceIdentity,
    pub config: Arc<ControllerConfig>,
    pub descriptor: DeviceDescriptor,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error("A product for the vendor \"{vendor}\" could not be detected (checked {candidates:?})")]
    NoMatchingDeviceAttached {
        vendor: String,
        candidates: Vec<String>,
    },

    #[error("Failed to enumerate devices: {0}")]
    Enumeration(#[source] DeviceError),
}

impl ResolveError {
    /// The identifier names nothing in the catalogue; fix the identifier or catalogue
    pub fn is_missing_configuration(&self) -> bool {
        matches!(
            self,
            ResolveError::Catalogue(
                CatalogueError::ConfigNotFound { .. } | CatalogueError::VendorNotFound { .. }
            )
        )
    }

    /// The vendor is configured but none of its models is plugged in
    pub fn is_missing_hardware(&self) -> bool {
        matches!(self, ResolveError::NoMatchingDeviceAttached { .. })
    }
}

// Identity, configuration and matched device path
type Detected = (DeviceIdentity, Arc<ControllerConfig>, Option<String>);

pub struct DeviceResolver<'a> {
    catalogue: &'a ConfigCatalogue,
    backend: &'a dyn HidBackend,
}

impl<'a> DeviceResolver<'a> {
    pub fn new(catalogue: &'a ConfigCatalogue, backend: &'a dyn HidBackend) -> Self {
        Self { catalogue, backend }
    }

    pub async fn resolve(
        &self,
        identity: &DeviceIdentity,
        overrides: IdOverrides,
    ) -> Result<Resolution, ResolveError> {
        info!("Resolving controller \"{}\"", identity);

        let (identity, config, path) = match identity.model_key() {
            Some(model) => {
                let config = self
                    .catalogue
                    .load_model(identity.vendor_key(), model)
                    .await?;
                (identity.clone(), config, None)
            }
            None => self.detect(identity.vendor_key()).await?,
        };

        let detected_ids = (config.vendor_id, config.product_id);
        let config = if overrides == IdOverrides::default() {
            config
        } else {
            let overridden = config.with_overrides(overrides.vendor_id, overrides.product_id);
            info!(
                "Applying ID overrides: {:04x}:{:04x} -> {:04x}:{:04x}",
                config.vendor_id, config.product_id, overridden.vendor_id, overridden.product_id
            );
            Arc::new(overridden)
        };

        // The detected path belongs to the packaged IDs only
        let path = path.filter(|_| detected_ids == (config.vendor_id, config.product_id));
        let descriptor = DeviceDescriptor {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            path,
        };
        info!(
            "Resolved \"{}\" to {:04x}:{:04x}",
            identity, descriptor.vendor_id, descriptor.product_id
        );

        Ok(Resolution {
            identity,
            config,
            descriptor,
        })
    }

    async fn detect(&self, vendor: &str) -> Result<Detected, ResolveError> {
        let models = match self.catalogue.list_models(vendor).await {
            Ok(models) => models,
            Err(CatalogueError::VendorNotFound { .. }) => return self.vendor_level(vendor).await,
            Err(e) => return Err(e.into()),
        };
        let devices = self.backend.devices().map_err(ResolveError::Enumeration)?;
        debug!(
            "Scanning {} models of {} against {} attached devices",
            models.len(),
            vendor,
            devices.len()
        );

        for model in &models {
            let config = self.catalogue.load_model(vendor, model).await?;
            if let Some(device) = find_attached(&devices, &config) {
                info!("Detected {}/{} at {}", vendor, model, device.path);
                return Ok((
                    DeviceIdentity::qualified(vendor, model.as_str()),
                    config,
                    Some(device.path.clone()),
                ));
            }
        }

        warn!("No attached device matches any model of {}", vendor);
        Err(ResolveError::NoMatchingDeviceAttached {
            vendor: vendor.to_string(),
            candidates: models,
        })
    }

    async fn vendor_level(&self, vendor: &str) -> Result<Detected, ResolveError> {
        match self.catalogue.load_vendor(vendor).await {
            Ok(config) => {
                debug!("Using vendor-level configuration for {}", vendor);
                Ok((DeviceIdentity::vendor(vendor), config, None))
            }
            Err(CatalogueError::ConfigNotFound { .. }) => Err(CatalogueError::VendorNotFound {
                vendor: vendor.to_string(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}

fn find_attached<'d>(
    devices: &'d [HidDeviceInfo],
    config: &ControllerConfig,
) -> Option<&'d HidDeviceInfo> {
    devices
        .iter()
        .find(|d| d.vendor_id == config.vendor_id && d.product_id == config.product_id)
}
