//! Configuration driven gamepad report decoding
//!
//! Controller layouts are described by TOML files in a [`catalogue`]. A
//! [`ControllerSession`] resolves a `vendor` or `vendor/model` identifier to a
//! layout and an attached HID device, decodes every input report into
//! edge-triggered events and hands them to subscribers on an [`EventBus`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use gamepad_decode::{ConfigCatalogue, ControllerSession, HidApiBackend, Payload};
//! use gamepad_decode::SessionOptions;
//!
//! # async fn demo() -> color_eyre::Result<()> {
//! let catalogue = ConfigCatalogue::new("controllers");
//! let backend = Arc::new(HidApiBackend::new()?);
//! let options = SessionOptions::default();
//! let mut session = ControllerSession::connect("logitech", options, &catalogue, backend).await?;
//! session.subscribe("A:press", |_: &Payload| {
//!     println!("A pressed");
//!     Ok(())
//! })?;
//! session.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod catalogue;
pub mod config;
pub mod controller;
pub mod device;
pub mod events;

pub use catalogue::{CatalogueError, ConfigCatalogue, ControllerConfig};
pub use config::AppConfig;
pub use controller::{ControllerSession, FrameDecoder, SessionError, SessionOptions};
pub use device::{DeviceIdentity, DeviceResolver, HidApiBackend, HidBackend, ResolveError};
pub use events::{Channel, Event, EventBus, EventKind, Payload};
