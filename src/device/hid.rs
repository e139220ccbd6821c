//! HID transport seam
//!
//! Enumeration and report reading are external capabilities. [`HidBackend`]
//! abstracts them so resolution and sessions run against real hardware through
//! [`HidApiBackend`] or against scripted devices through [`mock::MockHidBackend`].

use hidapi::{HidApi, HidDevice};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Largest input report read in one call
pub const MAX_REPORT_SIZE: usize = 256;

/// One currently attached HID device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HidDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: String,
}

impl HidDeviceInfo {
    pub fn new(vendor_id: u16, product_id: u16, path: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            path: path.into(),
        }
    }
}

/// Transport level failures
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("Device handle is closed")]
    Closed,

    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Blocking source of raw input reports for one open device
pub trait ReportSource: Send {
    /// Waits up to `timeout_ms` for the next report. `Ok(None)` means the wait
    /// timed out without data.
    fn read_report(&mut self, timeout_ms: i32) -> Result<Option<Vec<u8>>, DeviceError>;

    /// Releases the underlying handle. Calling it again is a no-op.
    fn close(&mut self);
}

/// Device enumeration plus opening by identifiers
pub trait HidBackend: Send + Sync {
    fn devices(&self) -> Result<Vec<HidDeviceInfo>, DeviceError>;

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn ReportSource>, DeviceError>;
}

/// [`HidBackend`] on top of the system hidapi library
pub struct HidApiBackend {
    api: Mutex<HidApi>,
}

impl HidApiBackend {
    pub fn new() -> Result<Self, DeviceError> {
        info!("Initializing hidapi");
        let api = HidApi::new()?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl HidBackend for HidApiBackend {
    fn devices(&self) -> Result<Vec<HidDeviceInfo>, DeviceError> {
        let mut api = self.api.lock().unwrap_or_else(|e| e.into_inner());
        api.refresh_devices()?;
        let devices: Vec<HidDeviceInfo> = api
            .device_list()
            .map(|d| {
                HidDeviceInfo::new(
                    d.vendor_id(),
                    d.product_id(),
                    d.path().to_string_lossy().to_string(),
                )
            })
            .collect();
        debug!("Enumerated {} HID devices", devices.len());
        Ok(devices)
    }

    fn open(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn ReportSource>, DeviceError> {
        let api = self.api.lock().unwrap_or_else(|e| e.into_inner());
        let device = api.open(vendor_id, product_id)?;
        info!("Opened HID device {:04x}:{:04x}", vendor_id, product_id);
        Ok(Box::new(HidApiSource {
            device: Some(device),
        }))
    }
}

struct HidApiSource {
    device: Option<HidDevice>,
}

impl ReportSource for HidApiSource {
    fn read_report(&mut self, timeout_ms: i32) -> Result<Option<Vec<u8>>, DeviceError> {
        let device = self.device.as_ref().ok_or(DeviceError::Closed)?;
        let mut buf = [0u8; MAX_REPORT_SIZE];
        let len = device.read_timeout(&mut buf, timeout_ms)?;
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(buf[..len].to_vec()))
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("Closed HID device handle");
        }
    }
}

/// Owns an open [`ReportSource`] and guarantees it is closed exactly once
pub struct DeviceGuard {
    source: Option<Box<dyn ReportSource>>,
}

impl DeviceGuard {
    pub fn new(source: Box<dyn ReportSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub fn read_report(&mut self, timeout_ms: i32) -> Result<Option<Vec<u8>>, DeviceError> {
        match self.source.as_mut() {
            Some(source) => source.read_report(timeout_ms),
            None => Err(DeviceError::Closed),
        }
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if self.source.is_some() {
            warn!("Device handle released by drop");
            self.close();
        }
    }
}

pub mod mock {
    //! Scripted in-memory HID backend

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// One scripted step of a mock report stream
    #[derive(Clone, Debug)]
    pub enum MockRead {
        Report(Vec<u8>),
        Error(String),
    }

    #[derive(Default)]
    struct Shared {
        devices: Mutex<Vec<HidDeviceInfo>>,
        reads: Mutex<VecDeque<MockRead>>,
        opened: Mutex<Vec<(u16, u16)>>,
        enumerations: AtomicUsize,
        closes: AtomicUsize,
    }

    /// Cloneable handle; clones share devices, script and counters
    #[derive(Clone, Default)]
    pub struct MockHidBackend {
        shared: Arc<Shared>,
    }

    impl MockHidBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_devices(devices: Vec<HidDeviceInfo>) -> Self {
            let backend = Self::new();
            *backend.shared.devices.lock().unwrap_or_else(|e| e.into_inner()) = devices;
            backend
        }

        pub fn attach(&self, device: HidDeviceInfo) {
            self.shared
                .devices
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(device);
        }

        pub fn queue_report(&self, report: impl Into<Vec<u8>>) {
            self.push(MockRead::Report(report.into()));
        }

        pub fn queue_error(&self, message: impl Into<String>) {
            self.push(MockRead::Error(message.into()));
        }

        fn push(&self, read: MockRead) {
            self.shared
                .reads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(read);
        }

        pub fn enumerations(&self) -> usize {
            self.shared.enumerations.load(Ordering::SeqCst)
        }

        pub fn opened(&self) -> Vec<(u16, u16)> {
            self.shared
                .opened
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }

        pub fn closes(&self) -> usize {
            self.shared.closes.load(Ordering::SeqCst)
        }
    }

    impl HidBackend for MockHidBackend {
        fn devices(&self) -> Result<Vec<HidDeviceInfo>, DeviceError> {
            self.shared.enumerations.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .shared
                .devices
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone())
        }

        fn open(
            &self,
            vendor_id: u16,
            product_id: u16,
        ) -> Result<Box<dyn ReportSource>, DeviceError> {
            self.shared
                .opened
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((vendor_id, product_id));
            Ok(Box::new(MockSource {
                shared: self.shared.clone(),
                open: true,
            }))
        }
    }

    struct MockSource {
        shared: Arc<Shared>,
        open: bool,
    }

    impl ReportSource for MockSource {
        fn read_report(&mut self, timeout_ms: i32) -> Result<Option<Vec<u8>>, DeviceError> {
            if !self.open {
                return Err(DeviceError::Closed);
            }
            let next = self
                .shared
                .reads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match next {
                Some(MockRead::Report(report)) => Ok(Some(report)),
                Some(MockRead::Error(message)) => Err(DeviceError::Unavailable(message)),
                None => {
                    std::thread::sleep(Duration::from_millis(timeout_ms.clamp(0, 5) as u64));
                    Ok(None)
                }
            }
        }

        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.shared.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
