use chrono::{DateTime, Local};
use serde::Serialize;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::device::{DeviceDescriptor, DeviceError, DeviceGuard, HidBackend};

/// One input report as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawReport {
    pub data: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl RawReport {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            received_at: Local::now(),
        }
    }
}

/// What the collector forwards to the session
#[derive(Debug)]
pub enum CollectorMessage {
    Report(RawReport),
    /// Terminal; nothing follows it
    Failed(DeviceError),
}

// Read loop tuning
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub read_timeout_ms: i32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 100,
        }
    }
}

// Lifecycle of the blocking reader: Opening -> Streaming
pub trait CollectionState: private::Sealed {}

#[derive(Debug, Clone)]
pub struct Opening;

#[derive(Debug, Clone)]
pub struct Streaming;

impl CollectionState for Opening {}
impl CollectionState for Streaming {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Opening {}
    impl Sealed for super::Streaming {}
}

pub struct ReportCollector<S: CollectionState> {
    // Device to open
    descriptor: DeviceDescriptor,

    // Open handle, present once streaming
    device: Option<DeviceGuard>,

    settings: CollectorSettings,

    // Channel to the session, in arrival order
    report_sender: mpsc::Sender<CollectorMessage>,

    // Cancelled by the session on disconnect
    cancel: CancellationToken,

    state: PhantomData<S>,
}

impl<S: CollectionState> ReportCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }
}

impl ReportCollector<Opening> {
    pub fn create(
        descriptor: DeviceDescriptor,
        settings: Option<CollectorSettings>,
        report_sender: mpsc::Sender<CollectorMessage>,
        cancel: CancellationToken,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        debug!(
            "Creating report collector for {:04x}:{:04x} with settings: {:?}",
            descriptor.vendor_id, descriptor.product_id, settings
        );
        Self {
            descriptor,
            device: None,
            settings,
            report_sender,
            cancel,
            state: PhantomData,
        }
    }

    // Open the device handle and transition to Streaming state
    pub fn open(
        mut self,
        backend: &dyn HidBackend,
    ) -> Result<ReportCollector<Streaming>, DeviceError> {
        info!(
            "Opening device {:04x}:{:04x}{}",
            self.descriptor.vendor_id,
            self.descriptor.product_id,
            self.descriptor
                .path
                .as_deref()
                .map(|p| format!(" ({})", p))
                .unwrap_or_default()
        );

        let source = backend
            .open(self.descriptor.vendor_id, self.descriptor.product_id)
            .map_err(|e| {
                error!("Failed to open device: {}", e);
                e
            })?;
        self.device = Some(DeviceGuard::new(source));

        debug!("Device open, transitioning to Streaming state");
        Ok(ReportCollector {
            descriptor: self.descriptor,
            device: self.device,
            settings: self.settings,
            report_sender: self.report_sender,
            cancel: self.cancel,
            state: PhantomData,
        })
    }
}

impl ReportCollector<Streaming> {
    /// Blocking read loop; returns once cancelled, on a transport error or when
    /// the session stops listening. The device is closed before returning.
    pub fn run(mut self) {
        info!("Starting report collection loop");

        let mut device = match self.device.take() {
            Some(device) => device,
            None => {
                error!("Streaming collector has no device handle");
                let _ = self
                    .report_sender
                    .blocking_send(CollectorMessage::Failed(DeviceError::Closed));
                return;
            }
        };

        // For performance monitoring
        let mut report_count: u64 = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(30);

        while !self.cancel.is_cancelled() {
            match device.read_report(self.settings.read_timeout_ms) {
                Ok(Some(data)) => {
                    report_count += 1;
                    let report = RawReport::new(data);
                    // Blocks while the session is busy so no report is dropped
                    if self
                        .report_sender
                        .blocking_send(CollectorMessage::Report(report))
                        .is_err()
                    {
                        debug!("Session stopped listening, ending collection");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    error!("Device read failed: {}", e);
                    let _ = self.report_sender.blocking_send(CollectorMessage::Failed(e));
                    break;
                }
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                debug!(
                    "Report collector stats: {} reports in last {} seconds",
                    report_count,
                    log_interval.num_seconds()
                );
                report_count = 0;
                last_log_time = now;
            }
        }

        device.close();
        info!("Report collection stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::hid::mock::MockHidBackend;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0x1234,
            product_id: 0x5678,
            path: None,
        }
    }

    #[tokio::test]
    async fn forwards_reports_in_order_then_failure() {
        let backend = MockHidBackend::new();
        backend.queue_report(vec![1]);
        backend.queue_report(vec![2]);
        backend.queue_error("unplugged");

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let collector = ReportCollector::<Opening>::create(descriptor(), None, tx, cancel)
            .open(&backend)
            .unwrap();
        tokio::task::spawn_blocking(move || collector.run())
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(CollectorMessage::Report(r)) if r.data == vec![1]));
        assert!(matches!(rx.recv().await, Some(CollectorMessage::Report(r)) if r.data == vec![2]));
        assert!(matches!(
            rx.recv().await,
            Some(CollectorMessage::Failed(DeviceError::Unavailable(_)))
        ));
        assert!(rx.recv().await.is_none());
        assert_eq!(backend.opened(), vec![(0x1234, 0x5678)]);
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_loop_and_closes_device() {
        let backend = MockHidBackend::new();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let collector = ReportCollector::<Opening>::create(
            descriptor(),
            Some(CollectorSettings { read_timeout_ms: 1 }),
            tx,
            cancel.clone(),
        )
        .open(&backend)
        .unwrap();
        assert_eq!(collector.settings().read_timeout_ms, 1);

        let task = tokio::task::spawn_blocking(move || collector.run());
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(backend.closes(), 1);
    }
}
