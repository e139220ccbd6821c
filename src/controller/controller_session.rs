//! Controller Session - connection lifecycle and event delivery
//!
//! Ties resolution, the report collector and the frame decoder together:
//!
//! ```text
//! identifier ─► DeviceResolver ─► ReportCollector ─[RawReport]→ FrameDecoder ─► EventBus
//!                                  (blocking)       (mpsc)
//! ```
//!
//! A session only exists once resolution succeeded and the device is open. It
//! ends on [`ControllerSession::disconnect`], on drop, on a transport error or on
//! a report that does not fit the configuration. Whatever the cause, subscribers
//! of `closed` are notified exactly once.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::frame_decoder::{ControlSnapshot, DecodeError, FrameDecoder};
use super::report_collector::{
    CollectorMessage, CollectorSettings, Opening, RawReport, ReportCollector,
};
use crate::catalogue::ConfigCatalogue;
use crate::device::{
    DeviceError, DeviceIdentity, DeviceResolver, HidBackend, IdOverrides, IdentityError,
    Resolution, ResolveError,
};
use crate::events::{BusError, Channel, Event, EventBus, LifecycleKind, Payload, SubscriptionId};

/// Options accepted by [`ControllerSession::connect`]
///
/// # Examples
///
/// ```rust
/// use gamepad_decode::controller::SessionOptions;
///
/// // Rebadged pad that reports its own product ID
/// let options = SessionOptions {
///     product_id: Some(0xc21d),
///     ..SessionOptions::default()
/// };
/// assert!(!options.debug);
/// ```
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Log every report's pin values. Decoding is unaffected.
    pub debug: bool,

    /// Replaces the configuration's vendor ID
    pub vendor_id: Option<u16>,

    /// Replaces the configuration's product ID
    pub product_id: Option<u16>,

    /// Upper bound for one blocking HID read. Also bounds how long the
    /// collector takes to notice a disconnect.
    pub read_timeout_ms: i32,

    /// Reports buffered between collector and decoder before the collector
    /// waits
    pub report_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debug: false,
            vendor_id: None,
            product_id: None,
            read_timeout_ms: 100,
            report_buffer: 1000,
        }
    }
}

impl SessionOptions {
    fn overrides(&self) -> IdOverrides {
        IdOverrides {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }
}

/// Errors that end or prevent a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Opening the device or reading from it failed
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// A report did not fit the configuration
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Session is closed")]
    Closed,
}

pub struct ControllerSession {
    resolution: Resolution,
    decoder: FrameDecoder,
    bus: EventBus,
    options: SessionOptions,
    reports: mpsc::Receiver<CollectorMessage>,
    cancel: CancellationToken,
    collector: Option<JoinHandle<()>>,
    announced: bool,
    closed: bool,
}

impl ControllerSession {
    /// Parses `identifier` (`"vendor"` or `"vendor/model"`) and connects
    pub async fn connect(
        identifier: &str,
        options: SessionOptions,
        catalogue: &ConfigCatalogue,
        backend: Arc<dyn HidBackend>,
    ) -> Result<Self, SessionError> {
        let identity: DeviceIdentity = identifier.parse()?;
        Self::connect_identity(&identity, options, catalogue, backend).await
    }

    /// Resolves the device, opens it and starts collecting reports
    ///
    /// Fails without side effects if resolution or opening fails.
    pub async fn connect_identity(
        identity: &DeviceIdentity,
        options: SessionOptions,
        catalogue: &ConfigCatalogue,
        backend: Arc<dyn HidBackend>,
    ) -> Result<Self, SessionError> {
        info!("Connecting to \"{}\" with options: {:?}", identity, options);

        let resolution = DeviceResolver::new(catalogue, backend.as_ref())
            .resolve(identity, options.overrides())
            .await?;

        let (report_sender, reports) = mpsc::channel(options.report_buffer.max(1));
        let cancel = CancellationToken::new();
        let settings = CollectorSettings {
            read_timeout_ms: options.read_timeout_ms,
        };
        let collector = ReportCollector::<Opening>::create(
            resolution.descriptor.clone(),
            Some(settings),
            report_sender,
            cancel.clone(),
        )
        .open(backend.as_ref())?;

        let collector = tokio::task::spawn_blocking(move || collector.run());
        debug!("Report collector task spawned");

        let decoder = FrameDecoder::new(resolution.config.clone());
        let bus = EventBus::new(Channel::producible(&resolution.config));

        info!("Connected to {}", resolution.identity);
        Ok(Self {
            resolution,
            decoder,
            bus,
            options,
            reports,
            cancel,
            collector: Some(collector),
            announced: false,
            closed: false,
        })
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.resolution.identity
    }

    /// Every channel this session can publish on
    pub fn channels(&self) -> Vec<Channel> {
        self.bus.channels()
    }

    pub fn subscribe<F>(
        &mut self,
        channel: &str,
        handler: F,
    ) -> Result<SubscriptionId, SessionError>
    where
        F: FnMut(&Payload) -> color_eyre::Result<()> + Send + 'static,
    {
        Ok(self.bus.subscribe(channel, handler)?)
    }

    pub fn subscribe_channel<F>(
        &mut self,
        channel: Channel,
        handler: F,
    ) -> Result<SubscriptionId, SessionError>
    where
        F: FnMut(&Payload) -> color_eyre::Result<()> + Send + 'static,
    {
        Ok(self.bus.subscribe_channel(channel, handler)?)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Current decoder state
    pub fn snapshot(&self) -> ControlSnapshot {
        self.decoder.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Token that disconnects the session when cancelled, usable from other tasks
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Decodes one report and publishes its events
    ///
    /// A report that does not fit the configuration closes the session.
    pub fn process_report(&mut self, report: &RawReport) -> Result<Vec<Event>, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        if self.options.debug {
            info!(
                "[{}] {}",
                report.received_at.format("%H:%M:%S.%3f"),
                format_pin_dump(&report.data)
            );
        }

        let events = match self.decoder.process(&report.data) {
            Ok(events) => events,
            Err(e) => {
                self.close(Some(e.to_string()));
                return Err(e.into());
            }
        };

        for event in &events {
            debug!("Publishing {}", event);
            let delivery = self.bus.publish_event(event);
            if delivery.failed > 0 {
                warn!("{} handlers failed for {}", delivery.failed, event.channel);
            }
        }
        Ok(events)
    }

    /// Waits for the next report and processes it
    ///
    /// Returns `Ok(None)` once the session is closed. A transport error closes
    /// the session and is returned once.
    pub async fn next_events(&mut self) -> Result<Option<Vec<Event>>, SessionError> {
        if self.closed {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            debug!("Shutdown requested, dropping buffered reports");
            self.close(None);
            return Ok(None);
        }
        self.announce_connected();

        // Cancellation wins over reports already waiting in the channel
        let cancel = self.cancel.clone();
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Shutdown requested while waiting for a report");
                self.close(None);
                return Ok(None);
            }
            message = self.reports.recv() => message,
        };

        match message {
            Some(CollectorMessage::Report(report)) => self.process_report(&report).map(Some),
            Some(CollectorMessage::Failed(e)) => {
                error!("Transport failed, closing session: {}", e);
                self.close(Some(e.to_string()));
                Err(e.into())
            }
            None => {
                self.close(Some("report stream ended".to_string()));
                Ok(None)
            }
        }
    }

    /// Processes reports until the session closes
    pub async fn run(&mut self) -> Result<(), SessionError> {
        info!("Session {} running", self.resolution.identity);
        while self.next_events().await?.is_some() {}
        info!(
            "Session {} finished after {} reports",
            self.resolution.identity,
            self.decoder.frames_processed()
        );
        Ok(())
    }

    /// Stops collection and notifies `closed` subscribers. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.closed {
            debug!("Session already closed");
            return;
        }
        info!("Disconnecting from {}", self.resolution.identity);
        self.close(None);
    }

    /// Disconnects and waits until the device handle has been released
    pub async fn shutdown(mut self) {
        self.disconnect();
        if let Some(collector) = self.collector.take() {
            if let Err(e) = collector.await {
                error!("Report collector task failed: {}", e);
            }
        }
    }

    fn announce_connected(&mut self) {
        if !self.announced {
            self.announced = true;
            self.bus
                .publish(&Channel::Lifecycle(LifecycleKind::Connected), &Payload::None);
        }
    }

    fn close(&mut self, reason: Option<String>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.reports.close();
        self.bus.publish(
            &Channel::Lifecycle(LifecycleKind::Closed),
            &Payload::Closed { reason },
        );
    }
}

impl Drop for ControllerSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Session {} dropped while open", self.resolution.identity);
            self.close(None);
        }
    }
}

/// Formats a report like `Input pin values:  0:128 |   1:127 |   `
pub fn format_pin_dump(data: &[u8]) -> String {
    let mut message = String::from("Input pin values:  ");
    for (pin, value) in data.iter().enumerate() {
        message.push_str(&format!("{}:{} |   ", pin, value));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::hid::mock::MockHidBackend;
    use crate::device::HidDeviceInfo;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PAD: &str = r#"
vendorID = 4660
productID = 22136

[[joysticks]]
name = "left"
x = { pin = 0 }
y = { pin = 1 }

[[buttons]]
name = "a"
pin = 2
value = 1
"#;

    fn catalogue() -> (TempDir, ConfigCatalogue) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("acme")).unwrap();
        std::fs::write(dir.path().join("acme/pad.toml"), PAD).unwrap();
        let catalogue = ConfigCatalogue::new(dir.path());
        (dir, catalogue)
    }

    async fn connect(
        identifier: &str,
        catalogue: &ConfigCatalogue,
        backend: &MockHidBackend,
    ) -> Result<ControllerSession, SessionError> {
        let backend: Arc<dyn HidBackend> = Arc::new(backend.clone());
        ControllerSession::connect(identifier, options(), catalogue, backend).await
    }

    fn options() -> SessionOptions {
        SessionOptions {
            read_timeout_ms: 1,
            ..SessionOptions::default()
        }
    }

    fn record(session: &mut ControllerSession, log: &Arc<Mutex<Vec<String>>>) {
        for channel in session.channels() {
            let log = log.clone();
            let name = channel.to_string();
            session
                .subscribe_channel(channel, move |payload: &Payload| {
                    log.lock().unwrap().push(format!("{} {:?}", name, payload));
                    Ok(())
                })
                .unwrap();
        }
    }

    #[test]
    fn pin_dump_lists_every_byte() {
        assert_eq!(
            format_pin_dump(&[128, 7]),
            "Input pin values:  0:128 |   1:7 |   "
        );
    }

    #[tokio::test]
    async fn vendor_connect_opens_detected_device() {
        let (_dir, catalogue) = catalogue();
        let backend = MockHidBackend::with_devices(vec![HidDeviceInfo::new(4660, 22136, "hid0")]);

        let session = connect("acme", &catalogue, &backend).await.unwrap();

        assert_eq!(session.identity().to_string(), "acme/pad");
        assert_eq!(backend.opened(), vec![(4660, 22136)]);
        session.shutdown().await;
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn resolution_failure_opens_nothing() {
        let (_dir, catalogue) = catalogue();
        let backend = MockHidBackend::new();

        let err = connect("acme", &catalogue, &backend).await.err().unwrap();

        assert!(matches!(err, SessionError::Resolve(ref e) if e.is_missing_hardware()));
        assert!(backend.opened().is_empty());
    }

    #[tokio::test]
    async fn reports_flow_to_subscribers_then_transport_error_closes() {
        let (_dir, catalogue) = catalogue();
        let backend = MockHidBackend::new();
        backend.queue_report(vec![10, 10, 0]);
        backend.queue_report(vec![20, 10, 1]);
        backend.queue_error("unplugged");

        let mut session = connect("acme/pad", &catalogue, &backend).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&mut session, &log);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, SessionError::Device(DeviceError::Unavailable(_))));
        assert!(session.is_closed());
        assert!(session.next_events().await.unwrap().is_none());

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "connected None".to_string(),
                "left:move Joystick(JoystickState { x: 20, y: 10 })".to_string(),
                "a:press None".to_string(),
                "closed Closed { reason: Some(\"Device unavailable: unplugged\") }".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_notifies_once() {
        let (_dir, catalogue) = catalogue();
        let backend = MockHidBackend::new();
        let mut session = connect("acme/pad", &catalogue, &backend).await.unwrap();
        let closed = Arc::new(Mutex::new(0));
        let counter = closed.clone();
        session
            .subscribe("closed", move |_: &Payload| {
                *counter.lock().unwrap() += 1;
                Ok(())
            })
            .unwrap();

        session.disconnect();
        session.disconnect();
        assert!(matches!(
            session.process_report(&RawReport::new(vec![0, 0, 0])),
            Err(SessionError::Closed)
        ));
        session.shutdown().await;

        assert_eq!(*closed.lock().unwrap(), 1);
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn short_report_is_fatal() {
        let (_dir, catalogue) = catalogue();
        let backend = MockHidBackend::new();
        backend.queue_report(vec![1, 2]);
        let mut session = connect("acme/pad", &catalogue, &backend).await.unwrap();

        let err = session.next_events().await.unwrap_err();
        assert!(matches!(err, SessionError::Decode(DecodeError::PinOutOfRange { pin: 2, .. })));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn shutdown_token_drops_buffered_reports() {
        let (_dir, catalogue) = catalogue();
        let backend = MockHidBackend::new();
        backend.queue_report(vec![10, 10, 0]);
        backend.queue_report(vec![20, 10, 1]);
        backend.queue_report(vec![30, 10, 0]);
        let mut session = connect("acme/pad", &catalogue, &backend).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&mut session, &log);

        // Let the collector move every report into the channel
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        session.shutdown_token().cancel();
        session.run().await.unwrap();

        assert!(session.is_closed());
        assert_eq!(session.snapshot(), ControlSnapshot::default());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["closed Closed { reason: None }".to_string()]
        );
        session.shutdown().await;
        assert_eq!(backend.closes(), 1);
    }

    #[tokio::test]
    async fn unknown_channel_subscription_is_refused() {
        let (_dir, catalogue) = catalogue();
        let backend = MockHidBackend::new();
        let mut session = connect("acme/pad", &catalogue, &backend).await.unwrap();

        assert!(matches!(
            session.subscribe("right:move", |_: &Payload| Ok(())),
            Err(SessionError::Bus(BusError::UnknownChannel(_)))
        ));
    }
}
