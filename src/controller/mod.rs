//! Controller subsystem: from raw HID reports to published events
//!
//! Implements a two-stage processing pipeline:
//!
//! 1. [`report_collector`] - Blocking HID reads, forwarded in arrival order
//! 2. [`frame_decoder`] - Edge detection against the previous report
//! 3. [`controller_session`] - Unified API and lifecycle management
//!
//! # Architecture
//!
//! ```text
//! HID device ──► Collector ──► Decoder ──► EventBus ──► handlers
//!                (RawReport)   (Event)
//! ```
//!
//! The collector runs on a blocking thread; decoding and dispatch happen on the
//! task that drives the session, one report at a time.

pub mod controller_session;
pub mod frame_decoder;
pub mod report_collector;

pub use controller_session::{format_pin_dump, ControllerSession, SessionError, SessionOptions};
pub use frame_decoder::{ControlSnapshot, DecodeError, FrameDecoder};
pub use report_collector::{
    CollectionState, CollectorMessage, CollectorSettings, Opening, RawReport, ReportCollector,
    Streaming,
};
