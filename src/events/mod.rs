//! Decoded controller events and their channels
//!
//! Control channels are named `<control>:<kind>` where kind is one of `move`,
//! `press`, `release` or `change`. Two session lifecycle channels, `connected`
//! and `closed`, carry no control name.

pub mod bus;

pub use bus::{BusError, EventBus, Handler, PublishReport, SubscriptionId};

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::catalogue::ControllerConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Move,
    Press,
    Release,
    Change,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Move => "move",
            EventKind::Press => "press",
            EventKind::Release => "release",
            EventKind::Change => "change",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Connected,
    Closed,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Connected => "connected",
            LifecycleKind::Closed => "closed",
        }
    }
}

/// Name under which handlers subscribe
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Control { control: String, kind: EventKind },
    Lifecycle(LifecycleKind),
}

impl Channel {
    pub fn control(control: impl Into<String>, kind: EventKind) -> Self {
        Channel::Control {
            control: control.into(),
            kind,
        }
    }

    /// Every channel a decoder for `config` can produce, plus lifecycle channels
    pub fn producible(config: &ControllerConfig) -> Vec<Channel> {
        let mut channels = Vec::new();
        for joystick in &config.joysticks {
            channels.push(Channel::control(&joystick.name, EventKind::Move));
        }
        for button in &config.buttons {
            channels.push(Channel::control(&button.name, EventKind::Press));
            channels.push(Channel::control(&button.name, EventKind::Release));
        }
        for status in &config.statuses {
            channels.push(Channel::control(&status.name, EventKind::Change));
        }
        channels.push(Channel::Lifecycle(LifecycleKind::Connected));
        channels.push(Channel::Lifecycle(LifecycleKind::Closed));
        channels
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Control { control, kind } => write!(f, "{}:{}", control, kind.as_str()),
            Channel::Lifecycle(kind) => f.write_str(kind.as_str()),
        }
    }
}

impl FromStr for Channel {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((control, kind)) if !control.is_empty() => {
                let kind = match kind {
                    "move" => EventKind::Move,
                    "press" => EventKind::Press,
                    "release" => EventKind::Release,
                    "change" => EventKind::Change,
                    _ => return Err(BusError::MalformedChannel(s.to_string())),
                };
                Ok(Channel::control(control, kind))
            }
            Some(_) => Err(BusError::MalformedChannel(s.to_string())),
            None => match s {
                "connected" => Ok(Channel::Lifecycle(LifecycleKind::Connected)),
                "closed" => Ok(Channel::Lifecycle(LifecycleKind::Closed)),
                _ => Err(BusError::MalformedChannel(s.to_string())),
            },
        }
    }
}

/// Stick position as read from the report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct JoystickState {
    pub x: u8,
    pub y: u8,
}

/// Decoded status: the configured label, or the raw byte when unmapped
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    Label(String),
    Raw(u8),
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Label(label) => f.write_str(label),
            StatusValue::Raw(raw) => write!(f, "{}", raw),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Payload {
    None,
    Joystick(JoystickState),
    Status(StatusValue),
    Closed { reason: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub channel: Channel,
    pub payload: Payload,
}

impl Event {
    pub fn new(channel: Channel, payload: Payload) -> Self {
        Self { channel, payload }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::None => write!(f, "{}", self.channel),
            Payload::Joystick(state) => {
                write!(f, "{} {{x: {}, y: {}}}", self.channel, state.x, state.y)
            }
            Payload::Status(value) => write!(f, "{} {}", self.channel, value),
            Payload::Closed { reason: Some(reason) } => write!(f, "{} ({})", self.channel, reason),
            Payload::Closed { reason: None } => write!(f, "{}", self.channel),
        }
    }
}
