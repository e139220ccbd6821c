//! Frame decoder - raw reports to edge-triggered events
//!
//! Consumes one report at a time and compares every configured control against
//! the value it had in the previous report. Events are only produced on change.
//!
//! Per report the decoder walks joysticks, then buttons, then statuses, each in
//! configuration order, so the event sequence for a given report stream is fully
//! deterministic.
//!
//! # Baseline frame
//!
//! The first report seen for a control only seeds its state. Joysticks and
//! statuses stay silent on that report. Buttons are asymmetric: a button already
//! held on the first report emits `press` (never `release`).

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::catalogue::ControllerConfig;
use crate::events::{Channel, Event, EventKind, JoystickState, Payload, StatusValue};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Pin {pin} of \"{control}\" is outside a {report_len} byte report")]
    PinOutOfRange {
        control: String,
        pin: u8,
        report_len: usize,
    },
}

// Per-control state, indexed in configuration order. `None` = no report seen yet.
#[derive(Clone, Debug)]
struct ControlState {
    joysticks: Vec<Option<JoystickState>>,
    buttons: Vec<Option<bool>>,
    statuses: Vec<Option<StatusValue>>,
}

impl ControlState {
    fn empty(config: &ControllerConfig) -> Self {
        Self {
            joysticks: vec![None; config.joysticks.len()],
            buttons: vec![None; config.buttons.len()],
            statuses: vec![None; config.statuses.len()],
        }
    }
}

/// Name keyed copy of the decoder state; controls not seen yet are absent
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ControlSnapshot {
    pub joysticks: BTreeMap<String, JoystickState>,
    pub buttons: BTreeMap<String, bool>,
    pub statuses: BTreeMap<String, StatusValue>,
}

#[derive(Debug)]
pub struct FrameDecoder {
    config: Arc<ControllerConfig>,
    state: ControlState,
    // Reports shorter than this cannot satisfy every pin
    min_report_len: usize,
    frames: u64,
}

impl FrameDecoder {
    pub fn new(config: Arc<ControllerConfig>) -> Self {
        let state = ControlState::empty(&config);
        let min_report_len = config.max_pin().map_or(0, |pin| pin as usize + 1);
        debug!(
            "Created frame decoder for {:04x}:{:04x}, minimum report length {}",
            config.vendor_id, config.product_id, min_report_len
        );
        Self {
            config,
            state,
            min_report_len,
            frames: 0,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Reports decoded successfully so far
    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Decodes one report and returns the events it produced, in order
    ///
    /// A report too short for any configured pin is rejected before any state
    /// changes.
    pub fn process(&mut self, report: &[u8]) -> Result<Vec<Event>, DecodeError> {
        if report.len() < self.min_report_len {
            let err = self.out_of_range(report.len());
            error!("Rejecting report: {}", err);
            return Err(err);
        }

        let mut events = Vec::new();
        self.process_joysticks(report, &mut events);
        self.process_buttons(report, &mut events);
        self.process_statuses(report, &mut events);
        self.frames += 1;

        if !events.is_empty() {
            debug!("Report {} produced {} events", self.frames, events.len());
        }
        Ok(events)
    }

    fn process_joysticks(&mut self, report: &[u8], events: &mut Vec<Event>) {
        for (spec, stored) in self.config.joysticks.iter().zip(&mut self.state.joysticks) {
            let current = JoystickState {
                x: report[spec.x.pin as usize],
                y: report[spec.y.pin as usize],
            };

            match stored {
                None => *stored = Some(current),
                Some(previous) if *previous != current => {
                    *previous = current;
                    events.push(Event::new(
                        Channel::control(&spec.name, EventKind::Move),
                        Payload::Joystick(current),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    fn process_buttons(&mut self, report: &[u8], events: &mut Vec<Event>) {
        for (spec, stored) in self.config.buttons.iter().zip(&mut self.state.buttons) {
            let pressed = report[spec.pin as usize] == spec.value;

            let kind = match *stored {
                None if pressed => Some(EventKind::Press),
                None => None,
                Some(was) if was != pressed && pressed => Some(EventKind::Press),
                Some(was) if was != pressed => Some(EventKind::Release),
                Some(_) => None,
            };
            *stored = Some(pressed);

            if let Some(kind) = kind {
                events.push(Event::new(Channel::control(&spec.name, kind), Payload::None));
            }
        }
    }

    fn process_statuses(&mut self, report: &[u8], events: &mut Vec<Event>) {
        for (spec, stored) in self.config.statuses.iter().zip(&mut self.state.statuses) {
            let raw = report[spec.pin as usize];
            let current = match spec.label_for(raw) {
                Some(label) => StatusValue::Label(label.to_string()),
                None => StatusValue::Raw(raw),
            };

            let changed = matches!(stored, Some(previous) if *previous != current);
            if changed {
                events.push(Event::new(
                    Channel::control(&spec.name, EventKind::Change),
                    Payload::Status(current.clone()),
                ));
            }
            *stored = Some(current);
        }
    }

    fn out_of_range(&self, report_len: usize) -> DecodeError {
        let pins = self
            .config
            .joysticks
            .iter()
            .flat_map(|j| [(&j.name, j.x.pin), (&j.name, j.y.pin)])
            .chain(self.config.buttons.iter().map(|b| (&b.name, b.pin)))
            .chain(self.config.statuses.iter().map(|s| (&s.name, s.pin)));

        for (name, pin) in pins {
            if pin as usize >= report_len {
                return DecodeError::PinOutOfRange {
                    control: name.clone(),
                    pin,
                    report_len,
                };
            }
        }

        // Unreachable while min_report_len is derived from the same pins
        DecodeError::PinOutOfRange {
            control: String::new(),
            pin: self.min_report_len.saturating_sub(1) as u8,
            report_len,
        }
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        let mut snapshot = ControlSnapshot::default();
        for (spec, value) in self.config.joysticks.iter().zip(&self.state.joysticks) {
            if let Some(value) = value {
                snapshot.joysticks.insert(spec.name.clone(), *value);
            }
        }
        for (spec, value) in self.config.buttons.iter().zip(&self.state.buttons) {
            if let Some(value) = value {
                snapshot.buttons.insert(spec.name.clone(), *value);
            }
        }
        for (spec, value) in self.config.statuses.iter().zip(&self.state.statuses) {
            if let Some(value) = value {
                snapshot.statuses.insert(spec.name.clone(), value.clone());
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(toml: &str) -> FrameDecoder {
        let header = "vendorID = 1\nproductID = 2\n";
        let config = ControllerConfig::from_toml(&format!("{}{}", header, toml)).unwrap();
        FrameDecoder::new(Arc::new(config))
    }

    fn names(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.channel.to_string()).collect()
    }

    const BUTTON_A: &str = "[[buttons]]\nname = \"a\"\npin = 0\nvalue = 1\n";
    const LEFT_STICK: &str = "[[joysticks]]\nname = \"left\"\nx = { pin = 0 }\ny = { pin = 1 }\n";
    const BATTERY: &str = "[[status]]\nname = \"battery\"\npin = 0\nstates = [{ value = 1, state = \"low\" }, { value = 2, state = \"full\" }]\n";

    #[test]
    fn button_press_release_cycle() {
        let mut decoder = decoder(BUTTON_A);

        assert!(decoder.process(&[0]).unwrap().is_empty());
        assert_eq!(names(&decoder.process(&[1]).unwrap()), vec!["a:press"]);
        assert!(decoder.process(&[1]).unwrap().is_empty());
        assert_eq!(names(&decoder.process(&[0]).unwrap()), vec!["a:release"]);
    }

    #[test]
    fn button_held_on_first_report_emits_press() {
        let mut decoder = decoder(BUTTON_A);
        assert_eq!(names(&decoder.process(&[1]).unwrap()), vec!["a:press"]);
        assert_eq!(names(&decoder.process(&[0]).unwrap()), vec!["a:release"]);
    }

    #[test]
    fn joystick_moves_only_on_change() {
        let mut decoder = decoder(LEFT_STICK);

        assert!(decoder.process(&[10, 10]).unwrap().is_empty());
        assert!(decoder.process(&[10, 10]).unwrap().is_empty());
        let events = decoder.process(&[20, 10]).unwrap();
        assert_eq!(
            events,
            vec![Event::new(
                Channel::control("left", EventKind::Move),
                Payload::Joystick(JoystickState { x: 20, y: 10 })
            )]
        );
        let events = decoder.process(&[20, 11]).unwrap();
        assert_eq!(names(&events), vec!["left:move"]);
    }

    #[test]
    fn status_maps_labels_and_passes_raw_values_through() {
        let mut decoder = decoder(BATTERY);

        assert!(decoder.process(&[1]).unwrap().is_empty());
        assert_eq!(
            decoder.process(&[2]).unwrap()[0].payload,
            Payload::Status(StatusValue::Label("full".to_string()))
        );
        assert_eq!(
            decoder.process(&[7]).unwrap()[0].payload,
            Payload::Status(StatusValue::Raw(7))
        );
        assert!(decoder.process(&[7]).unwrap().is_empty());
    }

    #[test]
    fn short_report_fails_without_touching_state() {
        let mut decoder = decoder(&format!(
            "{}{}",
            LEFT_STICK, "[[buttons]]\nname = \"b\"\npin = 4\nvalue = 1\n"
        ));

        decoder.process(&[0, 0, 0, 0, 0]).unwrap();
        let err = decoder.process(&[9, 9, 9]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::PinOutOfRange {
                control: "b".to_string(),
                pin: 4,
                report_len: 3
            }
        );
        assert_eq!(decoder.frames_processed(), 1);
        assert_eq!(
            decoder.snapshot().joysticks["left"],
            JoystickState { x: 0, y: 0 }
        );
    }

    #[test]
    fn events_follow_group_then_config_order() {
        let mut decoder = decoder(
            r#"
[[joysticks]]
name = "right"
x = { pin = 3 }
y = { pin = 4 }
[[joysticks]]
name = "left"
x = { pin = 1 }
y = { pin = 2 }
[[buttons]]
name = "b"
pin = 0
value = 2
[[buttons]]
name = "a"
pin = 0
value = 1
[[status]]
name = "mode"
pin = 5
"#,
        );

        decoder.process(&[0, 0, 0, 0, 0, 0]).unwrap();
        let events = decoder.process(&[1, 5, 5, 5, 5, 3]).unwrap();
        assert_eq!(
            names(&events),
            vec!["right:move", "left:move", "a:press", "mode:change"]
        );
        let events = decoder.process(&[2, 5, 5, 5, 5, 3]).unwrap();
        assert_eq!(names(&events), vec!["b:press", "a:release"]);
    }

    #[test]
    fn snapshot_reports_seen_controls_only() {
        let mut decoder = decoder(&format!("{}{}", BUTTON_A, BATTERY));
        assert_eq!(decoder.snapshot(), ControlSnapshot::default());

        decoder.process(&[1]).unwrap();
        let snapshot = decoder.snapshot();
        assert!(snapshot.buttons["a"]);
        assert_eq!(snapshot.statuses["battery"], StatusValue::Label("low".to_string()));
        assert!(snapshot.joysticks.is_empty());
    }

    #[test]
    fn config_without_controls_accepts_any_report() {
        let mut decoder = decoder("");
        assert!(decoder.process(&[]).unwrap().is_empty());
        assert_eq!(decoder.frames_processed(), 1);
    }
}
