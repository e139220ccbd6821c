//! In-process publish/subscribe keyed by [`Channel`]
//!
//! The set of channels is fixed when the bus is built, normally from
//! [`Channel::producible`], so subscribing to a channel that can never fire is an
//! error instead of a silent no-op. Delivery is synchronous and in subscription
//! order. A handler that fails or panics is logged and skipped; the remaining
//! handlers still receive the event.

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use super::{Channel, Event, Payload};

/// Handler count per channel above which a warning is logged
pub const HANDLER_WARN_THRESHOLD: usize = 100;

pub type Handler = Box<dyn FnMut(&Payload) -> color_eyre::Result<()> + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Channel \"{0}\" is never produced by this controller")]
    UnknownChannel(String),

    #[error("Malformed channel name \"{0}\"")]
    MalformedChannel(String),
}

/// Outcome of one publish
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct EventBus {
    known: HashSet<Channel>,
    handlers: BTreeMap<Channel, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            known: channels.into_iter().collect(),
            handlers: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn is_known(&self, channel: &Channel) -> bool {
        self.known.contains(channel)
    }

    /// Known channels in a stable order
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.known.iter().cloned().collect();
        channels.sort();
        channels
    }

    /// Subscribes by textual channel name, e.g. `"left:move"`
    pub fn subscribe<F>(&mut self, channel: &str, handler: F) -> Result<SubscriptionId, BusError>
    where
        F: FnMut(&Payload) -> color_eyre::Result<()> + Send + 'static,
    {
        let channel: Channel = channel.parse()?;
        self.subscribe_channel(channel, handler)
    }

    pub fn subscribe_channel<F>(
        &mut self,
        channel: Channel,
        handler: F,
    ) -> Result<SubscriptionId, BusError>
    where
        F: FnMut(&Payload) -> color_eyre::Result<()> + Send + 'static,
    {
        if !self.known.contains(&channel) {
            return Err(BusError::UnknownChannel(channel.to_string()));
        }

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let handlers = self.handlers.entry(channel.clone()).or_default();
        handlers.push((id, Box::new(handler)));
        if handlers.len() > HANDLER_WARN_THRESHOLD {
            warn!(
                "Channel {} has {} handlers, possible subscription leak",
                channel,
                handlers.len()
            );
        }
        debug!("Subscribed {:?} to {}", id, channel);
        Ok(id)
    }

    /// Removes a handler; returns false if it was not registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(sub, _)| *sub == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, channel: &Channel) -> usize {
        self.handlers.get(channel).map_or(0, Vec::len)
    }

    pub fn publish(&mut self, channel: &Channel, payload: &Payload) -> PublishReport {
        let mut report = PublishReport::default();
        let Some(handlers) = self.handlers.get_mut(channel) else {
            return report;
        };

        for (id, handler) in handlers.iter_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("Handler {:?} on {} failed: {}", id, channel, e);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!("Handler {:?} on {} panicked", id, channel);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn publish_event(&mut self, event: &Event) -> PublishReport {
        self.publish(&event.channel, &event.payload)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("channels", &self.known.len())
            .field(
                "handlers",
                &self.handlers.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}
