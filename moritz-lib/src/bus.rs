//! Topic-keyed pub/sub for domain events.
//!
//! Subscribers are registered before the engine starts and the list is
//! read-only afterwards. Delivery is synchronous on the engine loop, so
//! handlers must not block.

use crate::frame::MoritzFrame;
use crate::message::OutgoingMessage;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    DevicePairRequest,
    DevicePairAccepted,
    ThermostatStateReceived,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An inbound pair ping, published before the response decision.
    DevicePairRequest { frame: MoritzFrame },
    /// A pair pong was queued for transmission.
    DevicePairAccepted { response: OutgoingMessage },
    /// A state report or a state-bearing acknowledgement arrived; the
    /// registry update has already committed.
    ThermostatStateReceived {
        frame: MoritzFrame,
        signal_strength: u8,
    },
}

impl Event {
    pub fn topic(&self) -> EventTopic {
        match self {
            Event::DevicePairRequest { .. } => EventTopic::DevicePairRequest,
            Event::DevicePairAccepted { .. } => EventTopic::DevicePairAccepted,
            Event::ThermostatStateReceived { .. } => EventTopic::ThermostatStateReceived,
        }
    }
}

type Handler = Box<dyn Fn(&Event) + Send>;

#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventTopic, Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, topic: EventTopic, handler: F)
    where
        F: Fn(&Event) + Send + 'static,
    {
        self.subscribers.entry(topic).or_default().push(Box::new(handler));
    }

    pub(crate) fn publish(&self, event: &Event) {
        trace!(topic = ?event.topic(), "publishing event");
        if let Some(handlers) = self.subscribers.get(&event.topic()) {
            for handler in handlers {
                handler(event);
            }
        }
    }
}
