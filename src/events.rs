//! Event bus (C10): single-producer/many-consumer fanout, non-blocking
//! publish, drop-on-slow-consumer. Grounded in the teacher's WS/notification
//! fanout pattern, generalized from a socket-set broadcast to a typed
//! `tokio::sync::broadcast` channel.

use serde_json::Value;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub topic: &'static str,
    pub payload: Value,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Non-blocking publish. No subscribers, or a full ring buffer, is not
    /// an error: the event is simply dropped for anyone not listening.
    pub fn publish(&self, topic: &'static str, payload: Value) {
        let _ = self.sender.send(GatewayEvent { topic, payload });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

pub mod topics {
    pub const SESSION_STATUS: &str = "session_status";
    pub const LIGHTNING_INVOICE_EVENTS: &str = "lightning:invoice_events";
    pub const LIGHTNING_PAYMENT_EVENTS: &str = "lightning:payment_events";
    pub const LIGHTNING_BALANCE_EVENTS: &str = "lightning:balance_events";
}
