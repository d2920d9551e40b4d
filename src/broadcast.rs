//! Publish/subscribe registry for observer fan-out.
//!
//! The scheduler only ever calls [`Broadcaster::publish`]; who is listening is the
//! transport's business. Observers that fall more than the channel capacity behind
//! skip the events they missed rather than slowing the publisher down.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::{LogOrigin, OutboundEvent};

/// Default capacity of the fan-out channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Largest accepted capacity. Every slot is allocated up front.
pub const MAX_EVENT_BUFFER: usize = 65_536;

/// Cheap to clone; every clone publishes into the same channel.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<OutboundEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.clamp(1, MAX_EVENT_BUFFER));
        Self { tx }
    }

    /// Registers a new subscriber. It sees every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }

    /// Sends `event` to all current subscribers. Having none is not an error.
    pub fn publish(&self, event: OutboundEvent) {
        if let OutboundEvent::Log(line) = &event {
            match line.origin {
                LogOrigin::ServerLoop => debug!(origin = ?line.origin, "{}", line.text),
                _ => info!(origin = ?line.origin, "{}", line.text),
            }
        }

        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "Event published"),
            Err(_) => debug!("Event published with no observers connected"),
        }
    }

    pub fn log(&self, origin: LogOrigin, text: impl AsRef<str>) {
        self.publish(OutboundEvent::log(origin, text));
    }

    pub fn status(&self, is_running: bool) {
        self.publish(OutboundEvent::status(is_running));
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
