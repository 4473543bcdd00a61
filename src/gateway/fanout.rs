//! Broadcast dispatcher: the single place "who receives this" is decided.
//!
//! Delivery is a non-blocking send onto each member's outbound queue, so one
//! slow or half-closed socket can only stall its own writer task. A failed
//! send means the member is mid-teardown; it is logged and treated as
//! implicitly left, reconciled by its disconnect.

use std::sync::Arc;

use super::events::{EventPayload, WireEvent};
use super::membership::ChannelMembership;
use super::registry::{ConnectionRegistry, Outbound};

/// Fans wire events out to a channel's current members.
pub struct Fanout {
    registry: Arc<ConnectionRegistry>,
    membership: Arc<ChannelMembership>,
}

impl Fanout {
    pub fn new(registry: Arc<ConnectionRegistry>, membership: Arc<ChannelMembership>) -> Self {
        Self {
            registry,
            membership,
        }
    }

    /// Deliver an event to every current member of a channel.
    ///
    /// Best-effort and non-throwing: per-member failures are isolated and a
    /// channel with no members drops the event.
    pub fn broadcast(&self, channel_id: &str, event: EventPayload) {
        let event = Arc::new(WireEvent::new(channel_id, event));
        for connection_id in self.membership.members_of(channel_id) {
            self.deliver(&connection_id, event.clone());
        }
    }

    /// Deliver an event to a single connection (join/leave confirmations).
    /// Same best-effort contract as `broadcast`, and the same queue, so
    /// per-connection ordering holds across both.
    pub fn send_to(&self, connection_id: &str, channel_id: &str, event: EventPayload) {
        let event = Arc::new(WireEvent::new(channel_id, event));
        self.deliver(connection_id, event);
    }

    pub fn send_typing(&self, channel_id: &str, active: bool) {
        self.broadcast(channel_id, EventPayload::TypingIndicator { active });
    }

    pub fn send_message_update(&self, channel_id: &str, message_id: &str, content: &str) {
        self.broadcast(
            channel_id,
            EventPayload::MessageUpdate {
                message_id: message_id.to_string(),
                content: content.to_string(),
            },
        );
    }

    fn deliver(&self, connection_id: &str, event: Arc<WireEvent>) {
        match self.registry.sink(connection_id) {
            Some(sink) => {
                if sink.send(Outbound::Event(event)).is_err() {
                    tracing::debug!(%connection_id, "delivery failed; member tearing down");
                }
            }
            None => {
                tracing::debug!(%connection_id, "member has no live connection; skipping");
            }
        }
    }
}
