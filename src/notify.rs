//! Admission events and their delivery.
//!
//! Registry operations append [`RoomEvent`]s to a per-room outbox while the
//! room lock is held; the [`Notifier`] drains that outbox only after the
//! lock is released, so a slow client can never stall an admission
//! decision. Delivery itself is an unbounded channel send per connection —
//! no awaits, no network on the caller's path.

use std::sync::Arc;

use crate::models::{ParticipantInfo, PermissionLevel};
use crate::ws::{messages, ConnectionsManager, EventMessage};

#[derive(Debug, Clone)]
pub enum RoomEvent {
    GuestWaiting {
        room_id: String,
        participant: ParticipantInfo,
    },
    Admitted {
        room_id: String,
        identity: String,
    },
    Rejected {
        room_id: String,
        identity: String,
    },
    Kicked {
        room_id: String,
        identity: String,
    },
    PermissionChanged {
        room_id: String,
        identity: String,
        level: PermissionLevel,
    },
    ParticipantActive {
        room_id: String,
        identity: String,
    },
    ParticipantLeft {
        room_id: String,
        identity: String,
    },
    RoomEnded {
        room_id: String,
    },
}

/// Fan-out side of the notification bridge. Email delivery lives in
/// `mail`; this struct only pushes realtime events to connected sockets.
#[derive(Clone)]
pub struct Notifier {
    connections: Arc<ConnectionsManager>,
}

impl Notifier {
    pub fn new(connections: Arc<ConnectionsManager>) -> Self {
        Self { connections }
    }

    pub fn publish(&self, events: Vec<RoomEvent>) {
        for event in events {
            self.deliver(event);
        }
    }

    fn deliver(&self, event: RoomEvent) {
        match event {
            RoomEvent::GuestWaiting {
                room_id,
                participant,
            } => {
                let msg = EventMessage::guest_waiting(&room_id, participant);
                self.connections.send_to_moderators(&room_id, msg);
            }
            RoomEvent::Admitted { room_id, identity } => {
                self.notify_decision(&room_id, &identity, messages::event::ADMITTED);
            }
            RoomEvent::Rejected { room_id, identity } => {
                self.notify_decision(&room_id, &identity, messages::event::REJECTED);
            }
            RoomEvent::Kicked { room_id, identity } => {
                self.notify_decision(&room_id, &identity, messages::event::KICKED);
            }
            RoomEvent::PermissionChanged {
                room_id,
                identity,
                level,
            } => {
                let msg = EventMessage::permission_changed(&room_id, &identity, level);
                self.connections.send_to_identity(&room_id, &identity, msg.clone());
                self.connections.send_to_moderators(&room_id, msg);
            }
            RoomEvent::ParticipantActive { room_id, identity } => {
                let msg = EventMessage::participant(
                    messages::event::PARTICIPANT_ACTIVE,
                    &room_id,
                    &identity,
                );
                self.connections.broadcast(&room_id, msg);
            }
            RoomEvent::ParticipantLeft { room_id, identity } => {
                let msg = EventMessage::participant(
                    messages::event::PARTICIPANT_LEFT,
                    &room_id,
                    &identity,
                );
                self.connections.broadcast(&room_id, msg);
            }
            RoomEvent::RoomEnded { room_id } => {
                let msg = EventMessage::room_ended(&room_id);
                self.connections.broadcast(&room_id, msg);
            }
        }
    }

    /// Admission decisions go to every tab of the affected guest and to
    /// the moderators watching the queue.
    fn notify_decision(&self, room_id: &str, identity: &str, event: &'static str) {
        let msg = EventMessage::participant(event, room_id, identity);
        self.connections.send_to_identity(room_id, identity, msg.clone());
        self.connections.send_to_moderators(room_id, msg);
    }
}
