use serde::{Deserialize, Serialize};

use crate::models::{ParticipantInfo, PermissionLevel};

/// Server -> client event pushed over the realtime channel.
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub event: &'static str,
    pub payload: serde_json::Value,
}

impl EventMessage {
    pub fn new(event: &'static str, payload: serde_json::Value) -> Self {
        Self { event, payload }
    }

    pub fn guest_waiting(room_id: &str, participant: ParticipantInfo) -> Self {
        Self::new(
            event::GUEST_WAITING,
            serde_json::json!({
                "room_id": room_id,
                "participant": participant,
            }),
        )
    }

    pub fn participant(event: &'static str, room_id: &str, identity: &str) -> Self {
        Self::new(
            event,
            serde_json::json!({
                "room_id": room_id,
                "identity": identity,
            }),
        )
    }

    pub fn permission_changed(room_id: &str, identity: &str, level: PermissionLevel) -> Self {
        Self::new(
            event::PERMISSION_CHANGED,
            serde_json::json!({
                "room_id": room_id,
                "identity": identity,
                "permission_level": level,
            }),
        )
    }

    pub fn room_ended(room_id: &str) -> Self {
        Self::new(event::ROOM_ENDED, serde_json::json!({ "room_id": room_id }))
    }

    pub fn error(code: u16, message: &str) -> Self {
        Self::new(
            event::ERROR,
            serde_json::json!({
                "code": code,
                "message": message,
            }),
        )
    }

    pub fn pong() -> Self {
        Self::new(event::PONG, serde_json::json!({}))
    }
}

/// Client -> server message. The realtime channel only carries liveness;
/// everything stateful goes through the HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
}

/// Event names on the wire
pub mod event {
    // Server -> client
    pub const GUEST_WAITING: &str = "guest_waiting";
    pub const ADMITTED: &str = "admitted";
    pub const REJECTED: &str = "rejected";
    pub const KICKED: &str = "kicked";
    pub const PERMISSION_CHANGED: &str = "permission_changed";
    pub const PARTICIPANT_ACTIVE: &str = "participant_active";
    pub const PARTICIPANT_LEFT: &str = "participant_left";
    pub const ROOM_ENDED: &str = "room_ended";
    pub const ERROR: &str = "error";
    pub const PONG: &str = "pong";

    // Client -> server
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PING: &str = "ping";
}
