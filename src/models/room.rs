use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Room lifecycle. `Ended` is terminal; admissions happen only while `Live`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Scheduled,
    Live,
    Ended,
}

/// Per-room knobs fixed by the host at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSettings {
    pub max_participants: u32,
    #[serde(default)]
    pub recording_on_join: bool,
    /// Whether a viewer-level invitation may be redeemed directly, or only
    /// granted by promoting an admitted guest.
    #[serde(default)]
    pub allow_viewer_redeem: bool,
}

/// An interview room. Authoritative live state (participants, waiting
/// queue) lives in the registry; this is the descriptive part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub host_user_id: String,
    pub name: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: RoomStatus,
    pub settings: RoomSettings,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(
        host_user_id: String,
        name: String,
        scheduled_at: Option<DateTime<Utc>>,
        settings: RoomSettings,
    ) -> Self {
        Self {
            room_id: uuid::Uuid::new_v4().to_string(),
            host_user_id,
            name,
            scheduled_at,
            status: RoomStatus::Scheduled,
            settings,
            created_at: Utc::now(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == RoomStatus::Live
    }
}

/// Request to create a room
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Falls back to the configured default when omitted.
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub recording_on_join: bool,
    #[serde(default)]
    pub allow_viewer_redeem: bool,
}

/// Response after creating a room. The host token is returned once and
/// authorizes invitation management and admission decisions.
#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub name: String,
    pub status: RoomStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_participants: u32,
    pub created_at: DateTime<Utc>,
    pub host_token: String,
}
