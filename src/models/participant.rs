use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability tier of a participant. Closed set so escalation rules are a
/// match over variants, not string comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Host,
    CoHost,
    Guest,
    Viewer,
}

impl PermissionLevel {
    /// Host and co-host can act on other participants.
    pub fn can_moderate(&self) -> bool {
        matches!(self, PermissionLevel::Host | PermissionLevel::CoHost)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Host => "host",
            PermissionLevel::CoHost => "co_host",
            PermissionLevel::Guest => "guest",
            PermissionLevel::Viewer => "viewer",
        }
    }
}

/// Where a participant's session stands. `Kicked` and `Left` are terminal
/// for the session; the same identity must redeem again to come back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Waiting,
    Admitted,
    Active,
    Left,
    Kicked,
}

impl ConnectionState {
    /// States that occupy a capacity slot in the room.
    pub fn occupies_slot(&self) -> bool {
        matches!(
            self,
            ConnectionState::Waiting | ConnectionState::Admitted | ConnectionState::Active
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Left | ConnectionState::Kicked)
    }
}

/// A session participant. Exists only inside the registry entry for its
/// room and dies with the room or the disconnect grace period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub room_id: String,
    pub identity: String,
    pub display_name: String,
    pub permission_level: PermissionLevel,
    pub connection_state: ConnectionState,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Participant {
    pub fn waiting(
        room_id: String,
        identity: String,
        display_name: String,
        permission_level: PermissionLevel,
    ) -> Self {
        let now = Utc::now();
        Self {
            room_id,
            identity,
            display_name,
            permission_level,
            connection_state: ConnectionState::Waiting,
            joined_at: now,
            last_seen_at: now,
        }
    }
}

/// Returned to a guest whose redemption succeeded: they are in the waiting
/// room until the host decides.
#[derive(Debug, Serialize)]
pub struct WaitingTicket {
    pub room_id: String,
    pub room_name: String,
    pub identity: String,
    pub display_name: String,
    pub permission_level: PermissionLevel,
    pub token: String,
    pub ws_url: String,
    pub expires_in: u64,
}

/// JWT Claims binding a session to one room at one permission level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // participant identity
    pub room_id: String,
    pub display: String,
    pub level: PermissionLevel,
    pub iat: i64,
    pub exp: i64,
}

/// Host-facing view of one participant in the room snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantInfo {
    pub identity: String,
    pub display_name: String,
    pub permission_level: PermissionLevel,
    pub connection_state: ConnectionState,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<&Participant> for ParticipantInfo {
    fn from(p: &Participant) -> Self {
        Self {
            identity: p.identity.clone(),
            display_name: p.display_name.clone(),
            permission_level: p.permission_level,
            connection_state: p.connection_state,
            joined_at: p.joined_at,
            last_seen_at: p.last_seen_at,
        }
    }
}
