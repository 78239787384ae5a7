use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::participant::PermissionLevel;

/// Invitation lifecycle. Everything except `Pending` is terminal.
/// `Expired` is evaluated lazily at read time; rows are never swept into
/// it by a background job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Revoked,
}

impl InvitationStatus {
    pub fn is_terminal(&self) -> bool {
        *self != InvitationStatus::Pending
    }
}

/// Persisted invitation record. The deep-link token is never stored; only
/// its sha256 fingerprint is, so a store dump cannot mint valid links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub room_id: String,
    pub join_code: String,
    pub token_hash: String,
    pub invitee_email: Option<String>,
    pub invitee_name: Option<String>,
    pub status: InvitationStatus,
    pub permission_level: PermissionLevel,
    /// None means unlimited; email-bound invitations are always Some(1).
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub use_count: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl Invitation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        room_id: String,
        join_code: String,
        token_hash: String,
        invitee_email: Option<String>,
        invitee_name: Option<String>,
        permission_level: PermissionLevel,
        max_uses: Option<u32>,
        expires_in_seconds: u64,
    ) -> Self {
        let now = Utc::now();
        // Email-bound invitations are single-use no matter what was asked.
        let max_uses = if invitee_email.is_some() {
            Some(1)
        } else {
            max_uses
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id,
            join_code,
            token_hash,
            invitee_email,
            invitee_name,
            status: InvitationStatus::Pending,
            permission_level,
            max_uses,
            use_count: 0,
            expires_at: now + chrono::Duration::seconds(expires_in_seconds as i64),
            created_at: now,
            redeemed_at: None,
        }
    }

    /// Authoritative regardless of the stored status.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_single_use(&self) -> bool {
        self.max_uses == Some(1)
    }

    /// Whether another redemption may consume this invitation.
    pub fn has_uses_left(&self) -> bool {
        match self.max_uses {
            Some(max) => self.use_count < max,
            None => true,
        }
    }

    /// Status with lazy expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.status == InvitationStatus::Pending && self.is_expired(now) {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }
}

/// Host request to create an invitation
#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub invitee_email: Option<String>,
    pub invitee_name: Option<String>,
    pub permission_level: PermissionLevel,
    pub expires_in_seconds: Option<u64>,
    pub max_uses: Option<u32>,
}

/// Response after creating an invitation. `token` is the only time the
/// deep-link secret leaves the server.
#[derive(Debug, Serialize)]
pub struct CreateInvitationResponse {
    pub id: String,
    pub room_id: String,
    pub join_code: String,
    pub token: String,
    pub invite_url: String,
    pub permission_level: PermissionLevel,
    pub expires_at: DateTime<Utc>,
}

/// Host-facing listing entry. Excludes the token hash.
#[derive(Debug, Serialize)]
pub struct InvitationInfo {
    pub id: String,
    pub room_id: String,
    pub join_code: String,
    pub invitee_email: Option<String>,
    pub invitee_name: Option<String>,
    pub status: InvitationStatus,
    pub permission_level: PermissionLevel,
    pub use_count: u32,
    pub max_uses: Option<u32>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl InvitationInfo {
    pub fn from_invitation(inv: &Invitation, now: DateTime<Utc>) -> Self {
        Self {
            id: inv.id.clone(),
            room_id: inv.room_id.clone(),
            join_code: inv.join_code.clone(),
            invitee_email: inv.invitee_email.clone(),
            invitee_name: inv.invitee_name.clone(),
            status: inv.effective_status(now),
            permission_level: inv.permission_level,
            use_count: inv.use_count,
            max_uses: inv.max_uses,
            expires_at: inv.expires_at,
            created_at: inv.created_at,
            redeemed_at: inv.redeemed_at,
        }
    }
}

/// Guest request: typed join code
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub join_code: String,
    pub display_name: Option<String>,
}

/// Guest request: email deep-link token
#[derive(Debug, Deserialize)]
pub struct RedeemTokenRequest {
    pub token: String,
    pub display_name: Option<String>,
}

/// Host edits allowed while the invitation is still pending.
#[derive(Debug, Deserialize)]
pub struct UpdateInvitationRequest {
    pub invitee_email: Option<String>,
    pub invitee_name: Option<String>,
    pub permission_level: Option<PermissionLevel>,
}

/// What the email landing page may show before the guest commits.
#[derive(Debug, Serialize)]
pub struct TokenPreview {
    pub room_name: String,
    pub invitee_name: Option<String>,
    pub is_valid: bool,
    pub expires_at: DateTime<Utc>,
}
