//! Invitation persistence.
//!
//! The store is the single source of truth across restarts. Two backends:
//! Redis for deployment, in-memory for tests and single-node development.
//! Both guarantee the two operations the service leans on for correctness:
//! create-if-code-absent and atomic redemption consumption.

pub mod memory;
pub mod redis;

pub use memory::MemoryInvitationStore;
pub use self::redis::{create_pool, RedisInvitationStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{Invitation, InvitationStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another non-terminal invitation already holds this join code.
    #[error("join code already taken")]
    CodeTaken,

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            // CodeTaken is handled by the retry loop in the service; if it
            // escapes this far something is wired wrong.
            StoreError::CodeTaken => AppError::InternalError("join code collision".to_string()),
            StoreError::Backend(msg) => AppError::RedisError(msg),
        }
    }
}

/// Outcome of an atomic redemption attempt.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// This caller won a use slot; the updated record is returned.
    Accepted(Invitation),
    /// All use slots are consumed (single-use: already accepted).
    Exhausted,
    /// Hard deadline passed, whatever the stored status says.
    Expired,
    /// Invitation was revoked or declined before redemption.
    NotRedeemable(InvitationStatus),
    NotFound,
}

/// Outcome of a host-driven terminal transition (revoke / decline).
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Already terminal; revoke is idempotent so callers treat this as Ok.
    AlreadyTerminal(InvitationStatus),
    NotFound,
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Persist a new invitation. Fails with [`StoreError::CodeTaken`] when
    /// the join code is held by a live invitation; the caller retries with
    /// a fresh code.
    async fn insert(&self, invitation: &Invitation) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Invitation>, StoreError>;

    async fn find_by_code(&self, join_code: &str) -> Result<Option<Invitation>, StoreError>;

    async fn find_by_token_hash(&self, token_hash: &str)
        -> Result<Option<Invitation>, StoreError>;

    async fn list_for_room(&self, room_id: &str) -> Result<Vec<Invitation>, StoreError>;

    /// Whether a pending or accepted email-bound invitation exists for
    /// (room, email). Expired-but-unswept rows do not count.
    async fn has_open_for_email(&self, room_id: &str, email: &str) -> Result<bool, StoreError>;

    /// Atomically consume one use slot. Under concurrent redemption of a
    /// single-use invitation exactly one caller observes `Accepted`.
    async fn try_accept(&self, id: &str, now: DateTime<Utc>)
        -> Result<AcceptOutcome, StoreError>;

    /// Undo one `try_accept`, used when the waiting-room entry lost a race
    /// (room filled up between the pre-check and the entry). Best effort.
    async fn release(&self, id: &str) -> Result<(), StoreError>;

    /// Replace a still-pending invitation (host edits email/name/level).
    /// Returns false when the invitation is no longer pending.
    async fn update_pending(&self, invitation: &Invitation) -> Result<bool, StoreError>;

    /// Move a non-terminal invitation into `to` (Revoked or Declined).
    async fn transition(
        &self,
        id: &str,
        to: InvitationStatus,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Backend liveness, for the health endpoint.
    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}
