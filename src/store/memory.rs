//! In-memory [`InvitationStore`]. One mutex over the whole table makes
//! every contract operation trivially atomic; fine for tests and
//! single-node development, not meant to survive a restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AcceptOutcome, InvitationStore, StoreError, TransitionOutcome};
use crate::models::{Invitation, InvitationStatus};

#[derive(Default)]
struct Tables {
    by_id: HashMap<String, Invitation>,
    id_by_code: HashMap<String, String>,
    id_by_token: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryInvitationStore {
    inner: Mutex<Tables>,
}

impl MemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvitationStore for MemoryInvitationStore {
    async fn insert(&self, invitation: &Invitation) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();

        if let Some(existing_id) = tables.id_by_code.get(&invitation.join_code) {
            let live = tables
                .by_id
                .get(existing_id)
                .is_some_and(|existing| !existing.is_expired(now));
            if live {
                return Err(StoreError::CodeTaken);
            }
        }

        tables
            .id_by_code
            .insert(invitation.join_code.clone(), invitation.id.clone());
        tables
            .id_by_token
            .insert(invitation.token_hash.clone(), invitation.id.clone());
        tables
            .by_id
            .insert(invitation.id.clone(), invitation.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Invitation>, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        Ok(tables.by_id.get(id).cloned())
    }

    async fn find_by_code(&self, join_code: &str) -> Result<Option<Invitation>, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        Ok(tables
            .id_by_code
            .get(join_code)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        Ok(tables
            .id_by_token
            .get(token_hash)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn list_for_room(&self, room_id: &str) -> Result<Vec<Invitation>, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        let mut invitations: Vec<Invitation> = tables
            .by_id
            .values()
            .filter(|inv| inv.room_id == room_id)
            .cloned()
            .collect();
        invitations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(invitations)
    }

    async fn has_open_for_email(&self, room_id: &str, email: &str) -> Result<bool, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        Ok(tables.by_id.values().any(|inv| {
            inv.room_id == room_id
                && inv.invitee_email.as_deref() == Some(email)
                && matches!(
                    inv.effective_status(now),
                    InvitationStatus::Pending | InvitationStatus::Accepted
                )
        }))
    }

    async fn try_accept(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let Some(inv) = tables.by_id.get_mut(id) else {
            return Ok(AcceptOutcome::NotFound);
        };

        match inv.status {
            InvitationStatus::Declined | InvitationStatus::Revoked => {
                return Ok(AcceptOutcome::NotRedeemable(inv.status));
            }
            InvitationStatus::Expired => return Ok(AcceptOutcome::Expired),
            InvitationStatus::Pending | InvitationStatus::Accepted => {}
        }
        if inv.is_expired(now) {
            return Ok(AcceptOutcome::Expired);
        }
        if !inv.has_uses_left() {
            return Ok(AcceptOutcome::Exhausted);
        }

        inv.use_count += 1;
        inv.status = InvitationStatus::Accepted;
        inv.redeemed_at.get_or_insert(now);
        Ok(AcceptOutcome::Accepted(inv.clone()))
    }

    async fn release(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        if let Some(inv) = tables.by_id.get_mut(id) {
            inv.use_count = inv.use_count.saturating_sub(1);
            if inv.use_count == 0 && inv.status == InvitationStatus::Accepted {
                inv.status = InvitationStatus::Pending;
                inv.redeemed_at = None;
            }
        }
        Ok(())
    }

    async fn update_pending(&self, invitation: &Invitation) -> Result<bool, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let updatable = tables
            .by_id
            .get(&invitation.id)
            .is_some_and(|inv| inv.effective_status(now) == InvitationStatus::Pending);
        if !updatable {
            return Ok(false);
        }
        tables
            .by_id
            .insert(invitation.id.clone(), invitation.clone());
        Ok(true)
    }

    async fn transition(
        &self,
        id: &str,
        to: InvitationStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let Some(inv) = tables.by_id.get(id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        let effective = inv.effective_status(now);
        if effective.is_terminal() {
            return Ok(TransitionOutcome::AlreadyTerminal(effective));
        }

        let join_code = inv.join_code.clone();
        if let Some(inv) = tables.by_id.get_mut(id) {
            inv.status = to;
        }
        // Terminal rows no longer hold their join code.
        if tables.id_by_code.get(&join_code) == Some(&id.to_string()) {
            tables.id_by_code.remove(&join_code);
        }
        Ok(TransitionOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PermissionLevel;
    use pretty_assertions::assert_eq;

    fn invitation(room: &str, code: &str, max_uses: Option<u32>) -> Invitation {
        Invitation::new(
            room.to_string(),
            code.to_string(),
            format!("hash-{}", code),
            None,
            None,
            PermissionLevel::Guest,
            max_uses,
            3600,
        )
    }

    #[tokio::test]
    async fn insert_rejects_live_code_collision() {
        let store = MemoryInvitationStore::new();
        store.insert(&invitation("r1", "CODE", Some(1))).await.unwrap();

        let err = store.insert(&invitation("r1", "CODE", Some(1))).await;
        assert!(matches!(err, Err(StoreError::CodeTaken)));
    }

    #[tokio::test]
    async fn code_frees_up_after_revoke() {
        let store = MemoryInvitationStore::new();
        let first = invitation("r1", "CODE", Some(1));
        store.insert(&first).await.unwrap();
        store
            .transition(&first.id, InvitationStatus::Revoked)
            .await
            .unwrap();

        store.insert(&invitation("r1", "CODE", Some(1))).await.unwrap();
    }

    #[tokio::test]
    async fn try_accept_consumes_single_use_once() {
        let store = MemoryInvitationStore::new();
        let inv = invitation("r1", "CODE", Some(1));
        store.insert(&inv).await.unwrap();
        let now = Utc::now();

        assert!(matches!(
            store.try_accept(&inv.id, now).await.unwrap(),
            AcceptOutcome::Accepted(_)
        ));
        assert!(matches!(
            store.try_accept(&inv.id, now).await.unwrap(),
            AcceptOutcome::Exhausted
        ));
    }

    #[tokio::test]
    async fn try_accept_honors_deadline_over_status() {
        let store = MemoryInvitationStore::new();
        let mut inv = invitation("r1", "CODE", Some(1));
        inv.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.insert(&inv).await.unwrap();

        assert!(matches!(
            store.try_accept(&inv.id, Utc::now()).await.unwrap(),
            AcceptOutcome::Expired
        ));
    }

    #[tokio::test]
    async fn release_restores_a_use_slot() {
        let store = MemoryInvitationStore::new();
        let inv = invitation("r1", "CODE", Some(1));
        store.insert(&inv).await.unwrap();
        let now = Utc::now();

        store.try_accept(&inv.id, now).await.unwrap();
        store.release(&inv.id).await.unwrap();

        let restored = store.get(&inv.id).await.unwrap().unwrap();
        assert_eq!(restored.status, InvitationStatus::Pending);
        assert_eq!(restored.use_count, 0);
        assert!(matches!(
            store.try_accept(&inv.id, now).await.unwrap(),
            AcceptOutcome::Accepted(_)
        ));
    }

    #[tokio::test]
    async fn transition_is_idempotent_on_terminal() {
        let store = MemoryInvitationStore::new();
        let inv = invitation("r1", "CODE", Some(1));
        store.insert(&inv).await.unwrap();

        assert_eq!(
            store
                .transition(&inv.id, InvitationStatus::Revoked)
                .await
                .unwrap(),
            TransitionOutcome::Applied
        );
        assert_eq!(
            store
                .transition(&inv.id, InvitationStatus::Revoked)
                .await
                .unwrap(),
            TransitionOutcome::AlreadyTerminal(InvitationStatus::Revoked)
        );
    }

    #[tokio::test]
    async fn open_email_invitation_blocks_duplicates() {
        let store = MemoryInvitationStore::new();
        let mut inv = invitation("r1", "CODE", None);
        inv.invitee_email = Some("a@example.com".to_string());
        inv.max_uses = Some(1);
        store.insert(&inv).await.unwrap();

        assert!(store.has_open_for_email("r1", "a@example.com").await.unwrap());
        assert!(!store.has_open_for_email("r1", "b@example.com").await.unwrap());
        assert!(!store.has_open_for_email("r2", "a@example.com").await.unwrap());

        store
            .transition(&inv.id, InvitationStatus::Revoked)
            .await
            .unwrap();
        assert!(!store.has_open_for_email("r1", "a@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_single_use_redemption_has_one_winner() {
        use std::sync::Arc;

        let store = Arc::new(MemoryInvitationStore::new());
        let inv = invitation("r1", "CODE", Some(1));
        store.insert(&inv).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = inv.id.clone();
            handles.push(tokio::spawn(async move {
                matches!(
                    store.try_accept(&id, Utc::now()).await.unwrap(),
                    AcceptOutcome::Accepted(_)
                )
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
