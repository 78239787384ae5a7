//! Redis-backed [`InvitationStore`].
//!
//! Key layout:
//!   invite:{id}         invitation record (JSON), kept past expiry for audit
//!   invite:code:{code}  join-code claim, TTL = invitation expiry (SET NX)
//!   invite:tok:{hash}   deep-link lookup, TTL = record retention
//!   invite:uses:{id}    authoritative use counter (INCR is the race winner)
//!   invite:room:{id}    set of invitation ids per room
//!
//! Join-code uniqueness is the `SET NX` on the code claim; the TTL garbage
//! collects expired claims so codes recycle on their own. The use counter
//! decides concurrent redemption; the JSON record mirrors it for display.

use chrono::{DateTime, Utc};
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;

use async_trait::async_trait;

use super::{AcceptOutcome, InvitationStore, StoreError, TransitionOutcome};
use crate::config::Config;
use crate::models::{Invitation, InvitationStatus};

/// How long a record outlives its own expiry before Redis drops it.
const RECORD_RETENTION_SECONDS: i64 = 30 * 86400;

/// Create a Redis connection pool
pub fn create_pool(config: &Config) -> Result<Pool, StoreError> {
    let redis_config = RedisConfig::from_url(&config.redis_url);
    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::Backend(format!("Failed to create Redis pool: {}", e)))
}

#[derive(Clone)]
pub struct RedisInvitationStore {
    pool: Pool,
}

impl RedisInvitationStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get_record(
        &self,
        conn: &mut deadpool_redis::Connection,
        id: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let json: Option<String> = conn
            .get(format!("invite:{}", id))
            .await
            .map_err(backend)?;
        match json {
            Some(data) => {
                let inv: Invitation =
                    serde_json::from_str(&data).map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some(inv))
            }
            None => Ok(None),
        }
    }

    async fn put_record(
        &self,
        conn: &mut deadpool_redis::Connection,
        inv: &Invitation,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(inv).map_err(|e| StoreError::Backend(e.to_string()))?;
        redis::cmd("SET")
            .arg(format!("invite:{}", inv.id))
            .arg(&json)
            .arg("KEEPTTL")
            .query_async::<()>(&mut **conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    /// Check Redis connection health
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(pong == "PONG")
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn millis_until(instant: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (instant - now).num_milliseconds().max(1)
}

#[async_trait]
impl InvitationStore for RedisInvitationStore {
    async fn insert(&self, invitation: &Invitation) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let code_ttl_ms = millis_until(invitation.expires_at, now);
        let record_ttl_ms = code_ttl_ms + RECORD_RETENTION_SECONDS * 1000;

        // The join-code claim is the uniqueness constraint.
        let claimed: bool = redis::cmd("SET")
            .arg(format!("invite:code:{}", invitation.join_code))
            .arg(&invitation.id)
            .arg("NX")
            .arg("PX")
            .arg(code_ttl_ms)
            .query_async::<Option<String>>(&mut *conn)
            .await
            .map_err(backend)?
            .is_some();
        if !claimed {
            return Err(StoreError::CodeTaken);
        }

        let json =
            serde_json::to_string(invitation).map_err(|e| StoreError::Backend(e.to_string()))?;
        redis::cmd("SET")
            .arg(format!("invite:{}", invitation.id))
            .arg(&json)
            .arg("PX")
            .arg(record_ttl_ms)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend)?;

        redis::cmd("SET")
            .arg(format!("invite:tok:{}", invitation.token_hash))
            .arg(&invitation.id)
            .arg("PX")
            .arg(record_ttl_ms)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend)?;

        conn.sadd::<_, _, ()>(format!("invite:room:{}", invitation.room_id), &invitation.id)
            .await
            .map_err(backend)?;

        tracing::debug!(
            invitation_id = %invitation.id,
            room_id = %invitation.room_id,
            "Invitation persisted"
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Invitation>, StoreError> {
        let mut conn = self.conn().await?;
        self.get_record(&mut conn, id).await
    }

    async fn find_by_code(&self, join_code: &str) -> Result<Option<Invitation>, StoreError> {
        let mut conn = self.conn().await?;
        let id: Option<String> = conn
            .get(format!("invite:code:{}", join_code))
            .await
            .map_err(backend)?;
        match id {
            Some(id) => self.get_record(&mut conn, &id).await,
            None => Ok(None),
        }
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, StoreError> {
        let mut conn = self.conn().await?;
        let id: Option<String> = conn
            .get(format!("invite:tok:{}", token_hash))
            .await
            .map_err(backend)?;
        match id {
            Some(id) => self.get_record(&mut conn, &id).await,
            None => Ok(None),
        }
    }

    async fn list_for_room(&self, room_id: &str) -> Result<Vec<Invitation>, StoreError> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .smembers(format!("invite:room:{}", room_id))
            .await
            .map_err(backend)?;

        let mut invitations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(inv) = self.get_record(&mut conn, &id).await? {
                invitations.push(inv);
            }
        }
        invitations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(invitations)
    }

    async fn has_open_for_email(&self, room_id: &str, email: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let open = self.list_for_room(room_id).await?.into_iter().any(|inv| {
            inv.invitee_email.as_deref() == Some(email)
                && matches!(
                    inv.effective_status(now),
                    InvitationStatus::Pending | InvitationStatus::Accepted
                )
        });
        Ok(open)
    }

    async fn try_accept(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome, StoreError> {
        let mut conn = self.conn().await?;
        let Some(inv) = self.get_record(&mut conn, id).await? else {
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

        // INCR decides the race: each winner gets a distinct slot number.
        let uses_key = format!("invite:uses:{}", id);
        let slot: u32 = conn.incr(&uses_key, 1u32).await.map_err(backend)?;
        if let Some(max) = inv.max_uses {
            if slot > max {
                conn.decr::<_, _, ()>(&uses_key, 1u32).await.map_err(backend)?;
                return Ok(AcceptOutcome::Exhausted);
            }
        }

        // A revoke may have landed between the read and the INCR; give the
        // slot back rather than resurrect the invitation.
        if let Some(current) = self.get_record(&mut conn, id).await? {
            if matches!(
                current.status,
                InvitationStatus::Declined | InvitationStatus::Revoked
            ) {
                conn.decr::<_, _, ()>(&uses_key, 1u32).await.map_err(backend)?;
                return Ok(AcceptOutcome::NotRedeemable(current.status));
            }
        }

        let mut updated = inv;
        updated.use_count = slot;
        updated.status = InvitationStatus::Accepted;
        updated.redeemed_at.get_or_insert(now);
        self.put_record(&mut conn, &updated).await?;

        Ok(AcceptOutcome::Accepted(updated))
    }

    async fn release(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let uses_key = format!("invite:uses:{}", id);
        let current: Option<u32> = conn.get(&uses_key).await.map_err(backend)?;
        let remaining = match current {
            Some(n) if n > 0 => {
                let n: u32 = conn.decr(&uses_key, 1u32).await.map_err(backend)?;
                n
            }
            _ => return Ok(()),
        };

        if let Some(mut inv) = self.get_record(&mut conn, id).await? {
            inv.use_count = remaining;
            if remaining == 0 && inv.status == InvitationStatus::Accepted {
                inv.status = InvitationStatus::Pending;
                inv.redeemed_at = None;
            }
            self.put_record(&mut conn, &inv).await?;
        }
        Ok(())
    }

    async fn update_pending(&self, invitation: &Invitation) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let updatable = self
            .get_record(&mut conn, &invitation.id)
            .await?
            .is_some_and(|inv| inv.effective_status(now) == InvitationStatus::Pending);
        if !updatable {
            return Ok(false);
        }
        self.put_record(&mut conn, invitation).await?;
        Ok(true)
    }

    async fn transition(
        &self,
        id: &str,
        to: InvitationStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let Some(mut inv) = self.get_record(&mut conn, id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        let effective = inv.effective_status(now);
        if effective.is_terminal() {
            return Ok(TransitionOutcome::AlreadyTerminal(effective));
        }

        inv.status = to;
        self.put_record(&mut conn, &inv).await?;

        // Free the code for reuse; the claim belongs to live rows only.
        conn.del::<_, ()>(format!("invite:code:{}", inv.join_code))
            .await
            .map_err(backend)?;

        tracing::debug!(invitation_id = %id, status = ?to, "Invitation transitioned");
        Ok(TransitionOutcome::Applied)
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        RedisInvitationStore::health_check(self).await
    }
}
