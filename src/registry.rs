//! Authoritative in-memory room state and the admission state machine.
//!
//! One mutex per room is the unit of serialization: every mutation for a
//! given room (enter, admit, reject, kick, permission change, heartbeat,
//! reap) runs under that room's lock and nowhere touches the network.
//! Unrelated rooms never contend. Events produced by a mutation are
//! appended to the room outbox inside the critical section and handed to
//! the [`Notifier`] strictly after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    Claims, ConnectionState, Participant, ParticipantInfo, PermissionLevel, Room, RoomStatus,
};
use crate::notify::{Notifier, RoomEvent};

/// Read-only view of a room handed to the API; taken under the lock but
/// fully cloned, so rendering it never blocks writers.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room: Room,
    pub participants: Vec<ParticipantInfo>,
}

struct RoomState {
    room: Room,
    participants: HashMap<String, Participant>,
    outbox: Vec<RoomEvent>,
}

impl RoomState {
    fn new(room: Room) -> Self {
        Self {
            room,
            participants: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    fn occupied_slots(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.connection_state.occupies_slot())
            .count()
    }

    fn drain_outbox(&mut self) -> Vec<RoomEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Effective moderator level of the caller, from live state. The room
    /// creator is always host; everyone else must currently hold a
    /// moderator-capable seat. A stale JWT from before a promotion or
    /// demotion does not decide anything here.
    fn moderator_level(&self, caller: &Claims) -> Result<PermissionLevel> {
        if caller.sub == self.room.host_user_id {
            return Ok(PermissionLevel::Host);
        }
        match self.participants.get(&caller.sub) {
            Some(p)
                if p.permission_level.can_moderate()
                    && matches!(
                        p.connection_state,
                        ConnectionState::Admitted | ConnectionState::Active
                    ) =>
            {
                Ok(p.permission_level)
            }
            _ => Err(AppError::Forbidden(
                "Host or co-host permission required".to_string(),
            )),
        }
    }

    fn require_live(&self) -> Result<()> {
        if self.room.status != RoomStatus::Live {
            return Err(AppError::RoomNotLive);
        }
        Ok(())
    }
}

fn rank(level: PermissionLevel) -> u8 {
    match level {
        PermissionLevel::Host => 3,
        PermissionLevel::CoHost => 2,
        PermissionLevel::Guest => 1,
        PermissionLevel::Viewer => 0,
    }
}

pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Mutex<RoomState>>>,
    notifier: Notifier,
    heartbeat_grace: Duration,
}

impl RoomRegistry {
    pub fn new(notifier: Notifier, heartbeat_grace_seconds: u64) -> Self {
        Self {
            rooms: DashMap::new(),
            notifier,
            heartbeat_grace: Duration::seconds(heartbeat_grace_seconds as i64),
        }
    }

    fn entry(&self, room_id: &str) -> Result<Arc<Mutex<RoomState>>> {
        self.rooms
            .get(room_id)
            .map(|r| r.clone())
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", room_id)))
    }

    pub fn insert_room(&self, room: Room) {
        tracing::info!(room_id = %room.room_id, name = %room.name, "Room registered");
        self.rooms
            .insert(room.room_id.clone(), Arc::new(Mutex::new(RoomState::new(room))));
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Descriptive room data (no participants).
    pub async fn room_meta(&self, room_id: &str) -> Result<Room> {
        let entry = self.entry(room_id)?;
        let state = entry.lock().await;
        Ok(state.room.clone())
    }

    pub async fn snapshot(&self, room_id: &str) -> Result<RoomSnapshot> {
        let entry = self.entry(room_id)?;
        let state = entry.lock().await;
        let mut participants: Vec<ParticipantInfo> =
            state.participants.values().map(ParticipantInfo::from).collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(RoomSnapshot {
            room: state.room.clone(),
            participants,
        })
    }

    pub async fn start_room(&self, room_id: &str, caller: &Claims) -> Result<Room> {
        let entry = self.entry(room_id)?;
        let mut state = entry.lock().await;
        state.moderator_level(caller)?;
        match state.room.status {
            RoomStatus::Scheduled => {
                state.room.status = RoomStatus::Live;
                tracing::info!(room_id = %room_id, "Room is live");
            }
            RoomStatus::Live => {} // idempotent
            RoomStatus::Ended => return Err(AppError::RoomEnded),
        }
        Ok(state.room.clone())
    }

    pub async fn end_room(&self, room_id: &str, caller: &Claims) -> Result<()> {
        let entry = self.entry(room_id)?;
        let events = {
            let mut state = entry.lock().await;
            state.moderator_level(caller)?;
            if state.room.status == RoomStatus::Ended {
                return Ok(());
            }
            state.room.status = RoomStatus::Ended;
            state.participants.clear();
            state.outbox.push(RoomEvent::RoomEnded {
                room_id: room_id.to_string(),
            });
            tracing::info!(room_id = %room_id, "Room ended");
            state.drain_outbox()
        };
        self.notifier.publish(events);
        Ok(())
    }

    /// Cheap pre-check used by the redemption flow before it consumes an
    /// invitation use. The authoritative check runs again in
    /// [`enter_waiting_room`]; this one just avoids burning a use slot for
    /// a room that obviously cannot take anyone.
    pub async fn check_can_enter(&self, room_id: &str) -> Result<()> {
        let entry = self.entry(room_id)?;
        let state = entry.lock().await;
        state.require_live()?;
        if state.occupied_slots() >= state.room.settings.max_participants as usize {
            return Err(AppError::RoomFull);
        }
        Ok(())
    }

    /// Place a redeemed guest in the waiting queue. Capacity and liveness
    /// are checked in the same critical section as the insertion, so
    /// concurrent entries can never overshoot `max_participants`.
    pub async fn enter_waiting_room(
        &self,
        room_id: &str,
        identity: &str,
        display_name: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        let entry = self.entry(room_id)?;
        let events = {
            let mut state = entry.lock().await;
            state.require_live()?;

            if let Some(existing) = state.participants.get_mut(identity) {
                if !existing.connection_state.is_terminal() {
                    // Reconnect of a live session: re-attach, keep state.
                    existing.last_seen_at = Utc::now();
                    return Ok(());
                }
                // Kicked or timed-out identity coming back through a fresh
                // redemption: falls through and starts over in the queue.
            }

            if state.occupied_slots() >= state.room.settings.max_participants as usize {
                return Err(AppError::RoomFull);
            }

            let participant = Participant::waiting(
                room_id.to_string(),
                identity.to_string(),
                display_name.to_string(),
                level,
            );
            let info = ParticipantInfo::from(&participant);
            state.participants.insert(identity.to_string(), participant);
            state.outbox.push(RoomEvent::GuestWaiting {
                room_id: room_id.to_string(),
                participant: info,
            });
            tracing::info!(room_id = %room_id, identity = %identity, "Guest entered waiting room");
            state.drain_outbox()
        };
        self.notifier.publish(events);
        Ok(())
    }

    pub async fn admit(&self, room_id: &str, caller: &Claims, identity: &str) -> Result<()> {
        let entry = self.entry(room_id)?;
        let events = {
            let mut state = entry.lock().await;
            state.moderator_level(caller)?;
            state.require_live()?;

            let admitted = match state.participants.get_mut(identity) {
                Some(p) => match p.connection_state {
                    ConnectionState::Waiting => {
                        p.connection_state = ConnectionState::Admitted;
                        p.last_seen_at = Utc::now();
                        true
                    }
                    // Double-click or concurrent admit: already through.
                    ConnectionState::Admitted | ConnectionState::Active => false,
                    ConnectionState::Left | ConnectionState::Kicked => {
                        return Err(AppError::ParticipantNotWaiting);
                    }
                },
                None => return Err(AppError::ParticipantNotWaiting),
            };
            if admitted {
                state.outbox.push(RoomEvent::Admitted {
                    room_id: room_id.to_string(),
                    identity: identity.to_string(),
                });
                tracing::info!(room_id = %room_id, identity = %identity, "Guest admitted");
            }
            state.drain_outbox()
        };
        self.notifier.publish(events);
        Ok(())
    }

    pub async fn reject(&self, room_id: &str, caller: &Claims, identity: &str) -> Result<()> {
        let entry = self.entry(room_id)?;
        let events = {
            let mut state = entry.lock().await;
            state.moderator_level(caller)?;

            let waiting = state
                .participants
                .get(identity)
                .is_some_and(|p| p.connection_state == ConnectionState::Waiting);
            if !waiting {
                // Covers the guest who vanished between the host's screen
                // refresh and the click.
                return Err(AppError::ParticipantNotWaiting);
            }
            state.participants.remove(identity);
            state.outbox.push(RoomEvent::Rejected {
                room_id: room_id.to_string(),
                identity: identity.to_string(),
            });
            tracing::info!(room_id = %room_id, identity = %identity, "Guest rejected");
            state.drain_outbox()
        };
        self.notifier.publish(events);
        Ok(())
    }

    pub async fn kick(&self, room_id: &str, caller: &Claims, identity: &str) -> Result<()> {
        let entry = self.entry(room_id)?;
        let events = {
            let mut state = entry.lock().await;
            let caller_level = state.moderator_level(caller)?;

            let Some(p) = state.participants.get_mut(identity) else {
                return Err(AppError::NotFound("Participant not found".to_string()));
            };
            if p.connection_state.is_terminal() {
                // Already gone; kicking twice is not an error.
                return Ok(());
            }
            if rank(caller_level) <= rank(p.permission_level) {
                return Err(AppError::Forbidden(
                    "Cannot kick a participant of equal or higher level".to_string(),
                ));
            }
            p.connection_state = ConnectionState::Kicked;
            state.outbox.push(RoomEvent::Kicked {
                room_id: room_id.to_string(),
                identity: identity.to_string(),
            });
            tracing::info!(room_id = %room_id, identity = %identity, "Participant kicked");
            state.drain_outbox()
        };
        self.notifier.publish(events);
        Ok(())
    }

    pub async fn set_permission(
        &self,
        room_id: &str,
        caller: &Claims,
        identity: &str,
        new_level: PermissionLevel,
    ) -> Result<()> {
        let entry = self.entry(room_id)?;
        let events = {
            let mut state = entry.lock().await;
            let caller_level = state.moderator_level(caller)?;

            if new_level == PermissionLevel::Host {
                return Err(AppError::Forbidden(
                    "The host role is not transferable".to_string(),
                ));
            }
            if new_level == PermissionLevel::CoHost && caller_level != PermissionLevel::Host {
                return Err(AppError::Forbidden(
                    "Only the host may grant co-host".to_string(),
                ));
            }
            if caller.sub == identity {
                return Err(AppError::Forbidden(
                    "Cannot change your own permission level".to_string(),
                ));
            }

            let Some(p) = state.participants.get_mut(identity) else {
                return Err(AppError::NotFound("Participant not found".to_string()));
            };
            if p.connection_state.is_terminal() {
                return Err(AppError::NotFound("Participant not found".to_string()));
            }
            if p.permission_level == new_level {
                return Ok(()); // idempotent
            }
            p.permission_level = new_level;
            state.outbox.push(RoomEvent::PermissionChanged {
                room_id: room_id.to_string(),
                identity: identity.to_string(),
                level: new_level,
            });
            tracing::info!(
                room_id = %room_id,
                identity = %identity,
                level = new_level.as_str(),
                "Permission changed"
            );
            state.drain_outbox()
        };
        self.notifier.publish(events);
        Ok(())
    }

    /// Liveness ping. The first heartbeat after admission activates the
    /// participant.
    pub async fn heartbeat(&self, room_id: &str, identity: &str) -> Result<()> {
        let entry = self.entry(room_id)?;
        let events = {
            let mut state = entry.lock().await;
            let Some(p) = state.participants.get_mut(identity) else {
                return Err(AppError::NotFound("Participant not found".to_string()));
            };
            if p.connection_state.is_terminal() {
                return Err(AppError::NotFound("Participant not found".to_string()));
            }
            p.last_seen_at = Utc::now();
            if p.connection_state == ConnectionState::Admitted {
                p.connection_state = ConnectionState::Active;
                state.outbox.push(RoomEvent::ParticipantActive {
                    room_id: room_id.to_string(),
                    identity: identity.to_string(),
                });
            }
            state.drain_outbox()
        };
        self.notifier.publish(events);
        Ok(())
    }

    /// Background sweep: silent participants past the grace period go to
    /// `Left`, and long-dead terminal entries are dropped. The only
    /// proactive timeout in the system.
    pub async fn reap_idle(&self, now: DateTime<Utc>) {
        let entries: Vec<(String, Arc<Mutex<RoomState>>)> = self
            .rooms
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        for (room_id, entry) in entries {
            let events = {
                let mut state = entry.lock().await;
                if state.room.status != RoomStatus::Live {
                    continue;
                }
                let grace = self.heartbeat_grace;
                let mut reaped = Vec::new();
                for p in state.participants.values_mut() {
                    if p.connection_state.occupies_slot() && now - p.last_seen_at > grace {
                        p.connection_state = ConnectionState::Left;
                        reaped.push(p.identity.clone());
                    }
                }
                for identity in &reaped {
                    state.outbox.push(RoomEvent::ParticipantLeft {
                        room_id: room_id.clone(),
                        identity: identity.clone(),
                    });
                }
                // Terminal entries linger one extra grace period so hosts
                // see who left, then disappear.
                state.participants.retain(|_, p| {
                    !(p.connection_state.is_terminal() && now - p.last_seen_at > grace * 2)
                });
                if !reaped.is_empty() {
                    tracing::debug!(room_id = %room_id, count = reaped.len(), "Idle participants reaped");
                }
                state.drain_outbox()
            };
            self.notifier.publish(events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomSettings;
    use crate::ws::ConnectionsManager;

    fn registry() -> RoomRegistry {
        let connections = Arc::new(ConnectionsManager::new());
        RoomRegistry::new(Notifier::new(connections), 90)
    }

    fn live_room(max: u32) -> Room {
        let mut room = Room::new(
            "host-1".to_string(),
            "Interview".to_string(),
            None,
            RoomSettings {
                max_participants: max,
                recording_on_join: false,
                allow_viewer_redeem: false,
            },
        );
        room.status = RoomStatus::Live;
        room
    }

    fn host_claims(room_id: &str) -> Claims {
        Claims {
            sub: "host-1".to_string(),
            room_id: room_id.to_string(),
            display: "Host".to_string(),
            level: PermissionLevel::Host,
            iat: 0,
            exp: 0,
        }
    }

    fn guest_claims(room_id: &str, identity: &str) -> Claims {
        Claims {
            sub: identity.to_string(),
            room_id: room_id.to_string(),
            display: identity.to_string(),
            level: PermissionLevel::Guest,
            iat: 0,
            exp: 0,
        }
    }

    #[tokio::test]
    async fn waiting_then_admit_then_active() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        reg.enter_waiting_room(&room_id, "g1", "Guest One", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.admit(&room_id, &host, "g1").await.unwrap();
        reg.heartbeat(&room_id, "g1").await.unwrap();

        let snap = reg.snapshot(&room_id).await.unwrap();
        assert_eq!(snap.participants.len(), 1);
        assert_eq!(snap.participants[0].connection_state, ConnectionState::Active);
    }

    #[tokio::test]
    async fn admit_is_idempotent() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        reg.enter_waiting_room(&room_id, "g1", "Guest", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.admit(&room_id, &host, "g1").await.unwrap();
        reg.admit(&room_id, &host, "g1").await.unwrap();
        reg.heartbeat(&room_id, "g1").await.unwrap();
        reg.admit(&room_id, &host, "g1").await.unwrap();
    }

    #[tokio::test]
    async fn admit_missing_guest_is_a_conflict() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        let err = reg.admit(&room_id, &host, "ghost").await.unwrap_err();
        assert!(matches!(err, AppError::ParticipantNotWaiting));
    }

    #[tokio::test]
    async fn guest_cannot_moderate() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);

        reg.enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.enter_waiting_room(&room_id, "g2", "Two", PermissionLevel::Guest)
            .await
            .unwrap();

        let imposter = guest_claims(&room_id, "g1");
        let err = reg.admit(&room_id, &imposter, "g2").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn room_full_is_a_hard_cap() {
        let reg = registry();
        let room = live_room(2);
        let room_id = room.room_id.clone();
        reg.insert_room(room);

        reg.enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.enter_waiting_room(&room_id, "g2", "Two", PermissionLevel::Guest)
            .await
            .unwrap();
        let err = reg
            .enter_waiting_room(&room_id, "g3", "Three", PermissionLevel::Guest)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RoomFull));
    }

    #[tokio::test]
    async fn room_full_under_concurrent_entry() {
        let reg = Arc::new(registry());
        let room = live_room(3);
        let room_id = room.room_id.clone();
        reg.insert_room(room);

        let mut handles = Vec::new();
        for i in 0..10 {
            let reg = reg.clone();
            let room_id = room_id.clone();
            handles.push(tokio::spawn(async move {
                reg.enter_waiting_room(
                    &room_id,
                    &format!("g{}", i),
                    "Guest",
                    PermissionLevel::Guest,
                )
                .await
                .is_ok()
            }));
        }

        let mut entered = 0;
        for handle in handles {
            if handle.await.unwrap() {
                entered += 1;
            }
        }
        assert_eq!(entered, 3);
    }

    #[tokio::test]
    async fn reject_after_disconnect_race_is_a_conflict() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        reg.enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.reject(&room_id, &host, "g1").await.unwrap();
        // Second click on a guest who is already gone.
        let err = reg.reject(&room_id, &host, "g1").await.unwrap_err();
        assert!(matches!(err, AppError::ParticipantNotWaiting));
    }

    #[tokio::test]
    async fn kicked_guest_frees_slot_and_can_requeue() {
        let reg = registry();
        let room = live_room(1);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        reg.enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.admit(&room_id, &host, "g1").await.unwrap();
        reg.kick(&room_id, &host, "g1").await.unwrap();

        // Slot freed: a fresh redemption by the same identity lands back
        // in the waiting queue.
        reg.enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap();
        let snap = reg.snapshot(&room_id).await.unwrap();
        assert_eq!(
            snap.participants[0].connection_state,
            ConnectionState::Waiting
        );
    }

    #[tokio::test]
    async fn cohost_grant_requires_host() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        for g in ["g1", "g2"] {
            reg.enter_waiting_room(&room_id, g, g, PermissionLevel::Guest)
                .await
                .unwrap();
            reg.admit(&room_id, &host, g).await.unwrap();
            reg.heartbeat(&room_id, g).await.unwrap();
        }

        reg.set_permission(&room_id, &host, "g1", PermissionLevel::CoHost)
            .await
            .unwrap();

        // The new co-host may moderate, but may not mint more co-hosts.
        let cohost = guest_claims(&room_id, "g1");
        let err = reg
            .set_permission(&room_id, &cohost, "g2", PermissionLevel::CoHost)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        reg.set_permission(&room_id, &cohost, "g2", PermissionLevel::Viewer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn self_escalation_is_refused() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        reg.enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.admit(&room_id, &host, "g1").await.unwrap();
        reg.heartbeat(&room_id, "g1").await.unwrap();
        reg.set_permission(&room_id, &host, "g1", PermissionLevel::CoHost)
            .await
            .unwrap();

        let cohost = guest_claims(&room_id, "g1");
        let err = reg
            .set_permission(&room_id, &cohost, "g1", PermissionLevel::Guest)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn idle_waiting_guest_is_reaped() {
        let reg = RoomRegistry::new(Notifier::new(Arc::new(ConnectionsManager::new())), 1);
        let room = live_room(2);
        let room_id = room.room_id.clone();
        reg.insert_room(room);

        reg.enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap();

        // Past the grace period but inside the terminal-retention window,
        // so the entry is still visible as Left.
        reg.reap_idle(Utc::now() + Duration::milliseconds(1500)).await;

        let snap = reg.snapshot(&room_id).await.unwrap();
        assert_eq!(snap.participants[0].connection_state, ConnectionState::Left);

        // Slot is free again.
        reg.enter_waiting_room(&room_id, "g2", "Two", PermissionLevel::Guest)
            .await
            .unwrap();
        reg.enter_waiting_room(&room_id, "g3", "Three", PermissionLevel::Guest)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ended_room_refuses_entry() {
        let reg = registry();
        let room = live_room(5);
        let room_id = room.room_id.clone();
        reg.insert_room(room);
        let host = host_claims(&room_id);

        reg.end_room(&room_id, &host).await.unwrap();
        let err = reg
            .enter_waiting_room(&room_id, "g1", "One", PermissionLevel::Guest)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RoomNotLive));
        // Ending twice is a no-op.
        reg.end_room(&room_id, &host).await.unwrap();
    }
}
