//! End-to-end tests of the invitation and admission pipeline, run against
//! the in-memory store so no external services are needed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::response::IntoResponse;
use chrono::Utc;

use greenroom_backend::auth::AuthService;
use greenroom_backend::config::Config;
use greenroom_backend::error::{AppError, RedeemRejection};
use greenroom_backend::invitations::InvitationService;
use greenroom_backend::models::{
    Claims, ConnectionState, CreateInvitationRequest, InvitationStatus, PermissionLevel, Room,
    RoomSettings, RoomStatus,
};
use greenroom_backend::notify::Notifier;
use greenroom_backend::ratelimit::RateLimiter;
use greenroom_backend::registry::RoomRegistry;
use greenroom_backend::store::{InvitationStore, MemoryInvitationStore};
use greenroom_backend::ws::ConnectionsManager;

struct Harness {
    service: Arc<InvitationService>,
    registry: Arc<RoomRegistry>,
    store: Arc<MemoryInvitationStore>,
}

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        server_host: "localhost".to_string(),
        server_port: 8080,
        redis_url: "redis://unused".to_string(),
        jwt_secret: "integration-test-secret".to_string(),
        jwt_expiry_seconds: 3600,
        invite_ttl_seconds: 86400,
        max_participants_default: 10,
        heartbeat_grace_seconds: 90,
        reaper_interval_seconds: 30,
        redeem_attempts_per_window: 10,
        redeem_window_seconds: 60,
        code_retry_limit: 5,
        frontend_host: None,
        store_backend: "memory".to_string(),
    })
}

fn harness() -> Harness {
    let config = test_config();
    let store = Arc::new(MemoryInvitationStore::new());
    let auth = Arc::new(AuthService::new(&config));
    let connections = Arc::new(ConnectionsManager::new());
    let registry = Arc::new(RoomRegistry::new(
        Notifier::new(connections),
        config.heartbeat_grace_seconds,
    ));
    let limiter = Arc::new(RateLimiter::new(
        config.redeem_attempts_per_window,
        Duration::from_secs(config.redeem_window_seconds),
    ));
    let service = Arc::new(InvitationService::new(
        store.clone(),
        registry.clone(),
        limiter,
        auth,
        None,
        config,
    ));
    Harness {
        service,
        registry,
        store,
    }
}

impl Harness {
    /// Register a live room and hand back its id plus host claims.
    async fn live_room(&self, max_participants: u32) -> (String, Claims) {
        let room = Room::new(
            "host-user".to_string(),
            "Panel interview".to_string(),
            None,
            RoomSettings {
                max_participants,
                recording_on_join: false,
                allow_viewer_redeem: false,
            },
        );
        let room_id = room.room_id.clone();
        self.registry.insert_room(room);
        let host = Claims {
            sub: "host-user".to_string(),
            room_id: room_id.clone(),
            display: "Host".to_string(),
            level: PermissionLevel::Host,
            iat: 0,
            exp: 0,
        };
        self.registry.start_room(&room_id, &host).await.unwrap();
        (room_id, host)
    }

    fn invite_request(
        email: Option<&str>,
        max_uses: Option<u32>,
        expires_in: Option<u64>,
    ) -> CreateInvitationRequest {
        CreateInvitationRequest {
            invitee_email: email.map(str::to_string),
            invitee_name: None,
            permission_level: PermissionLevel::Guest,
            expires_in_seconds: expires_in,
            max_uses,
        }
    }
}

#[tokio::test]
async fn created_join_codes_are_unique() {
    let h = harness();
    let (room_id, _) = h.live_room(50).await;

    let mut codes = HashSet::new();
    for _ in 0..25 {
        let inv = h
            .service
            .create_invitation(&room_id, Harness::invite_request(None, None, None))
            .await
            .unwrap();
        assert_eq!(inv.join_code.len(), 12);
        codes.insert(inv.join_code);
    }
    assert_eq!(codes.len(), 25);
}

#[tokio::test]
async fn duplicate_email_invitation_is_a_conflict() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    h.service
        .create_invitation(
            &room_id,
            Harness::invite_request(Some("cand@example.com"), None, None),
        )
        .await
        .unwrap();

    let err = h
        .service
        .create_invitation(
            &room_id,
            Harness::invite_request(Some("cand@example.com"), None, None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateInvitation));

    // A different address is fine.
    h.service
        .create_invitation(
            &room_id,
            Harness::invite_request(Some("other@example.com"), None, None),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn expiry_is_enforced_lazily_at_redemption() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(&room_id, Harness::invite_request(None, None, Some(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // No sweeper ran: the stored row still says pending.
    let stored = h.store.get(&inv.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InvitationStatus::Pending);
    assert!(stored.is_expired(Utc::now()));

    let err = h
        .service
        .redeem_code(&inv.join_code, Some("Late Guest".to_string()), "10.0.0.1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InviteInvalid(RedeemRejection::Expired)
    ));
}

#[tokio::test]
async fn single_use_code_cannot_be_redeemed_twice() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(
            &room_id,
            Harness::invite_request(Some("one@example.com"), None, None),
        )
        .await
        .unwrap();

    h.service
        .redeem_code(&inv.join_code, Some("First".to_string()), "10.0.0.1")
        .await
        .unwrap();

    let err = h
        .service
        .redeem_code(&inv.join_code, Some("Second".to_string()), "10.0.0.2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InviteInvalid(RedeemRejection::AlreadyUsed)
    ));
}

#[tokio::test]
async fn concurrent_redemption_of_single_use_code_has_one_winner() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(&room_id, Harness::invite_request(None, Some(1), None))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = h.service.clone();
        let code = inv.join_code.clone();
        handles.push(tokio::spawn(async move {
            service
                .redeem_code(&code, Some(format!("Guest {}", i)), &format!("10.0.1.{}", i))
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AppError::InviteInvalid(
                RedeemRejection::AlreadyUsed | RedeemRejection::RateLimited,
            )) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn host_admits_two_guests_then_room_is_full() {
    let h = harness();
    let (room_id, host) = h.live_room(2).await;

    // Multi-use anonymous code for a max=2 room.
    let inv = h
        .service
        .create_invitation(&room_id, Harness::invite_request(None, None, None))
        .await
        .unwrap();

    let a = h
        .service
        .redeem_code(&inv.join_code, Some("Guest A".to_string()), "10.0.2.1")
        .await
        .unwrap();
    let b = h
        .service
        .redeem_code(&inv.join_code, Some("Guest B".to_string()), "10.0.2.2")
        .await
        .unwrap();

    h.registry.admit(&room_id, &host, &a.identity).await.unwrap();
    h.registry.admit(&room_id, &host, &b.identity).await.unwrap();
    h.registry.heartbeat(&room_id, &a.identity).await.unwrap();
    h.registry.heartbeat(&room_id, &b.identity).await.unwrap();

    let snapshot = h.registry.snapshot(&room_id).await.unwrap();
    assert!(snapshot
        .participants
        .iter()
        .all(|p| p.connection_state == ConnectionState::Active));

    let err = h
        .service
        .redeem_code(&inv.join_code, Some("Guest C".to_string()), "10.0.2.3")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RoomFull));

    // The lost race gave the use slot back.
    let stored = h.store.get(&inv.id).await.unwrap().unwrap();
    assert_eq!(stored.use_count, 2);
}

#[tokio::test]
async fn redemption_against_scheduled_room_is_refused() {
    let h = harness();
    let room = Room::new(
        "host-user".to_string(),
        "Not started yet".to_string(),
        None,
        RoomSettings {
            max_participants: 5,
            recording_on_join: false,
            allow_viewer_redeem: false,
        },
    );
    let room_id = room.room_id.clone();
    assert_eq!(room.status, RoomStatus::Scheduled);
    h.registry.insert_room(room);

    let inv = h
        .service
        .create_invitation(&room_id, Harness::invite_request(None, None, None))
        .await
        .unwrap();

    let err = h
        .service
        .redeem_code(&inv.join_code, Some("Early Bird".to_string()), "10.0.3.1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RoomNotLive));
}

#[tokio::test]
async fn revoked_invitation_is_dead_and_revoke_is_idempotent() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(&room_id, Harness::invite_request(None, None, None))
        .await
        .unwrap();

    h.service.revoke(&inv.id, &room_id).await.unwrap();
    h.service.revoke(&inv.id, &room_id).await.unwrap();

    let err = h
        .service
        .redeem_code(&inv.join_code, Some("Guest".to_string()), "10.0.4.1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InviteInvalid(_)));
}

#[tokio::test]
async fn viewer_redemption_is_gated_by_room_flag() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(
            &room_id,
            CreateInvitationRequest {
                invitee_email: None,
                invitee_name: None,
                permission_level: PermissionLevel::Viewer,
                expires_in_seconds: None,
                max_uses: None,
            },
        )
        .await
        .unwrap();

    let err = h
        .service
        .redeem_code(&inv.join_code, Some("Watcher".to_string()), "10.0.5.1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InviteInvalid(RedeemRejection::ViewerBlocked)
    ));
}

#[tokio::test]
async fn eleventh_wrong_code_attempt_is_rate_limited() {
    let h = harness();
    let (_room_id, _) = h.live_room(10).await;

    for _ in 0..10 {
        let err = h
            .service
            .redeem_code("WRONGCODE999", Some("Guesser".to_string()), "10.0.6.1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InviteInvalid(RedeemRejection::NotFound)
        ));
    }

    let err = h
        .service
        .redeem_code("WRONGCODE999", Some("Guesser".to_string()), "10.0.6.1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InviteInvalid(RedeemRejection::RateLimited)
    ));
}

#[tokio::test]
async fn rate_limited_and_not_found_share_one_response_shape() {
    let not_found = AppError::InviteInvalid(RedeemRejection::NotFound).into_response();
    let rate_limited = AppError::InviteInvalid(RedeemRejection::RateLimited).into_response();

    assert_eq!(not_found.status(), rate_limited.status());

    let nf_body = axum::body::to_bytes(not_found.into_body(), usize::MAX)
        .await
        .unwrap();
    let rl_body = axum::body::to_bytes(rate_limited.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(nf_body, rl_body);
}

#[tokio::test]
async fn deep_link_token_redeems_like_a_code() {
    let h = harness();
    let (room_id, host) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(
            &room_id,
            Harness::invite_request(Some("deep@example.com"), None, None),
        )
        .await
        .unwrap();

    let preview = h.service.token_preview(&inv.token).await.unwrap();
    assert!(preview.is_valid);

    let ticket = h
        .service
        .redeem_token(&inv.token, Some("Link Guest".to_string()), "10.0.7.1")
        .await
        .unwrap();
    assert_eq!(ticket.room_id, room_id);
    assert_eq!(ticket.permission_level, PermissionLevel::Guest);

    h.registry
        .admit(&room_id, &host, &ticket.identity)
        .await
        .unwrap();

    // Token and code are the same single-use invitation.
    let err = h
        .service
        .redeem_code(&inv.join_code, Some("Copycat".to_string()), "10.0.7.2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InviteInvalid(RedeemRejection::AlreadyUsed)
    ));
}

#[tokio::test]
async fn declined_token_is_terminal() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(
            &room_id,
            Harness::invite_request(Some("nope@example.com"), None, None),
        )
        .await
        .unwrap();

    h.service.decline_token(&inv.token).await.unwrap();

    let err = h
        .service
        .redeem_token(&inv.token, Some("Changed Mind".to_string()), "10.0.8.1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InviteInvalid(_)));

    let stored = h.store.get(&inv.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InvitationStatus::Declined);
}

#[tokio::test]
async fn pending_invitation_can_be_edited_until_redeemed() {
    let h = harness();
    let (room_id, _) = h.live_room(10).await;

    let inv = h
        .service
        .create_invitation(&room_id, Harness::invite_request(None, Some(1), None))
        .await
        .unwrap();

    let info = h
        .service
        .update_invitation(
            &inv.id,
            &room_id,
            greenroom_backend::models::UpdateInvitationRequest {
                invitee_email: Some("late-bind@example.com".to_string()),
                invitee_name: Some("Late Bind".to_string()),
                permission_level: Some(PermissionLevel::CoHost),
            },
        )
        .await
        .unwrap();
    assert_eq!(info.permission_level, PermissionLevel::CoHost);
    assert_eq!(info.invitee_email.as_deref(), Some("late-bind@example.com"));

    h.service
        .redeem_code(&inv.join_code, None, "10.0.9.1")
        .await
        .unwrap();

    let err = h
        .service
        .update_invitation(
            &inv.id,
            &room_id,
            greenroom_backend::models::UpdateInvitationRequest {
                invitee_email: None,
                invitee_name: None,
                permission_level: Some(PermissionLevel::Guest),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}
