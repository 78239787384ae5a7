use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{bearer_token, invitations};
use crate::error::{AppError, Result};
use crate::models::{
    CreateRoomRequest, CreateRoomResponse, ParticipantInfo, PermissionLevel, Room, RoomSettings,
    RoomStatus,
};
use crate::state::AppState;

/// Room routes
pub fn room_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_room))
        .route("/{room_id}", get(get_room))
        .route("/{room_id}/start", post(start_room))
        .route("/{room_id}/end", post(end_room))
        .route(
            "/{room_id}/invitations",
            post(invitations::create_invitation).get(invitations::list_invitations),
        )
        .route("/{room_id}/participants/{identity}/admit", post(admit))
        .route("/{room_id}/participants/{identity}/reject", post(reject))
        .route("/{room_id}/participants/{identity}/kick", post(kick))
        .route(
            "/{room_id}/participants/{identity}/permission",
            post(set_permission),
        )
        .route(
            "/{room_id}/participants/{identity}/heartbeat",
            post(heartbeat),
        )
}

/// POST /api/v1/rooms - Create a new room. The caller becomes its host
/// and gets the host token back, once.
async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>> {
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("Room name is required".to_string()));
    }
    if name.len() > 100 {
        return Err(AppError::BadRequest(
            "Room name must be at most 100 characters".to_string(),
        ));
    }
    let max_participants = request
        .max_participants
        .unwrap_or(state.config.max_participants_default);
    if max_participants == 0 {
        return Err(AppError::BadRequest(
            "max_participants must be positive".to_string(),
        ));
    }

    let host_user_id = Uuid::new_v4().to_string();
    let room = Room::new(
        host_user_id.clone(),
        name,
        request.scheduled_at,
        RoomSettings {
            max_participants,
            recording_on_join: request.recording_on_join,
            allow_viewer_redeem: request.allow_viewer_redeem,
        },
    );

    let host_token =
        state
            .auth
            .generate_token(&host_user_id, &room.room_id, "Host", PermissionLevel::Host)?;

    let response = CreateRoomResponse {
        room_id: room.room_id.clone(),
        name: room.name.clone(),
        status: room.status,
        scheduled_at: room.scheduled_at,
        max_participants: room.settings.max_participants,
        created_at: room.created_at,
        host_token,
    };
    state.registry.insert_room(room);

    Ok(Json(response))
}

/// Room view. Moderators see the full roster including the waiting
/// queue; everyone else gets the descriptive part.
#[derive(Debug, Serialize)]
pub struct RoomView {
    pub room_id: String,
    pub name: String,
    pub status: RoomStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_participants: u32,
    pub participant_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<ParticipantInfo>>,
}

/// GET /api/v1/rooms/:room_id - Get room information
async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomView>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    let snapshot = state.registry.snapshot(&room_id).await?;

    let participant_count = snapshot
        .participants
        .iter()
        .filter(|p| p.connection_state.occupies_slot())
        .count();
    let is_moderator =
        claims.sub == snapshot.room.host_user_id || claims.level.can_moderate();

    Ok(Json(RoomView {
        room_id: snapshot.room.room_id,
        name: snapshot.room.name,
        status: snapshot.room.status,
        scheduled_at: snapshot.room.scheduled_at,
        max_participants: snapshot.room.settings.max_participants,
        participant_count,
        participants: is_moderator.then_some(snapshot.participants),
    }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    room_id: String,
    status: RoomStatus,
}

/// POST /api/v1/rooms/:room_id/start - scheduled -> live
async fn start_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    let room = state.registry.start_room(&room_id, &claims).await?;
    Ok(Json(StatusResponse {
        room_id,
        status: room.status,
    }))
}

/// POST /api/v1/rooms/:room_id/end - live -> ended (terminal)
async fn end_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    state.registry.end_room(&room_id, &claims).await?;
    Ok(Json(StatusResponse {
        room_id,
        status: RoomStatus::Ended,
    }))
}

#[derive(Debug, Serialize)]
struct AckResponse {
    success: bool,
}

/// POST /api/v1/rooms/:room_id/participants/:identity/admit
async fn admit(
    State(state): State<AppState>,
    Path((room_id, identity)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    state.registry.admit(&room_id, &claims, &identity).await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v1/rooms/:room_id/participants/:identity/reject
async fn reject(
    State(state): State<AppState>,
    Path((room_id, identity)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    state.registry.reject(&room_id, &claims, &identity).await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v1/rooms/:room_id/participants/:identity/kick
async fn kick(
    State(state): State<AppState>,
    Path((room_id, identity)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    state.registry.kick(&room_id, &claims, &identity).await?;
    Ok(Json(AckResponse { success: true }))
}

#[derive(Debug, Deserialize)]
struct SetPermissionRequest {
    permission_level: PermissionLevel,
}

/// POST /api/v1/rooms/:room_id/participants/:identity/permission
async fn set_permission(
    State(state): State<AppState>,
    Path((room_id, identity)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<SetPermissionRequest>,
) -> Result<Json<AckResponse>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    state
        .registry
        .set_permission(&room_id, &claims, &identity, request.permission_level)
        .await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v1/rooms/:room_id/participants/:identity/heartbeat
/// Participant self-call; idempotent.
async fn heartbeat(
    State(state): State<AppState>,
    Path((room_id, identity)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>> {
    let claims = state.auth.room_claims(bearer_token(&headers)?, &room_id)?;
    if claims.sub != identity {
        return Err(AppError::Forbidden(
            "Heartbeat is a self-call".to_string(),
        ));
    }
    state.registry.heartbeat(&room_id, &identity).await?;
    Ok(Json(AckResponse { success: true }))
}
