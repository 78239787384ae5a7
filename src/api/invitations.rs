use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::bearer_token;
use crate::error::Result;
use crate::models::{
    CreateInvitationRequest, CreateInvitationResponse, InvitationInfo, RedeemRequest,
    RedeemTokenRequest, TokenPreview, UpdateInvitationRequest, WaitingTicket,
};
use crate::state::AppState;

/// Invitation routes not scoped under a room. The room-scoped create and
/// list handlers below are mounted from the rooms router.
pub fn invitation_routes() -> Router<AppState> {
    Router::new()
        .route("/redeem", post(redeem))
        .route("/redeem-token", post(redeem_token))
        .route("/token/{token}", get(token_preview))
        .route("/token/{token}/decline", post(decline))
        .route("/{invitation_id}", patch(update_invitation))
        .route("/{invitation_id}/revoke", post(revoke))
}

/// POST /api/v1/rooms/:room_id/invitations - host only
pub async fn create_invitation(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateInvitationRequest>,
) -> Result<Json<CreateInvitationResponse>> {
    state
        .auth
        .moderator_claims(bearer_token(&headers)?, &room_id)?;
    let response = state.invitations.create_invitation(&room_id, request).await?;
    Ok(Json(response))
}

/// GET /api/v1/rooms/:room_id/invitations - host only
pub async fn list_invitations(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<InvitationInfo>>> {
    state
        .auth
        .moderator_claims(bearer_token(&headers)?, &room_id)?;
    let invitations = state.invitations.list_for_room(&room_id).await?;
    Ok(Json(invitations))
}

/// POST /api/v1/invitations/redeem - guest types a join code.
/// Every refusal shares one response shape; see `AppError::InviteInvalid`.
async fn redeem(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<WaitingTicket>> {
    let ticket = state
        .invitations
        .redeem_code(
            &request.join_code,
            request.display_name,
            &addr.ip().to_string(),
        )
        .await?;
    Ok(Json(ticket))
}

/// POST /api/v1/invitations/redeem-token - guest follows the email link
async fn redeem_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RedeemTokenRequest>,
) -> Result<Json<WaitingTicket>> {
    let ticket = state
        .invitations
        .redeem_token(&request.token, request.display_name, &addr.ip().to_string())
        .await?;
    Ok(Json(ticket))
}

/// GET /api/v1/invitations/token/:token - email landing page preview
async fn token_preview(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<TokenPreview>> {
    let preview = state.invitations.token_preview(&token).await?;
    Ok(Json(preview))
}

#[derive(Debug, Serialize)]
struct AckResponse {
    success: bool,
}

/// POST /api/v1/invitations/token/:token/decline - invitee declines
async fn decline(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<AckResponse>> {
    state.invitations.decline_token(&token).await?;
    Ok(Json(AckResponse { success: true }))
}

/// PATCH /api/v1/invitations/:invitation_id - host edits while pending
async fn update_invitation(
    State(state): State<AppState>,
    Path(invitation_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UpdateInvitationRequest>,
) -> Result<Json<InvitationInfo>> {
    let claims = state.auth.validate_token(bearer_token(&headers)?)?;
    if !claims.level.can_moderate() {
        return Err(crate::error::AppError::Forbidden(
            "Host or co-host permission required".to_string(),
        ));
    }
    let info = state
        .invitations
        .update_invitation(&invitation_id, &claims.room_id, request)
        .await?;
    Ok(Json(info))
}

/// POST /api/v1/invitations/:invitation_id/revoke - host only
async fn revoke(
    State(state): State<AppState>,
    Path(invitation_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>> {
    let claims = state.auth.validate_token(bearer_token(&headers)?)?;
    if !claims.level.can_moderate() {
        return Err(crate::error::AppError::Forbidden(
            "Host or co-host permission required".to_string(),
        ));
    }
    state
        .invitations
        .revoke(&invitation_id, &claims.room_id)
        .await?;
    Ok(Json(AckResponse { success: true }))
}
