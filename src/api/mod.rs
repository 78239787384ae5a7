pub mod health;
pub mod invitations;
pub mod rooms;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Router;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .merge(health::health_routes())
        .with_state(state)
}

/// API v1 routes
fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/rooms", rooms::room_routes())
        .nest("/invitations", invitations::invitation_routes())
}

/// Pull the bearer token out of the Authorization header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))
}
