use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Internal reason a redemption was refused. Never serialized to guests:
/// every variant maps to the same response so the API cannot be used as an
/// oracle for which codes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemRejection {
    NotFound,
    Expired,
    AlreadyUsed,
    Revoked,
    RateLimited,
    /// Viewer-level invitation redeemed in a room that only admits viewers
    /// by host promotion.
    ViewerBlocked,
}

impl RedeemRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedeemRejection::NotFound => "not_found",
            RedeemRejection::Expired => "expired",
            RedeemRejection::AlreadyUsed => "already_used",
            RedeemRejection::Revoked => "revoked",
            RedeemRejection::RateLimited => "rate_limited",
            RedeemRejection::ViewerBlocked => "viewer_blocked",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("An invitation for this email already exists")]
    DuplicateInvitation,

    #[error("Room is full")]
    RoomFull,

    #[error("Room is not live")]
    RoomNotLive,

    #[error("Room is no longer accepting invitations")]
    RoomEnded,

    #[error("Participant is not waiting")]
    ParticipantNotWaiting,

    /// Guest-facing invite failure. The inner reason stays server-side.
    #[error("Invite rejected: {0:?}")]
    InviteInvalid(RedeemRejection),

    #[error("Join code space exhausted after retries")]
    CodeSpaceExhausted,

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("JWT error: {0}")]
    JwtError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::DuplicateInvitation => (StatusCode::CONFLICT, self.to_string()),
            AppError::RoomFull => (StatusCode::CONFLICT, "Room is full".to_string()),
            AppError::RoomNotLive => (StatusCode::CONFLICT, "Room is not live".to_string()),
            AppError::RoomEnded => (StatusCode::CONFLICT, self.to_string()),
            AppError::ParticipantNotWaiting => (StatusCode::CONFLICT, self.to_string()),
            AppError::InviteInvalid(reason) => {
                // Same status, same body for every reason, rate limiting
                // included. Precise reason is logged here and nowhere else.
                tracing::warn!(reason = reason.as_str(), "Invite redemption refused");
                (
                    StatusCode::NOT_FOUND,
                    "This invite link is no longer valid".to_string(),
                )
            }
            AppError::CodeSpaceExhausted => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::RedisError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::JwtError(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::RedisError(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for AppError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        AppError::RedisError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::JwtError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
