use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Claims, PermissionLevel};

/// JWT Authentication Service. Every token is scoped to one room and one
/// permission level; there are no account-wide tokens in this service.
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_seconds: u64,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            expiry_seconds: config.jwt_expiry_seconds,
        }
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Generate a session token for a participant in a room.
    pub fn generate_token(
        &self,
        identity: &str,
        room_id: &str,
        display: &str,
        level: PermissionLevel,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let exp = now + self.expiry_seconds as i64;

        let claims = Claims {
            sub: identity.to_string(),
            room_id: room_id.to_string(),
            display: display.to_string(),
            level,
            iat: now,
            exp,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Validate a JWT token and return the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();
        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }

    /// Claims valid for `room_id`, whatever the level.
    pub fn room_claims(&self, token: &str, room_id: &str) -> Result<Claims> {
        let claims = self.validate_token(token)?;
        if claims.room_id != room_id {
            return Err(AppError::Forbidden(
                "Token is not valid for this room".to_string(),
            ));
        }
        Ok(claims)
    }

    /// Claims of a host or co-host of `room_id`. Admission decisions and
    /// invitation management go through here.
    pub fn moderator_claims(&self, token: &str, room_id: &str) -> Result<Claims> {
        let claims = self.room_claims(token, room_id)?;
        if !claims.level.can_moderate() {
            return Err(AppError::Forbidden(
                "Host or co-host permission required".to_string(),
            ));
        }
        Ok(claims)
    }
}
