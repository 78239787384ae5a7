use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    /// Default invitation lifetime when the host does not pick one.
    pub invite_ttl_seconds: u64,
    pub max_participants_default: u32,
    /// Seconds without a heartbeat before a participant counts as gone.
    pub heartbeat_grace_seconds: u64,
    /// How often the idle reaper scans live rooms.
    pub reaper_interval_seconds: u64,
    /// Redemption attempts allowed per source address per window.
    pub redeem_attempts_per_window: u32,
    pub redeem_window_seconds: u64,
    /// Join-code generation retries before giving up on a collision streak.
    pub code_retry_limit: u32,
    pub frontend_host: Option<String>,
    /// "redis" (default) or "memory" (single node, nothing survives a restart).
    pub store_backend: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::MissingJwtSecret)?,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            invite_ttl_seconds: env::var("INVITE_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .unwrap_or(86400),
            max_participants_default: env::var("MAX_PARTICIPANTS_DEFAULT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            heartbeat_grace_seconds: env::var("HEARTBEAT_GRACE_SECONDS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .unwrap_or(90),
            reaper_interval_seconds: env::var("REAPER_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            redeem_attempts_per_window: env::var("REDEEM_ATTEMPTS_PER_WINDOW")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            redeem_window_seconds: env::var("REDEEM_WINDOW_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            code_retry_limit: env::var("CODE_RETRY_LIMIT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            frontend_host: env::var("FRONTEND_HOST").ok(),
            store_backend: env::var("STORE_BACKEND").unwrap_or_else(|_| "redis".to_string()),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server port")]
    InvalidPort,
    #[error("JWT_SECRET environment variable is required")]
    MissingJwtSecret,
}
