use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::Config;
use crate::invitations::InvitationService;
use crate::ratelimit::RateLimiter;
use crate::registry::RoomRegistry;
use crate::store::InvitationStore;
use crate::ws::ConnectionsManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub store: Arc<dyn InvitationStore>,
    pub registry: Arc<RoomRegistry>,
    pub invitations: Arc<InvitationService>,
    pub connections: Arc<ConnectionsManager>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        auth: Arc<AuthService>,
        store: Arc<dyn InvitationStore>,
        registry: Arc<RoomRegistry>,
        invitations: Arc<InvitationService>,
        connections: Arc<ConnectionsManager>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config,
            auth,
            store,
            registry,
            invitations,
            connections,
            limiter,
        }
    }
}
