//! Invitation lifecycle: create, redeem, edit, revoke.
//!
//! Redemption is the multi-actor path. Order of operations matters:
//! rate-limit gate, store lookup, lazy expiry, a cheap room pre-check,
//! then the atomic use-slot consumption, then the waiting-room entry. If
//! the entry loses a capacity race after the slot was consumed, the slot
//! is given back so the caller observes all-or-nothing.

use std::sync::Arc;

use chrono::Utc;

use crate::auth::AuthService;
use crate::config::Config;
use crate::error::{AppError, RedeemRejection, Result};
use crate::mail::Mailer;
use crate::models::{
    CreateInvitationRequest, CreateInvitationResponse, Invitation, InvitationInfo,
    InvitationStatus, PermissionLevel, TokenPreview, UpdateInvitationRequest, WaitingTicket,
};
use crate::ratelimit::RateLimiter;
use crate::registry::RoomRegistry;
use crate::security;
use crate::store::{AcceptOutcome, InvitationStore, StoreError, TransitionOutcome};

pub struct InvitationService {
    store: Arc<dyn InvitationStore>,
    registry: Arc<RoomRegistry>,
    limiter: Arc<RateLimiter>,
    auth: Arc<AuthService>,
    mailer: Option<Arc<Mailer>>,
    config: Arc<Config>,
}

impl InvitationService {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        registry: Arc<RoomRegistry>,
        limiter: Arc<RateLimiter>,
        auth: Arc<AuthService>,
        mailer: Option<Arc<Mailer>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            registry,
            limiter,
            auth,
            mailer,
            config,
        }
    }

    /// Host creates an invitation for a scheduled or live room.
    pub async fn create_invitation(
        &self,
        room_id: &str,
        request: CreateInvitationRequest,
    ) -> Result<CreateInvitationResponse> {
        let room = self.registry.room_meta(room_id).await?;
        if room.status == crate::models::RoomStatus::Ended {
            return Err(AppError::RoomEnded);
        }

        let invitee_email = normalize_email(request.invitee_email)?;
        if let Some(name) = &request.invitee_name {
            if name.len() > 100 {
                return Err(AppError::BadRequest(
                    "Invitee name must be at most 100 characters".to_string(),
                ));
            }
        }
        let expires_in = request
            .expires_in_seconds
            .unwrap_or(self.config.invite_ttl_seconds);
        if expires_in == 0 {
            return Err(AppError::BadRequest(
                "expires_in_seconds must be positive".to_string(),
            ));
        }
        if request.max_uses == Some(0) {
            return Err(AppError::BadRequest(
                "max_uses must be positive".to_string(),
            ));
        }

        if let Some(email) = &invitee_email {
            if self.store.has_open_for_email(room_id, email).await? {
                return Err(AppError::DuplicateInvitation);
            }
        }

        let token = security::generate_token();
        let token_hash = security::token_fingerprint(&token);

        // Collisions in a 70-bit space are vanishingly rare; a retry
        // streak that exhausts the budget means something is broken, and
        // that is an operator problem, not the caller's.
        let mut invitation = None;
        for attempt in 0..self.config.code_retry_limit {
            let candidate = Invitation::new(
                room_id.to_string(),
                security::generate_join_code(),
                token_hash.clone(),
                invitee_email.clone(),
                request.invitee_name.clone(),
                request.permission_level,
                request.max_uses,
                expires_in,
            );
            match self.store.insert(&candidate).await {
                Ok(()) => {
                    invitation = Some(candidate);
                    break;
                }
                Err(StoreError::CodeTaken) => {
                    tracing::warn!(room_id = %room_id, attempt, "Join code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let invitation = invitation.ok_or_else(|| {
            tracing::error!(room_id = %room_id, "Join code space exhausted");
            AppError::CodeSpaceExhausted
        })?;

        let invite_url = self.invite_url(&token);
        self.send_invitation_email(&room.name, &invitation, &invite_url);

        tracing::info!(
            invitation_id = %invitation.id,
            room_id = %room_id,
            level = invitation.permission_level.as_str(),
            "Invitation created"
        );

        Ok(CreateInvitationResponse {
            id: invitation.id,
            room_id: room_id.to_string(),
            join_code: invitation.join_code,
            token,
            invite_url,
            permission_level: invitation.permission_level,
            expires_at: invitation.expires_at,
        })
    }

    /// Guest redeems a typed join code.
    pub async fn redeem_code(
        &self,
        join_code: &str,
        display_name: Option<String>,
        source_addr: &str,
    ) -> Result<WaitingTicket> {
        let join_code = join_code.trim();
        if !self.limiter.allow_redemption(source_addr, join_code) {
            return Err(AppError::InviteInvalid(RedeemRejection::RateLimited));
        }
        let invitation = self
            .store
            .find_by_code(join_code)
            .await?
            .ok_or(AppError::InviteInvalid(RedeemRejection::NotFound))?;
        self.redeem(invitation, display_name).await
    }

    /// Guest redeems the email deep-link token.
    pub async fn redeem_token(
        &self,
        token: &str,
        display_name: Option<String>,
        source_addr: &str,
    ) -> Result<WaitingTicket> {
        let token_hash = security::token_fingerprint(token.trim());
        if !self.limiter.allow_redemption(source_addr, &token_hash) {
            return Err(AppError::InviteInvalid(RedeemRejection::RateLimited));
        }
        let invitation = self
            .store
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(AppError::InviteInvalid(RedeemRejection::NotFound))?;
        self.redeem(invitation, display_name).await
    }

    async fn redeem(
        &self,
        invitation: Invitation,
        display_name: Option<String>,
    ) -> Result<WaitingTicket> {
        let now = Utc::now();

        let display_name = display_name
            .or_else(|| invitation.invitee_name.clone())
            .unwrap_or_else(|| "Guest".to_string());
        let display_name = display_name.trim().to_string();
        if display_name.is_empty() || display_name.len() > 100 {
            return Err(AppError::BadRequest(
                "Display name must be 1-100 characters".to_string(),
            ));
        }

        match invitation.status {
            InvitationStatus::Revoked | InvitationStatus::Declined => {
                return Err(AppError::InviteInvalid(RedeemRejection::Revoked));
            }
            InvitationStatus::Expired => {
                return Err(AppError::InviteInvalid(RedeemRejection::Expired));
            }
            InvitationStatus::Pending | InvitationStatus::Accepted => {}
        }
        if invitation.is_expired(now) {
            return Err(AppError::InviteInvalid(RedeemRejection::Expired));
        }
        if !invitation.has_uses_left() {
            return Err(AppError::InviteInvalid(RedeemRejection::AlreadyUsed));
        }

        let room = self
            .registry
            .room_meta(&invitation.room_id)
            .await
            .map_err(|_| AppError::InviteInvalid(RedeemRejection::NotFound))?;
        if invitation.permission_level == PermissionLevel::Viewer
            && !room.settings.allow_viewer_redeem
        {
            return Err(AppError::InviteInvalid(RedeemRejection::ViewerBlocked));
        }

        // Room-side failures (not live yet, full) are surfaced precisely:
        // holding a genuine invitation makes the caller a known quantity.
        self.registry.check_can_enter(&invitation.room_id).await?;

        let accepted = match self.store.try_accept(&invitation.id, now).await? {
            AcceptOutcome::Accepted(inv) => inv,
            AcceptOutcome::Exhausted => {
                return Err(AppError::InviteInvalid(RedeemRejection::AlreadyUsed));
            }
            AcceptOutcome::Expired => {
                return Err(AppError::InviteInvalid(RedeemRejection::Expired));
            }
            AcceptOutcome::NotRedeemable(_) => {
                return Err(AppError::InviteInvalid(RedeemRejection::Revoked));
            }
            AcceptOutcome::NotFound => {
                return Err(AppError::InviteInvalid(RedeemRejection::NotFound));
            }
        };

        let identity = uuid::Uuid::new_v4().to_string();
        if let Err(entry_err) = self
            .registry
            .enter_waiting_room(
                &accepted.room_id,
                &identity,
                &display_name,
                accepted.permission_level,
            )
            .await
        {
            // Lost the capacity race after consuming the use slot; give
            // the slot back so the invitation stays redeemable.
            if let Err(release_err) = self.store.release(&accepted.id).await {
                tracing::error!(
                    invitation_id = %accepted.id,
                    error = %release_err,
                    "Failed to release invitation use slot"
                );
            }
            return Err(entry_err);
        }

        let token = self.auth.generate_token(
            &identity,
            &accepted.room_id,
            &display_name,
            accepted.permission_level,
        )?;
        let ws_url = format!(
            "ws://{}:{}/ws?room_id={}&token={}",
            self.config.server_host, self.config.server_port, accepted.room_id, token
        );

        tracing::info!(
            invitation_id = %accepted.id,
            room_id = %accepted.room_id,
            identity = %identity,
            "Invitation redeemed"
        );

        Ok(WaitingTicket {
            room_id: accepted.room_id,
            room_name: room.name,
            identity,
            display_name,
            permission_level: accepted.permission_level,
            token,
            ws_url,
            expires_in: self.auth.expiry_seconds(),
        })
    }

    /// Host revokes. Idempotent on anything already terminal.
    pub async fn revoke(&self, invitation_id: &str, caller_room_id: &str) -> Result<()> {
        let invitation = self
            .store
            .get(invitation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))?;
        if invitation.room_id != caller_room_id {
            return Err(AppError::Forbidden(
                "Invitation belongs to another room".to_string(),
            ));
        }

        match self
            .store
            .transition(invitation_id, InvitationStatus::Revoked)
            .await?
        {
            TransitionOutcome::Applied => {
                tracing::info!(invitation_id = %invitation_id, "Invitation revoked");
                Ok(())
            }
            TransitionOutcome::AlreadyTerminal(_) => Ok(()),
            TransitionOutcome::NotFound => {
                Err(AppError::NotFound("Invitation not found".to_string()))
            }
        }
    }

    /// Invitee declines via the deep link. Terminal like revoke.
    pub async fn decline_token(&self, token: &str) -> Result<()> {
        let token_hash = security::token_fingerprint(token.trim());
        let invitation = self
            .store
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(AppError::InviteInvalid(RedeemRejection::NotFound))?;

        match self
            .store
            .transition(&invitation.id, InvitationStatus::Declined)
            .await?
        {
            TransitionOutcome::Applied | TransitionOutcome::AlreadyTerminal(_) => Ok(()),
            TransitionOutcome::NotFound => {
                Err(AppError::InviteInvalid(RedeemRejection::NotFound))
            }
        }
    }

    /// Host edits while still pending: invitee contact and granted level.
    pub async fn update_invitation(
        &self,
        invitation_id: &str,
        caller_room_id: &str,
        request: UpdateInvitationRequest,
    ) -> Result<InvitationInfo> {
        let now = Utc::now();
        let mut invitation = self
            .store
            .get(invitation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))?;
        if invitation.room_id != caller_room_id {
            return Err(AppError::Forbidden(
                "Invitation belongs to another room".to_string(),
            ));
        }
        if invitation.effective_status(now) != InvitationStatus::Pending {
            return Err(AppError::BadRequest(
                "Only pending invitations can be edited".to_string(),
            ));
        }

        if let Some(email) = request.invitee_email {
            let email = normalize_email(Some(email))?
                .ok_or_else(|| AppError::BadRequest("Invalid email address".to_string()))?;
            if invitation.invitee_email.as_deref() != Some(&email) {
                if self
                    .store
                    .has_open_for_email(&invitation.room_id, &email)
                    .await?
                {
                    return Err(AppError::DuplicateInvitation);
                }
                invitation.invitee_email = Some(email);
                // Email binding always implies single use.
                invitation.max_uses = Some(1);
            }
        }
        if let Some(name) = request.invitee_name {
            if name.len() > 100 {
                return Err(AppError::BadRequest(
                    "Invitee name must be at most 100 characters".to_string(),
                ));
            }
            invitation.invitee_name = Some(name);
        }
        if let Some(level) = request.permission_level {
            invitation.permission_level = level;
        }

        if !self.store.update_pending(&invitation).await? {
            return Err(AppError::BadRequest(
                "Only pending invitations can be edited".to_string(),
            ));
        }
        Ok(InvitationInfo::from_invitation(&invitation, now))
    }

    pub async fn list_for_room(&self, room_id: &str) -> Result<Vec<InvitationInfo>> {
        let now = Utc::now();
        let invitations = self.store.list_for_room(room_id).await?;
        Ok(invitations
            .iter()
            .map(|inv| InvitationInfo::from_invitation(inv, now))
            .collect())
    }

    /// What the email landing page may show before the guest commits.
    pub async fn token_preview(&self, token: &str) -> Result<TokenPreview> {
        let now = Utc::now();
        let token_hash = security::token_fingerprint(token.trim());
        let invitation = self
            .store
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(AppError::InviteInvalid(RedeemRejection::NotFound))?;
        let room = self
            .registry
            .room_meta(&invitation.room_id)
            .await
            .map_err(|_| AppError::InviteInvalid(RedeemRejection::NotFound))?;

        let is_valid = !invitation.is_expired(now)
            && invitation.has_uses_left()
            && matches!(
                invitation.status,
                InvitationStatus::Pending | InvitationStatus::Accepted
            );

        Ok(TokenPreview {
            room_name: room.name,
            invitee_name: invitation.invitee_name,
            is_valid,
            expires_at: invitation.expires_at,
        })
    }

    fn invite_url(&self, token: &str) -> String {
        format!(
            "{}/join/{}",
            self.config
                .frontend_host
                .as_deref()
                .unwrap_or("http://localhost:3000"),
            token
        )
    }

    /// Fire-and-forget email dispatch. Creation never waits on delivery.
    fn send_invitation_email(&self, room_name: &str, invitation: &Invitation, invite_url: &str) {
        let (Some(email), Some(mailer)) = (&invitation.invitee_email, &self.mailer) else {
            return;
        };

        let mailer = mailer.clone();
        let to = vec![email.clone()];
        let subject = format!("Interview invitation — {}", room_name);
        let greeting = invitation
            .invitee_name
            .as_deref()
            .map(|n| format!("Hi {},\n\n", n))
            .unwrap_or_default();
        let text = format!(
            "{}You are invited to join an interview session.\n\nRoom:\n{}\n\nJoin link:\n{}\n\nJoin code (if asked for one):\n{}\n\nThis invitation expires at {}.\n",
            greeting, room_name, invite_url, invitation.join_code, invitation.expires_at
        );
        let invitation_id = invitation.id.clone();

        tokio::spawn(async move {
            if let Err(e) = mailer.send_invite(to, subject, text).await {
                tracing::error!(
                    invitation_id = %invitation_id,
                    error = %e,
                    "Invitation email delivery failed"
                );
            }
        });
    }
}

fn normalize_email(email: Option<String>) -> Result<Option<String>> {
    let Some(email) = email else { return Ok(None) };
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Ok(None);
    }
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }
    Ok(Some(email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn email_normalization() {
        assert_eq!(
            normalize_email(Some("  Alice@Example.COM ".to_string())).unwrap(),
            Some("alice@example.com".to_string())
        );
        assert_eq!(normalize_email(None).unwrap(), None);
        assert_eq!(normalize_email(Some("   ".to_string())).unwrap(), None);
        assert!(normalize_email(Some("not-an-email".to_string())).is_err());
        assert!(normalize_email(Some("a@b".to_string())).is_err());
    }
}
