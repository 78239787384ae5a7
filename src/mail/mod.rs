pub mod resend;

use crate::error::Result;

/// Mailer abstraction (currently backed by Resend)
#[derive(Clone)]
pub struct Mailer {
    inner: resend::ResendMailer,
}

impl Mailer {
    /// Create mailer from env (RESEND_API_KEY, MAIL_FROM, etc.)
    pub fn new_from_env() -> Result<Self> {
        Ok(Self {
            inner: resend::ResendMailer::new_from_env()?,
        })
    }

    /// None when no mail provider is configured; invitation emails are
    /// then skipped, everything else works.
    pub fn from_env_opt() -> Option<Self> {
        match Self::new_from_env() {
            Ok(mailer) => Some(mailer),
            Err(_) => {
                tracing::warn!("RESEND_API_KEY not set; invitation emails disabled");
                None
            }
        }
    }

    /// Send invitation email(s)
    pub async fn send_invite(&self, to: Vec<String>, subject: String, text: String) -> Result<()> {
        self.inner.send(to, subject, text).await
    }
}
