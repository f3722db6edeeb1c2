//! Session credential value type

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;

/// Access token with optional expiry and refresh token
///
/// A credential carrying a refresh token always has an expiry; the
/// constructor enforces it, so every `Credential` in circulation is valid.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
    refresh_token: Option<String>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        refresh_token: Option<String>,
    ) -> Result<Self, ValidationError> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(ValidationError::EmptyAccessToken);
        }
        if refresh_token.is_some() && expires_at.is_none() {
            return Err(ValidationError::RefreshTokenWithoutExpiry);
        }

        Ok(Self {
            access_token,
            expires_at,
            refresh_token,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Whether `now` is at or past the expiry; never true without an expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }

    /// Whether a refresh is due at `now` given a lead time of `skew`
    ///
    /// True iff the credential is refreshable and `now + skew >= expiry`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        if self.refresh_token.is_none() {
            return false;
        }

        match chrono::Duration::from_std(skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew))
        {
            Some(deadline) => deadline >= expires_at,
            // A skew too large to represent is always past the expiry
            None => true,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
