//! Session lifecycle and token refresh
//!
//! [`SessionManager`] owns the [`TokenStore`] and is the only component that
//! talks to the token endpoints. Callers that need a usable access token go
//! through [`SessionManager::ensure_valid_token`], which refreshes the token
//! when it is close to expiry.
//!
//! # Single-flight refresh
//!
//! Only one refresh exchange runs at a time. The first caller that finds a
//! refresh due spawns it as a background task and parks a shared handle to
//! its outcome in the in-flight slot; every concurrent caller awaits that
//! same handle. The task commits the new credential (or records the failure)
//! exactly once and then clears the slot. `logout` aborts the task, and every
//! waiter observes [`AuthError::SessionInvalidated`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::AbortHandle;

use cloud_transport::{ApiRequest, ApiResponse, Transport};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::credential::Credential;
use crate::endpoints::{AccountInfo, PasswordResetEndpoint, SignupEndpoint, TOKEN_PATH};
use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;

type RefreshOutcome = Shared<BoxFuture<'static, Result<Credential>>>;

struct InFlightRefresh {
    id: u64,
    epoch: u64,
    abort: AbortHandle,
    outcome: RefreshOutcome,
}

type RefreshSlot = Arc<Mutex<Option<InFlightRefresh>>>;

/// Body of a successful `/oauth/token` exchange
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn parse(response: &ApiResponse) -> Result<Self> {
        response
            .json()
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }

    /// Build a credential, carrying over expiry and refresh token from
    /// `previous` when the response omits them
    fn into_credential(self, now: DateTime<Utc>, previous: Option<&Credential>) -> Result<Credential> {
        let expires_at = match self.expires_in {
            Some(seconds) => Some(
                chrono::Duration::try_seconds(seconds)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        AuthError::MalformedResponse(format!("expires_in out of range: {seconds}"))
                    })?,
            ),
            None => previous.and_then(Credential::expires_at),
        };
        let refresh_token = self
            .refresh_token
            .or_else(|| previous.and_then(|c| c.refresh_token().map(str::to_string)));

        Credential::new(self.access_token, expires_at, refresh_token)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

/// Owns the session credential and performs every session operation
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: Arc<SessionConfig>,
    store: Arc<TokenStore>,
    in_flight: RefreshSlot,
    next_refresh_id: AtomicU64,
}

impl SessionManager {
    /// Create a session manager with no credential
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            transport,
            clock,
            config: Arc::new(config),
            store: Arc::new(TokenStore::new()),
            in_flight: Arc::new(Mutex::new(None)),
            next_refresh_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read access to the token store for snapshot queries
    pub fn token_store(&self) -> &TokenStore {
        &self.store
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    pub fn logged_in_username(&self) -> Option<String> {
        self.store.username()
    }

    // ------------------------------------------------------------------
    // Login / signup
    // ------------------------------------------------------------------

    /// Exchange username and password for a session credential
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let mut request = ApiRequest::post(TOKEN_PATH)
            .param("grant_type", "password")
            .param("username", username)
            .param("password", password)
            .client_credentials(&self.config.oauth_client_id, &self.config.oauth_client_secret);
        if let Some(lifetime) = self.config.token_lifetime {
            request = request.param("expires_in", lifetime.as_secs().to_string());
        }

        let response = self.transport.request(request).await?;
        if !response.is_success() {
            let message = response.error_message();
            tracing::warn!(status = response.status, %message, "Login rejected");
            return Err(match response.status {
                400 | 401 | 403 => AuthError::InvalidCredentials(message),
                status => AuthError::Rejected { status, message },
            });
        }

        let credential = TokenResponse::parse(&response)?.into_credential(self.clock.now(), None)?;
        self.cancel_refresh();
        self.store.set_with_username(credential.clone(), username);

        tracing::info!(
            username,
            expires_at = ?credential.expires_at(),
            refreshable = credential.refresh_token().is_some(),
            "Logged in"
        );
        Ok(credential)
    }

    /// Create a developer account
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        account_info: Option<&AccountInfo>,
    ) -> Result<()> {
        self.signup_with(SignupEndpoint::User, username, password, account_info)
            .await
    }

    /// Create a developer account with username and password only
    #[deprecated(note = "use create_user instead")]
    pub async fn signup(&self, username: &str, password: &str) -> Result<()> {
        self.signup_with(SignupEndpoint::LegacyUser, username, password, None)
            .await
    }

    /// Create a customer account for a product
    pub async fn create_customer(
        &self,
        username: &str,
        password: &str,
        product_id: u32,
        account_info: Option<&AccountInfo>,
    ) -> Result<()> {
        self.signup_with(
            SignupEndpoint::Customer { product_id },
            username,
            password,
            account_info,
        )
        .await
    }

    /// Create a customer account for an organization
    #[deprecated(note = "use create_customer instead")]
    pub async fn signup_customer_with_org(
        &self,
        username: &str,
        password: &str,
        org_slug: &str,
    ) -> Result<()> {
        self.signup_with(
            SignupEndpoint::OrgCustomer {
                org_slug: org_slug.to_string(),
            },
            username,
            password,
            None,
        )
        .await
    }

    /// Single signup path shared by every signup variant
    pub async fn signup_with(
        &self,
        endpoint: SignupEndpoint,
        username: &str,
        password: &str,
        account_info: Option<&AccountInfo>,
    ) -> Result<()> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidAccountInfo(
                "username and password are required".to_string(),
            ));
        }
        if let Some(info) = account_info {
            info.validate()?;
        }

        let mut request = endpoint.request(username, password, account_info)?;
        if endpoint.uses_client_credentials() {
            request = request
                .client_credentials(&self.config.oauth_client_id, &self.config.oauth_client_secret);
        }

        let response = self.transport.request(request).await?;
        if !response.is_success() {
            let message = response.error_message();
            tracing::warn!(status = response.status, path = %endpoint.path(), %message, "Signup rejected");
            return Err(match response.status {
                400 => AuthError::InvalidAccountInfo(message),
                status => AuthError::Rejected { status, message },
            });
        }

        tracing::info!(username, path = %endpoint.path(), "Account created");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Password reset
    // ------------------------------------------------------------------

    /// Request a password reset email for a user, or for a product customer
    /// when `product_id` is given
    pub async fn request_password_reset(&self, email: &str, product_id: Option<u32>) -> Result<()> {
        let endpoint = match product_id {
            Some(product_id) => PasswordResetEndpoint::Customer { product_id },
            None => PasswordResetEndpoint::User,
        };
        self.password_reset_with(endpoint, email).await
    }

    #[deprecated(note = "use request_password_reset with a product id instead")]
    pub async fn request_password_reset_for_org_customer(
        &self,
        org_slug: &str,
        email: &str,
    ) -> Result<()> {
        self.password_reset_with(
            PasswordResetEndpoint::OrgCustomer {
                org_slug: org_slug.to_string(),
            },
            email,
        )
        .await
    }

    pub async fn password_reset_with(&self, endpoint: PasswordResetEndpoint, email: &str) -> Result<()> {
        let response = self.transport.request(endpoint.request(email)).await?;
        if !response.is_success() {
            return Err(AuthError::Rejected {
                status: response.status,
                message: response.error_message(),
            });
        }
        tracing::debug!(?endpoint, "Password reset requested");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Injection / logout
    // ------------------------------------------------------------------

    /// Install a credential obtained elsewhere
    ///
    /// Returns false and leaves the session untouched when the credential is
    /// invalid (empty token, or refresh token without expiry).
    pub fn inject_token(
        &self,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
        refresh_token: Option<&str>,
    ) -> bool {
        let credential =
            match Credential::new(access_token, expires_at, refresh_token.map(str::to_string)) {
                Ok(credential) => credential,
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected injected credential");
                    return false;
                }
            };

        self.cancel_refresh();
        self.store.set(credential);
        tracing::info!(?expires_at, refreshable = refresh_token.is_some(), "Session credential injected");
        true
    }

    /// Inject a token that is not expected to expire
    pub fn inject_access_token(&self, access_token: &str) -> bool {
        self.inject_token(access_token, None, None)
    }

    pub fn inject_access_token_with_expiry(&self, access_token: &str, expires_at: DateTime<Utc>) -> bool {
        self.inject_token(access_token, Some(expires_at), None)
    }

    pub fn inject_access_token_with_refresh(
        &self,
        access_token: &str,
        expires_at: DateTime<Utc>,
        refresh_token: &str,
    ) -> bool {
        self.inject_token(access_token, Some(expires_at), Some(refresh_token))
    }

    /// Clear the session and abort any refresh in flight
    pub fn logout(&self) {
        let had_session = self.store.is_authenticated();
        self.store.clear();
        self.cancel_refresh();
        if had_session {
            tracing::info!("Logged out");
        }
    }

    fn cancel_refresh(&self) {
        if let Some(flight) = self.in_flight.lock().take() {
            tracing::debug!(refresh_id = flight.id, "Aborting in-flight token refresh");
            flight.abort.abort();
        }
    }

    // ------------------------------------------------------------------
    // Token validity
    // ------------------------------------------------------------------

    /// Return a credential that is usable right now, refreshing it if due
    pub async fn ensure_valid_token(&self) -> Result<Credential> {
        self.ensure_valid().await.map(|(credential, _)| credential)
    }

    async fn ensure_valid(&self) -> Result<(Credential, u64)> {
        let (credential, epoch) = self
            .store
            .current_with_epoch()
            .ok_or(AuthError::NotAuthenticated)?;

        let failures = self.store.refresh_failures();
        if failures >= self.config.max_refresh_failures {
            return Err(AuthError::RefreshExhausted { failures });
        }

        let now = self.clock.now();
        if !credential.needs_refresh(now, self.config.refresh_skew) {
            if credential.is_expired(now) {
                return Err(AuthError::TokenExpired);
            }
            return Ok((credential, epoch));
        }

        let outcome = self.join_or_start_refresh(&credential, epoch);
        outcome.await.map(|credential| (credential, epoch))
    }

    fn join_or_start_refresh(&self, credential: &Credential, epoch: u64) -> RefreshOutcome {
        let mut slot = self.in_flight.lock();

        if let Some(flight) = slot.as_ref() {
            if flight.epoch == epoch {
                tracing::debug!(refresh_id = flight.id, "Joining in-flight token refresh");
                return flight.outcome.clone();
            }
            // Left over from a replaced session
            flight.abort.abort();
        }

        let id = self.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let job = RefreshJob {
            id,
            epoch,
            previous: credential.clone(),
            transport: Arc::clone(&self.transport),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            slot: Arc::clone(&self.in_flight),
        };

        tracing::debug!(refresh_id = id, "Starting token refresh");
        let task = tokio::spawn(job.run());
        let abort = task.abort_handle();
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(AuthError::SessionInvalidated),
                Err(e) => Err(AuthError::Internal(format!("token refresh task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlightRefresh {
            id,
            epoch,
            abort,
            outcome: outcome.clone(),
        });
        outcome
    }

    // ------------------------------------------------------------------
    // Authenticated requests
    // ------------------------------------------------------------------

    /// Send `request` with a valid bearer token
    ///
    /// Fails with [`AuthError::SessionInvalidated`] if the session was logged
    /// out or replaced while the request was in flight, and with
    /// [`AuthError::TokenRejected`] if the server answers 401.
    pub async fn authorized_request(&self, request: ApiRequest) -> Result<ApiResponse> {
        let (credential, epoch) = self.ensure_valid().await?;

        let response = self
            .transport
            .request(request.bearer(credential.access_token()))
            .await?;

        if self.store.epoch() != epoch {
            return Err(AuthError::SessionInvalidated);
        }
        if response.status == 401 {
            return Err(AuthError::TokenRejected(response.error_message()));
        }
        Ok(response)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel_refresh();
    }
}

/// One refresh exchange, run on its own task
struct RefreshJob {
    id: u64,
    epoch: u64,
    previous: Credential,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: Arc<SessionConfig>,
    store: Arc<TokenStore>,
    slot: RefreshSlot,
}

impl RefreshJob {
    async fn run(self) -> Result<Credential> {
        let exchanged = self.exchange().await;

        let outcome = match exchanged {
            Ok(credential) => {
                if self.store.commit_refresh(self.epoch, credential.clone()) {
                    tracing::info!(
                        refresh_id = self.id,
                        expires_at = ?credential.expires_at(),
                        "Access token refreshed"
                    );
                    Ok(credential)
                } else {
                    Err(AuthError::SessionInvalidated)
                }
            }
            Err(error) => match self.store.record_refresh_failure(self.epoch, self.clock.now()) {
                Some(failures) => {
                    tracing::warn!(
                        refresh_id = self.id,
                        failures,
                        max_failures = self.config.max_refresh_failures,
                        %error,
                        "Token refresh failed"
                    );
                    if failures >= self.config.max_refresh_failures {
                        Err(AuthError::RefreshExhausted { failures })
                    } else {
                        Err(error)
                    }
                }
                None => Err(AuthError::SessionInvalidated),
            },
        };

        let mut slot = self.slot.lock();
        if slot.as_ref().map_or(false, |flight| flight.id == self.id) {
            *slot = None;
        }

        outcome
    }

    async fn exchange(&self) -> Result<Credential> {
        let refresh_token = self
            .previous
            .refresh_token()
            .ok_or_else(|| AuthError::Internal("refresh started without a refresh token".to_string()))?;

        let request = ApiRequest::post(TOKEN_PATH)
            .param("grant_type", "refresh_token")
            .param("refresh_token", refresh_token)
            .client_credentials(&self.config.oauth_client_id, &self.config.oauth_client_secret);

        let response = self.transport.request(request).await?;
        if !response.is_success() {
            return Err(AuthError::RefreshRejected {
                status: response.status,
                message: response.error_message(),
            });
        }

        TokenResponse::parse(&response)?.into_credential(self.clock.now(), Some(&self.previous))
    }
}
