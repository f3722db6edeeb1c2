//! The cloud context object
//!
//! One [`ParticleCloud`] holds one session and the subscriptions made under
//! it. Hosts construct it once and share it by reference (or `Arc`).

use std::sync::Arc;

use chrono::{DateTime, Utc};

use cloud_transport::{ApiRequest, HttpTransport, Transport};
use particle_session::{AccountInfo, Clock, Credential, SessionManager, SystemClock};
use particle_stream::{
    CloseReason, EventListener, EventScope, StreamConfig, SubscriptionId, SubscriptionRegistry,
};

use crate::config::CloudConfig;
use crate::error::{Result, SdkError};
use crate::source::AuthenticatedSource;

/// Event publishing endpoint
pub const PUBLISH_EVENT_PATH: &str = "/v1/devices/events";

/// Session and event subscriptions against the Particle cloud
pub struct ParticleCloud {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    registry: SubscriptionRegistry,
}

impl ParticleCloud {
    /// Connect to the configured API with the reqwest transport
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: CloudConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::with_timeout(&config.api_base_url, config.request_timeout)?;
        Self::with_transport(config, Arc::new(transport), Arc::new(SystemClock))
    }

    /// Build on a caller-supplied transport and clock
    ///
    /// `config.api_base_url` and `config.request_timeout` are the transport's
    /// business and are ignored here.
    pub fn with_transport(
        config: CloudConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let CloudConfig { session, stream, .. } = config;

        let session = Arc::new(SessionManager::new(Arc::clone(&transport), clock, session)?);
        let source = AuthenticatedSource::new(Arc::clone(&session), Arc::clone(&transport));
        let registry = SubscriptionRegistry::new(Arc::new(source), stream)?;

        Ok(Self {
            transport,
            session,
            registry,
        })
    }

    /// Session manager, for operations not mirrored here
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn stream_config(&self) -> &StreamConfig {
        self.registry.config()
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        Ok(self.session.login(username, password).await?)
    }

    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        account_info: Option<&AccountInfo>,
    ) -> Result<()> {
        Ok(self.session.create_user(username, password, account_info).await?)
    }

    #[deprecated(note = "use create_user instead")]
    #[allow(deprecated)]
    pub async fn signup(&self, username: &str, password: &str) -> Result<()> {
        Ok(self.session.signup(username, password).await?)
    }

    pub async fn create_customer(
        &self,
        username: &str,
        password: &str,
        product_id: u32,
        account_info: Option<&AccountInfo>,
    ) -> Result<()> {
        Ok(self
            .session
            .create_customer(username, password, product_id, account_info)
            .await?)
    }

    #[deprecated(note = "use create_customer instead")]
    #[allow(deprecated)]
    pub async fn signup_customer_with_org(&self, username: &str, password: &str, org_slug: &str) -> Result<()> {
        Ok(self
            .session
            .signup_customer_with_org(username, password, org_slug)
            .await?)
    }

    pub async fn request_password_reset(&self, email: &str, product_id: Option<u32>) -> Result<()> {
        Ok(self.session.request_password_reset(email, product_id).await?)
    }

    #[deprecated(note = "use request_password_reset with a product id instead")]
    #[allow(deprecated)]
    pub async fn request_password_reset_for_org_customer(&self, org_slug: &str, email: &str) -> Result<()> {
        Ok(self
            .session
            .request_password_reset_for_org_customer(org_slug, email)
            .await?)
    }

    pub fn inject_token(
        &self,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
        refresh_token: Option<&str>,
    ) -> bool {
        self.session.inject_token(access_token, expires_at, refresh_token)
    }

    pub fn inject_access_token(&self, access_token: &str) -> bool {
        self.session.inject_access_token(access_token)
    }

    pub fn inject_access_token_with_expiry(&self, access_token: &str, expires_at: DateTime<Utc>) -> bool {
        self.session.inject_access_token_with_expiry(access_token, expires_at)
    }

    pub fn inject_access_token_with_refresh(
        &self,
        access_token: &str,
        expires_at: DateTime<Utc>,
        refresh_token: &str,
    ) -> bool {
        self.session
            .inject_access_token_with_refresh(access_token, expires_at, refresh_token)
    }

    /// End the session
    ///
    /// Every live subscription is told `Closed(LoggedOut)` once and then
    /// forgotten; its id will not deliver again.
    pub fn logout(&self) {
        self.session.logout();
        self.registry.invalidate_all(CloseReason::LoggedOut);
    }

    pub async fn ensure_valid_token(&self) -> Result<Credential> {
        Ok(self.session.ensure_valid_token().await?)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.access_token()
    }

    pub fn logged_in_username(&self) -> Option<String> {
        self.session.logged_in_username()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Public events and events from owned devices, filtered by name prefix
    pub fn subscribe_to_all_events<L: EventListener>(&self, prefix: Option<&str>, listener: L) -> SubscriptionId {
        self.registry
            .subscribe(EventScope::AllPublicAndOwned, prefix, listener)
    }

    pub fn subscribe_to_my_devices_events<L: EventListener>(
        &self,
        prefix: Option<&str>,
        listener: L,
    ) -> SubscriptionId {
        self.registry
            .subscribe(EventScope::OwnedDevicesOnly, prefix, listener)
    }

    pub fn subscribe_to_device_events<L: EventListener>(
        &self,
        prefix: Option<&str>,
        device_id: &str,
        listener: L,
    ) -> SubscriptionId {
        self.registry
            .subscribe(EventScope::single_device(device_id), prefix, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.unsubscribe(id);
    }

    /// Publish an event as the logged-in user
    pub async fn publish_event(&self, name: &str, data: Option<&str>, private: bool, ttl: u32) -> Result<()> {
        if name.is_empty() {
            return Err(SdkError::Configuration("event name must not be empty".to_string()));
        }

        let mut request = ApiRequest::post(PUBLISH_EVENT_PATH)
            .param("name", name)
            .param("private", private.to_string())
            .param("ttl", ttl.to_string());
        if let Some(data) = data {
            request = request.param("data", data);
        }

        let response = self.session.authorized_request(request).await?;
        let accepted = response.is_success()
            && response
                .json::<serde_json::Value>()
                .ok()
                .and_then(|body| body.get("ok").and_then(serde_json::Value::as_bool))
                .unwrap_or(true);
        if !accepted {
            return Err(SdkError::Api {
                status: response.status,
                message: response.error_message(),
            });
        }

        tracing::debug!(event = name, private, ttl, "Event published");
        Ok(())
    }

    /// Underlying transport, for requests this crate does not wrap
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
