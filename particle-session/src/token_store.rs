//! Exclusive owner of the current session credential
//!
//! Every read and write goes through one mutex so the foreground API and a
//! background refresh task always observe a consistent credential.
//!
//! The store also keeps a session *epoch*: a counter bumped whenever the
//! credential is replaced by login/injection or cleared by logout. A refresh
//! records the epoch it started from and only commits if it is unchanged, so
//! a refresh that loses a race with logout can never resurrect the session.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::credential::Credential;

#[derive(Debug, Default)]
struct StoreState {
    credential: Option<Credential>,
    username: Option<String>,
    epoch: u64,
    refresh_failures: u32,
    last_refresh_failure: Option<DateTime<Utc>>,
}

/// Thread-safe credential store
#[derive(Debug, Default)]
pub struct TokenStore {
    state: Mutex<StoreState>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the credential wholesale, starting a new session epoch
    pub fn set(&self, credential: Credential) -> u64 {
        self.replace(Some(credential), None)
    }

    /// Replace the credential and remember who it belongs to
    pub fn set_with_username(&self, credential: Credential, username: impl Into<String>) -> u64 {
        self.replace(Some(credential), Some(username.into()))
    }

    /// Drop the credential, starting a new session epoch
    pub fn clear(&self) -> u64 {
        self.replace(None, None)
    }

    fn replace(&self, credential: Option<Credential>, username: Option<String>) -> u64 {
        let mut state = self.state.lock();
        state.credential = credential;
        state.username = username;
        state.refresh_failures = 0;
        state.last_refresh_failure = None;
        state.epoch += 1;
        state.epoch
    }

    pub fn current(&self) -> Option<Credential> {
        self.state.lock().credential.clone()
    }

    /// Current credential together with the epoch it belongs to
    pub fn current_with_epoch(&self) -> Option<(Credential, u64)> {
        let state = self.state.lock();
        state.credential.clone().map(|c| (c, state.epoch))
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().credential.is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state
            .lock()
            .credential
            .as_ref()
            .map(|c| c.access_token().to_string())
    }

    pub fn username(&self) -> Option<String> {
        self.state.lock().username.clone()
    }

    /// False when no credential is held or it has no expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state
            .lock()
            .credential
            .as_ref()
            .map_or(false, |c| c.is_expired(now))
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.state
            .lock()
            .credential
            .as_ref()
            .map_or(false, |c| c.needs_refresh(now, skew))
    }

    /// Install a refreshed credential if the session epoch is still `epoch`
    ///
    /// Keeps the username and epoch, and resets the failure counter.
    /// Returns false when the session was replaced or cleared in the meantime.
    pub fn commit_refresh(&self, epoch: u64, credential: Credential) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.credential.is_none() {
            return false;
        }
        state.credential = Some(credential);
        state.refresh_failures = 0;
        state.last_refresh_failure = None;
        true
    }

    /// Record a failed refresh for session `epoch`
    ///
    /// The credential itself is left untouched. Returns the number of
    /// consecutive failures, or `None` if the session has moved on.
    pub fn record_refresh_failure(&self, epoch: u64, at: DateTime<Utc>) -> Option<u32> {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.credential.is_none() {
            return None;
        }
        state.refresh_failures += 1;
        state.last_refresh_failure = Some(at);
        Some(state.refresh_failures)
    }

    pub fn refresh_failures(&self) -> u32 {
        self.state.lock().refresh_failures
    }

    pub fn last_refresh_failure(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_refresh_failure
    }
}
