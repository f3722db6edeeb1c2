//! # particle-session
//!
//! Session and access-token lifecycle for the Particle cloud SDK.
//!
//! [`SessionManager`] performs login, signup, password reset, credential
//! injection and logout, and hands out valid access tokens to the rest of the
//! SDK. Tokens close to expiry are refreshed transparently, with at most one
//! refresh exchange in flight per session.
//!
//! The current credential lives in a [`TokenStore`]. Time comes from a
//! [`Clock`] so expiry behaviour can be tested deterministically with
//! [`ManualClock`].

mod clock;
mod config;
mod credential;
mod endpoints;
mod error;
mod session;
mod token_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use credential::Credential;
pub use endpoints::{AccountInfo, PasswordResetEndpoint, SignupEndpoint, TOKEN_PATH};
pub use error::{AuthError, Result, ValidationError};
pub use session::SessionManager;
pub use token_store::TokenStore;
