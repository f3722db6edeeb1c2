//! # particle-stream
//!
//! Event subscriptions over the cloud's server-sent event streams.
//!
//! The [`SubscriptionRegistry`] hands out [`SubscriptionId`]s for listeners
//! interested in one [`EventScope`] and, optionally, a name prefix. Each
//! distinct scope is served by a single shared connection whose router task
//! parses incoming frames into [`EventRecord`]s and dispatches them to the
//! matching listeners. Lost streams are reopened with exponential backoff.
//!
//! Streams are opened through a [`StreamSource`], which is where
//! authentication happens; this crate never sees credentials.

mod config;
mod error;
mod event;
mod listener;
mod registry;
mod router;
mod scope;
mod source;

pub use config::{ReconnectPolicy, StreamConfig};
pub use error::{ListenerError, RegistryError, StreamError};
pub use event::{CloseReason, EventRecord, StreamNotification, DEFAULT_TTL};
pub use listener::EventListener;
pub use registry::{ConnectionId, ConnectionState, SubscriptionId, SubscriptionRegistry};
pub use scope::EventScope;
pub use source::StreamSource;

pub use cloud_transport::{FrameStream, RawFrame};
