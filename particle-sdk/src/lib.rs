//! # Particle SDK
//!
//! Session management and event subscriptions for the Particle device cloud.
//!
//! ```rust,no_run
//! use particle_sdk::{CloudConfig, ListenerError, ParticleCloud, StreamNotification};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), particle_sdk::SdkError> {
//!     let cloud = ParticleCloud::new(CloudConfig::default())?;
//!     cloud.login("user@example.com", "password").await?;
//!
//!     let id = cloud.subscribe_to_my_devices_events(Some("temp"), |n: &StreamNotification| -> Result<(), ListenerError> {
//!         if let StreamNotification::Event(event) = n {
//!             println!("{} from {}: {}", event.name, event.device_id, event.data);
//!         }
//!         Ok(())
//!     });
//!
//!     cloud.publish_event("temp/request", None, true, 60).await?;
//!
//!     cloud.unsubscribe(id);
//!     cloud.logout();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! particle-sdk (ParticleCloud)
//!     ↓                   ↓
//! particle-session    particle-stream
//! (tokens, refresh)   (subscriptions, routing)
//!     ↓                   ↓
//! cloud-transport (HTTP requests, SSE frames)
//! ```
//!
//! Access tokens close to expiry are refreshed before any authenticated
//! call, including every event stream (re)connect. Subscriptions with the
//! same scope share one stream connection, which closes when the last of
//! them unsubscribes.

pub use cloud::{ParticleCloud, PUBLISH_EVENT_PATH};
pub use config::{CloudConfig, DEFAULT_API_BASE_URL};
pub use error::{Result, SdkError};

pub use cloud_transport::{ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
pub use particle_session::{
    AccountInfo, AuthError, Clock, Credential, ManualClock, SessionConfig, SessionManager, SystemClock,
};
pub use particle_stream::{
    CloseReason, ConnectionState, EventListener, EventRecord, EventScope, ListenerError, ReconnectPolicy,
    StreamConfig, StreamError, StreamNotification, SubscriptionId,
};

mod cloud;
mod config;
mod error;
mod source;
