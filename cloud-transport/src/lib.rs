//! Private transport layer for particle-sdk
//!
//! This crate is the narrow boundary between the SDK core and the network.
//! It provides:
//!
//! - [`Transport`]: the collaborator trait the session and stream layers call,
//!   covering request/response exchanges and long-lived event streams.
//! - [`HttpTransport`]: a reqwest implementation of [`Transport`].
//! - [`SseDecoder`]: incremental server-sent-events framing producing [`RawFrame`]s.
//!
//! Nothing here knows about credentials, subscriptions or event payloads;
//! those are interpreted by the layers above.

mod error;
mod http;
mod request;
pub mod sse;

pub use error::TransportError;
pub use http::{HttpTransport, DEFAULT_REQUEST_TIMEOUT};
pub use request::{path_segment, ApiRequest, ApiResponse, Method, RequestAuth};
pub use sse::{decode_frames, RawFrame, SseDecoder, DEFAULT_MAX_FRAME_SIZE};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// Lazily consumed sequence of raw frames from one stream connection
///
/// Dropping the stream closes the underlying connection. Reconnecting means
/// calling [`Transport::open_stream`] again.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawFrame, TransportError>> + Send>>;

/// Network collaborator used by the session and event layers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single request/response exchange
    ///
    /// Any HTTP status is returned as `Ok`; only failures to obtain a
    /// response at all are errors.
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;

    /// Open a server-sent-events stream at `path`
    async fn open_stream(
        &self,
        path: &str,
        auth_token: Option<&str>,
    ) -> Result<FrameStream, TransportError>;
}
