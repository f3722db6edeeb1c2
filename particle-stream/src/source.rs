//! Where connections get their frames from

use async_trait::async_trait;

use cloud_transport::FrameStream;

use crate::error::StreamError;
use crate::scope::EventScope;

/// Opens authenticated event streams
///
/// Called once per connection attempt. Returning
/// [`StreamError::Authentication`] closes the connection for good; any other
/// error is treated as a lost stream and retried under the reconnect policy.
#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    async fn open(&self, scope: &EventScope) -> Result<FrameStream, StreamError>;
}
