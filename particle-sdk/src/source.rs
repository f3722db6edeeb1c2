//! Authenticated stream opening
//!
//! Bridges the subscription registry to the session: every connection
//! attempt asks the session for a valid token first, so a stream that
//! reconnects after a refresh uses the new token.

use std::sync::Arc;

use async_trait::async_trait;

use cloud_transport::{FrameStream, Transport, TransportError};
use particle_session::{AuthError, SessionManager};
use particle_stream::{EventScope, StreamError, StreamSource};

pub(crate) struct AuthenticatedSource {
    session: Arc<SessionManager>,
    transport: Arc<dyn Transport>,
}

impl AuthenticatedSource {
    pub(crate) fn new(session: Arc<SessionManager>, transport: Arc<dyn Transport>) -> Self {
        Self { session, transport }
    }
}

/// Map a session failure onto the registry's retry rules
fn stream_error(error: AuthError) -> StreamError {
    match error {
        AuthError::Transport(error) => StreamError::Transport(error),
        // May succeed on a later attempt
        AuthError::RefreshRejected { .. }
        | AuthError::MalformedResponse(_)
        | AuthError::Rejected { .. }
        | AuthError::Internal(_) => StreamError::Unavailable(error.to_string()),
        terminal => StreamError::Authentication(terminal.to_string()),
    }
}

#[async_trait]
impl StreamSource for AuthenticatedSource {
    async fn open(&self, scope: &EventScope) -> Result<FrameStream, StreamError> {
        let credential = self.session.ensure_valid_token().await.map_err(stream_error)?;

        match self
            .transport
            .open_stream(&scope.path(), Some(credential.access_token()))
            .await
        {
            Ok(frames) => Ok(frames),
            Err(TransportError::Status { status: 401 | 403, message }) => {
                Err(StreamError::Authentication(message))
            }
            Err(error) => Err(StreamError::Transport(error)),
        }
    }
}
