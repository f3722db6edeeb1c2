//! Per-connection event router
//!
//! One router task runs per connection. It opens the scope's stream through
//! the [`StreamSource`], parses each frame and dispatches it to the matching
//! subscriptions bound to its connection, in arrival order.
//!
//! ```text
//! Connecting -> Open -> (stream lost) -> Reconnecting -> Open ...
//!      \          \                          \
//!       `----------`--> Closing -> Closed <---`  (last unsubscribe / exhausted / auth failure)
//! ```

use std::sync::{Arc, Weak};

use futures::StreamExt;
use tokio::sync::{oneshot, watch};

use cloud_transport::{FrameStream, RawFrame, TransportError};

use crate::config::ReconnectPolicy;
use crate::error::StreamError;
use crate::event::{CloseReason, EventRecord, StreamNotification};
use crate::registry::{ConnectionId, ConnectionState, RegistryInner};
use crate::scope::EventScope;
use crate::source::StreamSource;

enum StreamEnd {
    /// The connection was closed by the registry
    Shutdown,
    /// Clean end of input
    Ended,
    Failed(TransportError),
}

pub(crate) struct Router {
    registry: Weak<RegistryInner>,
    id: ConnectionId,
    scope: EventScope,
    source: Arc<dyn StreamSource>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Router {
    pub(crate) fn new(
        registry: Weak<RegistryInner>,
        id: ConnectionId,
        scope: EventScope,
        source: Arc<dyn StreamSource>,
        policy: ReconnectPolicy,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            registry,
            id,
            scope,
            source,
            policy,
            state,
        }
    }

    pub(crate) async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut attempt = 0u32;

        let close_reason = loop {
            let opened = tokio::select! {
                biased;
                _ = &mut shutdown => break None,
                opened = self.source.open(&self.scope) => opened,
            };

            let lost = match opened {
                Ok(frames) => {
                    attempt = 0;
                    self.state.send_replace(ConnectionState::Open);
                    tracing::info!(connection = %self.id, scope = %self.scope, "Event stream open");

                    match self.pump(frames, &mut shutdown).await {
                        StreamEnd::Shutdown => break None,
                        StreamEnd::Ended => StreamError::Terminated,
                        StreamEnd::Failed(error) => StreamError::Transport(error),
                    }
                }
                Err(StreamError::Authentication(message)) => {
                    break Some(CloseReason::AuthenticationFailed(message));
                }
                Err(error) => error,
            };

            if !self.is_current() {
                tracing::debug!(connection = %self.id, "Stream ended with no subscribers left");
                break None;
            }

            tracing::warn!(connection = %self.id, scope = %self.scope, error = %lost, "Event stream lost");
            self.broadcast(&StreamNotification::Error(lost));

            if !self.policy.enabled {
                break Some(CloseReason::ReconnectExhausted { attempts: 0 });
            }
            attempt += 1;
            if attempt > self.policy.max_attempts {
                break Some(CloseReason::ReconnectExhausted {
                    attempts: self.policy.max_attempts,
                });
            }

            let delay = self.policy.backoff(attempt);
            tracing::info!(
                connection = %self.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting event stream"
            );
            self.state.send_replace(ConnectionState::Reconnecting { attempt });
            self.broadcast(&StreamNotification::Reconnecting { attempt, delay });

            tokio::select! {
                biased;
                _ = &mut shutdown => break None,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        if let Some(reason) = close_reason {
            self.retire(reason);
        }
        self.state.send_replace(ConnectionState::Closed);
        tracing::debug!(connection = %self.id, scope = %self.scope, "Event stream closed");
    }

    async fn pump(&self, mut frames: FrameStream, shutdown: &mut oneshot::Receiver<()>) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut *shutdown => return StreamEnd::Shutdown,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    if !self.handle_frame(&frame) {
                        return StreamEnd::Shutdown;
                    }
                }
                Some(Err(error)) => return StreamEnd::Failed(error),
                None => return StreamEnd::Ended,
            }
        }
    }

    /// Returns false once the registry is gone
    fn handle_frame(&self, frame: &RawFrame) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let subscriptions = registry.bound_subscriptions(self.id);
        drop(registry);

        match EventRecord::from_frame(frame) {
            Ok(record) => {
                let targets: Vec<_> = subscriptions
                    .into_iter()
                    .filter(|subscription| subscription.matches(&record))
                    .collect();
                tracing::trace!(
                    connection = %self.id,
                    event = %record.name,
                    device = %record.device_id,
                    listeners = targets.len(),
                    "Dispatching event"
                );

                let notification = StreamNotification::Event(record);
                for subscription in targets {
                    subscription.deliver(&notification);
                }
            }
            Err(error) => {
                tracing::warn!(connection = %self.id, %error, "Skipping malformed event frame");
                let notification = StreamNotification::Error(error);
                for subscription in subscriptions {
                    subscription.deliver(&notification);
                }
            }
        }
        true
    }

    fn is_current(&self) -> bool {
        self.registry
            .upgrade()
            .map_or(false, |registry| registry.is_current(&self.scope, self.id))
    }

    fn broadcast(&self, notification: &StreamNotification) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let subscriptions = registry.bound_subscriptions(self.id);
        drop(registry);

        for subscription in subscriptions {
            subscription.deliver(notification);
        }
    }

    /// Terminal close: the connection gives up and its listeners are told why
    fn retire(&self, reason: CloseReason) {
        tracing::warn!(connection = %self.id, scope = %self.scope, %reason, "Event stream closed permanently");
        self.state.send_replace(ConnectionState::Closing);

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let subscriptions = registry.retire(&self.scope, self.id);
        drop(registry);

        for subscription in subscriptions {
            subscription.close(&reason);
        }
    }
}
