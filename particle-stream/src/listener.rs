//! Listener trait and guarded invocation

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::ListenerError;
use crate::event::StreamNotification;
use crate::registry::SubscriptionId;

/// Receives notifications for one subscription
///
/// Called from the connection's router task, one notification at a time and
/// in stream order. Implementations should return quickly; a slow listener
/// delays every other subscription on the same connection.
pub trait EventListener: Send + Sync + 'static {
    fn notify(&self, notification: &StreamNotification) -> Result<(), ListenerError>;
}

impl<F> EventListener for F
where
    F: Fn(&StreamNotification) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn notify(&self, notification: &StreamNotification) -> Result<(), ListenerError> {
        self(notification)
    }
}

/// Invoke `listener`, containing errors and panics
pub(crate) fn invoke(id: SubscriptionId, listener: &dyn EventListener, notification: &StreamNotification) {
    match catch_unwind(AssertUnwindSafe(|| listener.notify(notification))) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::warn!(subscription = %id, %error, "Listener failed to handle notification");
        }
        Err(_) => {
            tracing::error!(subscription = %id, "Listener panicked while handling notification");
        }
    }
}
