//! Subscription registry with per-scope shared connections
//!
//! Every subscription is bound to the connection that was live for its scope
//! when it subscribed. Connections are reference-counted by their bound
//! subscriptions: the first subscribe for a scope opens one, the last
//! unsubscribe closes it.
//!
//! Each subscription carries an active flag and a delivery guard. Dispatch
//! holds the guard while calling the listener. Unsubscribe clears the flag
//! and, when called from outside any listener, waits on the guard, so once
//! `unsubscribe` returns the listener is never called again. A thread that is
//! running a listener never waits on another subscription's guard: from there
//! unsubscribe only clears the flag (a delivery already in progress on
//! another router may finish) and a close that cannot take the guard is
//! handed to the blocking pool. The guard is re-entrant so a listener may
//! unsubscribe or close itself from inside `notify`.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

use crate::config::StreamConfig;
use crate::error::RegistryError;
use crate::event::{CloseReason, EventRecord, StreamNotification};
use crate::listener::{invoke, EventListener};
use crate::router::Router;
use crate::scope::EventScope;
use crate::source::StreamSource;

/// Opaque handle returned by [`SubscriptionRegistry::subscribe`]
///
/// Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Identifies one connection; a scope gets a new one each time its
/// connection is reopened from scratch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Closing,
    Closed,
}

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a listener until dropped
struct DispatchMarker {
    previous: bool,
}

impl DispatchMarker {
    fn enter() -> Self {
        Self {
            previous: DISPATCHING.with(|dispatching| dispatching.replace(true)),
        }
    }
}

impl Drop for DispatchMarker {
    fn drop(&mut self) {
        DISPATCHING.with(|dispatching| dispatching.set(self.previous));
    }
}

fn is_dispatching() -> bool {
    DISPATCHING.with(Cell::get)
}

pub(crate) struct Subscription {
    id: SubscriptionId,
    scope: EventScope,
    prefix: Option<String>,
    connection: ConnectionId,
    listener: Box<dyn EventListener>,
    active: AtomicBool,
    delivery: ReentrantMutex<()>,
}

impl Subscription {
    fn new(
        id: SubscriptionId,
        scope: EventScope,
        prefix: Option<String>,
        connection: ConnectionId,
        listener: Box<dyn EventListener>,
    ) -> Self {
        Self {
            id,
            scope,
            prefix,
            connection,
            listener,
            active: AtomicBool::new(true),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Whether `record` passes this subscription's scope and prefix filters
    pub(crate) fn matches(&self, record: &EventRecord) -> bool {
        self.scope.admits(record)
            && self
                .prefix
                .as_deref()
                .map_or(true, |prefix| record.name.starts_with(prefix))
    }

    /// Deliver `notification` unless the subscription has been deactivated
    pub(crate) fn deliver(&self, notification: &StreamNotification) {
        let _guard = self.delivery.lock();
        if self.active.load(Ordering::Acquire) {
            self.notify(notification);
        }
    }

    /// Deliver the terminal notification, at most once
    pub(crate) fn close(self: &Arc<Self>, reason: &CloseReason) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let closed = StreamNotification::Closed(reason.clone());

        if is_dispatching() {
            if let Some(_guard) = self.delivery.try_lock() {
                self.notify(&closed);
                return;
            }
            // Another router is inside this listener; it may be waiting on us.
            if let Ok(runtime) = Handle::try_current() {
                let subscription = Arc::clone(self);
                runtime.spawn_blocking(move || {
                    let _guard = subscription.delivery.lock();
                    subscription.notify(&closed);
                });
                return;
            }
        }

        let _guard = self.delivery.lock();
        self.notify(&closed);
    }

    /// Stop further deliveries
    ///
    /// Outside a listener this also waits for an in-flight delivery on
    /// another thread to finish.
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        if !is_dispatching() {
            drop(self.delivery.lock());
        }
    }

    fn notify(&self, notification: &StreamNotification) {
        let _marker = DispatchMarker::enter();
        invoke(self.id, self.listener.as_ref(), notification);
    }
}

struct Connection {
    id: ConnectionId,
    ref_count: usize,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Connection {
    /// Ask the router to drop the stream; it publishes `Closed` on exit
    fn close(mut self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closing;
                true
            }
        });
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

#[derive(Default)]
struct RegistryState {
    subscriptions: HashMap<SubscriptionId, Arc<Subscription>>,
    connections: HashMap<EventScope, Connection>,
}

pub(crate) struct RegistryInner {
    state: Mutex<RegistryState>,
    source: Arc<dyn StreamSource>,
    config: StreamConfig,
    runtime: Handle,
    next_subscription_id: AtomicU64,
    next_connection_id: AtomicU64,
}

impl RegistryInner {
    /// Active and inactive subscriptions bound to `connection`
    pub(crate) fn bound_subscriptions(&self, connection: ConnectionId) -> Vec<Arc<Subscription>> {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|subscription| subscription.connection == connection)
            .cloned()
            .collect()
    }

    /// Whether `connection` is still the live connection for `scope`
    pub(crate) fn is_current(&self, scope: &EventScope, connection: ConnectionId) -> bool {
        self.state
            .lock()
            .connections
            .get(scope)
            .map_or(false, |live| live.id == connection)
    }

    /// Forget a connection that closed on its own, returning its subscriptions
    ///
    /// The next subscribe for the scope opens a fresh connection. The bound
    /// subscriptions stay registered until they are unsubscribed.
    pub(crate) fn retire(&self, scope: &EventScope, connection: ConnectionId) -> Vec<Arc<Subscription>> {
        let mut state = self.state.lock();
        if state
            .connections
            .get(scope)
            .map_or(false, |live| live.id == connection)
        {
            state.connections.remove(scope);
        }
        state
            .subscriptions
            .values()
            .filter(|subscription| subscription.connection == connection)
            .cloned()
            .collect()
    }
}

/// Tracks subscriptions and owns one connection per subscribed scope
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create a registry opening its streams through `source`
    ///
    /// Must be called from within a tokio runtime; router tasks are spawned
    /// onto it.
    pub fn new(source: Arc<dyn StreamSource>, config: StreamConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| RegistryError::NoRuntime)?;

        Ok(Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                source,
                config,
                runtime,
                next_subscription_id: AtomicU64::new(1),
                next_connection_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Register `listener` for events on `scope` whose name starts with `prefix`
    ///
    /// An absent or empty prefix matches every event. Returns immediately;
    /// delivery starts once the scope's connection is open.
    pub fn subscribe<L>(&self, scope: EventScope, prefix: Option<&str>, listener: L) -> SubscriptionId
    where
        L: EventListener,
    {
        let id = SubscriptionId(
            self.inner
                .next_subscription_id
                .fetch_add(1, Ordering::Relaxed),
        );
        let prefix = prefix.filter(|prefix| !prefix.is_empty()).map(str::to_string);

        let mut state = self.inner.state.lock();
        let connection = match state.connections.get_mut(&scope) {
            Some(connection) => {
                connection.ref_count += 1;
                tracing::debug!(
                    %scope,
                    connection = %connection.id,
                    ref_count = connection.ref_count,
                    "Reusing event stream connection"
                );
                connection.id
            }
            None => {
                let connection = self.open_connection(&scope);
                let connection_id = connection.id;
                state.connections.insert(scope.clone(), connection);
                connection_id
            }
        };

        tracing::debug!(subscription = %id, %scope, prefix = ?prefix, %connection, "Subscribed");
        state.subscriptions.insert(
            id,
            Arc::new(Subscription::new(id, scope, prefix, connection, Box::new(listener))),
        );
        id
    }

    /// Remove a subscription; unknown or already removed ids are ignored
    ///
    /// Closes the scope's connection when this was its last subscription.
    /// After this returns the listener is not called again, except that a
    /// listener calling this for another subscription does not wait for a
    /// delivery to it that is already running on another router.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let (subscription, closing) = {
            let mut state = self.inner.state.lock();
            let Some(subscription) = state.subscriptions.remove(&id) else {
                return;
            };

            let closing = match state.connections.get_mut(&subscription.scope) {
                Some(connection) if connection.id == subscription.connection => {
                    connection.ref_count = connection.ref_count.saturating_sub(1);
                    tracing::debug!(
                        scope = %subscription.scope,
                        connection = %connection.id,
                        ref_count = connection.ref_count,
                        "Released event stream connection"
                    );
                    if connection.ref_count == 0 {
                        state.connections.remove(&subscription.scope)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            (subscription, closing)
        };

        // Outside the registry lock: routers take it while holding a
        // delivery guard.
        subscription.deactivate();
        tracing::debug!(subscription = %id, "Unsubscribed");

        if let Some(connection) = closing {
            tracing::info!(scope = %subscription.scope, connection = %connection.id, "Closing event stream");
            connection.close();
        }
    }

    /// Deliver `Closed(reason)` to every listener, drop every subscription and
    /// close every connection
    pub fn invalidate_all(&self, reason: CloseReason) {
        let (subscriptions, connections) = {
            let mut state = self.inner.state.lock();
            let subscriptions: Vec<_> = state.subscriptions.drain().map(|(_, s)| s).collect();
            let connections: Vec<_> = state.connections.drain().map(|(_, c)| c).collect();
            (subscriptions, connections)
        };

        tracing::info!(
            subscriptions = subscriptions.len(),
            connections = connections.len(),
            %reason,
            "Invalidating all subscriptions"
        );

        for connection in connections {
            connection.close();
        }
        for subscription in subscriptions {
            subscription.close(&reason);
        }
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.state.lock().subscriptions.contains_key(&id)
    }

    /// Number of subscriptions sharing the live connection for `scope`
    pub fn ref_count(&self, scope: &EventScope) -> usize {
        self.inner
            .state
            .lock()
            .connections
            .get(scope)
            .map_or(0, |connection| connection.ref_count)
    }

    pub fn connection_id(&self, scope: &EventScope) -> Option<ConnectionId> {
        self.inner
            .state
            .lock()
            .connections
            .get(scope)
            .map(|connection| connection.id)
    }

    pub fn connection_state(&self, scope: &EventScope) -> Option<ConnectionState> {
        self.inner
            .state
            .lock()
            .connections
            .get(scope)
            .map(|connection| *connection.state.borrow())
    }

    /// Follow state changes of the live connection for `scope`
    ///
    /// The receiver keeps reporting that connection until it is `Closed`,
    /// even after it stops being the scope's live connection.
    pub fn watch_connection_state(&self, scope: &EventScope) -> Option<watch::Receiver<ConnectionState>> {
        self.inner
            .state
            .lock()
            .connections
            .get(scope)
            .map(|connection| connection.state.subscribe())
    }

    pub fn active_connections(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    /// Start a router for `scope`; called with the registry lock held
    fn open_connection(&self, scope: &EventScope) -> Connection {
        let id = ConnectionId(self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let router = Router::new(
            Arc::downgrade(&self.inner),
            id,
            scope.clone(),
            Arc::clone(&self.inner.source),
            self.inner.config.reconnect.clone(),
            Arc::clone(&state),
        );
        self.inner.runtime.spawn(router.run(shutdown_rx));

        tracing::info!(%scope, connection = %id, "Opening event stream");
        Connection {
            id,
            ref_count: 1,
            state,
            shutdown: Some(shutdown_tx),
        }
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        let connections: Vec<_> = self.inner.state.lock().connections.drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.close();
        }
    }
}
