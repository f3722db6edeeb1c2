//! End-to-end tests for ParticleCloud over a scripted transport.
//!
//! The transport answers token and publish requests from a closure and hands
//! out channel-backed event streams, so the full path login -> subscribe ->
//! stream open -> dispatch -> unsubscribe runs through the real session,
//! registry and router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::channel::mpsc;
use parking_lot::Mutex;

use particle_sdk::{
    ApiRequest, ApiResponse, CloseReason, CloudConfig, EventRecord, EventScope, ListenerError,
    ManualClock, ParticleCloud, StreamConfig, StreamNotification, Transport, TransportError,
};
use particle_stream::{FrameStream, RawFrame};

type FrameSender = mpsc::UnboundedSender<Result<RawFrame, TransportError>>;
type Handler = Box<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

struct OpenedStream {
    path: String,
    token: Option<String>,
    sender: FrameSender,
}

#[derive(Clone)]
struct ScriptedTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
    streams: Arc<Mutex<Vec<OpenedStream>>>,
    stream_status: Arc<Mutex<Option<u16>>>,
}

impl ScriptedTransport {
    fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(Box::new(handler)),
            requests: Arc::new(Mutex::new(Vec::new())),
            streams: Arc::new(Mutex::new(Vec::new())),
            stream_status: Arc::new(Mutex::new(None)),
        }
    }

    /// Reject stream opens with this HTTP status
    fn reject_streams(&self, status: u16) {
        *self.stream_status.lock() = Some(status);
    }

    fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    fn stream(&self, index: usize) -> (String, Option<String>, FrameSender) {
        let streams = self.streams.lock();
        let opened = &streams[index];
        (opened.path.clone(), opened.token.clone(), opened.sender.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().push(request.clone());
        Ok((self.handler.as_ref())(&request))
    }

    async fn open_stream(&self, path: &str, auth_token: Option<&str>) -> Result<FrameStream, TransportError> {
        if let Some(status) = *self.stream_status.lock() {
            return Err(TransportError::Status {
                status,
                message: "invalid_token".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded();
        self.streams.lock().push(OpenedStream {
            path: path.to_string(),
            token: auth_token.map(str::to_string),
            sender,
        });
        Ok(Box::pin(receiver))
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn token_response(access_token: &str) -> ApiResponse {
    ApiResponse::new(
        200,
        format!(
            r#"{{"token_type":"bearer","access_token":"{access_token}","expires_in":7776000,"refresh_token":"refresh-1"}}"#
        ),
    )
}

/// Answers password grants with `login-token`, refresh grants with
/// `refreshed-token` and everything else with `{"ok":true}`
fn cloud_api(request: &ApiRequest) -> ApiResponse {
    match request.param_value("grant_type") {
        Some("password") => token_response("login-token"),
        Some("refresh_token") => token_response("refreshed-token"),
        _ => ApiResponse::new(200, r#"{"ok":true}"#),
    }
}

fn cloud_with(transport: &ScriptedTransport, config: CloudConfig) -> (ParticleCloud, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let cloud = ParticleCloud::with_transport(config, Arc::new(transport.clone()), clock.clone())
        .expect("valid cloud");
    (cloud, clock)
}

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<StreamNotification>>>,
}

impl Recorder {
    fn listener(&self) -> impl Fn(&StreamNotification) -> Result<(), ListenerError> + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |notification: &StreamNotification| {
            seen.lock().push(notification.clone());
            Ok(())
        }
    }

    fn notifications(&self) -> Vec<StreamNotification> {
        self.seen.lock().clone()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}

fn frame(name: &str, data: &str, device_id: &str) -> RawFrame {
    RawFrame::new(
        name,
        format!(r#"{{"data":"{data}","ttl":60,"published_at":"2024-06-01T09:00:00.000Z","coreid":"{device_id}"}}"#),
    )
}

#[tokio::test]
async fn test_login_subscribe_deliver_unsubscribe() {
    let transport = ScriptedTransport::new(cloud_api);
    let (cloud, _) = cloud_with(&transport, CloudConfig::default());

    cloud.login("alice@example.com", "secret").await.unwrap();
    assert!(cloud.is_authenticated());

    let recorder = Recorder::default();
    let id = cloud.subscribe_to_device_events(Some(""), "core1", recorder.listener());
    let scope = EventScope::single_device("core1");
    assert_eq!(cloud.registry().ref_count(&scope), 1);

    wait_until(|| transport.stream_count() == 1).await;
    let (path, token, feed) = transport.stream(0);
    assert_eq!(path, "/v1/devices/core1/events");
    assert_eq!(token.as_deref(), Some("login-token"));

    feed.unbounded_send(Ok(frame("temp", "21.5", "core1"))).unwrap();
    wait_until(|| !recorder.notifications().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        recorder.notifications(),
        vec![StreamNotification::Event(EventRecord {
            name: "temp".to_string(),
            data: "21.5".to_string(),
            ttl: 60,
            published_at: start(),
            device_id: "core1".to_string(),
        })]
    );

    cloud.unsubscribe(id);
    assert_eq!(cloud.registry().ref_count(&scope), 0);
    assert_eq!(cloud.registry().active_connections(), 0);
    wait_until(|| feed.is_closed()).await;
}

#[tokio::test]
async fn test_logout_closes_subscriptions() {
    let transport = ScriptedTransport::new(cloud_api);
    let (cloud, _) = cloud_with(&transport, CloudConfig::default());
    cloud.login("alice@example.com", "secret").await.unwrap();

    let all = Recorder::default();
    let mine = Recorder::default();
    let all_id = cloud.subscribe_to_all_events(None, all.listener());
    let mine_id = cloud.subscribe_to_my_devices_events(Some("temp"), mine.listener());
    wait_until(|| transport.stream_count() == 2).await;

    cloud.logout();

    assert!(!cloud.is_authenticated());
    assert_eq!(cloud.access_token(), None);
    assert_eq!(cloud.logged_in_username(), None);
    assert!(!cloud.registry().is_subscribed(all_id));
    assert!(!cloud.registry().is_subscribed(mine_id));

    for index in 0..2 {
        let (_, _, feed) = transport.stream(index);
        wait_until(|| feed.is_closed()).await;
        let _ = feed.unbounded_send(Ok(frame("temp", "1", "core1")));
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    let logged_out = vec![StreamNotification::Closed(CloseReason::LoggedOut)];
    assert_eq!(all.notifications(), logged_out);
    assert_eq!(mine.notifications(), logged_out);
}

#[tokio::test]
async fn test_subscribe_without_session_closes_with_auth_failure() {
    let transport = ScriptedTransport::new(cloud_api);
    let (cloud, _) = cloud_with(&transport, CloudConfig::default());

    let recorder = Recorder::default();
    cloud.subscribe_to_my_devices_events(None, recorder.listener());
    wait_until(|| !recorder.notifications().is_empty()).await;

    assert!(matches!(
        recorder.notifications().as_slice(),
        [StreamNotification::Closed(CloseReason::AuthenticationFailed(_))]
    ));
    assert_eq!(transport.stream_count(), 0);
}

#[tokio::test]
async fn test_stream_rejected_token_is_terminal() {
    let transport = ScriptedTransport::new(cloud_api);
    transport.reject_streams(401);
    let (cloud, _) = cloud_with(&transport, CloudConfig::default());
    cloud.inject_access_token("revoked");

    let recorder = Recorder::default();
    cloud.subscribe_to_all_events(None, recorder.listener());
    wait_until(|| !recorder.notifications().is_empty()).await;

    assert_eq!(
        recorder.notifications(),
        vec![StreamNotification::Closed(CloseReason::AuthenticationFailed(
            "invalid_token".to_string()
        ))]
    );
}

#[tokio::test]
async fn test_stream_opens_with_refreshed_token() {
    let transport = ScriptedTransport::new(cloud_api);
    let (cloud, clock) = cloud_with(&transport, CloudConfig::default());
    assert!(cloud.inject_access_token_with_refresh(
        "old-token",
        start() + chrono::Duration::minutes(10),
        "refresh-1",
    ));
    clock.advance(chrono::Duration::minutes(9) + chrono::Duration::seconds(30));

    cloud.subscribe_to_device_events(None, "core1", Recorder::default().listener());
    wait_until(|| transport.stream_count() == 1).await;

    let (_, token, _) = transport.stream(0);
    assert_eq!(token.as_deref(), Some("refreshed-token"));
    assert_eq!(cloud.access_token().as_deref(), Some("refreshed-token"));
}

#[tokio::test]
async fn test_reconnect_reuses_scope_path() {
    let transport = ScriptedTransport::new(cloud_api);
    let config = CloudConfig::default().with_stream(
        StreamConfig::default().with_backoff(Duration::from_millis(10), Duration::from_millis(20)),
    );
    let (cloud, _) = cloud_with(&transport, config);
    cloud.inject_access_token("abc123");

    let recorder = Recorder::default();
    cloud.subscribe_to_my_devices_events(None, recorder.listener());
    wait_until(|| transport.stream_count() == 1).await;
    transport.stream(0).2.close_channel();

    wait_until(|| transport.stream_count() == 2).await;
    let (path, token, _) = transport.stream(1);
    assert_eq!(path, "/v1/devices/events");
    assert_eq!(token.as_deref(), Some("abc123"));
}

#[tokio::test]
async fn test_publish_event() {
    let transport = ScriptedTransport::new(cloud_api);
    let (cloud, _) = cloud_with(&transport, CloudConfig::default());
    cloud.inject_access_token("abc123");

    cloud.publish_event("temp/set", Some("22"), true, 120).await.unwrap();

    let sent = transport.requests().pop().unwrap();
    assert_eq!(sent.path, "/v1/devices/events");
    assert_eq!(sent.param_value("name"), Some("temp/set"));
    assert_eq!(sent.param_value("data"), Some("22"));
    assert_eq!(sent.param_value("private"), Some("true"));
    assert_eq!(sent.param_value("ttl"), Some("120"));
}

#[tokio::test]
async fn test_publish_event_rejected() {
    let transport = ScriptedTransport::new(|_| ApiResponse::new(200, r#"{"ok":false,"error":"rate limited"}"#));
    let (cloud, _) = cloud_with(&transport, CloudConfig::default());
    cloud.inject_access_token("abc123");

    let err = cloud.publish_event("temp", None, false, 60).await.unwrap_err();
    assert!(matches!(err, particle_sdk::SdkError::Api { status: 200, .. }));

    assert!(cloud.publish_event("", None, false, 60).await.is_err());
}

#[tokio::test]
async fn test_publish_requires_session() {
    let transport = ScriptedTransport::new(cloud_api);
    let (cloud, _) = cloud_with(&transport, CloudConfig::default());

    let err = cloud.publish_event("temp", None, false, 60).await.unwrap_err();
    assert!(matches!(
        err,
        particle_sdk::SdkError::Auth(particle_sdk::AuthError::NotAuthenticated)
    ));
    assert!(transport.requests().is_empty());
}
