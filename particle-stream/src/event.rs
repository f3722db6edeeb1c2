//! Event records and the notifications delivered to listeners

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use cloud_transport::RawFrame;

use crate::error::StreamError;

/// Time-to-live the cloud assigns when a publisher gives none
pub const DEFAULT_TTL: u32 = 60;

/// One event received from the cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub name: String,
    /// Event payload; empty when the publisher sent no data
    pub data: String,
    /// Seconds the payload stays meaningful
    pub ttl: u32,
    pub published_at: DateTime<Utc>,
    /// Device that published the event
    pub device_id: String,
}

/// `ttl` has been sent both as a number and as a numeric string
#[derive(Deserialize)]
#[serde(untagged)]
enum TtlField {
    Number(u32),
    Text(String),
}

#[derive(Deserialize)]
struct FrameBody {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    ttl: Option<TtlField>,
    published_at: DateTime<Utc>,
    coreid: String,
}

impl EventRecord {
    /// Parse an SSE frame from an event stream
    ///
    /// The name comes from the frame's `event:` field and everything else
    /// from its JSON `data:` body.
    pub fn from_frame(frame: &RawFrame) -> Result<Self, StreamError> {
        let name = frame
            .event
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StreamError::Parse("frame has no event name".to_string()))?;

        let body: FrameBody = serde_json::from_str(&frame.data)
            .map_err(|e| StreamError::Parse(format!("event {name:?}: {e}")))?;

        let ttl = match body.ttl {
            None => DEFAULT_TTL,
            Some(TtlField::Number(ttl)) => ttl,
            Some(TtlField::Text(text)) => text
                .trim()
                .parse()
                .map_err(|_| StreamError::Parse(format!("event {name:?}: invalid ttl {text:?}")))?,
        };

        Ok(Self {
            name: name.to_string(),
            data: body.data.unwrap_or_default(),
            ttl,
            published_at: body.published_at,
            device_id: body.coreid,
        })
    }
}

/// Why a subscription will never be notified again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The session was logged out
    LoggedOut,
    /// The connection was lost and every reconnect attempt failed
    ReconnectExhausted { attempts: u32 },
    /// The session could not authorize the stream
    AuthenticationFailed(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::LoggedOut => f.write_str("logged out"),
            CloseReason::ReconnectExhausted { attempts } => {
                write!(f, "reconnect exhausted after {attempts} attempts")
            }
            CloseReason::AuthenticationFailed(message) => {
                write!(f, "authentication failed: {message}")
            }
        }
    }
}

/// Everything a listener can be told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamNotification {
    /// A matching event
    Event(EventRecord),
    /// A recoverable problem on the subscription's stream
    Error(StreamError),
    /// The stream was lost and will be reopened after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal; delivered at most once per subscription
    Closed(CloseReason),
}

impl StreamNotification {
    pub fn as_event(&self) -> Option<&EventRecord> {
        match self {
            StreamNotification::Event(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamNotification::Closed(_))
    }
}
