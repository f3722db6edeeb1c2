//! Stream scopes
//!
//! A scope selects one of the cloud's event feeds. Each distinct scope is
//! served by exactly one connection, shared by every subscription with that
//! scope regardless of its name prefix.

use std::fmt;

use cloud_transport::path_segment;

use crate::event::EventRecord;

/// Which event feed a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventScope {
    /// Public events plus events from the caller's own devices
    AllPublicAndOwned,
    /// Only events from the caller's own devices
    OwnedDevicesOnly,
    /// Events from one device
    SingleDevice(String),
}

impl EventScope {
    pub fn single_device(device_id: impl Into<String>) -> Self {
        EventScope::SingleDevice(device_id.into())
    }

    /// Stream path for this scope, relative to the API base URL
    pub fn path(&self) -> String {
        match self {
            EventScope::AllPublicAndOwned => "/v1/events".to_string(),
            EventScope::OwnedDevicesOnly => "/v1/devices/events".to_string(),
            EventScope::SingleDevice(device_id) => {
                format!("/v1/devices/{}/events", path_segment(device_id))
            }
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            EventScope::SingleDevice(device_id) => Some(device_id),
            _ => None,
        }
    }

    /// Whether an event delivered on this scope's stream is visible to it
    ///
    /// The firehose and owned-device feeds are already filtered by the
    /// server; a single-device scope additionally checks the origin.
    pub fn admits(&self, record: &EventRecord) -> bool {
        match self {
            EventScope::AllPublicAndOwned | EventScope::OwnedDevicesOnly => true,
            EventScope::SingleDevice(device_id) => record.device_id == *device_id,
        }
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventScope::AllPublicAndOwned => f.write_str("all"),
            EventScope::OwnedDevicesOnly => f.write_str("my-devices"),
            EventScope::SingleDevice(device_id) => write!(f, "device:{device_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    fn record_from(device_id: &str) -> EventRecord {
        EventRecord {
            name: "temp".to_string(),
            data: "21.5".to_string(),
            ttl: 60,
            published_at: Utc::now(),
            device_id: device_id.to_string(),
        }
    }

    #[rstest]
    #[case(EventScope::AllPublicAndOwned, "/v1/events")]
    #[case(EventScope::OwnedDevicesOnly, "/v1/devices/events")]
    #[case(EventScope::single_device("0123abc"), "/v1/devices/0123abc/events")]
    #[case(EventScope::single_device("x/../../events"), "/v1/devices/x%2F..%2F..%2Fevents/events")]
    #[case(EventScope::single_device("dev?all=1"), "/v1/devices/dev%3Fall%3D1/events")]
    fn test_scope_paths(#[case] scope: EventScope, #[case] path: &str) {
        assert_eq!(scope.path(), path);
    }

    #[rstest]
    #[case(EventScope::AllPublicAndOwned, true)]
    #[case(EventScope::OwnedDevicesOnly, true)]
    #[case(EventScope::single_device("dev1"), true)]
    #[case(EventScope::single_device("dev2"), false)]
    fn test_scope_admits(#[case] scope: EventScope, #[case] admitted: bool) {
        assert_eq!(scope.admits(&record_from("dev1")), admitted);
    }
}
