//! Request and response types shared by every transport implementation

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;

/// Characters left as-is inside a path segment (RFC 3986 unreserved)
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a caller-supplied value for use as one path segment
///
/// `/`, `?` and `#` are escaped so the value cannot address another
/// endpoint. Dot segments are rejected later by the transport.
pub fn path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

/// HTTP method of an API request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request authenticates itself
#[derive(Clone, PartialEq, Eq, Default)]
pub enum RequestAuth {
    /// Anonymous request
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// OAuth client credentials sent as HTTP basic auth
    Client { id: String, secret: String },
}

// Tokens and secrets never end up in logs.
impl std::fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestAuth::None => f.write_str("None"),
            RequestAuth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            RequestAuth::Client { id, .. } => write!(f, "Client {{ id: {id:?}, secret: <redacted> }}"),
        }
    }
}

/// A single request/response exchange with the cloud API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/v1/devices/events`
    pub path: String,
    /// Query parameters for `GET`, form fields otherwise
    pub params: Vec<(String, String)>,
    pub auth: RequestAuth,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            auth: RequestAuth::None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.auth = RequestAuth::Bearer(token.into());
        self
    }

    pub fn client_credentials(mut self, id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.auth = RequestAuth::Client {
            id: id.into(),
            secret: secret.into(),
        };
        self
    }

    /// Look up the first parameter with the given name
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Best-effort human readable error from a JSON error body
    ///
    /// The cloud reports failures as `error_description`, `error` or `info`
    /// depending on the endpoint; falls back to the raw body.
    pub fn error_message(&self) -> String {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&self.body) {
            for key in ["error_description", "error", "info"] {
                if let Some(serde_json::Value::String(message)) = map.get(key) {
                    return message.clone();
                }
            }
        }
        if self.body.trim().is_empty() {
            format!("HTTP {}", self.status)
        } else {
            self.body.trim().to_string()
        }
    }
}
