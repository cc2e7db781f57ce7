//! Captured network responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Whether a response came from the coordinator's own origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response; storable when the status is 200.
    #[default]
    Basic,
    /// Cross-origin response; handed to the caller but never stored.
    Opaque,
}

/// Immutable snapshot of a response at capture time.
///
/// Copying an entry into another partition clones the body; partitions never
/// share a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub response_type: ResponseType,
    pub captured_at: DateTime<Utc>,
}

impl CachedResponse {
    /// A same-origin 200 response with no headers, captured now.
    pub fn ok(url: Url, body: impl Into<Vec<u8>>) -> Self {
        Self::new(url, 200, body)
    }

    pub fn new(url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            captured_at: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Reason this response may not be stored, if any.
    pub fn ineligibility(&self) -> Option<String> {
        if self.status != 200 {
            return Some(format!("status {} for {}", self.status, self.url));
        }
        if self.response_type != ResponseType::Basic {
            return Some(format!("cross-origin response for {}", self.url));
        }
        None
    }

    /// Only exact 200, same-origin responses are stored.
    pub fn is_cacheable(&self) -> bool {
        self.ineligibility().is_none()
    }
}
