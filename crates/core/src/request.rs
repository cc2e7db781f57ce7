//! Intercepted request records.
//!
//! A `RequestRecord` exists only while a request is classified and routed; it
//! is never persisted. Only the derived cache key reaches the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;
use crate::cache::hash::compute_cache_key;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether the method is a safe read eligible for interception.
    pub fn is_get(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "OPTIONS" => Ok(Self::Options),
            other => Err(Error::InvalidInput(format!("unsupported method: {other}"))),
        }
    }
}

/// Fetch destination hint declared by the requesting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    #[default]
    Empty,
    Document,
    Image,
    Font,
    Style,
    Script,
    Other,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Document => "document",
            Self::Image => "image",
            Self::Font => "font",
            Self::Style => "style",
            Self::Script => "script",
            Self::Other => "other",
        }
    }
}

impl FromStr for Destination {
    type Err = std::convert::Infallible;

    /// Unknown destinations map to `Other` rather than failing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "document" => Self::Document,
            "image" => Self::Image,
            "font" => Self::Font,
            "style" => Self::Style,
            "script" => Self::Script,
            _ => Self::Other,
        })
    }
}

/// A request as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub url: Url,
    pub method: Method,
    pub destination: Destination,
    pub accept: Option<String>,
}

impl RequestRecord {
    pub fn new(method: Method, url: Url) -> Self {
        Self { url, method, destination: Destination::Empty, accept: None }
    }

    /// A plain GET with no destination or Accept hint.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Store key for this request (method + URL, fragment ignored).
    pub fn cache_key(&self) -> String {
        compute_cache_key(self.method.as_str(), &self.url)
    }

    /// Whether the Accept header asks for HTML.
    pub fn accepts_html(&self) -> bool {
        self.accept.as_deref().is_some_and(|accept| accept.contains("text/html"))
    }

    /// Lowercased file extension of the URL path, if any.
    pub fn extension(&self) -> Option<String> {
        let last = self.url.path_segments()?.last()?;
        let (_, ext) = last.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}
