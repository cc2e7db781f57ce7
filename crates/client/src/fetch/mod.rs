//! Outbound HTTP fetch.
//!
//! ### Status handling
//! - Any HTTP status is a completed fetch and comes back as a response.
//! - Only transport failures (DNS, connect, timeout, oversized body) are
//!   `NETWORK_FAILURE` errors.
//!
//! ### Response typing
//! - Responses whose final URL shares the coordinator's origin are `Basic`.
//! - Everything else is `Opaque` and is never written to a partition.
//!
//! ### Limits
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, header};
use stash_core::{AppConfig, CachedResponse, Error, RequestRecord, ResponseType};

pub use self::url::{UrlError, canonicalize};

/// Performs network requests on behalf of the coordinator.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch a request from the network.
    ///
    /// Non-200 statuses are returned as responses, not errors.
    async fn fetch(&self, request: &RequestRecord) -> Result<CachedResponse, Error>;
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "stash/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "stash/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: config.max_redirects,
        }
    }
}

/// HTTP fetch client bound to the coordinator's origin.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
    origin: ::url::Url,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig, origin: ::url::Url) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::NetworkFailure(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config, origin })
    }

    fn response_type(&self, final_url: &::url::Url) -> ResponseType {
        if final_url.origin() == self.origin.origin() { ResponseType::Basic } else { ResponseType::Opaque }
    }

    fn too_large(&self, len: usize) -> Error {
        Error::NetworkFailure(format!("{} bytes exceeds {}", len, self.config.max_bytes))
    }
}

#[async_trait]
impl Network for FetchClient {
    async fn fetch(&self, request: &RequestRecord) -> Result<CachedResponse, Error> {
        let start = Instant::now();
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| Error::InvalidInput(format!("method {}: {}", request.method, e)))?;

        let mut builder = self.http.request(method, request.url.as_str());
        if let Some(accept) = &request.accept {
            builder = builder.header(header::ACCEPT, accept);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::NetworkFailure(format!("{}: {}", request.url, e)))?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(self.too_large(len as usize));
        }

        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();

        let bytes: Bytes = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkFailure(format!("failed to read response: {}", e)))?;

        if bytes.len() > self.config.max_bytes {
            return Err(self.too_large(bytes.len()));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            "fetched {} {} -> {} ({}) in {}ms ({} bytes)",
            request.method,
            request.url,
            final_url,
            status.as_u16(),
            fetch_ms,
            bytes.len()
        );

        Ok(CachedResponse {
            response_type: self.response_type(&final_url),
            url: final_url,
            status: status.as_u16(),
            headers,
            body: bytes.to_vec(),
            captured_at: Utc::now(),
        })
    }
}
