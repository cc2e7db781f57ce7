//! Notification relay client.
//!
//! Hands deferred submissions to the external notifier, which fans each one
//! out to email and WhatsApp.
//!
//! ### Protocol
//!
//! - **Deliver**: `POST {base}/notify` with `{title, message, emailTo?, whatsappTo?}`.
//! - **Response**: `{ok, results: {email, whatsapp}}`, each channel `null`,
//!   `{to}`/`{sid, to}` or `{error}`.
//! - **Health**: `GET {base}/health` answers `{ok: true}`.
//! - No retries. A transport failure fails both channels for that task.

pub mod error;
pub mod response;

pub use error::RelayError;
pub use response::{NotifyRequest, NotifyResponse};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header;
use stash_core::{DeliveryReport, Notification};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "stash/0.1";

/// Delivers notifications on behalf of the coordinator.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Deliver one notification. Channel failures are reported, never raised.
    async fn deliver(&self, notification: &Notification) -> DeliveryReport;
}

/// Relay client configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the notifier (e.g. `http://localhost:5055`).
    pub base_url: String,
    /// Request timeout (default: 10s).
    pub timeout: Duration,
    /// User-agent string (default: stash/0.x).
    pub user_agent: String,
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), timeout: DEFAULT_TIMEOUT, user_agent: DEFAULT_USER_AGENT.to_string() }
    }
}

/// HTTP client for the notifier service.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    http: reqwest::Client,
    config: RelayConfig,
}

impl HttpRelay {
    /// Create a new relay client with the given configuration.
    pub fn new(mut config: RelayConfig) -> Result<Self, RelayError> {
        let base = config.base_url.trim().trim_end_matches('/').to_string();
        url::Url::parse(&base).map_err(|e| RelayError::InvalidUrl(format!("{base}: {e}")))?;
        config.base_url = base;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { http, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Post a notification and normalize the relay's answer.
    pub async fn notify(&self, notification: &Notification) -> Result<DeliveryReport, RelayError> {
        let start = Instant::now();
        let url = format!("{}/notify", self.config.base_url);

        let http_response = self
            .http
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&NotifyRequest::from(notification))
            .send()
            .await?;

        let status = http_response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(RelayError::HttpError { status: status.as_u16() });
        }

        let bytes = http_response.bytes().await?;
        let raw: NotifyResponse = serde_json::from_slice(&bytes).map_err(|e| RelayError::Parse(e.to_string()))?;

        tracing::debug!("relay answered in {:?} (ok={})", start.elapsed(), raw.ok);

        Ok(raw.into())
    }

    /// Check the relay's health endpoint.
    pub async fn health(&self) -> Result<(), RelayError> {
        let url = format!("{}/health", self.config.base_url);
        let status = self.http.get(&url).send().await?.status();
        if status.is_success() { Ok(()) } else { Err(RelayError::HttpError { status: status.as_u16() }) }
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn deliver(&self, notification: &Notification) -> DeliveryReport {
        match self.notify(notification).await {
            Ok(report) => {
                if report.any_failed() {
                    tracing::warn!(?report, "relay reported a failed channel");
                }
                report
            }
            Err(e) => {
                tracing::warn!(error = %e, "relay delivery failed");
                DeliveryReport::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;
    use stash_core::ChannelResult;

    #[test]
    fn test_new_rejects_invalid_base() {
        let result = HttpRelay::new(RelayConfig::new("not a url"));
        assert!(matches!(result, Err(RelayError::InvalidUrl(_))));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let relay = HttpRelay::new(RelayConfig::new("http://localhost:5055/")).unwrap();
        assert_eq!(relay.base_url(), "http://localhost:5055");
    }

    #[tokio::test]
    async fn test_deliver_parses_report() {
        let body = r#"{"ok":true,"results":{"email":{"to":"ops@example.com"},"whatsapp":null}}"#;
        let base = serve_once(200, body).await;
        let relay = HttpRelay::new(RelayConfig::new(base.as_str())).unwrap();

        let report = relay.deliver(&Notification::new("Contact form", "hi").with_email("ops@example.com")).await;
        assert_eq!(report.email, ChannelResult::Sent { to: "ops@example.com".into(), id: None });
        assert_eq!(report.whatsapp, ChannelResult::Skipped);
    }

    #[tokio::test]
    async fn test_deliver_server_error_fails_channels() {
        let base = serve_once(500, "{}").await;
        let relay = HttpRelay::new(RelayConfig::new(base.as_str())).unwrap();

        let report = relay.deliver(&Notification::default()).await;
        assert!(report.email.is_failed());
        assert!(report.whatsapp.is_failed());
    }

    #[tokio::test]
    async fn test_health() {
        let base = serve_once(200, r#"{"ok":true}"#).await;
        let relay = HttpRelay::new(RelayConfig::new(base.as_str())).unwrap();
        assert!(relay.health().await.is_ok());
    }
}
