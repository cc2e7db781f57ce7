//! sw_defer and sw_sync tool implementations.
//!
//! A page that fails to submit while offline defers the submission under a
//! sync tag; a later sync for the same tag hands every queued task to the
//! notification relay.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stash_client::{Registration, TaskDelivery};
use stash_core::{Error, Notification};

use crate::tools::json_result;

/// Parameters for the sw_defer tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwDeferParams {
    /// Sync tag the submission is queued under.
    pub tag: String,

    /// Notification subject. A default subject is used when empty.
    #[serde(default)]
    pub title: Option<String>,

    /// Notification body. A default body is used when empty.
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub email_to: Option<String>,

    #[serde(default)]
    pub whatsapp_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwDeferOutput {
    pub tag: String,
    /// Tasks now queued for the tag.
    pub pending: u64,
}

/// Parameters for the sw_sync tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwSyncParams {
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwSyncOutput {
    pub tag: String,
    pub delivered: usize,
    pub failed: usize,
    /// Failed tasks put back for the next sync.
    pub requeued: usize,
    pub deliveries: Vec<TaskDelivery>,
}

fn require_tag(tag: &str) -> Result<&str, Error> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(Error::InvalidInput("tag cannot be empty".into()));
    }
    Ok(tag)
}

/// Implementation of the sw_defer tool.
pub async fn defer_impl(registration: &Registration, params: SwDeferParams) -> Result<CallToolResult, McpError> {
    let tag = require_tag(&params.tag)?;
    let notification = Notification {
        title: params.title.unwrap_or_default(),
        message: params.message.unwrap_or_default(),
        email_to: params.email_to,
        whatsapp_to: params.whatsapp_to,
    };

    let pending = registration.defer(tag, &notification).await?;
    json_result(&SwDeferOutput { tag: tag.to_string(), pending })
}

/// Implementation of the sw_sync tool.
pub async fn sync_impl(registration: &Registration, params: SwSyncParams) -> Result<CallToolResult, McpError> {
    let tag = require_tag(&params.tag)?;
    let deliveries = registration.sync(tag).await?;
    let failed = deliveries.iter().filter(|d| d.report.any_failed()).count();
    let requeued = deliveries.iter().filter(|d| d.requeued).count();

    let output =
        SwSyncOutput { tag: tag.to_string(), delivered: deliveries.len() - failed, failed, requeued, deliveries };
    json_result(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::tools::output;

    fn defer(tag: &str, message: &str) -> SwDeferParams {
        SwDeferParams {
            tag: tag.to_string(),
            title: Some("Contact".into()),
            message: Some(message.to_string()),
            email_to: Some("owner@example.com".into()),
            whatsapp_to: None,
        }
    }

    #[tokio::test]
    async fn test_defer_counts_pending() {
        let harness = Harness::active().await;
        defer_impl(&harness.registration, defer("contact-form", "first")).await.unwrap();
        let result = defer_impl(&harness.registration, defer("contact-form", "second")).await.unwrap();
        let out: SwDeferOutput = output(&result);
        assert_eq!(out.pending, 2);
        assert_eq!(harness.db.pending_count("contact-form").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_defer_rejects_blank_tag() {
        let harness = Harness::active().await;
        let err = defer_impl(&harness.registration, defer(" ", "x")).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[tokio::test]
    async fn test_sync_without_relay_keeps_tasks_queued() {
        let harness = Harness::active().await;
        defer_impl(&harness.registration, defer("contact-form", "hello")).await.unwrap();

        let err = sync_impl(&harness.registration, SwSyncParams { tag: "contact-form".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code.0, -32005);
        assert_eq!(harness.db.pending_count("contact-form").await.unwrap(), 1);
    }
}
