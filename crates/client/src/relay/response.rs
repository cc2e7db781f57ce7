//! Relay wire types and normalization.

use serde::{Deserialize, Serialize};
use stash_core::{ChannelResult, DeliveryReport, Notification};

/// Body posted to `/notify`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest<'a> {
    pub title: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_to: Option<&'a str>,
}

impl<'a> From<&'a Notification> for NotifyRequest<'a> {
    fn from(n: &'a Notification) -> Self {
        Self {
            title: n.subject(),
            message: n.body(),
            email_to: n.email_to.as_deref(),
            whatsapp_to: n.whatsapp_to.as_deref(),
        }
    }
}

/// Raw response from `/notify`.
#[derive(Debug, Deserialize)]
pub struct NotifyResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub results: RawResults,
}

/// Per-channel results; `null` means the channel was not attempted.
#[derive(Debug, Default, Deserialize)]
pub struct RawResults {
    #[serde(default)]
    pub email: Option<RawChannel>,
    #[serde(default)]
    pub whatsapp: Option<RawChannel>,
}

/// One channel's raw outcome: `{to}`, `{sid, to}` or `{error}`.
#[derive(Debug, Deserialize)]
pub struct RawChannel {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Normalizes one channel's raw outcome (a free function because the orphan
/// rule forbids `impl From<Option<RawChannel>> for ChannelResult` here).
fn channel_result(raw: Option<RawChannel>) -> ChannelResult {
    match raw {
        None => ChannelResult::Skipped,
        Some(RawChannel { error: Some(error), .. }) => ChannelResult::Failed { error },
        Some(RawChannel { to, sid, .. }) => ChannelResult::Sent { to: to.unwrap_or_default(), id: sid },
    }
}

impl From<NotifyResponse> for DeliveryReport {
    fn from(raw: NotifyResponse) -> Self {
        DeliveryReport { email: channel_result(raw.results.email), whatsapp: channel_result(raw.results.whatsapp) }
    }
}
