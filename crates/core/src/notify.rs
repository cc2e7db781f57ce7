//! Notification payloads handed to the external relay.

use serde::{Deserialize, Serialize};

/// Subject used when a submission carries no title.
pub const DEFAULT_TITLE: &str = "تنبيه الحملة";

/// Body used when a submission carries no message.
pub const DEFAULT_MESSAGE: &str = "تم رصد تغيير في معلومات النشاط التجاري.";

/// A message for the relay to deliver by email and/or WhatsApp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Notification {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp_to: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), message: message.into(), email_to: None, whatsapp_to: None }
    }

    pub fn with_email(mut self, to: impl Into<String>) -> Self {
        self.email_to = Some(to.into());
        self
    }

    pub fn with_whatsapp(mut self, to: impl Into<String>) -> Self {
        self.whatsapp_to = Some(to.into());
        self
    }

    /// Title to send, falling back to the default subject.
    pub fn subject(&self) -> &str {
        if self.title.trim().is_empty() { DEFAULT_TITLE } else { &self.title }
    }

    /// Body to send, falling back to the default message.
    pub fn body(&self) -> &str {
        if self.message.trim().is_empty() { DEFAULT_MESSAGE } else { &self.message }
    }
}

/// Result of one delivery channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelResult {
    Sent {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Failed {
        error: String,
    },
    /// Channel not configured on the relay or no target given.
    #[default]
    Skipped,
}

impl ChannelResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Per-channel outcome of a delivery; one channel failing never aborts the other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DeliveryReport {
    pub email: ChannelResult,
    pub whatsapp: ChannelResult,
}

impl DeliveryReport {
    /// Both channels failed with the same error (e.g. relay unreachable).
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self { email: ChannelResult::Failed { error: error.clone() }, whatsapp: ChannelResult::Failed { error } }
    }

    pub fn any_failed(&self) -> bool {
        self.email.is_failed() || self.whatsapp.is_failed()
    }

    /// Nothing reached anyone and at least one channel failed.
    pub fn undelivered(&self) -> bool {
        self.any_failed() && !self.email.is_sent() && !self.whatsapp.is_sent()
    }
}
