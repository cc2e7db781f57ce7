//! sw_message tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stash_client::{ControlMessage, Outcome, Registration};

use crate::tools::json_result;

/// Parameters for the sw_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwMessageParams {
    /// SKIP_WAITING or REFRESH_CACHE.
    #[serde(rename = "type")]
    pub message_type: String,
}

/// Output from the sw_message tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SwMessageOutput {
    pub message: String,
    pub acknowledged: bool,
    /// A waiting coordinator was promoted.
    pub activated: bool,
    /// Partitions deleted by the promotion.
    pub purged: Vec<String>,
    /// Core resources scheduled for background refresh.
    pub refresh_scheduled: usize,
}

/// Implementation of the sw_message tool.
pub async fn message_impl(registration: &Registration, params: SwMessageParams) -> Result<CallToolResult, McpError> {
    let message: ControlMessage = params.message_type.parse()?;
    let outcome = registration.message(message).await?;
    tracing::info!(%message, ?outcome, "control message handled");

    let mut output = SwMessageOutput { message: message.to_string(), acknowledged: true, ..Default::default() };
    match outcome {
        Outcome::Activated { purged } => {
            output.activated = true;
            output.purged = purged;
        }
        Outcome::Refreshing { scheduled } => output.refresh_scheduled = scheduled,
        _ => {}
    }
    json_result(&output)
}
