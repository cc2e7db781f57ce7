//! MCP tool implementations.
//!
//! Each tool exposes one coordinator operation to MCP clients.

pub mod cache;
pub mod fetch;
pub mod message;
pub mod status;
pub mod sync;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;
use stash_core::Error;

pub use cache::CacheGetParams;
pub use fetch::SwFetchParams;
pub use message::SwMessageParams;
pub use sync::{SwDeferParams, SwSyncParams};

/// Render a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) fn output<T: serde::de::DeserializeOwned>(result: &CallToolResult) -> T {
    let content = serde_json::to_value(&result.content[0]).unwrap();
    let text = content.get("text").and_then(|v| v.as_str()).expect("Expected text field in content");
    serde_json::from_str(text).unwrap()
}
