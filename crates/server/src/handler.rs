//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the registration host.
use std::sync::Arc;

use crate::tools::{
    CacheGetParams, SwDeferParams, SwFetchParams, SwMessageParams, SwSyncParams, cache, fetch, message, status, sync,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use stash_client::Registration;
use stash_core::CacheDb;
use url::Url;

/// The main MCP server handler for stash.
#[derive(Clone)]
pub struct StashServer {
    registration: Arc<Registration>,
    db: CacheDb,
    origin: Url,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
#[tool_router]
impl StashServer {
    /// Create a new server handler.
    pub fn new(registration: Arc<Registration>, db: CacheDb, origin: Url) -> Self {
        Self { registration, db, origin, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Fetch a URL through the active caching coordinator. Returns status, headers, body and whether it came from the network, the cache, a fallback, or bypassed the cache."
    )]
    async fn sw_fetch(&self, params: Parameters<SwFetchParams>) -> Result<CallToolResult, McpError> {
        fetch::fetch_impl(&self.registration, &self.origin, params.0).await
    }

    #[tool(description = "Post a control message to the coordinator: SKIP_WAITING or REFRESH_CACHE.")]
    async fn sw_message(&self, params: Parameters<SwMessageParams>) -> Result<CallToolResult, McpError> {
        message::message_impl(&self.registration, params.0).await
    }

    /// Queue a submission for delivery on the next sync of its tag.
    #[tool(description = "Queue a notification under a sync tag for later delivery through the relay.")]
    async fn sw_defer(&self, params: Parameters<SwDeferParams>) -> Result<CallToolResult, McpError> {
        sync::defer_impl(&self.registration, params.0).await
    }

    #[tool(description = "Deliver every notification queued under a sync tag. Returns per-task delivery reports.")]
    async fn sw_sync(&self, params: Parameters<SwSyncParams>) -> Result<CallToolResult, McpError> {
        sync::sync_impl(&self.registration, params.0).await
    }

    #[tool(description = "Report active and waiting coordinator versions, lifecycle state and partition sizes.")]
    async fn sw_status(&self) -> Result<CallToolResult, McpError> {
        status::status_impl(&self.registration).await
    }

    /// Read a stored response without touching the network.
    #[tool(description = "Retrieve a stored response by request URL, optionally from one partition.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        cache::get_impl(&self.db, &self.origin, params.0).await
    }
}

impl ServerHandler for StashServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "stash".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, origin};

    #[tokio::test]
    async fn test_router_lists_every_tool() {
        let harness = Harness::new().await;
        let server = StashServer::new(harness.registration.clone(), harness.db.clone(), origin());

        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["cache_get", "sw_defer", "sw_fetch", "sw_message", "sw_status", "sw_sync"]);
    }

    #[tokio::test]
    async fn test_server_info() {
        let harness = Harness::new().await;
        let server = StashServer::new(harness.registration, harness.db, origin());
        assert_eq!(server.get_info().server_info.name, "stash");
    }
}
