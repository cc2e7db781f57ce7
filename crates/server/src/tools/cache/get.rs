//! cache_get tool implementation.
//!
//! Reads a stored response by request URL without touching the network.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stash_client::fetch::canonicalize;
use stash_core::{CacheDb, Error, Method, RequestRecord, ResponseType};
use url::Url;

use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// Request URL, absolute or relative to the origin.
    pub url: String,

    /// Partition to read. Every partition is searched when omitted.
    #[serde(default)]
    pub partition: Option<String>,

    /// Request method (default: GET).
    #[serde(default)]
    pub method: Option<String>,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    pub partition: String,
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    #[schemars(with = "String")]
    pub response_type: ResponseType,
    /// RFC 3339 capture time.
    pub captured_at: String,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(db: &CacheDb, origin: &Url, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    let url = canonicalize(&params.url, origin).map_err(Error::from)?;
    let method: Method = params.method.as_deref().unwrap_or("GET").parse()?;
    let key = RequestRecord::new(method, url.clone()).cache_key();

    let partitions = match params.partition {
        Some(name) => vec![name],
        None => db.partition_names().await?,
    };
    let (partition, response) =
        db.lookup_any(&partitions, &key).await?.ok_or_else(|| Error::CacheMiss(format!("{method} {url}")))?;

    tracing::debug!(%url, %partition, "cache_get hit");
    let output = CacheGetOutput {
        partition,
        url: response.url.to_string(),
        status: response.status,
        body: response.text(),
        headers: response.headers,
        response_type: response.response_type,
        captured_at: response.captured_at.to_rfc3339(),
    };
    json_result(&output)
}
