//! sw_fetch tool implementation.
//!
//! Routes one request through the active coordinator exactly as an
//! intercepted page request would be.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stash_client::{Registration, Source, fetch::canonicalize};
use stash_core::{Classification, Destination, Error, Method, RequestRecord};
use url::Url;

use crate::tools::json_result;

/// Input parameters for the sw_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwFetchParams {
    /// Request URL, absolute or relative to the origin.
    pub url: String,

    /// HTTP method (default: GET). Anything but GET bypasses the cache.
    #[serde(default)]
    pub method: Option<String>,

    /// Fetch destination: document, image, font, style, script.
    #[serde(default)]
    pub destination: Option<String>,

    /// Accept header sent by the page.
    #[serde(default)]
    pub accept: Option<String>,
}

/// Output structure for the sw_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwFetchOutput {
    /// Final URL of the response.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// network, cache, fallback or bypass.
    #[schemars(with = "String")]
    pub source: Source,
    /// Absent when the request bypassed the cache.
    pub classification: Option<Classification>,
}

impl SwFetchParams {
    fn into_request(self, origin: &Url) -> Result<RequestRecord, Error> {
        let url = canonicalize(&self.url, origin)?;
        let method: Method = self.method.as_deref().unwrap_or("GET").parse()?;
        let mut request = RequestRecord::new(method, url);
        if let Some(destination) = self.destination {
            request = request.with_destination(destination.parse::<Destination>().unwrap_or_default());
        }
        if let Some(accept) = self.accept {
            request = request.with_accept(accept);
        }
        Ok(request)
    }
}

/// Implementation of the sw_fetch tool.
pub async fn fetch_impl(
    registration: &Registration, origin: &Url, params: SwFetchParams,
) -> Result<CallToolResult, McpError> {
    if params.url.trim().is_empty() {
        return Err(Error::InvalidInput("url cannot be empty".into()).into());
    }

    let request = params.into_request(origin)?;
    let handled = registration.fetch(&request).await?;
    tracing::debug!(url = %request.url, source = ?handled.source, "sw_fetch handled");

    let response = handled.response;
    let output = SwFetchOutput {
        url: response.url.to_string(),
        status: response.status,
        content_type: response.content_type().map(str::to_string),
        body: response.text(),
        headers: response.headers,
        source: handled.source,
        classification: handled.classification,
    };
    json_result(&output)
}
