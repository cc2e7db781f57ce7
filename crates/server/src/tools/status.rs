//! sw_status tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use stash_client::Registration;

use crate::tools::json_result;

/// Implementation of the sw_status tool.
pub async fn status_impl(registration: &Registration) -> Result<CallToolResult, McpError> {
    let status = registration.status().await?;
    json_result(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::tools::output;
    use stash_client::{RegistrationStatus, State};

    #[tokio::test]
    async fn test_status_before_registration() {
        let harness = Harness::new().await;
        let out: RegistrationStatus = output(&status_impl(&harness.registration).await.unwrap());
        assert!(out.active.is_none());
        assert!(out.partitions.is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_active_and_waiting() {
        let harness = Harness::active().await;
        harness.registration.register(harness.coordinator("v2")).await.unwrap();

        let out: RegistrationStatus = output(&status_impl(&harness.registration).await.unwrap());
        let active = out.active.unwrap();
        assert_eq!(active.version, "v1");
        assert_eq!(active.state, State::Active);
        assert_eq!(out.waiting.unwrap().state, State::Installed);
        assert!(out.partitions.iter().any(|p| p.name == "stash-core-v1" && p.entries == 2));
        assert!(out.partitions.iter().any(|p| p.name == "stash-core-v2" && p.entries == 2));
    }
}
