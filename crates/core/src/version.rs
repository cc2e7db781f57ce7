//! Versioned partition naming.
//!
//! Every partition name embeds the coordinator's version token, so bumping the
//! token declares a fresh partition set and leaves the old one to be purged at
//! the next activation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Logical partitions owned by a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    /// Pre-cached application shell; also holds `other` responses.
    Core,
    /// Stylesheets, scripts, fonts and other optional assets.
    Static,
    /// Documents captured by network-first routing.
    Dynamic,
    Image,
}

impl PartitionKind {
    /// Lookup order used when searching every partition.
    pub const ALL: [PartitionKind; 4] = [Self::Core, Self::Static, Self::Dynamic, Self::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single version token a coordinator instance runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordinatorVersion {
    prefix: String,
    token: String,
}

impl CoordinatorVersion {
    /// Create a version with an optional name prefix (e.g. `samma`).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the token is empty, or if the token
    /// or prefix contains whitespace.
    pub fn new(prefix: impl Into<String>, token: impl Into<String>) -> Result<Self, Error> {
        let prefix = prefix.into().trim().to_string();
        let token = token.into().trim().to_string();

        if token.is_empty() {
            return Err(Error::InvalidInput("version token must not be empty".into()));
        }
        if token.chars().any(char::is_whitespace) || prefix.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput("version token and prefix must not contain whitespace".into()));
        }

        Ok(Self { prefix, token })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Store name of a logical partition under this version.
    pub fn partition_name(&self, kind: PartitionKind) -> String {
        if self.prefix.is_empty() {
            format!("{}-{}", kind.as_str(), self.token)
        } else {
            format!("{}-{}-{}", self.prefix, kind.as_str(), self.token)
        }
    }

    /// Names of every partition this version declares, in lookup order.
    pub fn current_names(&self) -> Vec<String> {
        PartitionKind::ALL.iter().map(|kind| self.partition_name(*kind)).collect()
    }
}

impl fmt::Display for CoordinatorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}
