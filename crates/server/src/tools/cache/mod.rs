//! Cache-related MCP tools.
//!
//! This module provides read access to the partition store.

pub mod get;

pub use get::{CacheGetOutput, CacheGetParams, get_impl};
