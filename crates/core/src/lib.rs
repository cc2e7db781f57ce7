//! Core types and shared functionality for stash.
//!
//! This crate provides:
//! - Request model and classification
//! - Versioned partition store with SQLite backend
//! - Deferred task outbox and notification payloads
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod notify;
pub mod request;
pub mod response;
pub mod version;

pub use cache::{CacheDb, DeferredTask, EntrySummary, PartitionStat};
pub use classify::{BypassReason, Classification, Scope, Verdict, classify};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use notify::{ChannelResult, DeliveryReport, Notification};
pub use request::{Destination, Method, RequestRecord};
pub use response::{CachedResponse, ResponseType};
pub use version::{CoordinatorVersion, PartitionKind};
