//! SQLite-backed partition store.
//!
//! Persistent, named cache partitions using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Request keys derived from method and URL (SHA-256)
//! - Automatic schema migrations
//! - WAL mode so reads never observe a half-applied write
//! - Versioned garbage collection (`delete_all_except`)
//! - A deferred-task outbox for background sync

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod outbox;
pub mod partitions;

pub use crate::Error;

pub use connection::CacheDb;
pub use outbox::DeferredTask;
pub use partitions::{EntrySummary, Partition, PartitionStat};
