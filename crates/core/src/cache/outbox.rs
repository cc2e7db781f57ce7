//! Deferred task outbox.
//!
//! Submissions that could not be sent (typically while offline) are queued
//! under a sync tag and handed to the notification relay the next time that
//! tag is signalled.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use crate::Error;
use crate::notify::Notification;

/// A queued submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DeferredTask {
    pub id: i64,
    pub tag: String,
    pub notification: Notification,
    pub queued_at: String,
}

fn sync_tag(tag: &str) -> Result<String, Error> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(Error::InvalidInput("sync tag must not be empty".into()));
    }
    Ok(tag.to_string())
}

impl CacheDb {
    /// Queue a notification under `tag`. Returns the number now pending for it.
    pub async fn defer(&self, tag: &str, notification: &Notification) -> Result<u64, Error> {
        let tag = sync_tag(tag)?;
        let payload = serde_json::to_string(notification)?;
        let queued_at = Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true);

        self.conn
            .call(move |conn| -> Result<u64, Error> {
                conn.execute(
                    "INSERT INTO deferred_tasks (tag, payload_json, queued_at) VALUES (?1, ?2, ?3)",
                    params![&tag, payload, queued_at],
                )?;
                let pending: i64 =
                    conn.query_row("SELECT COUNT(*) FROM deferred_tasks WHERE tag = ?1", params![&tag], |row| {
                        row.get(0)
                    })?;
                Ok(pending as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of tasks pending for `tag`.
    pub async fn pending_count(&self, tag: &str) -> Result<u64, Error> {
        let tag = sync_tag(tag)?;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let pending: i64 =
                    conn.query_row("SELECT COUNT(*) FROM deferred_tasks WHERE tag = ?1", params![tag], |row| {
                        row.get(0)
                    })?;
                Ok(pending as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove and return every task queued under `tag`, oldest first.
    pub async fn take_deferred(&self, tag: &str) -> Result<Vec<DeferredTask>, Error> {
        let tag = sync_tag(tag)?;
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<(i64, String, String, String)>, Error> {
                let tx = conn.transaction()?;
                let mut stmt =
                    tx.prepare("SELECT id, tag, payload_json, queued_at FROM deferred_tasks WHERE tag = ?1 ORDER BY id")?;
                let rows = stmt
                    .query_map(params![&tag], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);
                tx.execute("DELETE FROM deferred_tasks WHERE tag = ?1", params![&tag])?;
                tx.commit()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(id, tag, payload, queued_at)| -> Result<DeferredTask, Error> {
                let notification = serde_json::from_str(&payload)?;
                Ok(DeferredTask { id, tag, notification, queued_at })
            })
            .collect()
    }

    /// Put taken tasks back under their original ids so queue order is kept.
    pub async fn requeue(&self, tasks: &[DeferredTask]) -> Result<usize, Error> {
        let rows = tasks
            .iter()
            .map(|t| -> Result<_, Error> {
                Ok((t.id, t.tag.clone(), serde_json::to_string(&t.notification)?, t.queued_at.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                let mut restored = 0;
                for (id, tag, payload, queued_at) in &rows {
                    restored += tx.execute(
                        "INSERT OR IGNORE INTO deferred_tasks (id, tag, payload_json, queued_at) VALUES (?1, ?2, ?3, ?4)",
                        params![id, tag, payload, queued_at],
                    )?;
                }
                tx.commit()?;
                Ok(restored)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defer_and_take_in_order() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let first = Notification::new("Contact form", "first").with_email("ops@example.com");
        let second = Notification::new("Contact form", "second").with_whatsapp("whatsapp:+966500000000");

        assert_eq!(db.defer("contact-form", &first).await.unwrap(), 1);
        assert_eq!(db.defer("contact-form", &second).await.unwrap(), 2);
        db.defer("newsletter", &Notification::default()).await.unwrap();

        let tasks = db.take_deferred("contact-form").await.unwrap();
        let messages: Vec<_> = tasks.iter().map(|t| t.notification.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(tasks[0].notification, first);

        assert_eq!(db.pending_count("contact-form").await.unwrap(), 0);
        assert_eq!(db.pending_count("newsletter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_take_unknown_tag_is_empty() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.take_deferred("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_defer_rejects_blank_tag() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let result = db.defer("  ", &Notification::default()).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_tag_is_trimmed_everywhere() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.defer("contact-form", &Notification::new("Contact", "hello")).await.unwrap();

        assert_eq!(db.pending_count(" contact-form ").await.unwrap(), 1);
        let tasks = db.take_deferred("  contact-form").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].tag, "contact-form");
    }

    #[tokio::test]
    async fn test_requeue_restores_original_order() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.defer("contact-form", &Notification::new("Contact", "first")).await.unwrap();
        db.defer("contact-form", &Notification::new("Contact", "second")).await.unwrap();

        let tasks = db.take_deferred("contact-form").await.unwrap();
        db.defer("contact-form", &Notification::new("Contact", "third")).await.unwrap();
        assert_eq!(db.requeue(&tasks).await.unwrap(), 2);

        let again = db.take_deferred("contact-form").await.unwrap();
        let messages: Vec<_> = again.iter().map(|t| t.notification.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert_eq!(again[0].id, tasks[0].id);
        assert_eq!(again[0].queued_at, tasks[0].queued_at);
    }
}
