//! Partition and entry operations.
//!
//! A partition is a named, ordered mapping from request key to stored
//! response. Writes are last-write-wins per key and each runs as a single
//! statement or transaction, so readers see the old value or the new one.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use url::Url;

use super::connection::CacheDb;
use crate::Error;
use crate::request::RequestRecord;
use crate::response::{CachedResponse, ResponseType};

/// A partition as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Partition {
    pub name: String,
    pub created_at: String,
}

/// Partition name with its entry count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PartitionStat {
    pub name: String,
    pub entries: u64,
    pub created_at: String,
}

/// Listing view of a stored entry (no body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct EntrySummary {
    pub key: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub size: u64,
    pub captured_at: String,
}

/// Raw row before decoding; decoding happens off the database thread.
struct EntryRow {
    url: String,
    status: u16,
    headers_json: String,
    body: Vec<u8>,
    captured_at: String,
}

impl EntryRow {
    const COLUMNS: &'static str = "url, status, headers_json, body, captured_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get(0)?,
            status: row.get(1)?,
            headers_json: row.get(2)?,
            body: row.get(3)?,
            captured_at: row.get(4)?,
        })
    }

    fn decode(self) -> Result<CachedResponse, Error> {
        let url = Url::parse(&self.url).map_err(|e| Error::CorruptEntry(format!("url {}: {e}", self.url)))?;
        let headers: Vec<(String, String)> = serde_json::from_str(&self.headers_json)?;
        let captured_at = DateTime::parse_from_rfc3339(&self.captured_at)
            .map_err(|e| Error::CorruptEntry(format!("captured_at {}: {e}", self.captured_at)))?
            .with_timezone(&Utc);

        Ok(CachedResponse {
            url,
            status: self.status,
            headers,
            body: self.body,
            response_type: ResponseType::Basic,
            captured_at,
        })
    }
}

/// Entry fields ready for binding, validated before touching the database.
struct EncodedEntry {
    key: String,
    method: String,
    url: String,
    status: u16,
    headers_json: String,
    body: Vec<u8>,
    captured_at: String,
}

impl EncodedEntry {
    fn encode(request: &RequestRecord, response: &CachedResponse) -> Result<Self, Error> {
        if !request.method.is_get() {
            return Err(Error::IneligibleResponse(format!("{} {} is not a GET", request.method, request.url)));
        }
        if let Some(reason) = response.ineligibility() {
            return Err(Error::IneligibleResponse(reason));
        }

        Ok(Self {
            key: request.cache_key(),
            method: request.method.as_str().to_string(),
            url: response.url.to_string(),
            status: response.status,
            headers_json: serde_json::to_string(&response.headers)?,
            body: response.body.clone(),
            captured_at: response.captured_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        })
    }

    fn write(&self, conn: &rusqlite::Connection, partition: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
            params![partition, now()],
        )?;
        conn.execute(
            "INSERT INTO entries (partition, key, method, url, status, headers_json, body, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(partition, key) DO UPDATE SET
                method = excluded.method,
                url = excluded.url,
                status = excluded.status,
                headers_json = excluded.headers_json,
                body = excluded.body,
                captured_at = excluded.captured_at",
            params![
                partition,
                &self.key,
                &self.method,
                &self.url,
                self.status,
                &self.headers_json,
                &self.body,
                &self.captured_at,
            ],
        )?;
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl CacheDb {
    /// Open a partition, creating it on first use.
    pub async fn open_partition(&self, name: &str) -> Result<Partition, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<Partition, Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
                    params![&name, now()],
                )?;
                let created_at: String =
                    conn.query_row("SELECT created_at FROM partitions WHERE name = ?1", params![&name], |row| {
                        row.get(0)
                    })?;
                Ok(Partition { name, created_at })
            })
            .await
            .map_err(Error::from)
    }

    /// Names of every partition in creation order.
    pub async fn partition_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY rowid")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Look up an entry in one partition.
    pub async fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>, Error> {
        let partition = partition.to_string();
        let key = key.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<EntryRow>, Error> {
                let sql = format!("SELECT {} FROM entries WHERE partition = ?1 AND key = ?2", EntryRow::COLUMNS);
                let row = conn
                    .query_row(&sql, params![partition, key], EntryRow::from_row)
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        row.map(EntryRow::decode).transpose()
    }

    /// First entry for `key` across `partitions`, searched in the given order.
    ///
    /// Returns the owning partition's name alongside the response.
    pub async fn lookup_any(&self, partitions: &[String], key: &str) -> Result<Option<(String, CachedResponse)>, Error> {
        let partitions = partitions.to_vec();
        let key = key.to_string();
        let found = self
            .conn
            .call(move |conn| -> Result<Option<(String, EntryRow)>, Error> {
                let sql = format!("SELECT {} FROM entries WHERE partition = ?1 AND key = ?2", EntryRow::COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                for partition in partitions {
                    let row = stmt.query_row(params![&partition, &key], EntryRow::from_row).optional()?;
                    if let Some(row) = row {
                        return Ok(Some((partition, row)));
                    }
                }
                Ok(None)
            })
            .await
            .map_err(Error::from)?;

        found
            .map(|(partition, row)| row.decode().map(|response| (partition, response)))
            .transpose()
    }

    /// Store a response under the request's key, replacing any previous entry.
    ///
    /// The partition is created if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `Error::IneligibleResponse` without writing anything when the
    /// request is not a GET or the response is not a same-origin 200.
    pub async fn put(&self, partition: &str, request: &RequestRecord, response: &CachedResponse) -> Result<(), Error> {
        let entry = EncodedEntry::encode(request, response)?;
        let partition = partition.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                entry.write(&tx, &partition)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Store several entries atomically: either all are written or none.
    ///
    /// # Errors
    ///
    /// Returns `Error::IneligibleResponse` if any entry is ineligible; the
    /// partition is left untouched in that case.
    pub async fn put_many(&self, partition: &str, entries: &[(RequestRecord, CachedResponse)]) -> Result<usize, Error> {
        let encoded = entries
            .iter()
            .map(|(request, response)| EncodedEntry::encode(request, response))
            .collect::<Result<Vec<_>, Error>>()?;
        let partition = partition.to_string();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
                    params![&partition, now()],
                )?;
                for entry in &encoded {
                    entry.write(&tx, &partition)?;
                }
                tx.commit()?;
                Ok(encoded.len())
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a partition and all its entries. Returns whether it existed.
    pub async fn delete_partition(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM partitions WHERE name = ?1", params![name])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove every partition whose name is not in `keep`.
    ///
    /// Runs in one transaction and returns the deleted names in creation order.
    pub async fn delete_all_except(&self, keep: &[String]) -> Result<Vec<String>, Error> {
        let keep = keep.to_vec();
        let deleted = self
            .conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                let mut stmt = tx.prepare("SELECT name FROM partitions ORDER BY rowid")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                drop(stmt);

                let mut deleted = Vec::new();
                for name in names.into_iter().filter(|name| !keep.contains(name)) {
                    tx.execute("DELETE FROM partitions WHERE name = ?1", params![&name])?;
                    deleted.push(name);
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(Error::from)?;

        for name in &deleted {
            tracing::info!(partition = %name, "deleted stale partition");
        }

        Ok(deleted)
    }

    /// Entries of a partition in insertion order.
    pub async fn entries(&self, partition: &str) -> Result<Vec<EntrySummary>, Error> {
        let partition = partition.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<EntrySummary>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key, method, url, status, length(body), captured_at
                     FROM entries WHERE partition = ?1 ORDER BY rowid",
                )?;
                let entries = stmt
                    .query_map(params![partition], |row| {
                        Ok(EntrySummary {
                            key: row.get(0)?,
                            method: row.get(1)?,
                            url: row.get(2)?,
                            status: row.get(3)?,
                            size: row.get::<_, i64>(4)? as u64,
                            captured_at: row.get(5)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(entries)
            })
            .await
            .map_err(Error::from)
    }

    /// Every partition with its entry count, in creation order.
    pub async fn partition_stats(&self) -> Result<Vec<PartitionStat>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<PartitionStat>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT p.name, p.created_at, COUNT(e.key)
                     FROM partitions p LEFT JOIN entries e ON e.partition = p.name
                     GROUP BY p.name ORDER BY p.rowid",
                )?;
                let stats = stmt
                    .query_map([], |row| {
                        Ok(PartitionStat {
                            name: row.get(0)?,
                            created_at: row.get(1)?,
                            entries: row.get::<_, i64>(2)? as u64,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }
}
