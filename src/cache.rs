//! Response cache for catalog pages.
//!
//! Keyed by request identity (URL plus serialized query parameters). Staleness
//! is coarse hygiene only: a stale category page is still a usable page, so
//! `get` ignores age and eviction runs once per process start.

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, saturating at zero for clocks before 1970.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Build the cache key for a request: the URL followed by its parameters in
/// the order given.
pub fn cache_key(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{url}#{query}")
}

/// Key-value store of fetched catalog responses.
#[derive(Debug, Clone, Copy)]
pub struct ResponseCache<'c> {
    conn: &'c Connection,
}

impl<'c> ResponseCache<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Most recent content stored under `key`. Never touches the network.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT content FROM url_cache WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read cache entry {key}"))
    }

    /// Upsert `content` under `key`, refreshing its timestamp.
    pub fn put(&self, key: &str, content: &str) -> Result<()> {
        self.put_at(key, content, unix_now())
    }

    /// Upsert with an explicit `last_updated` timestamp (unix seconds).
    pub fn put_at(&self, key: &str, content: &str, last_updated: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO url_cache (key, content, last_updated) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET content = excluded.content,
                                                last_updated = excluded.last_updated",
                params![key, content, last_updated],
            )
            .with_context(|| format!("Failed to store cache entry {key}"))?;
        debug!("Cached {key}");
        Ok(())
    }

    /// Delete every entry last updated before `now - horizon`. Returns the
    /// number of entries removed.
    pub fn evict_older_than(&self, horizon: Duration) -> Result<usize> {
        let cutoff = unix_now().saturating_sub(horizon.as_secs() as i64);
        let removed = self
            .conn
            .execute("DELETE FROM url_cache WHERE last_updated < ?1", [cutoff])
            .context("Failed to sweep stale cache entries")?;
        info!("Evicted {removed} cache entries older than {} days", horizon.as_secs() / 86_400);
        Ok(removed)
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM url_cache", [], |row| row.get(0))
            .context("Failed to count cache entries")?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
