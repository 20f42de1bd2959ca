//! Position cache over an external key-value store.
//!
//! Keys are identity triples rendered as `org:vehicle:device`; values are
//! JSON-encoded [`CacheEntry`] documents written with an expiry. Eviction is
//! left entirely to the store's TTL handling.
//!
//! Fleet-wide reads walk the keyspace with cursor-based SCAN. A SCAN may take
//! many rounds and may repeat keys across rounds, so [`KeyPages`] exposes the
//! rounds as a finite, restartable page sequence and [`scan_keys`] drains it
//! into a de-duplicated key list.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::CacheEntry;

// ---

/// One SCAN round: the cursor to resume from (`0` when exhausted) and the
/// keys it produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Raw key-value operations. Nothing here touches the location store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Full replace of `key` with an expiry of `ttl_secs`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Run one SCAN round starting at `cursor` (`0` starts a new scan).
    async fn scan_page(&self, pattern: &str, cursor: u64) -> Result<ScanPage>;

    /// Values positionally aligned with `keys`; missing keys yield `None`.
    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
}

/// Lazy sequence of SCAN pages for one pattern.
pub struct KeyPages<'a> {
    cache: &'a dyn PositionCache,
    pattern: String,
    cursor: u64,
    exhausted: bool,
}

impl<'a> KeyPages<'a> {
    pub fn new(cache: &'a dyn PositionCache, pattern: impl Into<String>) -> Self {
        Self {
            cache,
            pattern: pattern.into(),
            cursor: 0,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` once the store reported completion.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>> {
        // ---
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .cache
            .scan_page(&self.pattern, self.cursor)
            .await
            .with_context(|| format!("SCAN {} MATCH {}", self.cursor, self.pattern))?;

        self.cursor = page.cursor;
        self.exhausted = page.cursor == 0;
        Ok(Some(page.keys))
    }

    /// Start over from cursor 0.
    #[cfg(test)]
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.exhausted = false;
    }
}

/// Drain every page for `pattern`, keeping the first occurrence of each key.
pub async fn scan_keys(cache: &dyn PositionCache, pattern: &str) -> Result<Vec<String>> {
    // ---
    let mut pages = KeyPages::new(cache, pattern);
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    let mut rounds = 0u32;

    while let Some(page) = pages.next_page().await? {
        rounds += 1;
        for key in page {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }

    debug!(pattern, rounds, found = keys.len(), "scan complete");
    Ok(keys)
}

/// Read and decode one entry.
pub async fn read_entry(cache: &dyn PositionCache, key: &str) -> Result<Option<CacheEntry>> {
    // ---
    match cache.get(key).await.with_context(|| format!("GET {key}"))? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .with_context(|| format!("decode cached value for {key}")),
        None => Ok(None),
    }
}

/// Encode and store one entry, replacing whatever was there.
pub async fn write_entry(
    cache: &dyn PositionCache,
    key: &str,
    entry: &CacheEntry,
    ttl_secs: u64,
) -> Result<()> {
    // ---
    let value = serde_json::to_string(entry)?;
    cache
        .set_with_ttl(key, &value, ttl_secs)
        .await
        .with_context(|| format!("SET {key} EX {ttl_secs}"))
}

/// Decode a batch value; undecodable values are treated like expired ones.
pub fn decode_entry(key: &str, raw: Option<String>) -> Option<CacheEntry> {
    // ---
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(key, error = %e, "discarding undecodable cache value");
            None
        }
    }
}

/// Redis-backed [`PositionCache`].
///
/// `ConnectionManager` reconnects on its own and is cheap to clone, so each
/// call works on a clone instead of holding a lock.
#[derive(Clone)]
pub struct RedisPositionCache {
    conn: ConnectionManager,
    scan_count: u32,
}

impl RedisPositionCache {
    pub fn new(conn: ConnectionManager, scan_count: u32) -> Self {
        Self { conn, scan_count }
    }
}

#[async_trait]
impl PositionCache for RedisPositionCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan_page(&self, pattern: &str, cursor: u64) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(self.scan_count)
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        // ---
        // MGET with no arguments is a protocol error
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }
}
