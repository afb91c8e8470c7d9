use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::Result;
use crate::platform::types::CheckAggregate;

/// Kind of status query a cache entry answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    CheckAggregate,
}

impl QueryKind {
    fn as_str(&self) -> &'static str {
        match self {
            QueryKind::CheckAggregate => "check-aggregate",
        }
    }
}

/// Fingerprint of (repository, ref, query kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(repo_full_name: &str, git_ref: &str, kind: QueryKind) -> Self {
        let mut hasher = Sha256::new();
        // NUL separators keep ("a/b", "c") and ("a", "b/c") apart
        hasher.update(repo_full_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(git_ref.as_bytes());
        hasher.update([0u8]);
        hasher.update(kind.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CheckAggregate,
    fetched_at: Instant,
}

/// Short-lived memoization of check-status queries.
///
/// Entries live for the TTL. Callers that must not see a value from an
/// earlier poll tick use [`CheckCache::get_since`]. Failed fetches are not cached.
pub struct CheckCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CheckCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live entry for `key`, or run `fetch` and store its result.
    pub async fn get<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<CheckAggregate>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CheckAggregate>>,
    {
        self.fetch_through(key, None, fetch).await
    }

    /// Like [`CheckCache::get`], but an entry fetched before `since` counts as stale
    /// even inside the TTL.
    pub async fn get_since<F, Fut>(
        &self,
        key: &CacheKey,
        since: Instant,
        fetch: F,
    ) -> Result<CheckAggregate>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CheckAggregate>>,
    {
        self.fetch_through(key, Some(since), fetch).await
    }

    async fn fetch_through<F, Fut>(
        &self,
        key: &CacheKey,
        since: Option<Instant>,
        fetch: F,
    ) -> Result<CheckAggregate>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CheckAggregate>>,
    {
        if let Some(hit) = self.lookup(key, since) {
            tracing::trace!(key = key.as_str(), "Check cache hit");
            return Ok(hit);
        }

        let value = fetch().await?;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(value)
    }

    fn lookup(&self, key: &CacheKey, since: Option<Instant>) -> Option<CheckAggregate> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .filter(|entry| since.map_or(true, |since| entry.fetched_at >= since))
            .map(|entry| entry.value.clone())
    }
}
