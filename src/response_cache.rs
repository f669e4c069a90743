//! Cache-aside store for upstream responses, keyed by the full request URL.
//!
//! Entries are served verbatim until their TTL runs out, error statuses
//! included. Nothing is revalidated or invalidated early.

use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

struct Entry {
    stored_at: Instant,
    response: CachedResponse,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup_at(&self, url: &str, now: Instant) -> Option<CachedResponse> {
        let entries = self.entries.lock().await;
        entries
            .get(url)
            .filter(|e| now.saturating_duration_since(e.stored_at) < self.ttl)
            .map(|e| e.response.clone())
    }

    pub async fn store_at(&self, url: &str, response: CachedResponse, now: Instant) {
        let mut entries = self.entries.lock().await;
        // Expired entries are only ever replaced, so sweep them on write.
        entries.retain(|_, e| now.saturating_duration_since(e.stored_at) < self.ttl);
        entries.insert(
            url.to_string(),
            Entry {
                stored_at: now,
                response,
            },
        );
    }

    /// Returns the cached response for `url`, or performs a GET and caches
    /// whatever status and body came back.
    pub async fn get_or_fetch(
        &self,
        client: &Client,
        url: &str,
    ) -> Result<CachedResponse, reqwest::Error> {
        if let Some(hit) = self.lookup_at(url, Instant::now()).await {
            tracing::debug!(url, "cache hit");
            return Ok(hit);
        }

        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!(url, status, "cache miss, fetched upstream");

        let fresh = CachedResponse { status, body };
        self.store_at(url, fresh.clone(), Instant::now()).await;
        Ok(fresh)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> CachedResponse {
        CachedResponse {
            status,
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn serves_stored_body_within_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(120));
        let t0 = Instant::now();
        cache.store_at("http://x/a", response(200, "{\"ok\":1}"), t0).await;

        let hit = cache.lookup_at("http://x/a", t0 + Duration::from_secs(119)).await;
        assert_eq!(hit, Some(response(200, "{\"ok\":1}")));
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(120));
        let t0 = Instant::now();
        cache.store_at("http://x/a", response(200, "a"), t0).await;

        assert!(cache.lookup_at("http://x/a", t0 + Duration::from_secs(120)).await.is_none());
    }

    #[tokio::test]
    async fn error_responses_are_cached_too() {
        let cache = ResponseCache::default();
        let t0 = Instant::now();
        cache.store_at("http://x/b", response(503, "down"), t0).await;

        let hit = cache.lookup_at("http://x/b", t0 + Duration::from_secs(1)).await.unwrap();
        assert_eq!(hit.status, 503);
        assert!(!hit.is_success());
    }

    #[tokio::test]
    async fn keys_are_full_urls() {
        let cache = ResponseCache::default();
        let t0 = Instant::now();
        cache.store_at("http://x/h?fsym=ETH&limit=24", response(200, "eth"), t0).await;

        assert!(cache.lookup_at("http://x/h?fsym=ETH&limit=48", t0).await.is_none());
        assert!(cache.lookup_at("http://x/h?fsym=ETH&limit=24", t0).await.is_some());
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries() {
        let cache = ResponseCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.store_at("old", response(200, "1"), t0).await;
        cache.store_at("new", response(200, "2"), t0 + Duration::from_secs(11)).await;

        assert_eq!(cache.len().await, 1);
    }
}
