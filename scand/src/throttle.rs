use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

pub const DEFAULT_DELAY_SECS: f64 = 10.0;
const DEFAULT_CACHE_TTL_SECS: i64 = 86_400;
const MAX_CACHED_TEXT_BYTES: usize = 500_000;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub content_type: String,
    pub text: String,
}

/// Pluggable rate-limit backend. The fetcher is unaware which implementation
/// is in use; `InProcessBackend` serves single-node deploys and tests,
/// `RedisBackend` serves multi-node deploys.
#[async_trait::async_trait]
pub trait RateLimitBackend: Send + Sync {
    async fn wait_for_rate_limit(&self, domain: &str, delay_seconds: f64);
}

/// Pluggable response-cache backend, keyed by the URL fingerprint (the
/// leading 16 hex characters of the SHA-256 of the URL).
#[async_trait::async_trait]
pub trait ResponseCacheBackend: Send + Sync {
    async fn get_cached_response(&self, url: &str) -> Option<CachedResponse>;
    async fn cache_response(
        &self,
        url: &str,
        status_code: u16,
        cache_control: Option<&str>,
        expires: Option<&str>,
        content_type: &str,
        text: &str,
    );
}

/// `cache:<fingerprint>` key used by both Redis and in-process backends.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let hex = hex_prefix(&digest, 8);
    format!("cache:{hex}")
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes[..n].iter().map(|b| format!("{b:02x}")).collect()
}

/// Scans `Cache-Control` (lowercased, comma-split, trimmed) for `no-cache`/
/// `no-store` (→ 0), a `max-age=<int>` token (clamped ≥ 0), else falls back
/// to `Expires` parsed as an RFC 5322 date minus now (clamped ≥ 0), else the
/// default of 86400 seconds.
pub fn derive_cache_ttl_secs(cache_control: Option<&str>, expires: Option<&str>) -> i64 {
    if let Some(cc) = cache_control {
        let lower = cc.to_ascii_lowercase();
        let tokens: Vec<&str> = lower.split(',').map(|t| t.trim()).collect();
        if tokens.iter().any(|t| *t == "no-cache" || *t == "no-store") {
            return 0;
        }
        for tok in &tokens {
            if let Some(v) = tok.strip_prefix("max-age=") {
                if let Ok(n) = v.trim().parse::<i64>() {
                    return n.max(0);
                }
            }
        }
    }
    if let Some(expires) = expires {
        if let Ok(parsed) = httpdate::parse_http_date(expires) {
            let parsed: DateTime<Utc> = parsed.into();
            let delta = (parsed - Utc::now()).num_seconds();
            return delta.max(0);
        }
    }
    DEFAULT_CACHE_TTL_SECS
}

/// In-process rate-limit map guarded by a mutex, held only around reads and
/// writes; the sleep itself happens outside the lock.
#[derive(Default)]
pub struct InProcessRateLimit {
    last_grant: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InProcessRateLimit {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RateLimitBackend for InProcessRateLimit {
    async fn wait_for_rate_limit(&self, domain: &str, delay_seconds: f64) {
        let wait = {
            let mut guard = self.last_grant.lock().await;
            let now = Utc::now();
            let wait_until = match guard.get(domain) {
                Some(last) => *last + chrono::Duration::milliseconds((delay_seconds * 1000.0) as i64),
                None => now,
            };
            let wait = (wait_until - now).to_std().unwrap_or(Duration::ZERO);
            guard.insert(domain.to_string(), wait_until.max(now));
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        let mut guard = self.last_grant.lock().await;
        guard.insert(domain.to_string(), Utc::now());
    }
}

/// In-process response cache. Entries expire lazily on read.
#[derive(Default)]
pub struct InProcessResponseCache {
    entries: Mutex<HashMap<String, (DateTime<Utc>, CachedResponse)>>,
}

impl InProcessResponseCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResponseCacheBackend for InProcessResponseCache {
    async fn get_cached_response(&self, url: &str) -> Option<CachedResponse> {
        let key = cache_key(url);
        let guard = self.entries.lock().await;
        match guard.get(&key) {
            Some((expires_at, value)) if *expires_at > Utc::now() => Some(value.clone()),
            _ => None,
        }
    }

    async fn cache_response(
        &self,
        url: &str,
        status_code: u16,
        cache_control: Option<&str>,
        expires: Option<&str>,
        content_type: &str,
        text: &str,
    ) {
        let ttl = derive_cache_ttl_secs(cache_control, expires);
        if ttl <= 0 {
            return;
        }
        let mut truncated = text.as_bytes();
        if truncated.len() > MAX_CACHED_TEXT_BYTES {
            truncated = &truncated[..MAX_CACHED_TEXT_BYTES];
        }
        let text = String::from_utf8_lossy(truncated).into_owned();
        let key = cache_key(url);
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl);
        let mut guard = self.entries.lock().await;
        guard.insert(
            key,
            (
                expires_at,
                CachedResponse {
                    status_code,
                    content_type: content_type.to_string(),
                    text,
                },
            ),
        );
    }
}

/// Redis-backed implementation for multi-node deploys. Rate-limit
/// acquisition uses `SET NX PX` plus a `PTTL` poll loop on
/// `ratelimit:<domain>`; spurious `remaining <= 0` readings retry
/// immediately rather than sleeping.
pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.ok()
    }
}

#[async_trait::async_trait]
impl RateLimitBackend for RedisBackend {
    async fn wait_for_rate_limit(&self, domain: &str, delay_seconds: f64) {
        let key = format!("ratelimit:{domain}");
        let px = (delay_seconds.max(0.0) * 1000.0) as i64;
        loop {
            let Some(mut conn) = self.connection().await else {
                return;
            };
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(px)
                .query_async(&mut conn)
                .await
                .unwrap_or(None);
            if acquired.is_some() {
                return;
            }
            let remaining: i64 = redis::cmd("PTTL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .unwrap_or(0);
            if remaining <= 0 {
                continue;
            }
            tokio::time::sleep(Duration::from_millis(remaining as u64)).await;
        }
    }
}

#[async_trait::async_trait]
impl ResponseCacheBackend for RedisBackend {
    async fn get_cached_response(&self, url: &str) -> Option<CachedResponse> {
        let key = cache_key(url);
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .ok()
            .flatten();
        // Malformed JSON or a KV error returns None, never an error.
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn cache_response(
        &self,
        url: &str,
        status_code: u16,
        cache_control: Option<&str>,
        expires: Option<&str>,
        content_type: &str,
        text: &str,
    ) {
        let ttl = derive_cache_ttl_secs(cache_control, expires);
        if ttl <= 0 {
            return;
        }
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let mut truncated = text.as_bytes();
        if truncated.len() > MAX_CACHED_TEXT_BYTES {
            truncated = &truncated[..MAX_CACHED_TEXT_BYTES];
        }
        let text = String::from_utf8_lossy(truncated).into_owned();
        let value = CachedResponse {
            status_code,
            content_type: content_type.to_string(),
            text,
        };
        let Ok(payload) = serde_json::to_string(&value) else {
            return;
        };
        let key = cache_key(url);
        let _: Result<(), _> = redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await;
    }
}

/// Domain-level throttle combining a rate-limit backend and a response-cache
/// backend behind trait objects, selected once at startup based on whether a
/// shared KV URL is configured.
pub struct DomainThrottle {
    rate_limit: Arc<dyn RateLimitBackend>,
    response_cache: Arc<dyn ResponseCacheBackend>,
}

impl DomainThrottle {
    pub fn new(rate_limit: Arc<dyn RateLimitBackend>, response_cache: Arc<dyn ResponseCacheBackend>) -> Self {
        Self {
            rate_limit,
            response_cache,
        }
    }

    pub fn in_process() -> Self {
        Self::new(
            Arc::new(InProcessRateLimit::new()),
            Arc::new(InProcessResponseCache::new()),
        )
    }

    pub fn redis(redis_url: &str) -> Result<Self, redis::RedisError> {
        let backend = Arc::new(RedisBackend::new(redis_url)?);
        Ok(Self::new(backend.clone(), backend))
    }

    pub async fn wait_for_rate_limit(&self, domain: &str, delay_seconds: f64) {
        self.rate_limit.wait_for_rate_limit(domain, delay_seconds).await;
    }

    pub async fn get_cached_response(&self, url: &str) -> Option<CachedResponse> {
        self.response_cache.get_cached_response(url).await
    }

    pub async fn cache_response(
        &self,
        url: &str,
        status_code: u16,
        cache_control: Option<&str>,
        expires: Option<&str>,
        content_type: &str,
        text: &str,
    ) {
        self.response_cache
            .cache_response(url, status_code, cache_control, expires, content_type, text)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_no_cache_and_no_store_are_zero() {
        assert_eq!(derive_cache_ttl_secs(Some("no-cache"), None), 0);
        assert_eq!(derive_cache_ttl_secs(Some("public, no-store"), None), 0);
    }

    #[test]
    fn ttl_max_age_parses_regardless_of_order() {
        assert_eq!(derive_cache_ttl_secs(Some("max-age=120"), None), 120);
        assert_eq!(derive_cache_ttl_secs(Some("public, max-age=60, must-revalidate"), None), 60);
        assert_eq!(derive_cache_ttl_secs(Some("max-age=0"), None), 0);
    }

    #[test]
    fn ttl_default_is_one_day() {
        assert_eq!(derive_cache_ttl_secs(None, None), DEFAULT_CACHE_TTL_SECS);
    }

    #[tokio::test]
    async fn in_process_cache_round_trips() {
        let cache = InProcessResponseCache::new();
        cache
            .cache_response("https://x.test/doc", 200, Some("max-age=60"), None, "text/plain", "hello")
            .await;
        let got = cache.get_cached_response("https://x.test/doc").await.unwrap();
        assert_eq!(got.text, "hello");
        assert_eq!(got.status_code, 200);
    }

    #[tokio::test]
    async fn in_process_cache_skips_storage_when_ttl_zero() {
        let cache = InProcessResponseCache::new();
        cache
            .cache_response("https://x.test/doc", 200, Some("no-store"), None, "text/plain", "hello")
            .await;
        assert!(cache.get_cached_response("https://x.test/doc").await.is_none());
    }

    #[tokio::test]
    async fn rate_limit_enforces_minimum_spacing() {
        let rl = InProcessRateLimit::new();
        let start = std::time::Instant::now();
        rl.wait_for_rate_limit("example.com", 0.05).await;
        rl.wait_for_rate_limit("example.com", 0.05).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
