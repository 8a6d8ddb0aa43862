//! Run Cache
//!
//! Time-bounded memoization of API reads shared by every check in a run.
//! Entries are keyed by the operation name and its identifying parameters,
//! never by the client that performed the call, so identical reads from
//! unrelated checks collapse into one request.

use anyhow::Result;
use moka::future::Cache;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// TTL for volatile resource listings
pub const LISTING_TTL: Duration = Duration::from_secs(60);
/// Sized for the largest per-resource fan-out of one project (e.g. node pools per cluster)
pub const LISTING_CAPACITY: u64 = 10_000;

/// TTL for project and region quota summaries
pub const DOCUMENT_TTL: Duration = Duration::from_secs(600);
pub const DOCUMENT_CAPACITY: u64 = 256;

/// TTL for quota limit documents
pub const QUOTA_TTL: Duration = Duration::from_secs(3600);
pub const QUOTA_CAPACITY: u64 = 1_024;

/// Identity of a cached read: operation plus identifying parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    op: &'static str,
    params: Vec<String>,
}

impl CacheKey {
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.op, self.params.join(", "))
    }
}

/// A fetch failure observed by every caller waiting on the same key
#[derive(Debug, Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&**self.0)
    }
}

/// Memoizing cache with a fixed time-to-live
#[derive(Clone)]
pub struct TtlCache<V> {
    name: &'static str,
    cache: Cache<CacheKey, V>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { name, cache }
    }

    /// Return the fresh cached value for `key`, or run `fetch` to produce it.
    ///
    /// Concurrent callers for the same key wait for the single in-flight fetch.
    /// Failed fetches are not cached.
    pub async fn get_or_fetch<F>(&self, key: CacheKey, fetch: F) -> Result<V>
    where
        F: Future<Output = Result<V>>,
    {
        let name = self.name;
        let label = key.to_string();
        let init = async move {
            tracing::debug!("cache miss [{}] {}", name, label);
            fetch.await
        };

        self.cache
            .try_get_with(key, init)
            .await
            .map_err(|err| SharedError(err).into())
    }
}

/// Caches shared by all checks of one run
#[derive(Clone)]
pub struct RunCache {
    pub listings: TtlCache<Arc<Vec<Value>>>,
    pub documents: TtlCache<Arc<Value>>,
    pub quotas: TtlCache<Arc<Value>>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::with_ttls(LISTING_TTL, DOCUMENT_TTL, QUOTA_TTL)
    }

    pub fn with_ttls(listing: Duration, document: Duration, quota: Duration) -> Self {
        Self {
            listings: TtlCache::new("listings", LISTING_CAPACITY, listing),
            documents: TtlCache::new("documents", DOCUMENT_CAPACITY, document),
            quotas: TtlCache::new("quotas", QUOTA_CAPACITY, quota),
        }
    }
}

impl Default for RunCache {
    fn default() -> Self {
        Self::new()
    }
}
