//! Run Session
//!
//! Read-only context shared by every check of a run: the API client, the
//! quota source and the run cache.

use crate::gcp::client::GcpClient;
use crate::quota::{QuotaSource, ServiceUsageQuotas};
use crate::resource::RunCache;
use std::sync::Arc;

#[derive(Clone)]
pub struct Session {
    client: GcpClient,
    quotas: Arc<dyn QuotaSource>,
    cache: RunCache,
}

impl Session {
    pub fn new(client: GcpClient) -> Self {
        Self::with_cache(client, RunCache::new())
    }

    /// Build a session around an existing cache; quota documents use its quota tier
    pub fn with_cache(client: GcpClient, cache: RunCache) -> Self {
        let quotas = Arc::new(ServiceUsageQuotas::new(client.clone(), cache.quotas.clone()));
        Self {
            client,
            quotas,
            cache,
        }
    }

    /// Replace the quota source
    pub fn with_quota_source(mut self, quotas: Arc<dyn QuotaSource>) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn client(&self) -> &GcpClient {
        &self.client
    }

    pub fn project_id(&self) -> &str {
        &self.client.project_id
    }

    pub fn region(&self) -> &str {
        &self.client.region
    }

    pub fn quotas(&self) -> &dyn QuotaSource {
        self.quotas.as_ref()
    }

    pub fn cache(&self) -> &RunCache {
        &self.cache
    }
}
