//! Resource access layer
//!
//! Every API read a check performs goes through this module so that it is
//! fetched completely and memoized for the rest of the run.
//!
//! # Architecture
//!
//! - [`fetcher`] - Fetches list results with pagination support
//! - [`cache`] - Time-bounded memoization keyed by operation and parameters
//!
//! # Example
//!
//! ```ignore
//! use gcp_quota::resource::{compute_list, ComputeList};
//!
//! async fn count_networks(session: &Session) -> anyhow::Result<usize> {
//!     Ok(compute_list(session, ComputeList::Global("networks")).await?.len())
//! }
//! ```

mod cache;
pub mod fetcher;

pub use cache::{
    CacheKey, RunCache, SharedError, TtlCache, DOCUMENT_TTL, LISTING_TTL, QUOTA_TTL,
};
pub use fetcher::{fetch_all, Items};

use crate::session::Session;
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;

/// A Compute Engine collection of the session project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeList {
    /// `global/<collection>`
    Global(&'static str),
    /// `regions/<session region>/<collection>`
    Regional(&'static str),
    /// `aggregated/<collection>` across all zones or regions
    Aggregated(&'static str),
}

impl ComputeList {
    fn op(&self) -> &'static str {
        match self {
            ComputeList::Global(_) => "compute.global",
            ComputeList::Regional(_) => "compute.regional",
            ComputeList::Aggregated(_) => "compute.aggregated",
        }
    }
}

/// List a whole Compute Engine collection, memoized for the run
pub async fn compute_list(session: &Session, list: ComputeList) -> Result<Arc<Vec<Value>>> {
    let client = session.client();
    let (key, url, items) = match list {
        ComputeList::Global(collection) => (
            CacheKey::new(list.op()).param(client.project_id.as_str()).param(collection),
            client.compute_global_url(collection),
            Items::Field("items"),
        ),
        ComputeList::Regional(collection) => (
            CacheKey::new(list.op())
                .param(client.project_id.as_str())
                .param(client.region.as_str())
                .param(collection),
            client.compute_regional_url(collection),
            Items::Field("items"),
        ),
        ComputeList::Aggregated(collection) => (
            CacheKey::new(list.op()).param(client.project_id.as_str()).param(collection),
            client.compute_aggregated_url(collection),
            Items::Aggregated(collection),
        ),
    };

    session
        .cache()
        .listings
        .get_or_fetch(key, async move { Ok(Arc::new(fetch_all(client, &url, &[], items).await?)) })
        .await
}

/// All VPC networks of the project
pub async fn networks(session: &Session) -> Result<Arc<Vec<Value>>> {
    compute_list(session, ComputeList::Global("networks")).await
}

/// All subnetworks of the project, across regions
pub async fn subnetworks(session: &Session) -> Result<Arc<Vec<Value>>> {
    compute_list(session, ComputeList::Aggregated("subnetworks")).await
}

/// All VM instances of the project, across zones
pub async fn instances(session: &Session) -> Result<Arc<Vec<Value>>> {
    compute_list(session, ComputeList::Aggregated("instances")).await
}

/// Every GKE cluster of the project, in all locations
pub async fn clusters(session: &Session) -> Result<Arc<Vec<Value>>> {
    let client = session.client();
    let key = CacheKey::new("container.clusters").param(client.project_id.as_str());
    let url = client.container_location_url("-", "clusters");

    session
        .cache()
        .listings
        .get_or_fetch(key, async move {
            Ok(Arc::new(fetch_all(client, &url, &[], Items::Field("clusters")).await?))
        })
        .await
}

/// Node pools of one cluster
pub async fn node_pools(
    session: &Session,
    location: &str,
    cluster: &str,
) -> Result<Arc<Vec<Value>>> {
    let client = session.client();
    let key = CacheKey::new("container.nodePools")
        .param(client.project_id.as_str())
        .param(location)
        .param(cluster);
    let url = client.container_location_url(location, &format!("clusters/{}/nodePools", cluster));

    session
        .cache()
        .listings
        .get_or_fetch(key, async move {
            Ok(Arc::new(fetch_all(client, &url, &[], Items::Field("nodePools")).await?))
        })
        .await
}

/// Project resource including its global quota summary
pub async fn project_summary(session: &Session) -> Result<Arc<Value>> {
    let client = session.client();
    let key = CacheKey::new("compute.project").param(client.project_id.as_str());
    let url = client.compute_project_url();

    session
        .cache()
        .documents
        .get_or_fetch(key, async move {
            let doc = client.get(&url).await.context("Failed to read project quotas")?;
            Ok(Arc::new(doc))
        })
        .await
}

/// Region resource including its regional quota summary
pub async fn region_summary(session: &Session) -> Result<Arc<Value>> {
    let client = session.client();
    let key = CacheKey::new("compute.region")
        .param(client.project_id.as_str())
        .param(client.region.as_str());
    let url = client.compute_region_url();

    session
        .cache()
        .documents
        .get_or_fetch(key, async move {
            let doc = client.get(&url).await.context("Failed to read region quotas")?;
            Ok(Arc::new(doc))
        })
        .await
}

/// One entry of a project or region `quotas` summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryQuota {
    pub limit: u64,
    pub usage: u64,
}

/// Find `metric` in the `quotas` array of a project or region resource
pub fn summary_quota(doc: &Value, metric: &str) -> Option<SummaryQuota> {
    let entry = doc
        .get("quotas")?
        .as_array()?
        .iter()
        .find(|q| q.get("metric").and_then(|m| m.as_str()) == Some(metric))?;

    let value = |field: &str| entry.get(field).and_then(|v| v.as_f64()).map(|v| v.max(0.0).round() as u64);

    Some(SummaryQuota {
        limit: value("limit")?,
        usage: value("usage").unwrap_or(0),
    })
}

/// Extract short name from GCP resource URL
/// e.g., "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a" -> "us-central1-a"
pub fn short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// String field of a resource, empty when missing
pub fn str_field<'a>(item: &'a Value, field: &str) -> &'a str {
    item.get(field).and_then(|v| v.as_str()).unwrap_or("")
}
