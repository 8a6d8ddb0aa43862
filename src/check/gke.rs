//! GKE checks
//!
//! Only clusters located in the session region, or in one of its zones, are
//! considered. Node counts come from the Compute Engine instances GKE labels
//! with their cluster and node pool.

use super::{dimension, require_instance, CheckError, InstanceId, Limit, QuotaCheck, Scope};
use crate::gcp::auth::region_of_zone;
use crate::gcp::http::is_not_found;
use crate::resource::{self, short_name, str_field};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

const CLUSTER_LABEL: &str = "goog-k8s-cluster-name";
const NODE_POOL_LABEL: &str = "goog-k8s-node-pool-name";

/// `us-central1-a` is a zone, `us-central1` a region
fn is_zone(location: &str) -> bool {
    location
        .rsplit_once('-')
        .is_some_and(|(_, suffix)| suffix.len() == 1 && suffix.chars().all(|c| c.is_ascii_lowercase()))
}

/// Whether `location` is the session region or one of its zones
fn in_region(location: &str, region: &str) -> bool {
    if is_zone(location) {
        region_of_zone(location) == region
    } else {
        location == region
    }
}

/// Whether a VM in `zone` belongs to a cluster at `location`
fn zone_in_location(zone: &str, location: &str) -> bool {
    zone == location || (!is_zone(location) && region_of_zone(zone) == location)
}

/// Clusters of the session region as `(location, name)`
async fn regional_clusters(session: &Session) -> anyhow::Result<Vec<(String, String)>> {
    let clusters = resource::clusters(session).await?;
    Ok(clusters
        .iter()
        .map(|c| (str_field(c, "location"), str_field(c, "name")))
        .filter(|(location, name)| !name.is_empty() && in_region(location, session.region()))
        .map(|(location, name)| (location.to_string(), name.to_string()))
        .collect())
}

/// The `{location, cluster}` dimensions of an instance id
fn cluster_of<'a>(key: &'static str, instance: &'a InstanceId) -> Result<(&'a str, &'a str), CheckError> {
    Ok((dimension(key, instance, "location")?, dimension(key, instance, "cluster")?))
}

/// Node pools of a cluster; a cluster that no longer exists is `InstanceNotFound`
async fn pools_of(
    session: &Session,
    key: &'static str,
    instance: &InstanceId,
    location: &str,
    cluster: &str,
) -> Result<std::sync::Arc<Vec<Value>>, CheckError> {
    match resource::node_pools(session, location, cluster).await {
        Ok(pools) => Ok(pools),
        Err(err) if is_not_found(&err) => Err(CheckError::InstanceNotFound {
            key,
            instance_id: instance.clone(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Count GKE nodes at `location` whose labels match every `(label, value)` pair
async fn count_nodes(session: &Session, location: &str, labels: &[(&str, &str)]) -> Result<u64, CheckError> {
    let instances = resource::instances(session).await?;
    let nodes = instances
        .iter()
        .filter(|vm| zone_in_location(short_name(str_field(vm, "zone")), location))
        .filter(|vm| {
            labels.iter().all(|(label, value)| {
                vm.get("labels")
                    .and_then(|l| l.get(*label))
                    .and_then(|v| v.as_str())
                    == Some(*value)
            })
        })
        .count();

    Ok(nodes as u64)
}

pub struct ClustersPerZone;

#[async_trait]
impl QuotaCheck for ClustersPerZone {
    fn key(&self) -> &'static str {
        "clusters_per_zone"
    }

    fn description(&self) -> &'static str {
        "GKE zonal clusters per zone"
    }

    fn scope(&self) -> Scope {
        Scope::Instance
    }

    fn limit(&self) -> Limit {
        Limit::Override(100)
    }

    fn instance_label(&self) -> Option<&'static str> {
        Some("zone")
    }

    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let zone = require_instance(self.key(), instance)?.to_string();
        let clusters = resource::clusters(session).await?;
        let count = clusters
            .iter()
            .filter(|c| str_field(c, "location") == zone)
            .count();

        Ok(count as u64)
    }

    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        let zones: BTreeSet<String> = regional_clusters(session)
            .await?
            .into_iter()
            .map(|(location, _)| location)
            .filter(|location| is_zone(location))
            .collect();

        Ok(zones.into_iter().map(InstanceId::Scalar).collect())
    }
}

pub struct NodePoolsPerCluster;

#[async_trait]
impl QuotaCheck for NodePoolsPerCluster {
    fn key(&self) -> &'static str {
        "node_pools_per_cluster"
    }

    fn description(&self) -> &'static str {
        "GKE node pools per cluster"
    }

    fn scope(&self) -> Scope {
        Scope::Instance
    }

    fn limit(&self) -> Limit {
        Limit::Override(15)
    }

    fn instance_label(&self) -> Option<&'static str> {
        Some("location=<location>,cluster=<name>")
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["location", "cluster"]
    }

    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let instance = require_instance(self.key(), instance)?;
        let (location, cluster) = cluster_of(self.key(), instance)?;
        let pools = pools_of(session, self.key(), instance, location, cluster).await?;

        Ok(pools.len() as u64)
    }

    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        Ok(regional_clusters(session)
            .await?
            .into_iter()
            .map(|(location, cluster)| InstanceId::composite([("location", location), ("cluster", cluster)]))
            .collect())
    }
}

pub struct NodesPerCluster;

#[async_trait]
impl QuotaCheck for NodesPerCluster {
    fn key(&self) -> &'static str {
        "nodes_per_cluster"
    }

    fn description(&self) -> &'static str {
        "GKE nodes per cluster"
    }

    fn scope(&self) -> Scope {
        Scope::Instance
    }

    fn limit(&self) -> Limit {
        Limit::Override(15_000)
    }

    fn instance_label(&self) -> Option<&'static str> {
        Some("location=<location>,cluster=<name>")
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["location", "cluster"]
    }

    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let instance = require_instance(self.key(), instance)?;
        let (location, cluster) = cluster_of(self.key(), instance)?;

        let clusters = resource::clusters(session).await?;
        let exists = clusters
            .iter()
            .any(|c| str_field(c, "location") == location && str_field(c, "name") == cluster);
        if !exists {
            return Err(CheckError::InstanceNotFound {
                key: self.key(),
                instance_id: instance.clone(),
            });
        }

        count_nodes(session, location, &[(CLUSTER_LABEL, cluster)]).await
    }

    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        NodePoolsPerCluster.identifiers(session).await
    }
}

pub struct NodesPerNodePool;

#[async_trait]
impl QuotaCheck for NodesPerNodePool {
    fn key(&self) -> &'static str {
        "nodes_per_node_pool"
    }

    fn description(&self) -> &'static str {
        "GKE nodes per node pool"
    }

    fn scope(&self) -> Scope {
        Scope::Instance
    }

    fn limit(&self) -> Limit {
        Limit::Override(1_000)
    }

    fn instance_label(&self) -> Option<&'static str> {
        Some("location=<location>,cluster=<name>,node_pool=<name>")
    }

    fn dimensions(&self) -> &'static [&'static str] {
        &["location", "cluster", "node_pool"]
    }

    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let instance = require_instance(self.key(), instance)?;
        let (location, cluster) = cluster_of(self.key(), instance)?;
        let node_pool = dimension(self.key(), instance, "node_pool")?;

        let pools = pools_of(session, self.key(), instance, location, cluster).await?;
        if !pools.iter().any(|p| str_field(p, "name") == node_pool) {
            return Err(CheckError::InstanceNotFound {
                key: self.key(),
                instance_id: instance.clone(),
            });
        }

        count_nodes(
            session,
            location,
            &[(CLUSTER_LABEL, cluster), (NODE_POOL_LABEL, node_pool)],
        )
        .await
    }

    /// Every node pool of every regional cluster; clusters deleted while
    /// enumerating are skipped
    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        let mut ids = Vec::new();

        for (location, cluster) in regional_clusters(session).await? {
            let pools = match resource::node_pools(session, &location, &cluster).await {
                Ok(pools) => pools,
                Err(err) if is_not_found(&err) => {
                    tracing::debug!("Cluster {}/{} disappeared, skipping", location, cluster);
                    continue;
                },
                Err(err) => return Err(err),
            };

            for pool in pools.iter() {
                let name = str_field(pool, "name");
                if name.is_empty() {
                    continue;
                }
                ids.push(InstanceId::composite([
                    ("location", location.as_str()),
                    ("cluster", cluster.as_str()),
                    ("node_pool", name),
                ]));
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_zone() {
        assert!(is_zone("us-central1-a"));
        assert!(is_zone("europe-west4-c"));
        assert!(!is_zone("us-central1"));
        assert!(!is_zone("global"));
    }

    #[test]
    fn test_in_region() {
        assert!(in_region("us-central1", "us-central1"));
        assert!(in_region("us-central1-f", "us-central1"));
        assert!(!in_region("us-east1-b", "us-central1"));
        assert!(!in_region("us-central1", "us-east1"));
    }

    #[test]
    fn test_zone_in_location() {
        assert!(zone_in_location("us-central1-a", "us-central1"));
        assert!(zone_in_location("us-central1-a", "us-central1-a"));
        assert!(!zone_in_location("us-central1-b", "us-central1-a"));
    }
}
