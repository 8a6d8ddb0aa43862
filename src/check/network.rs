//! VPC network checks

use super::{require_instance, CheckError, InstanceId, Limit, QuotaCheck, Scope};
use crate::resource::{self, short_name, str_field, ComputeList};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;

listing_quota_check! {
    NetworkCount {
        key: "network_count",
        description: "VPC networks per project",
        list: ComputeList::Global("networks"),
        quota: ("compute.googleapis.com", "networks/project"),
    }
}

listing_quota_check! {
    FirewallCount {
        key: "firewall_count",
        description: "Firewall rules per project",
        list: ComputeList::Global("firewalls"),
        quota: ("compute.googleapis.com", "firewalls/project"),
    }
}

listing_quota_check! {
    RouteCount {
        key: "route_count",
        description: "Routes per project",
        list: ComputeList::Global("routes"),
        quota: ("compute.googleapis.com", "routes/project"),
    }
}

listing_quota_check! {
    SubnetworkCount {
        key: "subnetwork_count",
        description: "Subnetworks per project",
        list: ComputeList::Aggregated("subnetworks"),
        quota: ("compute.googleapis.com", "subnetworks/project"),
    }
}

/// The network named by `instance`, or `InstanceNotFound`
async fn find_network(
    session: &Session,
    key: &'static str,
    instance: &InstanceId,
) -> Result<Value, CheckError> {
    let name = instance.to_string();
    let networks = resource::networks(session).await?;

    networks
        .iter()
        .find(|n| str_field(n, "name") == name)
        .cloned()
        .ok_or_else(|| CheckError::InstanceNotFound {
            key,
            instance_id: instance.clone(),
        })
}

/// Names of every network of the project
async fn network_ids(session: &Session) -> anyhow::Result<Vec<InstanceId>> {
    let networks = resource::networks(session).await?;
    Ok(networks
        .iter()
        .map(|n| str_field(n, "name"))
        .filter(|name| !name.is_empty())
        .map(InstanceId::scalar)
        .collect())
}

/// Whether a resource's `network` URL points at `network`
fn attached_to(item: &Value, network: &str) -> bool {
    short_name(str_field(item, "network")) == network
}

pub struct PeeringsPerNetwork;

#[async_trait]
impl QuotaCheck for PeeringsPerNetwork {
    fn key(&self) -> &'static str {
        "peerings_per_network"
    }

    fn description(&self) -> &'static str {
        "Active peerings per VPC network"
    }

    fn scope(&self) -> Scope {
        Scope::Instance
    }

    fn limit(&self) -> Limit {
        Limit::Override(25)
    }

    fn instance_label(&self) -> Option<&'static str> {
        Some("network name")
    }

    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let instance = require_instance(self.key(), instance)?;
        let network = find_network(session, self.key(), instance).await?;

        let active = network
            .get("peerings")
            .and_then(|p| p.as_array())
            .map(|peerings| {
                peerings
                    .iter()
                    .filter(|p| str_field(p, "state") == "ACTIVE")
                    .count()
            })
            .unwrap_or(0);

        Ok(active as u64)
    }

    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        network_ids(session).await
    }
}

pub struct SubnetRangesPerNetwork;

#[async_trait]
impl QuotaCheck for SubnetRangesPerNetwork {
    fn key(&self) -> &'static str {
        "subnet_ranges_per_network"
    }

    fn description(&self) -> &'static str {
        "Primary and secondary subnet ranges per VPC network"
    }

    fn scope(&self) -> Scope {
        Scope::Instance
    }

    fn limit(&self) -> Limit {
        Limit::Override(300)
    }

    fn instance_label(&self) -> Option<&'static str> {
        Some("network name")
    }

    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let instance = require_instance(self.key(), instance)?;
        let network = find_network(session, self.key(), instance).await?;
        let name = str_field(&network, "name");

        let subnetworks = resource::subnetworks(session).await?;
        let ranges: usize = subnetworks
            .iter()
            .filter(|s| attached_to(s, name))
            .map(|s| {
                let secondary = s
                    .get("secondaryIpRanges")
                    .and_then(|r| r.as_array())
                    .map_or(0, Vec::len);
                1 + secondary
            })
            .sum();

        Ok(ranges as u64)
    }

    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        network_ids(session).await
    }
}

pub struct InstancesPerNetwork;

#[async_trait]
impl QuotaCheck for InstancesPerNetwork {
    fn key(&self) -> &'static str {
        "instances_per_network"
    }

    fn description(&self) -> &'static str {
        "VM instances per VPC network"
    }

    fn scope(&self) -> Scope {
        Scope::Instance
    }

    fn limit(&self) -> Limit {
        Limit::Override(15_000)
    }

    fn instance_label(&self) -> Option<&'static str> {
        Some("network name")
    }

    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let instance = require_instance(self.key(), instance)?;
        let network = find_network(session, self.key(), instance).await?;
        let name = str_field(&network, "name");

        let instances = resource::instances(session).await?;
        let attached = instances
            .iter()
            .filter(|vm| {
                vm.get("networkInterfaces")
                    .and_then(|n| n.as_array())
                    .is_some_and(|nics| nics.iter().any(|nic| attached_to(nic, name)))
            })
            .count();

        Ok(attached as u64)
    }

    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        network_ids(session).await
    }
}
