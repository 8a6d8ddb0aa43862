//! Compute Engine checks
//!
//! Project and region resources carry a `quotas` summary with both the
//! usage and the limit of each metric; checks reading those report their own
//! limit. Checks without such a summary count the listed resources against
//! Service Usage quotas.

use super::{CheckError, InstanceId, Limit, QuotaCheck, Scope};
use crate::gcp::auth::region_of_zone;
use crate::resource::{self, short_name, str_field, summary_quota, ComputeList, SummaryQuota};
use crate::session::Session;
use async_trait::async_trait;

listing_quota_check! {
    HealthCheckCount {
        key: "health_check_count",
        description: "Health checks per project",
        list: ComputeList::Global("healthChecks"),
        quota: ("compute.googleapis.com", "health_checks/project"),
    }
}

listing_quota_check! {
    BackendServiceCount {
        key: "backend_service_count",
        description: "Global backend services per project",
        list: ComputeList::Global("backendServices"),
        quota: ("compute.googleapis.com", "backend_services/project"),
    }
}

listing_quota_check! {
    SslCertificateCount {
        key: "ssl_certificate_count",
        description: "SSL certificates per project",
        list: ComputeList::Global("sslCertificates"),
        quota: ("compute.googleapis.com", "ssl_certificates/project"),
    }
}

listing_quota_check! {
    UrlMapCount {
        key: "url_map_count",
        description: "URL maps per project",
        list: ComputeList::Global("urlMaps"),
        quota: ("compute.googleapis.com", "url_maps/project"),
    }
}

summary_check! {
    SnapshotCount {
        key: "snapshot_count",
        description: "Disk snapshots per project",
        scope: Account,
        metric: "SNAPSHOTS",
    }
}

summary_check! {
    ImageCount {
        key: "image_count",
        description: "Custom images per project",
        scope: Account,
        metric: "IMAGES",
    }
}

summary_check! {
    CpuCount {
        key: "cpu_count",
        description: "vCPUs per region",
        scope: Region,
        metric: "CPUS",
    }
}

summary_check! {
    DiskTotalGb {
        key: "disk_total_gb",
        description: "Persistent disk GB per region",
        scope: Region,
        metric: "DISKS_TOTAL_GB",
    }
}

/// Look up `metric` in the project (account scope) or region quota summary
pub(crate) async fn summary(session: &Session, scope: Scope, metric: &str) -> Result<SummaryQuota, CheckError> {
    let doc = match scope {
        Scope::Region => resource::region_summary(session).await?,
        _ => resource::project_summary(session).await?,
    };

    summary_quota(&doc, metric).ok_or_else(|| {
        CheckError::Fetch(anyhow::anyhow!(
            "{} quota summary has no {} metric",
            scope.as_str().to_lowercase(),
            metric
        ))
    })
}

pub struct InstanceCount;

#[async_trait]
impl QuotaCheck for InstanceCount {
    fn key(&self) -> &'static str {
        "instance_count"
    }

    fn description(&self) -> &'static str {
        "VM instances per region"
    }

    fn scope(&self) -> Scope {
        Scope::Region
    }

    fn limit(&self) -> Limit {
        Limit::Reported
    }

    async fn current(&self, session: &Session, _instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let instances = resource::instances(session).await?;
        let in_region = instances
            .iter()
            .filter(|vm| region_of_zone(short_name(str_field(vm, "zone"))) == session.region())
            .count();

        Ok(in_region as u64)
    }

    async fn maximum(&self, session: &Session, _instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        Ok(summary(session, Scope::Region, "INSTANCES").await?.limit)
    }
}

pub struct StaticAddressCount;

#[async_trait]
impl QuotaCheck for StaticAddressCount {
    fn key(&self) -> &'static str {
        "static_address_count"
    }

    fn description(&self) -> &'static str {
        "External static IP addresses per region"
    }

    fn scope(&self) -> Scope {
        Scope::Region
    }

    fn limit(&self) -> Limit {
        Limit::Reported
    }

    async fn current(&self, session: &Session, _instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let addresses = resource::compute_list(session, ComputeList::Regional("addresses")).await?;
        // addressType defaults to EXTERNAL when omitted
        let external = addresses
            .iter()
            .filter(|a| matches!(str_field(a, "addressType"), "" | "EXTERNAL"))
            .count();

        Ok(external as u64)
    }

    async fn maximum(&self, session: &Session, _instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        Ok(summary(session, Scope::Region, "STATIC_ADDRESSES").await?.limit)
    }
}

/// Read request rate against the Compute Engine API
///
/// The per-minute request counters are only exposed through Cloud
/// Monitoring, so this check is always reported as skipped.
pub struct ComputeReadRequestRate;

#[async_trait]
impl QuotaCheck for ComputeReadRequestRate {
    fn key(&self) -> &'static str {
        "compute_read_request_rate"
    }

    fn description(&self) -> &'static str {
        "Compute Engine read requests per minute per region"
    }

    fn scope(&self) -> Scope {
        Scope::Region
    }

    fn limit(&self) -> Limit {
        Limit::Quota {
            service_code: "compute.googleapis.com",
            quota_code: "read_requests/min/project/region",
        }
    }

    async fn current(&self, _session: &Session, _instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        Err(CheckError::MeasurementUnavailable {
            key: self.key(),
            reason: "request rates are only available from Cloud Monitoring",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_checks_report_their_limit() {
        for check in [&SnapshotCount as &dyn QuotaCheck, &ImageCount, &CpuCount, &DiskTotalGb] {
            assert_eq!(check.limit(), Limit::Reported, "{}", check.key());
        }
        assert_eq!(SnapshotCount.scope(), Scope::Account);
        assert_eq!(CpuCount.scope(), Scope::Region);
    }
}
