//! Check Registry
//!
//! Explicit registration table of every check variant and the selection
//! syntax used on the command line.

use super::{compute, gke, network, QuotaCheck, Scope};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Selection keyword for every registered check
pub const ALL: &str = "all";

/// Every check variant, in no particular order
static CHECKS: &[&dyn QuotaCheck] = &[
    // Network
    &network::NetworkCount,
    &network::FirewallCount,
    &network::RouteCount,
    &network::SubnetworkCount,
    &network::PeeringsPerNetwork,
    &network::SubnetRangesPerNetwork,
    &network::InstancesPerNetwork,
    // Compute
    &compute::HealthCheckCount,
    &compute::BackendServiceCount,
    &compute::SslCertificateCount,
    &compute::UrlMapCount,
    &compute::SnapshotCount,
    &compute::ImageCount,
    &compute::InstanceCount,
    &compute::StaticAddressCount,
    &compute::CpuCount,
    &compute::DiskTotalGb,
    &compute::ComputeReadRequestRate,
    // GKE
    &gke::ClustersPerZone,
    &gke::NodePoolsPerCluster,
    &gke::NodesPerCluster,
    &gke::NodesPerNodePool,
];

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The registry of built-in checks
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry::new(CHECKS.to_vec()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("unknown check key: {0} (run list-checks for available keys)")]
    UnknownKey(String),

    #[error("selection {0:?} matches no checks")]
    Empty(String),
}

/// Check variants sorted by key
pub struct Registry {
    checks: Vec<&'static dyn QuotaCheck>,
}

impl Registry {
    pub fn new(mut checks: Vec<&'static dyn QuotaCheck>) -> Self {
        checks.sort_by_key(|c| c.key());
        Self { checks }
    }

    pub fn all(&self) -> &[&'static dyn QuotaCheck] {
        &self.checks
    }

    /// Variants that fan out into one check per instance
    pub fn instance_scoped(&self) -> impl Iterator<Item = &'static dyn QuotaCheck> + '_ {
        self.checks
            .iter()
            .copied()
            .filter(|c| c.scope() == Scope::Instance)
    }

    pub fn get(&self, key: &str) -> Option<&'static dyn QuotaCheck> {
        self.checks.iter().copied().find(|c| c.key() == key)
    }

    /// Resolve a selection such as `network_count,route_count` or `all,!cpu_count`
    ///
    /// `all` selects every check in key order; explicit keys keep the order
    /// they were given in. Keys prefixed with `!` are excluded either way.
    pub fn select(&self, expr: &str) -> Result<Vec<&'static dyn QuotaCheck>, SelectionError> {
        let mut wanted = Vec::new();
        let mut excluded = HashSet::new();
        let mut everything = false;

        for token in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(key) = token.strip_prefix('!') {
                let key = key.trim();
                self.get(key)
                    .ok_or_else(|| SelectionError::UnknownKey(key.to_string()))?;
                excluded.insert(key);
            } else if token == ALL {
                everything = true;
            } else {
                let check = self
                    .get(token)
                    .ok_or_else(|| SelectionError::UnknownKey(token.to_string()))?;
                wanted.push(check);
            }
        }

        let candidates = if everything { self.checks.clone() } else { wanted };

        let mut seen = HashSet::new();
        let selected: Vec<_> = candidates
            .into_iter()
            .filter(|c| !excluded.contains(c.key()) && seen.insert(c.key()))
            .collect();

        if selected.is_empty() {
            return Err(SelectionError::Empty(expr.to_string()));
        }

        Ok(selected)
    }
}
