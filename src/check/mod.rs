//! Quota Checks
//!
//! A check measures current usage of one resource type and the maximum the
//! provider allows for it, at a fixed [`Scope`].
//!
//! # Architecture
//!
//! - [`QuotaCheck`] - a check variant: static declaration plus how to measure it
//! - [`Check`] - one instantiated check for a run, optionally bound to an instance
//! - [`registry`] - every variant, sorted by key, and key selection
//! - [`resolve`] - fan-out of instance-scoped variants into one check per instance
//!
//! Variants live in [`network`], [`compute`] and [`gke`].

#[macro_use]
mod macros;

pub mod compute;
pub mod gke;
pub mod network;
pub mod registry;
pub mod resolve;

pub use registry::{registry, Registry, SelectionError};
pub use resolve::{expand, EnumerationFailure, Expansion};

use crate::quota::{lookup_maximum, QuotaError};
use crate::session::Session;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Granularity a quota applies at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// The whole project
    Account,
    /// One region of the project
    Region,
    /// One specific resource
    Instance,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Account => "ACCOUNT",
            Scope::Region => "REGION",
            Scope::Instance => "INSTANCE",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the maximum of a check comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Queried from the quota source
    Quota {
        service_code: &'static str,
        quota_code: &'static str,
    },
    /// A documented limit the provider does not expose through any API
    Override(u64),
    /// Reported by the same document the usage is read from
    Reported,
}

/// Identifier of the resource an instance-scoped check targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceId {
    /// A single name or URL
    Scalar(String),
    /// Named dimensions, for resources nested in other resources
    Composite(BTreeMap<String, String>),
}

impl InstanceId {
    pub fn scalar(id: impl Into<String>) -> Self {
        InstanceId::Scalar(id.into())
    }

    pub fn composite<K, V>(dimensions: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        InstanceId::Composite(
            dimensions
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The named dimension of a composite id; scalar ids have none
    pub fn get(&self, dimension: &str) -> Option<&str> {
        match self {
            InstanceId::Scalar(_) => None,
            InstanceId::Composite(dimensions) => dimensions.get(dimension).map(String::as_str),
        }
    }

    /// Whether this id has the shape a variant declares: a scalar for no
    /// dimensions, otherwise exactly the named dimensions
    pub fn matches_shape(&self, dimensions: &[&str]) -> bool {
        match self {
            InstanceId::Scalar(_) => dimensions.is_empty(),
            InstanceId::Composite(present) => {
                present.len() == dimensions.len() && dimensions.iter().all(|d| present.contains_key(*d))
            },
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceId::Scalar(id) => f.write_str(id),
            InstanceId::Composite(dimensions) => {
                let pairs: Vec<String> = dimensions
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                f.write_str(&pairs.join(","))
            },
        }
    }
}

impl FromStr for InstanceId {
    type Err = anyhow::Error;

    /// `name` parses as a scalar id, `k=v,k=v` as a composite one
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("instance id must not be empty");
        }
        if !s.contains('=') {
            return Ok(InstanceId::scalar(s));
        }

        let mut dimensions = BTreeMap::new();
        for pair in s.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                anyhow::bail!("invalid dimension {:?}, expected key=value", pair);
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                anyhow::bail!("invalid dimension {:?}, expected key=value", pair);
            }
            dimensions.insert(key.to_string(), value.to_string());
        }

        Ok(InstanceId::Composite(dimensions))
    }
}

/// Why a check could not produce a value
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The targeted resource vanished between enumeration and measurement
    #[error("check {key} could not find instance with ID \"{instance_id}\"")]
    InstanceNotFound {
        key: &'static str,
        instance_id: InstanceId,
    },

    /// The usage signal only exists outside this tool
    #[error("check {key} is not measurable: {reason}")]
    MeasurementUnavailable {
        key: &'static str,
        reason: &'static str,
    },

    /// The check was handed an instance id that does not fit its variant
    #[error("check {key} got an invalid instance id: {reason}")]
    InvalidInstance {
        key: &'static str,
        reason: String,
    },

    #[error("quota lookup for {service_code}/{quota_code} failed")]
    QuotaLookupFailed {
        service_code: String,
        quota_code: String,
        #[source]
        source: QuotaError,
    },

    #[error(transparent)]
    Fetch(#[from] anyhow::Error),
}

/// A check variant
///
/// Implementations are stateless unit structs registered in [`registry`].
/// `current` and `maximum` are independent computations; every API read they
/// perform should go through [`crate::resource`] so repeated reads within a
/// run hit the run cache.
#[async_trait]
pub trait QuotaCheck: Send + Sync {
    /// Process-unique key used for selection and reporting
    fn key(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn scope(&self) -> Scope;

    fn limit(&self) -> Limit;

    /// What the instance identifier names, for instance-scoped variants
    fn instance_label(&self) -> Option<&'static str> {
        None
    }

    /// Dimensions of a composite instance id; empty when the id is a scalar
    fn dimensions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Current usage
    async fn current(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError>;

    /// Maximum allowed usage
    async fn maximum(&self, session: &Session, instance: Option<&InstanceId>) -> Result<u64, CheckError> {
        let _ = instance;
        match self.limit() {
            Limit::Override(value) => Ok(value),
            Limit::Quota {
                service_code,
                quota_code,
            } => lookup_maximum(session.quotas(), service_code, quota_code).await,
            Limit::Reported => Err(CheckError::Fetch(anyhow::anyhow!(
                "check {} reports its own limit but does not read it",
                self.key()
            ))),
        }
    }

    /// Every instance currently eligible for this check (instance scope only)
    async fn identifiers(&self, session: &Session) -> anyhow::Result<Vec<InstanceId>> {
        let _ = session;
        Ok(Vec::new())
    }
}

/// The instance a check is bound to
///
/// [`Check`] only binds well-shaped ids, so `InvalidInstance` here means a
/// variant was called directly with the wrong arguments.
pub(crate) fn require_instance<'a>(
    key: &'static str,
    instance: Option<&'a InstanceId>,
) -> Result<&'a InstanceId, CheckError> {
    instance.ok_or_else(|| CheckError::InvalidInstance {
        key,
        reason: "an instance id is required".to_string(),
    })
}

/// The named dimension of a composite instance id
pub(crate) fn dimension<'a>(
    key: &'static str,
    instance: &'a InstanceId,
    name: &str,
) -> Result<&'a str, CheckError> {
    instance.get(name).ok_or_else(|| CheckError::InvalidInstance {
        key,
        reason: format!("{:?} has no {} dimension", instance.to_string(), name),
    })
}

/// One check of a run: a variant, bound to an instance when instance-scoped
#[derive(Clone)]
pub struct Check {
    variant: &'static dyn QuotaCheck,
    instance_id: Option<InstanceId>,
}

impl Check {
    /// Instantiate an account or region scoped variant
    pub fn new(variant: &'static dyn QuotaCheck) -> anyhow::Result<Self> {
        Self::bind(variant, None)
    }

    /// Instantiate an instance-scoped variant for one instance
    pub fn for_instance(variant: &'static dyn QuotaCheck, instance_id: InstanceId) -> anyhow::Result<Self> {
        Self::bind(variant, Some(instance_id))
    }

    fn bind(variant: &'static dyn QuotaCheck, instance_id: Option<InstanceId>) -> anyhow::Result<Self> {
        match (variant.scope(), &instance_id) {
            (Scope::Instance, None) => {
                anyhow::bail!("check {} is instance scoped and needs an instance id", variant.key())
            },
            (Scope::Account | Scope::Region, Some(_)) => {
                anyhow::bail!("check {} is not instance scoped", variant.key())
            },
            (Scope::Instance, Some(id)) if !id.matches_shape(variant.dimensions()) => {
                anyhow::bail!(
                    "invalid instance id {:?} for {}, expected {}",
                    id.to_string(),
                    variant.key(),
                    variant.instance_label().unwrap_or("a single name")
                )
            },
            _ => Ok(Self {
                variant,
                instance_id,
            }),
        }
    }

    pub fn key(&self) -> &'static str {
        self.variant.key()
    }

    pub fn description(&self) -> &'static str {
        self.variant.description()
    }

    pub fn scope(&self) -> Scope {
        self.variant.scope()
    }

    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.instance_id.as_ref()
    }

    pub async fn current(&self, session: &Session) -> Result<u64, CheckError> {
        self.variant.current(session, self.instance_id.as_ref()).await
    }

    pub async fn maximum(&self, session: &Session) -> Result<u64, CheckError> {
        self.variant.maximum(session, self.instance_id.as_ref()).await
    }

    /// Scope-qualified label: project, project/region or project/region/instance
    pub fn label(&self, session: &Session) -> String {
        match (self.scope(), &self.instance_id) {
            (Scope::Account, _) => session.project_id().to_string(),
            (Scope::Region, _) | (Scope::Instance, None) => {
                format!("{}/{}", session.project_id(), session.region())
            },
            (Scope::Instance, Some(id)) => {
                format!("{}/{}/{}", session.project_id(), session.region(), id)
            },
        }
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("key", &self.key())
            .field("instance_id", &self.instance_id)
            .finish()
    }
}
