//! Quota Limits
//!
//! Where the maximum of a check comes from when the provider exposes it as a
//! queryable quota. A project either carries an explicit override for a quota
//! or runs with the provider default; lookups fall back from the former to
//! the latter.

mod service_usage;

pub use service_usage::ServiceUsageQuotas;

use crate::check::CheckError;
use async_trait::async_trait;

/// Failure of a single quota lookup
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// The project has no explicit value for this quota
    #[error("no project-specific value for quota {service_code}/{quota_code}")]
    NoSuchResource {
        service_code: String,
        quota_code: String,
    },

    /// The quota document exists but does not carry the requested value
    #[error("quota {service_code}/{quota_code} has no {field}")]
    Missing {
        service_code: String,
        quota_code: String,
        field: &'static str,
    },

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// A source of quota limits for the session project
#[async_trait]
pub trait QuotaSource: Send + Sync {
    /// The value applied to this project, if it differs from the default
    async fn get_account_quota(&self, service_code: &str, quota_code: &str) -> Result<u64, QuotaError>;

    /// The provider's documented default value
    async fn get_default_quota(&self, service_code: &str, quota_code: &str) -> Result<u64, QuotaError>;
}

/// Resolve the maximum for a quota: the project's own value, else the default
pub async fn lookup_maximum(
    source: &dyn QuotaSource,
    service_code: &str,
    quota_code: &str,
) -> Result<u64, CheckError> {
    let failed = |source: QuotaError| CheckError::QuotaLookupFailed {
        service_code: service_code.to_string(),
        quota_code: quota_code.to_string(),
        source,
    };

    match source.get_account_quota(service_code, quota_code).await {
        Ok(value) => Ok(value),
        Err(QuotaError::NoSuchResource { .. }) => {
            tracing::debug!(
                "No override for {}/{}, using default quota",
                service_code,
                quota_code
            );
            source
                .get_default_quota(service_code, quota_code)
                .await
                .map_err(failed)
        },
        Err(err) => Err(failed(err)),
    }
}
