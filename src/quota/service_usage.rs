//! Service Usage consumer quota limits
//!
//! `quota_code` names a consumer quota limit as `<metric>/<limit path>`:
//! `networks/project` is metric `compute.googleapis.com/networks` with limit
//! `/project`, and `addresses/project/region` has one bucket per region.

use super::{QuotaError, QuotaSource};
use crate::gcp::client::GcpClient;
use crate::resource::{CacheKey, TtlCache};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Quota source backed by the Service Usage API
#[derive(Clone)]
pub struct ServiceUsageQuotas {
    client: GcpClient,
    cache: TtlCache<Arc<Value>>,
}

impl ServiceUsageQuotas {
    pub fn new(client: GcpClient, cache: TtlCache<Arc<Value>>) -> Self {
        Self { client, cache }
    }

    /// Fetch the consumer quota limit document; both lookups share it
    async fn limit_document(&self, service_code: &str, quota_code: &str) -> Result<Arc<Value>, QuotaError> {
        let Some((metric, limit)) = quota_code.split_once('/') else {
            return Err(QuotaError::Api(anyhow::anyhow!(
                "malformed quota code {:?}, expected <metric>/<limit>",
                quota_code
            )));
        };

        let metric_name = format!("{}/{}", service_code, metric);
        let limit_name = format!("/{}", limit);
        let url = self.client.serviceusage_url(
            service_code,
            &format!(
                "consumerQuotaMetrics/{}/limits/{}",
                urlencoding::encode(&metric_name),
                urlencoding::encode(&limit_name)
            ),
        );

        let key = CacheKey::new("serviceusage.limit")
            .param(self.client.project_id.as_str())
            .param(service_code)
            .param(quota_code);
        let client = &self.client;

        self.cache
            .get_or_fetch(key, async move {
                let doc = client
                    .get(&url)
                    .await
                    .with_context(|| format!("Failed to read quota limit {}", limit_name))?;
                Ok(Arc::new(doc))
            })
            .await
            .map_err(QuotaError::Api)
    }

    async fn bucket_value(
        &self,
        service_code: &str,
        quota_code: &str,
        pick: fn(&Value) -> Option<u64>,
    ) -> Result<Option<u64>, QuotaError> {
        let doc = self.limit_document(service_code, quota_code).await?;
        let bucket = select_bucket(&doc, &self.client.region).ok_or_else(|| QuotaError::Missing {
            service_code: service_code.to_string(),
            quota_code: quota_code.to_string(),
            field: "quota bucket",
        })?;

        Ok(pick(bucket))
    }
}

#[async_trait]
impl QuotaSource for ServiceUsageQuotas {
    async fn get_account_quota(&self, service_code: &str, quota_code: &str) -> Result<u64, QuotaError> {
        self.bucket_value(service_code, quota_code, override_value)
            .await?
            .ok_or_else(|| QuotaError::NoSuchResource {
                service_code: service_code.to_string(),
                quota_code: quota_code.to_string(),
            })
    }

    async fn get_default_quota(&self, service_code: &str, quota_code: &str) -> Result<u64, QuotaError> {
        self.bucket_value(service_code, quota_code, |bucket| {
            bucket.get("defaultLimit").and_then(parse_limit)
        })
        .await?
        .ok_or_else(|| QuotaError::Missing {
            service_code: service_code.to_string(),
            quota_code: quota_code.to_string(),
            field: "defaultLimit",
        })
    }
}

/// The bucket for the session region, else the dimensionless bucket
fn select_bucket<'a>(doc: &'a Value, region: &str) -> Option<&'a Value> {
    let buckets = doc.get("quotaBuckets")?.as_array()?;

    let regional = buckets.iter().find(|bucket| {
        bucket
            .get("dimensions")
            .and_then(|d| d.get("region"))
            .and_then(|r| r.as_str())
            == Some(region)
    });

    regional.or_else(|| {
        buckets.iter().find(|bucket| {
            bucket
                .get("dimensions")
                .and_then(|d| d.as_object())
                .map_or(true, |d| d.is_empty())
        })
    })
}

/// Consumer override first, then admin override
fn override_value(bucket: &Value) -> Option<u64> {
    ["consumerOverride", "adminOverride"]
        .iter()
        .find_map(|field| bucket.get(*field)?.get("overrideValue").and_then(parse_limit))
}

/// int64 values arrive as JSON strings; -1 means unlimited
fn parse_limit(value: &Value) -> Option<u64> {
    let raw = match value {
        Value::String(s) => s.parse::<i64>().ok()?,
        other => other.as_i64()?,
    };

    Some(u64::try_from(raw).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(&json!("15")), Some(15));
        assert_eq!(parse_limit(&json!(40)), Some(40));
        assert_eq!(parse_limit(&json!("-1")), Some(u64::MAX));
        assert_eq!(parse_limit(&json!("abc")), None);
    }

    #[test]
    fn test_select_bucket_prefers_region() {
        let doc = json!({
            "quotaBuckets": [
                { "effectiveLimit": "8", "defaultLimit": "8" },
                { "effectiveLimit": "20", "defaultLimit": "8", "dimensions": { "region": "us-central1" } }
            ]
        });

        let bucket = select_bucket(&doc, "us-central1").unwrap();
        assert_eq!(bucket["effectiveLimit"], "20");

        let bucket = select_bucket(&doc, "europe-west1").unwrap();
        assert_eq!(bucket["effectiveLimit"], "8");
    }

    #[test]
    fn test_override_value() {
        assert_eq!(override_value(&json!({ "defaultLimit": "15" })), None);
        assert_eq!(
            override_value(&json!({ "consumerOverride": { "overrideValue": "30" } })),
            Some(30)
        );
        assert_eq!(
            override_value(&json!({ "adminOverride": { "overrideValue": "5" } })),
            Some(5)
        );
    }
}
