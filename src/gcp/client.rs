//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication,
//! HTTP functionality and the retry policy for throttled requests.

use super::auth::GcpCredentials;
use super::http::{api_error, ApiError, GcpHttpClient};
use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use serde_json::Value;
use std::time::Duration;

/// Default number of attempts for a throttled request, first attempt included
pub const DEFAULT_RETRY_ATTEMPTS: usize = 15;

/// Bounded exponential backoff applied to throttled API calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub region: String,
    endpoint: Option<String>,
    retry: RetryPolicy,
}

impl GcpClient {
    /// Create a new GCP client using the ambient credentials
    pub async fn new(project_id: &str, region: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(credentials, project_id, region)
    }

    /// Create a client from explicit credentials
    pub fn with_credentials(
        credentials: GcpCredentials,
        project_id: &str,
        region: &str,
    ) -> Result<Self> {
        let http = GcpHttpClient::new()?;

        Ok(Self {
            credentials,
            http,
            project_id: project_id.to_string(),
            region: region.to_string(),
            endpoint: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Route every service through one base URL (emulators, tests)
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to a GCP API, retrying throttled calls
    pub async fn get(&self, url: &str) -> Result<Value> {
        self.get_with_query(url, &[]).await
    }

    /// Make a GET request with query parameters, retrying throttled calls
    pub async fn get_with_query(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let request = move || async move {
            let token = self.get_token().await?;
            self.http.get(url, &token, query).await
        };

        request
            .retry(self.retry.backoff())
            .when(|err: &anyhow::Error| api_error(err).is_some_and(ApiError::is_throttled))
            .notify(|err: &anyhow::Error, delay: Duration| {
                tracing::warn!("Throttled on {} ({}), retrying in {:?}", url, err, delay);
            })
            .await
    }

    fn service_root(&self, host: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}", host),
        }
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build the Compute Engine project URL
    pub fn compute_project_url(&self) -> String {
        format!(
            "{}/compute/v1/projects/{}",
            self.service_root("compute.googleapis.com"),
            self.project_id
        )
    }

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!("{}/{}", self.compute_project_url(), path)
    }

    /// Build the URL of the session region itself
    pub fn compute_region_url(&self) -> String {
        self.compute_url(&format!("regions/{}", self.region))
    }

    /// Build regional Compute Engine API URL
    pub fn compute_regional_url(&self, resource: &str) -> String {
        self.compute_url(&format!("regions/{}/{}", self.region, resource))
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    /// Build aggregated Compute Engine API URL (all zones or regions)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }

    // =========================================================================
    // GKE API helpers
    // =========================================================================

    /// Build GKE API URL
    pub fn container_url(&self, path: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.service_root("container.googleapis.com"),
            self.project_id,
            path
        )
    }

    /// Build GKE location URL (region, zone, or "-" for all)
    pub fn container_location_url(&self, location: &str, resource: &str) -> String {
        self.container_url(&format!("locations/{}/{}", location, resource))
    }

    // =========================================================================
    // Service Usage API helpers
    // =========================================================================

    /// Build Service Usage API URL for a service of the current project
    pub fn serviceusage_url(&self, service: &str, path: &str) -> String {
        format!(
            "{}/v1beta1/projects/{}/services/{}/{}",
            self.service_root("serviceusage.googleapis.com"),
            self.project_id,
            service,
            path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GcpClient {
        GcpClient::with_credentials(GcpCredentials::from_token("t"), "test-project", "us-central1")
            .unwrap()
    }

    #[test]
    fn test_compute_urls() {
        let client = client();
        assert_eq!(
            client.compute_global_url("networks"),
            "https://compute.googleapis.com/compute/v1/projects/test-project/global/networks"
        );
        assert_eq!(
            client.compute_regional_url("addresses"),
            "https://compute.googleapis.com/compute/v1/projects/test-project/regions/us-central1/addresses"
        );
    }

    #[test]
    fn test_endpoint_override_applies_to_all_services() {
        let client = client().with_endpoint("http://127.0.0.1:8080/");
        assert_eq!(
            client.compute_aggregated_url("instances"),
            "http://127.0.0.1:8080/compute/v1/projects/test-project/aggregated/instances"
        );
        assert_eq!(
            client.container_location_url("-", "clusters"),
            "http://127.0.0.1:8080/v1/projects/test-project/locations/-/clusters"
        );
        assert_eq!(
            client.serviceusage_url("compute.googleapis.com", "consumerQuotaMetrics"),
            "http://127.0.0.1:8080/v1beta1/projects/test-project/services/compute.googleapis.com/consumerQuotaMetrics"
        );
    }
}
