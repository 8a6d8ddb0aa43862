//! HTTP utilities for GCP REST API calls

use crate::resource::SharedError;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A non-success response from a GCP API
#[derive(Debug, thiserror::Error)]
#[error("API request failed: {status}")]
pub struct ApiError {
    pub status: StatusCode,
    body: String,
}

impl ApiError {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The requested resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    /// Rate limiting or a transient server-side failure worth retrying
    pub fn is_throttled(&self) -> bool {
        match self.status {
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => true,
            // GCP reports per-user rate limits as 403s
            StatusCode::FORBIDDEN => {
                self.body.contains("rateLimitExceeded")
                    || self.body.contains("userRateLimitExceeded")
            },
            _ => false,
        }
    }
}

/// Find the [`ApiError`] behind an error, including errors shared through the run cache
pub fn api_error(error: &anyhow::Error) -> Option<&ApiError> {
    for cause in error.chain() {
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return Some(api);
        }
        if let Some(shared) = cause.downcast_ref::<SharedError>() {
            return api_error(shared.inner());
        }
    }
    None
}

/// True if the error chain ends in a 404 from the API
pub fn is_not_found(error: &anyhow::Error) -> bool {
    api_error(error).is_some_and(ApiError::is_not_found)
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gcp-quota/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str, query: &[(&str, &str)]) -> Result<Value> {
        tracing::debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::new(status, body).into());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Format a GCP API error for display
/// Security: Sanitizes error messages to avoid leaking sensitive API details
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(api) = api_error(error) {
        let message = match api.status.as_u16() {
            401 => "Authentication failed. Run 'gcloud auth application-default login'.",
            403 if api.is_throttled() => "Rate limit exceeded. Please try again later.",
            403 => "Permission denied. Check your GCP IAM permissions.",
            404 => "Resource not found.",
            429 => "Rate limit exceeded. Please try again later.",
            400 => "Invalid request. Check your parameters.",
            500 | 502 | 503 | 504 => "GCP service temporarily unavailable. Please try again.",
            _ => "Request failed. Check your network connection and try again.",
        };
        return message.to_string();
    }

    let error_str = format!("{:#}", error);
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(120)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
