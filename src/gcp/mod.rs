//! GCP API interaction module
//!
//! This module provides the core functionality for interacting with Google Cloud Platform
//! APIs: authentication, the HTTP client, and the retrying session client.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication and gcloud configuration defaults
//! - [`client`] - Main GCP client for making API requests
//! - [`http`] - HTTP utilities and typed API errors
//!
//! # Example
//!
//! ```ignore
//! use gcp_quota::gcp::client::GcpClient;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new("my-project", "us-central1").await?;
//!     let region = client.get(&client.compute_region_url()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
