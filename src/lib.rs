//! Audit a GCP project's resource usage against its quotas and limits.
//!
//! A run selects checks from the [`check::registry`], expands instance-scoped
//! checks into one check per resource, and evaluates them with the
//! [`runner::Runner`]. Every API read goes through [`resource`] so it is
//! paginated and memoized for the duration of the run.

pub mod check;
pub mod config;
pub mod gcp;
pub mod quota;
pub mod report;
pub mod resource;
pub mod runner;
pub mod session;

/// Version injected at compile time via GCP_QUOTA_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("GCP_QUOTA_VERSION") {
    Some(v) => v,
    None => "dev",
};
