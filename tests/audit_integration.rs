//! Integration tests for the audit pipeline using wiremock
//!
//! These tests drive checks, the fan-out and the runner against mocked
//! Compute Engine, GKE and Service Usage endpoints.

use gcp_quota::check::{expand, registry, Check, CheckError, InstanceId};
use gcp_quota::gcp::auth::GcpCredentials;
use gcp_quota::gcp::client::{GcpClient, RetryPolicy};
use gcp_quota::report::Reporter;
use gcp_quota::runner::{evaluate, Outcome, Runner, Status, Thresholds};
use gcp_quota::session::Session;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{bearer_token, method, path, path_regex, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "/compute/v1/projects/test-project";

fn session(server: &MockServer) -> Session {
    let client = GcpClient::with_credentials(
        GcpCredentials::from_token("test-token"),
        "test-project",
        "us-central1",
    )
    .expect("client should build")
    .with_endpoint(&server.uri())
    .with_retry(RetryPolicy {
        max_attempts: 4,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
    });

    Session::new(client)
}

fn check(key: &str) -> Check {
    Check::new(registry().get(key).expect("registered key")).expect("account or region check")
}

fn instance_check(key: &str, id: &str) -> Check {
    let variant = registry().get(key).expect("registered key");
    Check::for_instance(variant, id.parse().expect("valid id")).expect("instance check")
}

fn network(name: &str, peerings: Value) -> Value {
    json!({
        "name": name,
        "selfLink": format!("https://www.googleapis.com{}/global/networks/{}", PROJECT, name),
        "peerings": peerings
    })
}

async fn mount_networks(server: &MockServer, networks: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(format!("{}/global/networks", PROJECT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": networks })))
        .mount(server)
        .await;
}

async fn mount_quota_limit(server: &MockServer, metric: &str, bucket: Value) {
    Mock::given(method("GET"))
        .and(path_regex(format!(
            r"^/v1beta1/projects/test-project/services/compute\.googleapis\.com/consumerQuotaMetrics/.*{}/limits/.*$",
            metric
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": format!("compute.googleapis.com/{}", metric),
            "quotaBuckets": [bucket]
        })))
        .mount(server)
        .await;
}

mod pagination_tests {
    use super::*;

    /// Every page is fetched, including empty intermediate pages, and the
    /// listing is read only once per run
    #[tokio::test]
    async fn test_listing_follows_tokens_across_empty_pages() {
        let server = MockServer::start().await;
        let url = format!("{}/global/firewalls", PROJECT);

        Mock::given(method("GET"))
            .and(path(url.as_str()))
            .and(query_param_is_missing("pageToken"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "name": "allow-ssh" }, { "name": "allow-http" }],
                "nextPageToken": "p2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(url.as_str()))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "nextPageToken": "p3" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(url.as_str()))
            .and(query_param("pageToken", "p3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "name": "deny-all" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        let firewall_count = check("firewall_count");

        assert_eq!(firewall_count.current(&session).await.unwrap(), 3);
        assert_eq!(firewall_count.current(&session).await.unwrap(), 3);
    }
}

mod quota_tests {
    use super::*;

    /// Without an override the default limit is the maximum
    #[tokio::test]
    async fn test_maximum_falls_back_to_default() {
        let server = MockServer::start().await;
        mount_quota_limit(&server, "networks", json!({ "effectiveLimit": "15", "defaultLimit": "15" })).await;

        let session = session(&server);
        assert_eq!(check("network_count").maximum(&session).await.unwrap(), 15);
    }

    /// A consumer override replaces the default
    #[tokio::test]
    async fn test_override_is_the_maximum() {
        let server = MockServer::start().await;
        mount_quota_limit(
            &server,
            "routes",
            json!({
                "effectiveLimit": "500",
                "defaultLimit": "250",
                "consumerOverride": { "overrideValue": "500" }
            }),
        )
        .await;

        let session = session(&server);
        assert_eq!(check("route_count").maximum(&session).await.unwrap(), 500);
    }

    /// Account and default lookups share one quota document
    #[tokio::test]
    async fn test_quota_document_is_fetched_once() {
        let server = MockServer::start().await;
        mount_quota_limit(&server, "firewalls", json!({ "defaultLimit": "100" })).await;

        let session = session(&server);
        let firewall_count = check("firewall_count");
        for _ in 0..3 {
            assert_eq!(firewall_count.maximum(&session).await.unwrap(), 100);
        }

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    /// Quota summaries provide both usage and limit
    #[tokio::test]
    async fn test_region_summary_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/regions/us-central1", PROJECT)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "us-central1",
                "quotas": [
                    { "metric": "CPUS", "limit": 24.0, "usage": 22.0 },
                    { "metric": "DISKS_TOTAL_GB", "limit": 4096.0, "usage": 100.0 }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        let thresholds = Thresholds::default();

        let cpus = evaluate(&session, check("cpu_count"), &thresholds).await;
        match cpus.outcome {
            Outcome::Measured {
                current,
                maximum,
                status,
            } => {
                assert_eq!((current, maximum), (22, 24));
                assert_eq!(status, Status::Error);
            },
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(cpus.label, "test-project/us-central1");

        let disks = evaluate(&session, check("disk_total_gb"), &thresholds).await;
        assert!(matches!(
            disks.outcome,
            Outcome::Measured {
                status: Status::Success,
                ..
            }
        ));
    }
}

mod retry_tests {
    use super::*;

    /// Throttled responses are retried until the call succeeds
    #[tokio::test]
    async fn test_rate_limited_calls_are_retried() {
        let server = MockServer::start().await;
        let url = format!("{}/global/routes", PROJECT);

        Mock::given(method("GET"))
            .and(path(url.as_str()))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "code": 429, "message": "Rate Limit Exceeded" }
            })))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(url.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "name": "default-route" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        assert_eq!(check("route_count").current(&session).await.unwrap(), 1);
    }

    /// Permission errors are not retried
    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("{}/global/urlMaps", PROJECT)))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Required 'compute.urlMaps.list' permission" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        let err = check("url_map_count").current(&session).await.unwrap_err();
        assert!(matches!(err, CheckError::Fetch(_)));
    }
}

mod fan_out_tests {
    use super::*;

    /// One check per enumerated instance, each bound to its own id
    #[tokio::test]
    async fn test_three_networks_give_three_checks() {
        let server = MockServer::start().await;
        mount_networks(
            &server,
            vec![network("a", json!([])), network("b", json!([])), network("c", json!([]))],
        )
        .await;

        let session = session(&server);
        let variant = registry().get("peerings_per_network").unwrap();
        let expansion = expand(&session, &[variant]).await;

        assert!(expansion.failures.is_empty());
        let ids: Vec<String> = expansion
            .checks
            .iter()
            .map(|c| c.instance_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    /// A failing enumeration is recorded and the other variants still expand
    #[tokio::test]
    async fn test_enumeration_failure_does_not_stop_expansion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/-/clusters"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Kubernetes Engine API has not been used" }
            })))
            .mount(&server)
            .await;

        let session = session(&server);
        let variants = registry().select("clusters_per_zone,network_count").unwrap();
        let expansion = expand(&session, &variants).await;

        assert_eq!(expansion.failures.len(), 1);
        assert_eq!(expansion.failures[0].key, "clusters_per_zone");
        assert_eq!(expansion.checks.len(), 1);
        assert_eq!(expansion.checks[0].key(), "network_count");
    }

    /// Node pools are enumerated only for clusters of the session region
    #[tokio::test]
    async fn test_nested_node_pool_enumeration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/-/clusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clusters": [
                    { "name": "prod", "location": "us-central1" },
                    { "name": "dev", "location": "us-central1-a" },
                    { "name": "other", "location": "us-east1-b" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/us-central1/clusters/prod/nodePools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodePools": [{ "name": "default-pool" }, { "name": "gpu" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/us-central1-a/clusters/dev/nodePools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodePools": [{ "name": "default-pool" }]
            })))
            .mount(&server)
            .await;

        let session = session(&server);

        let pools = expand(&session, &[registry().get("nodes_per_node_pool").unwrap()]).await;
        assert!(pools.failures.is_empty());
        let ids: Vec<&InstanceId> = pools.checks.iter().filter_map(|c| c.instance_id()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&&InstanceId::composite([
            ("location", "us-central1"),
            ("cluster", "prod"),
            ("node_pool", "gpu"),
        ])));

        let zones = expand(&session, &[registry().get("clusters_per_zone").unwrap()]).await;
        let zones: Vec<String> = zones
            .checks
            .iter()
            .map(|c| c.instance_id().unwrap().to_string())
            .collect();
        assert_eq!(zones, vec!["us-central1-a"]);
    }

    /// A cluster deleted between the cluster listing and its node pool
    /// listing is skipped
    #[tokio::test]
    async fn test_deleted_cluster_is_skipped_while_enumerating_pools() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/-/clusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clusters": [
                    { "name": "prod", "location": "us-central1" },
                    { "name": "gone", "location": "us-central1" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/us-central1/clusters/prod/nodePools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodePools": [{ "name": "default-pool" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/us-central1/clusters/gone/nodePools"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": 404, "message": "Not found: projects/test-project/locations/us-central1/clusters/gone" }
            })))
            .mount(&server)
            .await;

        let session = session(&server);
        let pools = expand(&session, &[registry().get("nodes_per_node_pool").unwrap()]).await;

        assert!(pools.failures.is_empty());
        assert_eq!(pools.checks.len(), 1);
        assert_eq!(
            pools.checks[0].instance_id(),
            Some(&InstanceId::composite([
                ("location", "us-central1"),
                ("cluster", "prod"),
                ("node_pool", "default-pool"),
            ]))
        );
    }
}

mod instance_id_tests {
    use super::*;

    /// Ids that do not fit the variant are rejected before any request
    #[tokio::test]
    async fn test_malformed_ids_are_rejected_up_front() {
        let server = MockServer::start().await;

        let nodes_per_cluster = registry().get("nodes_per_cluster").unwrap();
        assert!(Check::for_instance(nodes_per_cluster, InstanceId::scalar("prod")).is_err());

        let nodes_per_node_pool = registry().get("nodes_per_node_pool").unwrap();
        let partial: InstanceId = "location=us-central1,cluster=prod".parse().unwrap();
        assert!(Check::for_instance(nodes_per_node_pool, partial).is_err());

        let peerings = registry().get("peerings_per_network").unwrap();
        let composite: InstanceId = "network=default".parse().unwrap();
        assert!(Check::for_instance(peerings, composite).is_err());

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    /// A cluster that no longer exists is a vanished instance
    #[tokio::test]
    async fn test_missing_cluster_is_instance_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/us-central1/clusters/gone/nodePools"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": 404, "message": "Not found" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        let check = instance_check("node_pools_per_cluster", "location=us-central1,cluster=gone");
        let err = check.current(&session).await.unwrap_err();

        match err {
            CheckError::InstanceNotFound { key, instance_id } => {
                assert_eq!(key, "node_pools_per_cluster");
                assert_eq!(instance_id.to_string(), "cluster=gone,location=us-central1");
            },
            other => panic!("unexpected error {:?}", other),
        }
    }
}

mod runner_tests {
    use super::*;

    /// A vanished instance fails its own check and the run continues
    #[tokio::test]
    async fn test_missing_instance_does_not_stop_the_run() {
        let server = MockServer::start().await;
        mount_networks(
            &server,
            vec![network(
                "default",
                json!([{ "name": "to-shared", "state": "ACTIVE" }, { "name": "old", "state": "INACTIVE" }]),
            )],
        )
        .await;
        mount_quota_limit(&server, "networks", json!({ "defaultLimit": "5" })).await;

        let session = session(&server);
        let checks = vec![
            instance_check("peerings_per_network", "ghost"),
            instance_check("peerings_per_network", "default"),
            check("network_count"),
            check("compute_read_request_rate"),
        ];

        let mut reporter = Reporter::new(Vec::new(), false);
        let runner = Runner::new(session, Thresholds::default()).with_concurrency(2);
        let summary = runner.run(checks, &mut reporter).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.is_failure(true));

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("could not find instance with ID \"ghost\""));
        assert!(lines[0].contains("[test-project/us-central1/ghost]"));
        assert!(lines[1].ends_with("1/25 \u{2713}"));
        assert_eq!(lines[2], "VPC networks per project [test-project]: 1/5 \u{2713}");
        assert!(lines[3].contains(" - "));
    }

    /// Variants that could not be enumerated are reported and counted
    #[tokio::test]
    async fn test_enumeration_failures_are_counted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/test-project/locations/-/clusters"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Kubernetes Engine API has not been used" }
            })))
            .mount(&server)
            .await;
        mount_networks(&server, vec![network("a", json!([]))]).await;
        mount_quota_limit(&server, "networks", json!({ "defaultLimit": "5" })).await;

        let session = session(&server);
        let variants = registry().select("clusters_per_zone,network_count").unwrap();
        let expansion = expand(&session, &variants).await;

        let mut reporter = Reporter::new(Vec::new(), false);
        let runner = Runner::new(session, Thresholds::default());
        let summary = runner.run_expansion(expansion, &mut reporter).await.unwrap();

        assert_eq!(summary.unenumerated, 1);
        assert_eq!(summary.success, 1);

        reporter.summary(&summary).unwrap();
        let output = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("[clusters_per_zone]: could not enumerate instances"));
        assert_eq!(lines[1], "VPC networks per project [test-project]: 1/5 \u{2713}");
        assert!(lines[2].ends_with(", 1 not enumerated"));
    }

    /// Errors above the error threshold fail the run
    #[tokio::test]
    async fn test_exhausted_quota_fails_the_run() {
        let server = MockServer::start().await;
        mount_networks(&server, vec![network("a", json!([])), network("b", json!([]))]).await;
        mount_quota_limit(&server, "networks", json!({ "defaultLimit": "2" })).await;

        let session = session(&server);
        let mut reporter = Reporter::new(Vec::new(), false);
        let runner = Runner::new(session, Thresholds::default());
        let summary = runner.run(vec![check("network_count")], &mut reporter).await.unwrap();

        assert_eq!(summary.error, 1);
        assert!(summary.is_failure(false));

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(output, "VPC networks per project [test-project]: 2/2 X\n");
    }
}

mod quota_source_tests {
    use super::*;
    use async_trait::async_trait;
    use gcp_quota::quota::{QuotaError, QuotaSource};
    use std::sync::Arc;

    /// Every quota has the same fixed limit and no override
    struct FixedDefaults(u64);

    #[async_trait]
    impl QuotaSource for FixedDefaults {
        async fn get_account_quota(&self, service_code: &str, quota_code: &str) -> Result<u64, QuotaError> {
            Err(QuotaError::NoSuchResource {
                service_code: service_code.to_string(),
                quota_code: quota_code.to_string(),
            })
        }

        async fn get_default_quota(&self, _: &str, _: &str) -> Result<u64, QuotaError> {
            Ok(self.0)
        }
    }

    /// A replacement quota source serves every quota-backed maximum
    #[tokio::test]
    async fn test_session_uses_replacement_quota_source() {
        let server = MockServer::start().await;
        let session = session(&server).with_quota_source(Arc::new(FixedDefaults(42)));

        assert_eq!(check("health_check_count").maximum(&session).await.unwrap(), 42);
        assert_eq!(check("ssl_certificate_count").maximum(&session).await.unwrap(), 42);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
