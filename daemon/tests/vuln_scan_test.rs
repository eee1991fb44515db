//! Vulnerability scanner against a mock OSV endpoint.

use reviewd::review::model::{Category, Severity};
use reviewd::vuln::{scan, OsvClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn advisories_map_to_dependency_issues() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/query"))
        .and(body_partial_json(json!({
            "package": {"name": "lodash", "ecosystem": "npm"},
            "version": "4.17.11",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "vulns": [{
                "id": "GHSA-jf85-cpcp-j695",
                "summary": "Prototype pollution",
                "details": "lodash before 4.17.12 is vulnerable to prototype pollution.",
                "severity": [{"type": "CVSS_V3", "score": "7.4"}],
            }]
        })))
        .mount(&server)
        .await;
    // Any other package resolves clean.
    Mock::given(method("POST"))
        .and(path("/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = OsvClient::new(server.uri());
    let manifest = r#"{"dependencies": {"lodash": "^4.17.11", "express": "4.19.2"}}"#;
    let issues = scan(
        &client,
        &[("package.json".to_string(), manifest.to_string())],
    )
    .await;

    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.category, Category::Dependency);
    assert_eq!(issue.severity, Severity::High);
    assert!((issue.confidence - 0.95).abs() < 1e-9);
    assert_eq!(issue.file_path, "package.json");
    assert_eq!(issue.line_start, 1);
    assert!(issue
        .message
        .starts_with("GHSA-jf85-cpcp-j695: Prototype pollution (lodash@4.17.11)"));
    assert!(issue.evidence.starts_with("lodash before 4.17.12"));
}

#[tokio::test]
async fn network_failure_yields_zero_findings() {
    // Nothing listens on this port; every query errors and is skipped.
    let client = OsvClient::new("http://127.0.0.1:1");
    let manifest = r#"{"dependencies": {"lodash": "4.17.11"}}"#;
    let issues = scan(
        &client,
        &[("package.json".to_string(), manifest.to_string())],
    )
    .await;
    assert!(issues.is_empty());
}

#[tokio::test]
async fn duplicate_packages_across_manifests_query_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OsvClient::new(server.uri());
    let manifest = r#"{"dependencies": {"lodash": "4.17.11"}}"#;
    let issues = scan(
        &client,
        &[
            ("package.json".to_string(), manifest.to_string()),
            ("web/package.json".to_string(), manifest.to_string()),
        ],
    )
    .await;
    assert!(issues.is_empty());
    // The .expect(1) on the mock asserts the second manifest did not
    // trigger a duplicate query when the server shuts down.
}
