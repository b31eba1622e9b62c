use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dora_lead_time::config::{JiraConfig, ReportWindow, Secret};
use dora_lead_time::upstream::{IssueTracker, JiraClient, RetryPolicy, UpstreamError};
use futures::{StreamExt, TryStreamExt};
use serde_json::json;
use wiremock::matchers::{basic_auth, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        retry_base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

fn client(server: &MockServer, retry: RetryPolicy) -> JiraClient {
    let config = JiraConfig {
        base_url: server.uri(),
        email: "dev@acme.test".into(),
        api_token: Secret::new("jira-token"),
        project_types: vec!["software".into()],
    };
    JiraClient::new(&config, Duration::from_secs(5), retry)
        .unwrap()
        .with_page_size(2)
}

fn window() -> ReportWindow {
    ReportWindow::new(
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
    )
    .unwrap()
}

struct SequenceResponder {
    calls: Arc<AtomicUsize>,
    responses: Vec<ResponseTemplate>,
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

#[tokio::test]
async fn projects_are_paginated_and_filtered_by_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/project/search"))
        .and(query_param("startAt", "0"))
        .and(basic_auth("dev@acme.test", "jira-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                {"id": "1", "key": "ABC", "name": "Alpha", "projectTypeKey": "software"},
                {"id": "2", "key": "OPS", "name": "Ops", "projectTypeKey": "business"}
            ],
            "isLast": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/project/search"))
        .and(query_param("startAt", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                {"id": "3", "key": "XYZ", "name": "Xylo", "projectTypeKey": "software"}
            ],
            "isLast": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let jira = client(&server, RetryPolicy::none());
    let projects: Vec<_> = jira.fetch_projects().try_collect().await.unwrap();
    let keys: Vec<_> = projects.iter().filter_map(|p| p.key.as_deref()).collect();
    assert_eq!(keys, vec!["ABC", "XYZ"]);
}

#[tokio::test]
async fn releases_keep_released_versions_in_window_and_undated_ones() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/project/ABC/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                {"id": "100", "name": "v1", "releaseDate": "2025-03-10", "released": true},
                {"id": "101", "name": "v0", "releaseDate": "2025-01-10", "released": true},
                {"id": "102", "name": "v2", "releaseDate": "2025-03-20", "released": false},
                {"id": "103", "name": "hotfix", "released": true}
            ],
            "isLast": true
        })))
        .mount(&server)
        .await;

    let jira = client(&server, RetryPolicy::none());
    let versions: Vec<_> = jira
        .fetch_releases("ABC", window())
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<_> = versions.iter().filter_map(|v| v.id.as_deref()).collect();
    assert_eq!(ids, vec!["100", "103"]);
}

#[tokio::test]
async fn stories_follow_search_total() {
    let server = MockServer::start().await;
    let jql = r#"fixVersion = 100 AND issuetype NOT IN ("Sub-task", "Feature", "Epic")"#;

    let issue = |key: &str| {
        json!({
            "id": "1",
            "key": key,
            "fields": {
                "summary": "Fix bug",
                "issuetype": {"name": "Story"},
                "created": "2025-02-20T09:00:00.000+0000",
                "resolutiondate": null,
                "fixVersions": [{"id": "100"}]
            }
        })
    };

    Mock::given(method("GET"))
        .and(path("/rest/api/3/search"))
        .and(query_param("jql", jql))
        .and(query_param("startAt", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"issues": [issue("ABC-1"), issue("ABC-2")], "total": 3})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/search"))
        .and(query_param("startAt", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"issues": [issue("ABC-3")], "total": 3})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let jira = client(&server, RetryPolicy::none());
    let stories: Vec<_> = jira.fetch_stories("100").try_collect().await.unwrap();
    let keys: Vec<_> = stories.iter().filter_map(|s| s.key.as_deref()).collect();
    assert_eq!(keys, vec!["ABC-1", "ABC-2", "ABC-3"]);
}

#[tokio::test]
async fn mistyped_issue_is_reported_without_losing_its_page() {
    let server = MockServer::start().await;

    let issues = json!({
        "issues": [
            {"id": "1", "key": "ABC-1", "fields": {"summary": "ok", "issuetype": {"name": "Story"}}},
            {"id": "2", "key": "ABC-2", "fields": {"summary": ["not", "text"]}},
            {"id": "3", "key": "ABC-3", "fields": {"summary": "ok", "issuetype": {"name": "Bug"}}}
        ],
        "total": 3
    });
    Mock::given(method("GET"))
        .and(path("/rest/api/3/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(issues))
        .expect(1)
        .mount(&server)
        .await;

    let jira = client(&server, RetryPolicy::none());
    let items: Vec<_> = jira.fetch_stories("100").collect().await;
    assert_eq!(items.len(), 3);

    let keys: Vec<_> = items
        .iter()
        .filter_map(|item| item.as_ref().ok())
        .filter_map(|issue| issue.key.as_deref())
        .collect();
    assert_eq!(keys, vec!["ABC-1", "ABC-3"]);

    match &items[1] {
        Err(UpstreamError::MalformedRecord(err)) => {
            assert_eq!(err.kind, "story");
            assert_eq!(err.record["key"], "ABC-2");
        }
        other => panic!("expected a malformed record, got {other:?}"),
    }
}

#[tokio::test]
async fn linked_pull_requests_come_from_dev_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/ABC-42"))
        .and(query_param("fields", "id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "10042"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/dev-status/latest/issue/detail"))
        .and(query_param("issueId", "10042"))
        .and(query_param("applicationType", "GitHub"))
        .and(query_param("dataType", "pullrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "detail": [
                {"pullRequests": [
                    {"id": "#7", "url": "https://github.com/acme/web/pull/7", "status": "MERGED"}
                ]},
                {"pullRequests": [
                    {"id": "#3", "url": "https://github.com/acme/api/pull/3", "status": "OPEN"}
                ]}
            ]
        })))
        .mount(&server)
        .await;

    let jira = client(&server, RetryPolicy::none());
    let prs = jira.fetch_linked_pull_requests("ABC-42").await.unwrap();
    let urls: Vec<_> = prs.iter().filter_map(|p| p.url.as_deref()).collect();
    assert_eq!(
        urls,
        vec!["https://github.com/acme/web/pull/7", "https://github.com/acme/api/pull/3"]
    );
}

#[tokio::test]
async fn rate_limited_request_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/issue/ABC-1"))
        .respond_with(SequenceResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            responses: vec![
                ResponseTemplate::new(429).insert_header("retry-after", "1"),
                ResponseTemplate::new(200).set_body_json(json!({"id": "1"})),
            ],
        })
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/dev-status/latest/issue/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": []})))
        .mount(&server)
        .await;

    let jira = client(&server, fast_retry(2));
    let prs = jira.fetch_linked_pull_requests("ABC-1").await.unwrap();
    assert!(prs.is_empty());
}

#[tokio::test]
async fn persistent_server_errors_exhaust_the_retry_budget() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/project/search"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("x-arequestid", "req-503")
                .set_body_string("maintenance"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let jira = client(&server, fast_retry(2));
    let err = jira
        .fetch_projects()
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert_eq!(err.request_id(), Some("req-503"));
    assert_eq!(err.context().and_then(|c| c.http_status), Some(503));
    match err {
        UpstreamError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(source.to_string().contains("maintenance"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/api/3/project/search"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let jira = client(&server, fast_retry(3));
    let err = jira
        .fetch_projects()
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Authentication { .. }));
    assert_eq!(err.code(), "authentication");
}
