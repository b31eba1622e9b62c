use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dora_lead_time::config::{GitHubConfig, ReportWindow, Secret};
use dora_lead_time::model::PullRequestRef;
use dora_lead_time::upstream::{GitHubClient, RetryPolicy, SourceControl, UpstreamError};
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn client(server: &MockServer, retry: RetryPolicy) -> GitHubClient {
    let config = GitHubConfig {
        api_url: server.uri(),
        org_tokens: BTreeMap::from([("acme".to_string(), Secret::new("gh-token"))]),
        repositories: vec![],
    };
    GitHubClient::new(&config, Duration::from_secs(5), retry)
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

fn pull(number: u64, created: &str, closed: Option<&str>, updated: &str) -> serde_json::Value {
    json!({
        "number": number,
        "title": format!("PR {number}"),
        "created_at": created,
        "closed_at": closed,
        "merged_at": closed,
        "updated_at": updated,
        "user": {"login": "dev"}
    })
}

fn commit(sha: &str, message: &str, date: &str) -> serde_json::Value {
    json!({
        "sha": sha,
        "commit": {
            "message": message,
            "author": {"name": "dev", "date": date},
            "committer": {"name": "dev", "date": date}
        },
        "author": {"login": "dev"}
    })
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
async fn pull_requests_stop_paging_once_updates_predate_the_window() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls"))
        .and(query_param("state", "all"))
        .and(query_param("sort", "updated"))
        .and(query_param("page", "1"))
        .and(header("authorization", "token gh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            pull(10, "2025-03-05T10:00:00Z", None, "2025-03-20T10:00:00Z"),
            pull(9, "2025-02-01T10:00:00Z", Some("2025-02-15T10:00:00Z"), "2025-03-02T10:00:00Z")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            pull(8, "2025-02-20T10:00:00Z", Some("2025-03-01T09:00:00Z"), "2025-03-01T09:00:00Z"),
            pull(7, "2025-01-01T10:00:00Z", Some("2025-02-10T10:00:00Z"), "2025-02-10T10:00:00Z")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let github = client(&server, RetryPolicy::none());
    let prs: Vec<_> = github
        .fetch_pull_requests("acme", "web", window())
        .try_collect()
        .await
        .unwrap();
    let numbers: Vec<_> = prs.iter().filter_map(|p| p.number).collect();
    assert_eq!(numbers, vec![10, 8]);
}

#[tokio::test]
async fn open_pull_request_without_updates_in_the_window_is_dropped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            pull(12, "2025-01-15T10:00:00Z", None, "2025-03-10T10:00:00Z"),
            pull(11, "2025-01-10T10:00:00Z", None, "2025-02-25T10:00:00Z")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            pull(5, "2024-12-01T10:00:00Z", None, "2025-02-01T10:00:00Z")
        ])))
        .expect(0)
        .mount(&server)
        .await;

    let github = client(&server, RetryPolicy::none());
    let prs: Vec<_> = github
        .fetch_pull_requests("acme", "web", window())
        .try_collect()
        .await
        .unwrap();
    let numbers: Vec<_> = prs.iter().filter_map(|p| p.number).collect();
    assert_eq!(numbers, vec![12]);
}

#[tokio::test]
async fn commits_are_paged_until_a_short_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls/7/commits"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            commit("a1", "ABC-1: start", "2025-03-01T10:00:00Z"),
            commit("a2", "ABC-1: tests", "2025-03-02T10:00:00Z")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls/7/commits"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            commit("a3", "ABC-1: review fixes", "2025-03-03T10:00:00Z")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let github = client(&server, RetryPolicy::none());
    let reference = PullRequestRef::new("acme", "web", 7);
    let commits: Vec<_> = github.fetch_commits(&reference).try_collect().await.unwrap();
    let messages: Vec<_> = commits.iter().filter_map(|c| c.message()).collect();
    assert_eq!(messages, vec!["ABC-1: start", "ABC-1: tests", "ABC-1: review fixes"]);
}

#[tokio::test]
async fn unknown_organization_fails_without_a_request() {
    let server = MockServer::start().await;
    let github = client(&server, RetryPolicy::none());

    let err = github
        .fetch_pull_request(&PullRequestRef::new("elsewhere", "web", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Config(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn spent_quota_is_retried_as_a_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls/5"))
        .respond_with(SequenceResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            responses: vec![
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-reset", "0"),
                ResponseTemplate::new(200).set_body_json(pull(
                    5,
                    "2025-03-05T10:00:00Z",
                    None,
                    "2025-03-06T10:00:00Z",
                )),
            ],
        })
        .expect(2)
        .mount(&server)
        .await;

    let retry = RetryPolicy {
        max_retries: 2,
        retry_base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };
    let github = client(&server, retry);
    let pr = github
        .fetch_pull_request(&PullRequestRef::new("acme", "web", 5))
        .await
        .unwrap();
    assert_eq!(pr.number, Some(5));
}

#[tokio::test]
async fn forbidden_without_quota_headers_is_an_authentication_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls/5"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let github = client(&server, RetryPolicy::default());
    let err = github
        .fetch_pull_request(&PullRequestRef::new("acme", "web", 5))
        .await
        .unwrap_err();
    match err {
        UpstreamError::Authentication { tenant, .. } => assert_eq!(tenant, "acme"),
        other => panic!("expected Authentication, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_pull_request_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/web/pulls/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let github = client(&server, RetryPolicy::none());
    let err = github
        .fetch_pull_request(&PullRequestRef::new("acme", "web", 404))
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::NotFound { .. }));
}
