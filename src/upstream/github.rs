//! GitHub REST adapter with one access token per organization.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use futures::stream::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::error::UpstreamError;
use super::types::*;
use super::{decode_records, paginate, read_json, Page, RecordStream, RetryPolicy, SourceControl};
use crate::config::{GitHubConfig, ReportWindow, Secret};
use crate::model::PullRequestRef;
use crate::normalize::parse_date;

const UPSTREAM: &str = "github";

const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    tokens: BTreeMap<String, Secret>,
    retry: RetryPolicy,
    page_size: u64,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig, timeout: Duration, retry: RetryPolicy) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("dora-lead-time"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| UpstreamError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            tokens: config.org_tokens.clone(),
            retry,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.clamp(1, 100);
        self
    }

    fn token_for(&self, organization: &str) -> Result<&Secret, UpstreamError> {
        self.tokens.get(organization).ok_or_else(|| {
            UpstreamError::config(format!("no GitHub token configured for organization `{organization}`"))
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        organization: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let token = self.token_for(organization)?;
        let auth = HeaderValue::from_str(&format!("token {}", token.expose()))
            .map_err(|_| UpstreamError::config(format!("invalid token format for `{organization}`")))?;
        let url = format!("{}{}", self.api_url, path);

        self.retry
            .run(path, || async {
                debug!(path, ?query, "github request");
                let response = self
                    .client
                    .get(&url)
                    .header(AUTHORIZATION, auth.clone())
                    .query(query)
                    .send()
                    .await?;
                read_json(UPSTREAM, organization, path, response).await
            })
            .await
    }

    /// Page-number pagination ending on the first short page.
    fn numbered_pages<'a, S>(&'a self, organization: &'a str, path: String, stop_early: S) -> RecordStream<'a, Value>
    where
        S: Fn(&[Value]) -> bool + Send + Sync + 'a,
    {
        let page_size = self.page_size;
        let stop_early = std::sync::Arc::new(stop_early);
        paginate(1, move |page| {
            let path = path.clone();
            let stop_early = stop_early.clone();
            async move {
                let query = [("per_page", page_size.to_string()), ("page", page.to_string())];
                let items: Vec<Value> = self.get_json(organization, &path, &query).await?;
                let last = (items.len() as u64) < page_size || (*stop_early)(&items[..]);
                Ok(Page {
                    items,
                    next: (!last).then_some(page + 1),
                })
            }
        })
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    fn fetch_pull_requests<'a>(
        &'a self,
        organization: &'a str,
        repository: &'a str,
        window: ReportWindow,
    ) -> RecordStream<'a, RawPullRequest> {
        let path = format!("/repos/{organization}/{repository}/pulls?state=all&sort=updated&direction=desc");
        let pages = self.numbered_pages(organization, path, move |page: &[Value]| {
            // Sorted by last update, newest first: once a page reaches back before
            // the window, later pages hold only records the filter drops.
            page.iter()
                .filter_map(|pr| pr.get("updated_at").and_then(Value::as_str))
                .filter_map(|raw| parse_date(raw).ok())
                .any(|updated| updated < window.start)
        });
        decode_records::<RawPullRequest>("pull request", pages)
            .try_filter(move |pr| future::ready(pull_request_in_window(pr, window)))
            .boxed()
    }

    async fn fetch_pull_request(&self, reference: &PullRequestRef) -> Result<RawPullRequest, UpstreamError> {
        let path = format!(
            "/repos/{}/{}/pulls/{}",
            reference.organization, reference.repository, reference.number
        );
        self.get_json(&reference.organization, &path, &[]).await
    }

    fn fetch_commits<'a>(&'a self, reference: &'a PullRequestRef) -> RecordStream<'a, RawCommit> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/commits",
            reference.organization, reference.repository, reference.number
        );
        let pages = self.numbered_pages(&reference.organization, path, |_: &[Value]| false);
        decode_records("commit", pages)
    }
}

/// Opened by the end of the window, updated and not closed before it started.
///
/// The `updated_at` bound matches the early stop in `fetch_pull_requests`, so a
/// record is kept or dropped the same way whichever page it arrives on.
fn pull_request_in_window(pr: &RawPullRequest, window: ReportWindow) -> bool {
    let opened = match pr.created_at.as_deref().map(parse_date) {
        Some(Ok(date)) => date,
        // Left for the normalizer to report.
        _ => return true,
    };
    if opened > window.end {
        return false;
    }
    if let Some(Ok(updated)) = pr.updated_at.as_deref().map(parse_date) {
        if updated < window.start {
            return false;
        }
    }
    match pr.closed_at.as_deref().map(parse_date) {
        Some(Ok(closed)) => closed >= window.start,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> ReportWindow {
        ReportWindow::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        )
        .unwrap()
    }

    fn pr(created: &str, closed: Option<&str>) -> RawPullRequest {
        RawPullRequest {
            number: Some(1),
            created_at: Some(created.to_string()),
            closed_at: closed.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn window_keeps_prs_active_inside_it() {
        assert!(pull_request_in_window(&pr("2025-02-10T10:00:00Z", None), window()));
        assert!(pull_request_in_window(&pr("2025-02-10T10:00:00Z", Some("2025-03-01T08:00:00Z")), window()));
        assert!(!pull_request_in_window(&pr("2025-02-10T10:00:00Z", Some("2025-02-28T23:00:00Z")), window()));
        assert!(!pull_request_in_window(&pr("2025-04-01T00:00:00Z", None), window()));
    }

    #[test]
    fn open_pull_request_untouched_since_before_the_window_is_dropped() {
        let mut stale = pr("2025-01-10T10:00:00Z", None);
        stale.updated_at = Some("2025-02-25T10:00:00Z".into());
        assert!(!pull_request_in_window(&stale, window()));

        stale.updated_at = Some("2025-03-01T00:30:00Z".into());
        assert!(pull_request_in_window(&stale, window()));
    }

    #[test]
    fn missing_token_is_a_configuration_error() {
        let client = GitHubClient::new(
            &GitHubConfig {
                api_url: "https://api.github.com".into(),
                org_tokens: BTreeMap::from([("acme".to_string(), Secret::new("t"))]),
                repositories: vec![],
            },
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .unwrap();
        assert!(client.token_for("acme").is_ok());
        assert!(matches!(client.token_for("other"), Err(UpstreamError::Config(_))));
    }
}
