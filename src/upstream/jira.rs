//! Jira Cloud REST adapter.

use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use futures::stream::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::error::UpstreamError;
use super::types::*;
use super::{decode_records, paginate, read_json, IssueTracker, Page, RecordStream, RetryPolicy};
use crate::config::{JiraConfig, ReportWindow, Secret};
use crate::normalize::parse_date;

const UPSTREAM: &str = "jira";

/// Issue types that never carry delivery work of their own.
const EXCLUDED_ISSUE_TYPES: &str = r#""Sub-task", "Feature", "Epic""#;

const STORY_FIELDS: &str = "fixVersions,key,summary,issuetype,created,resolutiondate";

const DEFAULT_PAGE_SIZE: u64 = 50;

/// Jira API adapter authenticated with an account email and API token.
#[derive(Debug, Clone)]
pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
    token: Secret,
    project_types: Vec<String>,
    retry: RetryPolicy,
    page_size: u64,
}

impl JiraClient {
    pub fn new(config: &JiraConfig, timeout: Duration, retry: RetryPolicy) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| UpstreamError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            token: config.api_token.clone(),
            project_types: config.project_types.clone(),
            retry,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Overrides the page size (mostly for tests).
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        self.retry
            .run(path, || async {
                debug!(path, ?query, "jira request");
                let response = self
                    .client
                    .get(&url)
                    .basic_auth(&self.email, Some(self.token.expose()))
                    .query(query)
                    .send()
                    .await?;
                read_json(UPSTREAM, &self.base_url, path, response).await
            })
            .await
    }

    /// Pages shaped as `{values, isLast, total}` keyed by `startAt`.
    fn values_pages(&self, path: String) -> RecordStream<'_, Value> {
        let page_size = self.page_size;
        paginate(0, move |start_at| {
            let path = path.clone();
            async move {
                let query = [
                    ("startAt", start_at.to_string()),
                    ("maxResults", page_size.to_string()),
                ];
                let page: ValuesPage<Value> = self.get_json(&path, &query).await?;
                let fetched = start_at + page.values.len() as u64;
                let last = page.is_last.unwrap_or(false)
                    || page.total.is_some_and(|total| fetched >= total);
                Ok(Page {
                    items: page.values,
                    next: (!last).then_some(fetched),
                })
            }
        })
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    fn fetch_projects(&self) -> RecordStream<'_, RawProject> {
        decode_records::<RawProject>("project", self.values_pages("/rest/api/3/project/search".to_string()))
            .try_filter(move |project| {
                let wanted = project
                    .project_type_key
                    .as_deref()
                    .is_some_and(|t| self.project_types.iter().any(|p| p == t));
                future::ready(wanted)
            })
            .boxed()
    }

    fn fetch_releases<'a>(
        &'a self,
        project_key: &'a str,
        window: ReportWindow,
    ) -> RecordStream<'a, RawVersion> {
        let versions = self.values_pages(format!("/rest/api/3/project/{project_key}/version"));
        decode_records::<RawVersion>("release", versions)
            .try_filter(move |version| future::ready(release_in_window(version, window)))
            .boxed()
    }

    fn fetch_stories<'a>(&'a self, release_id: &'a str) -> RecordStream<'a, RawIssue> {
        let jql = format!("fixVersion = {release_id} AND issuetype NOT IN ({EXCLUDED_ISSUE_TYPES})");
        let page_size = self.page_size;
        let pages = paginate(0, move |start_at| {
            let jql = jql.clone();
            async move {
                let query = [
                    ("jql", jql),
                    ("startAt", start_at.to_string()),
                    ("maxResults", page_size.to_string()),
                    ("fields", STORY_FIELDS.to_string()),
                ];
                let page: SearchPage = self.get_json("/rest/api/3/search", &query).await?;
                let fetched = start_at + page.issues.len() as u64;
                debug!(release_id, fetched, total = page.total, "fetched story page");
                Ok(Page {
                    items: page.issues,
                    next: (fetched < page.total).then_some(fetched),
                })
            }
        });
        decode_records("story", pages)
    }

    async fn fetch_linked_pull_requests(
        &self,
        story_key: &str,
    ) -> Result<Vec<RawDevPullRequest>, UpstreamError> {
        let issue: IssueId = self
            .get_json(&format!("/rest/api/3/issue/{story_key}"), &[("fields", "id".to_string())])
            .await?;

        let detail: DevStatusDetail = self
            .get_json(
                "/rest/dev-status/latest/issue/detail",
                &[
                    ("issueId", issue.id),
                    ("applicationType", "GitHub".to_string()),
                    ("dataType", "pullrequest".to_string()),
                ],
            )
            .await?;

        Ok(detail
            .detail
            .into_iter()
            .flat_map(|repository| repository.pull_requests)
            .collect())
    }
}

/// Released versions dated inside the window; undated released versions pass through.
fn release_in_window(version: &RawVersion, window: ReportWindow) -> bool {
    if !version.released {
        return false;
    }
    match version.release_date.as_deref().map(parse_date) {
        None => true,
        Some(Ok(date)) => window.contains(date),
        // Malformed dates are reported by the normalizer.
        Some(Err(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> ReportWindow {
        ReportWindow::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn version(date: Option<&str>, released: bool) -> RawVersion {
        RawVersion {
            id: Some("10".into()),
            name: Some("v1".into()),
            release_date: date.map(str::to_string),
            released,
            ..Default::default()
        }
    }

    #[test]
    fn release_filter_keeps_released_versions_in_window() {
        assert!(release_in_window(&version(Some("2025-01-15"), true), window()));
        assert!(release_in_window(&version(Some("2025-01-31"), true), window()));
        assert!(!release_in_window(&version(Some("2025-02-01"), true), window()));
        assert!(!release_in_window(&version(Some("2025-01-15"), false), window()));
        assert!(release_in_window(&version(None, true), window()));
    }
}
