//! Upstream clients for the issue tracker (Jira) and source-control host (GitHub).
//!
//! Both clients hide pagination behind a [`RecordStream`]: callers pull records
//! until exhaustion and never see page tokens. Every HTTP call goes through a
//! [`RetryPolicy`], so transient failures (timeouts, 5xx, rate limits) are retried
//! with exponential backoff and persistent ones surface as
//! [`UpstreamError::RetriesExhausted`].

pub mod error;
pub mod github;
pub mod jira;
pub mod types;

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::config::ReportWindow;
use crate::model::PullRequestRef;
use crate::normalize::MalformedRecordError;

pub use error::{ErrorContext, UpstreamError};
pub use github::GitHubClient;
pub use jira::JiraClient;
pub use types::*;

/// Lazy, restartable sequence of upstream records.
pub type RecordStream<'a, T> = BoxStream<'a, Result<T, UpstreamError>>;

// =============================================================================
// TRAITS
// =============================================================================

/// Issue-tracker operations used by the sync engine.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Projects of the configured project types.
    fn fetch_projects(&self) -> RecordStream<'_, RawProject>;

    /// Released versions of a project dated inside the window, plus undated ones.
    fn fetch_releases<'a>(
        &'a self,
        project_key: &'a str,
        window: ReportWindow,
    ) -> RecordStream<'a, RawVersion>;

    /// Stories assigned to a release.
    fn fetch_stories<'a>(&'a self, release_id: &'a str) -> RecordStream<'a, RawIssue>;

    /// Pull requests reported by the tracker's development integration.
    async fn fetch_linked_pull_requests(
        &self,
        story_key: &str,
    ) -> Result<Vec<RawDevPullRequest>, UpstreamError>;
}

/// Source-control operations used by the sync engine.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Pull requests of a repository active inside the window.
    fn fetch_pull_requests<'a>(
        &'a self,
        organization: &'a str,
        repository: &'a str,
        window: ReportWindow,
    ) -> RecordStream<'a, RawPullRequest>;

    async fn fetch_pull_request(
        &self,
        reference: &PullRequestRef,
    ) -> Result<RawPullRequest, UpstreamError>;

    fn fetch_commits<'a>(&'a self, reference: &'a PullRequestRef) -> RecordStream<'a, RawCommit>;
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Bounded retry with exponential backoff, injected into each client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Upper bound for both computed backoff and upstream `Retry-After` hints.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No retries and no waiting; useful for tests and one-shot calls.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        hint.unwrap_or_else(|| backoff_delay(self.retry_base_delay, attempt))
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.max_retries {
                return Err(UpstreamError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt, err.retry_after());
            warn!(
                what,
                attempt = attempt + 1,
                code = err.code(),
                request_id = ?err.request_id(),
                delay_ms = delay.as_millis() as u64,
                "retrying upstream call"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

// =============================================================================
// PAGINATION
// =============================================================================

/// One fetched page and the cursor of the next one.
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<u64>,
}

/// Turns a page fetcher into a flat record stream starting at `first`.
///
/// An empty page always ends the stream, whatever cursor it reports.
pub(crate) fn paginate<'a, T, F, Fut>(first: u64, fetch_page: F) -> RecordStream<'a, T>
where
    T: Send + 'a,
    F: Fn(u64) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page<T>, UpstreamError>> + Send + 'a,
{
    stream::try_unfold((Some(first), fetch_page), |(cursor, fetch_page)| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, UpstreamError>(None);
        };
        let page = fetch_page(cursor).await?;
        let next = if page.items.is_empty() { None } else { page.next };
        Ok(Some((page.items, (next, fetch_page))))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

/// Decodes each record on its own, so one bad record never sinks its page.
///
/// A record that does not fit `T` is yielded as
/// [`UpstreamError::MalformedRecord`] and the stream carries on.
pub(crate) fn decode_records<'a, T>(kind: &'static str, records: RecordStream<'a, Value>) -> RecordStream<'a, T>
where
    T: DeserializeOwned + Send + 'a,
{
    records
        .and_then(move |record| future::ready(decode_record(kind, record)))
        .boxed()
}

fn decode_record<T: DeserializeOwned>(kind: &'static str, record: Value) -> Result<T, UpstreamError> {
    T::deserialize(&record)
        .map_err(|err| MalformedRecordError::undecodable(kind, &err, record).into())
}

// =============================================================================
// HTTP PLUMBING
// =============================================================================

/// Maximum number of body characters kept in error messages.
const MAX_ERROR_BODY: usize = 300;

/// Decodes a successful response or classifies the failure.
pub(crate) async fn read_json<T: DeserializeOwned>(
    upstream: &'static str,
    tenant: &str,
    path: &str,
    response: reqwest::Response,
) -> Result<T, UpstreamError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        return Err(classify_failure(upstream, tenant, path, status.as_u16(), &headers, &text));
    }

    serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode {
        upstream,
        message: format!("{path}: {e}"),
    })
}

/// Maps a non-success HTTP status onto the error taxonomy.
pub(crate) fn classify_failure(
    upstream: &'static str,
    tenant: &str,
    path: &str,
    status: u16,
    headers: &HeaderMap,
    body: &str,
) -> UpstreamError {
    let mut context = ErrorContext::new().with_status(status).with_path(path);
    if let Some(id) = extract_request_id(headers) {
        context = context.with_request_id(id);
    }

    let retry_after = retry_after_hint(headers);
    let quota_exhausted = header_str(headers, "x-ratelimit-remaining") == Some("0");

    match status {
        429 => UpstreamError::RateLimited {
            upstream,
            retry_after,
            context,
        },
        403 if quota_exhausted || retry_after.is_some() => UpstreamError::RateLimited {
            upstream,
            retry_after,
            context,
        },
        401 | 403 => UpstreamError::Authentication {
            upstream,
            tenant: tenant.to_string(),
            context,
        },
        404 => UpstreamError::NotFound {
            upstream,
            resource: path.to_string(),
        },
        _ => {
            let mut message: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
            if message.is_empty() {
                message = format!("HTTP {status}");
            }
            UpstreamError::provider_with_context(upstream, message, status >= 500, context)
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    ["x-request-id", "x-github-request-id", "x-arequestid"]
        .iter()
        .find_map(|name| header_str(headers, name))
        .map(|s| s.to_string())
}

/// `Retry-After` seconds, else the GitHub quota reset time when the quota is spent.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    if header_str(headers, "x-ratelimit-remaining") != Some("0") {
        return None;
    }
    let reset = header_str(headers, "x-ratelimit-reset")?.parse::<u64>().ok()?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            retry_base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(0, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6, None), Duration::from_secs(10));
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(300))),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UpstreamError::provider("jira", "HTTP 503", true))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let err = policy(2)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpstreamError::provider("github", "HTTP 502", true))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            UpstreamError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.code(), "provider_error");
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = policy(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(UpstreamError::config("no token"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, UpstreamError::Config(_)));
    }

    #[test]
    fn github_quota_exhaustion_is_a_rate_limit_not_an_auth_failure() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let err = classify_failure("github", "acme", "/repos/acme/web/pulls", 403, &headers, "");
        assert!(matches!(err, UpstreamError::RateLimited { .. }));

        let err = classify_failure("github", "acme", "/repos/acme/web/pulls", 403, &HeaderMap::new(), "");
        match err {
            UpstreamError::Authentication { tenant, .. } => assert_eq!(tenant, "acme"),
            other => panic!("expected Authentication, got {other:?}"),
        }
    }

    #[test]
    fn retry_after_header_is_honoured() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("12"));
        let err = classify_failure("jira", "jira", "/rest/api/3/search", 429, &headers, "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn paginate_follows_cursor_and_stops_on_empty_page() {
        let records: Vec<u32> = paginate(0, |cursor| async move {
            let items = match cursor {
                0 => vec![1, 2],
                2 => vec![3],
                _ => vec![],
            };
            Ok(Page {
                next: Some(cursor + items.len() as u64),
                items,
            })
        })
        .try_collect()
        .await
        .unwrap();
        assert_eq!(records, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn undecodable_record_does_not_end_the_stream() {
        let records = stream::iter(vec![
            Ok(serde_json::json!({"number": 1, "title": "ok"})),
            Ok(serde_json::json!({"number": "two", "title": "bad"})),
            Ok(serde_json::json!({"number": 3})),
        ])
        .boxed();
        let items: Vec<Result<RawPullRequest, UpstreamError>> =
            decode_records("pull request", records).collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().number, Some(1));
        match &items[1] {
            Err(UpstreamError::MalformedRecord(err)) => {
                assert_eq!(err.kind, "pull request");
                assert_eq!(err.record["title"], "bad");
            }
            other => panic!("expected a malformed record, got {other:?}"),
        }
        assert_eq!(items[2].as_ref().unwrap().number, Some(3));
    }
}
