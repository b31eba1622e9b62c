//! Conversion of raw upstream records into delivery entities.
//!
//! Every function here is pure. A record missing a required field becomes a
//! [`MalformedRecordError`] carrying the raw record, so the sync engine can log
//! it and move on without aborting the run.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::model::{Project, PullRequest, PullRequestRef, Release, ReleaseRef, Story};
use crate::upstream::{RawCommit, RawDevPullRequest, RawIssue, RawProject, RawPullRequest, RawVersion};

/// A raw record that could not be normalized.
#[derive(Debug, thiserror::Error)]
#[error("malformed {kind} record: {reason}")]
pub struct MalformedRecordError {
    pub kind: &'static str,
    pub reason: String,
    /// The offending record, for logging.
    pub record: serde_json::Value,
}

impl MalformedRecordError {
    fn new<R: Serialize>(kind: &'static str, reason: impl Into<String>, record: &R) -> Self {
        Self {
            kind,
            reason: reason.into(),
            record: serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
        }
    }

    /// A record whose fields do not have the expected JSON types.
    pub(crate) fn undecodable(kind: &'static str, err: &serde_json::Error, record: serde_json::Value) -> Self {
        Self {
            kind,
            reason: err.to_string(),
            record,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized date `{0}`")]
pub struct DateParseError(pub String);

/// Calendar date of an upstream date or timestamp.
///
/// Timestamps keep the date in their own offset: `2025-03-01T23:30:00-05:00`
/// is March 1st, not March 2nd.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DateParseError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.date_naive());
    }
    // Jira: `2025-03-01T10:15:30.000+0000`
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(ts.date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(ts.date());
    }
    Err(DateParseError(raw.to_string()))
}

fn required<'r, R: Serialize>(
    kind: &'static str,
    field: &str,
    value: Option<&'r str>,
    record: &R,
) -> Result<&'r str, MalformedRecordError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MalformedRecordError::new(kind, format!("missing {field}"), record))
}

fn required_date<R: Serialize>(
    kind: &'static str,
    field: &str,
    value: Option<&str>,
    record: &R,
) -> Result<NaiveDate, MalformedRecordError> {
    let raw = required(kind, field, value, record)?;
    parse_date(raw).map_err(|e| MalformedRecordError::new(kind, format!("{field}: {e}"), record))
}

fn optional_date<R: Serialize>(
    kind: &'static str,
    field: &str,
    value: Option<&str>,
    record: &R,
) -> Result<Option<NaiveDate>, MalformedRecordError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_date(raw)
            .map(Some)
            .map_err(|e| MalformedRecordError::new(kind, format!("{field}: {e}"), record)),
    }
}

// =============================================================================
// Jira
// =============================================================================

pub fn project(raw: &RawProject) -> Result<Project, MalformedRecordError> {
    const KIND: &str = "project";
    Ok(Project {
        external_id: required(KIND, "id", raw.id.as_deref(), raw)?.to_string(),
        key: required(KIND, "key", raw.key.as_deref(), raw)?.to_string(),
        title: required(KIND, "name", raw.name.as_deref(), raw)?.to_string(),
        project_type: required(KIND, "projectTypeKey", raw.project_type_key.as_deref(), raw)?.to_string(),
    })
}

pub fn release(raw: &RawVersion, project_key: &str) -> Result<Release, MalformedRecordError> {
    const KIND: &str = "release";
    Ok(Release {
        external_id: required(KIND, "id", raw.id.as_deref(), raw)?.to_string(),
        title: required(KIND, "name", raw.name.as_deref(), raw)?.to_string(),
        description: raw
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        release_date: optional_date(KIND, "releaseDate", raw.release_date.as_deref(), raw)?,
        project_key: project_key.to_string(),
    })
}

/// A story as assigned to `release`.
pub fn story(raw: &RawIssue, release: &ReleaseRef) -> Result<Story, MalformedRecordError> {
    const KIND: &str = "story";
    let key = required(KIND, "key", raw.key.as_deref(), raw)?;
    let fields = raw
        .fields
        .as_ref()
        .ok_or_else(|| MalformedRecordError::new(KIND, "missing fields", raw))?;
    let story_type = fields.issuetype.as_ref().and_then(|t| t.name.as_deref());

    Ok(Story {
        key: key.to_string(),
        title: required(KIND, "summary", fields.summary.as_deref(), raw)?.to_string(),
        story_type: required(KIND, "issuetype", story_type, raw)?.to_string(),
        created: required_date(KIND, "created", fields.created.as_deref(), raw)?,
        resolved: optional_date(KIND, "resolutiondate", fields.resolutiondate.as_deref(), raw)?,
        release: release.clone(),
    })
}

/// Pull request identity from a tracker-reported link.
pub fn dev_pull_request_ref(raw: &RawDevPullRequest) -> Result<PullRequestRef, MalformedRecordError> {
    const KIND: &str = "linked pull request";
    let url = required(KIND, "url", raw.url.as_deref(), raw)?;
    pull_request_ref_from_url(url)
        .ok_or_else(|| MalformedRecordError::new(KIND, format!("`{url}` is not a pull request URL"), raw))
}

/// Parses `https://github.com/{org}/{repo}/pull/{n}` (trailing segments allowed).
pub fn pull_request_ref_from_url(url: &str) -> Option<PullRequestRef> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    let organization = segments.next().filter(|s| !s.is_empty())?;
    let repository = segments.next().filter(|s| !s.is_empty())?;
    if segments.next()? != "pull" {
        return None;
    }
    let number = segments.next()?.parse().ok()?;
    Some(PullRequestRef::new(organization, repository, number))
}

// =============================================================================
// GitHub
// =============================================================================

/// Date a commit landed: committer date, falling back to the author date.
pub fn commit_date(raw: &RawCommit) -> Option<NaiveDate> {
    let detail = raw.commit.as_ref()?;
    [detail.committer.as_ref(), detail.author.as_ref()]
        .into_iter()
        .flatten()
        .filter_map(|sig| sig.date.as_deref())
        .find_map(|d| parse_date(d).ok())
}

pub fn pull_request(
    raw: &RawPullRequest,
    organization: &str,
    repository: &str,
    commits: &[RawCommit],
) -> Result<PullRequest, MalformedRecordError> {
    const KIND: &str = "pull request";
    let number = raw
        .number
        .ok_or_else(|| MalformedRecordError::new(KIND, "missing number", raw))?;

    let dates: Vec<NaiveDate> = commits.iter().filter_map(commit_date).collect();

    Ok(PullRequest {
        reference: PullRequestRef::new(organization, repository, number),
        title: raw.title.as_deref().map(str::trim).unwrap_or_default().to_string(),
        opened: required_date(KIND, "created_at", raw.created_at.as_deref(), raw)?,
        closed: optional_date(KIND, "closed_at", raw.closed_at.as_deref(), raw)?,
        commit_count: u32::try_from(commits.len()).unwrap_or(u32::MAX),
        earliest_commit: dates.iter().min().copied(),
        latest_commit: dates.iter().max().copied(),
    })
}
