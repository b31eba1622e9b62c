//! Raw record shapes as returned by the Jira and GitHub REST APIs.
//!
//! Every field is optional: the normalizer decides what is required and reports
//! the offending record when something is missing.

use serde::{Deserialize, Serialize};

// =============================================================================
// JIRA
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProject {
    pub id: Option<String>,
    pub key: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "projectTypeKey")]
    pub project_type_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawVersion {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "releaseDate")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub released: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIssue {
    pub id: Option<String>,
    pub key: Option<String>,
    pub fields: Option<RawIssueFields>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIssueFields {
    pub summary: Option<String>,
    pub issuetype: Option<RawIssueType>,
    pub created: Option<String>,
    pub resolutiondate: Option<String>,
    #[serde(rename = "fixVersions", default)]
    pub fix_versions: Vec<RawFixVersion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIssueType {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFixVersion {
    pub id: Option<String>,
}

/// A pull request reported by Jira's development-information panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDevPullRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
}

/// `startAt`/`maxResults` page used by `project/search` and `project/{key}/version`.
#[derive(Debug, Deserialize)]
pub(crate) struct ValuesPage<T> {
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
    #[serde(rename = "isLast")]
    pub is_last: Option<bool>,
    pub total: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchPage {
    #[serde(default)]
    pub issues: Vec<serde_json::Value>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueId {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DevStatusDetail {
    #[serde(default)]
    pub detail: Vec<DevStatusRepository>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DevStatusRepository {
    #[serde(rename = "pullRequests", default)]
    pub pull_requests: Vec<RawDevPullRequest>,
}

// =============================================================================
// GITHUB
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPullRequest {
    pub number: Option<u64>,
    pub title: Option<String>,
    pub created_at: Option<String>,
    pub closed_at: Option<String>,
    pub merged_at: Option<String>,
    pub updated_at: Option<String>,
    pub user: Option<RawUser>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUser {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCommit {
    pub sha: Option<String>,
    pub commit: Option<RawCommitDetail>,
    pub author: Option<RawUser>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCommitDetail {
    pub message: Option<String>,
    pub author: Option<RawSignature>,
    pub committer: Option<RawSignature>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSignature {
    pub name: Option<String>,
    pub date: Option<String>,
}

impl RawCommit {
    pub fn message(&self) -> Option<&str> {
        self.commit.as_ref().and_then(|c| c.message.as_deref())
    }
}
