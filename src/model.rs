//! Delivery entities shared by the upstream clients, the store, and the views.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Web host used to build canonical pull request URLs.
pub const GITHUB_WEB_URL: &str = "https://github.com";

// =============================================================================
// Issue tracker entities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub external_id: String,
    pub key: String,
    pub title: String,
    pub project_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Releases without a date are kept for outlier detection but never produce lead times.
    pub release_date: Option<NaiveDate>,
    pub project_key: String,
}

impl Release {
    pub fn reference(&self) -> ReleaseRef {
        ReleaseRef {
            project_key: self.project_key.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

/// Natural key of a release: its external id is only unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub project_key: String,
    pub external_id: String,
}

impl fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_key, self.external_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub key: String,
    pub title: String,
    pub story_type: String,
    pub created: NaiveDate,
    pub resolved: Option<NaiveDate>,
    pub release: ReleaseRef,
}

// =============================================================================
// Source control entities
// =============================================================================

/// The identifying triple of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub organization: String,
    pub repository: String,
    pub number: u64,
}

impl PullRequestRef {
    pub fn new(organization: impl Into<String>, repository: impl Into<String>, number: u64) -> Self {
        Self {
            organization: organization.into(),
            repository: repository.into(),
            number,
        }
    }

    /// Canonical browser URL; derived from the triple, never stored on its own.
    pub fn url(&self) -> String {
        format!(
            "{GITHUB_WEB_URL}/{}/{}/pull/{}",
            self.organization, self.repository, self.number
        )
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.organization, self.repository, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub reference: PullRequestRef,
    pub title: String,
    pub opened: NaiveDate,
    pub closed: Option<NaiveDate>,
    pub commit_count: u32,
    pub earliest_commit: Option<NaiveDate>,
    pub latest_commit: Option<NaiveDate>,
}

impl PullRequest {
    pub fn url(&self) -> String {
        self.reference.url()
    }
}

/// A repository scanned for textual issue references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub organization: String,
    pub repository: String,
}

impl RepositoryRef {
    /// Parses `org/repo`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (organization, repository) = raw.trim().split_once('/')?;
        let (organization, repository) = (organization.trim(), repository.trim());
        if organization.is_empty() || repository.is_empty() || repository.contains('/') {
            return None;
        }
        Some(Self {
            organization: organization.to_string(),
            repository: repository.to_string(),
        })
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization, self.repository)
    }
}

// =============================================================================
// Links
// =============================================================================

/// Which lineage signal produced a story ↔ pull request link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    /// Reported by the issue tracker's development integration.
    Native,
    /// Issue key found in a pull request title or commit subject.
    Text,
}

impl LinkSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Text => "text",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "native" => Self::Native,
            _ => Self::Text,
        }
    }
}

/// Whole days from the earliest commit to the release, counting both ends.
pub fn lead_time_days(release_date: NaiveDate, earliest_commit: NaiveDate) -> i64 {
    (release_date - earliest_commit).num_days() + 1
}
