#![forbid(unsafe_code)]

//! # dora-lead-time
//!
//! Lead time for changes, measured from the first commit of a pull request to
//! the release that shipped the story it implements.
//!
//! A sync pulls projects, released versions, and stories from Jira, pull
//! requests and commits from GitHub, links stories to pull requests (Jira's
//! development panel plus issue keys found in titles and commit subjects), and
//! upserts everything into SQLite. Lead times and the outlier reports that
//! explain them are read-time queries over that store.

pub mod config;
pub mod lineage;
pub mod model;
pub mod normalize;
pub mod store;
pub mod sync;
pub mod upstream;
pub mod views;

pub use config::{Config, ConfigError, ReportWindow};
pub use lineage::{IssueKeyMatcher, LinkCandidate, LinkSet};
pub use model::{
    lead_time_days, LinkSource, Project, PullRequest, PullRequestRef, Release, ReleaseRef,
    RepositoryRef, Story,
};
pub use normalize::MalformedRecordError;
pub use store::{LeadTimeStore, StoreError, SyncLock, TableCounts};
pub use sync::{SyncEngine, SyncError, SyncOptions, SyncReport};
pub use upstream::{
    GitHubClient, IssueTracker, JiraClient, RetryPolicy, SourceControl, UpstreamError,
};
pub use views::{LeadTimeRow, LeadTimeSummary, MonthlyLeadTime, OutlierThresholds};
