//! Synchronization pipeline: issue tracker and source control into the store.
//!
//! A run walks projects → releases → stories sequentially, then resolves
//! lineage from both signals and persists the links. Failures are scoped:
//! a malformed record is skipped, a rejected GitHub organization is recorded
//! and the run continues with the others, and anything else aborts the run
//! leaving already-upserted rows in place.

use std::collections::BTreeSet;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ReportWindow};
use crate::lineage::{native_candidates, text_candidates, IssueKeyMatcher, LinkSet};
use crate::model::{LinkSource, PullRequest, PullRequestRef, Release, RepositoryRef};
use crate::normalize::{self, MalformedRecordError};
use crate::store::{LeadTimeStore, StoreError};
use crate::upstream::{IssueTracker, RawPullRequest, SourceControl, UpstreamError};

/// Progress is logged every this many stories or pull requests.
const PROGRESS_EVERY: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Re-fetch native links for every story, not only for stories never fetched.
    pub refresh_links: bool,
    /// Repositories scanned for issue keys in pull request titles and commits.
    pub repositories: Vec<RepositoryRef>,
}

/// What a run wrote and what it skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub start: Option<chrono::NaiveDate>,
    pub end: Option<chrono::NaiveDate>,
    pub projects: usize,
    pub releases: usize,
    pub stories: usize,
    pub pull_requests: usize,
    pub native_links: usize,
    pub text_links: usize,
    pub malformed_records: usize,
    pub orphan_links: usize,
    pub missing_resources: usize,
    pub failed_organizations: BTreeSet<String>,
    pub unconfigured_organizations: BTreeSet<String>,
}

impl SyncReport {
    fn for_window(window: ReportWindow) -> Self {
        Self {
            start: Some(window.start),
            end: Some(window.end),
            ..Self::default()
        }
    }

    fn organization_blocked(&self, organization: &str) -> bool {
        self.failed_organizations.contains(organization)
            || self.unconfigured_organizations.contains(organization)
    }
}

/// A pull request fetched this run, with the commit messages used for key matching.
struct FetchedPullRequest {
    pull_request: PullRequest,
    commit_messages: Vec<String>,
}

/// Pull requests already handled this run; each is fetched at most once.
#[derive(Default)]
struct PullRequestLedger {
    attempted: BTreeSet<PullRequestRef>,
    stored: BTreeSet<PullRequestRef>,
}

pub struct SyncEngine<I, S> {
    tracker: I,
    source: S,
    store: LeadTimeStore,
    window: ReportWindow,
    options: SyncOptions,
}

impl<I, S> SyncEngine<I, S>
where
    I: IssueTracker,
    S: SourceControl,
{
    pub fn new(tracker: I, source: S, store: LeadTimeStore, window: ReportWindow) -> Self {
        Self {
            tracker,
            source,
            store,
            window,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &LeadTimeStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs one full sync under the store's run lock.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let _lock = self.store.lock_exclusive()?;
        let mut report = SyncReport::for_window(self.window);
        info!(window = %self.window, db = %self.store.path().display(), "starting sync");

        for project_key in self.sync_projects(&mut report).await? {
            for release in self.sync_releases(&project_key, &mut report).await? {
                self.sync_stories(&release, &mut report).await?;
            }
        }

        let project_keys = self
            .store
            .projects_by_type(&[])
            .await?
            .into_iter()
            .map(|p| p.key);
        let matcher = IssueKeyMatcher::for_projects(project_keys);

        let mut links = LinkSet::new();
        let mut ledger = PullRequestLedger::default();
        let fetched_keys = self
            .collect_native_links(&matcher, &mut links, &mut ledger, &mut report)
            .await?;
        self.scan_repositories(&matcher, &mut links, &mut ledger, &mut report)
            .await?;
        self.persist_links(links, &mut report).await?;

        for key in &fetched_keys {
            self.store.mark_links_fetched(key).await?;
        }
        self.store.refresh_link_counts().await?;

        info!(
            projects = report.projects,
            releases = report.releases,
            stories = report.stories,
            pull_requests = report.pull_requests,
            native_links = report.native_links,
            text_links = report.text_links,
            malformed = report.malformed_records,
            orphan_links = report.orphan_links,
            "sync complete"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Issue tracker
    // -------------------------------------------------------------------------

    async fn sync_projects(&self, report: &mut SyncReport) -> Result<Vec<String>, SyncError> {
        info!("syncing projects");
        let mut keys = Vec::new();
        let mut projects = self.tracker.fetch_projects();
        while let Some(item) = projects.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(UpstreamError::MalformedRecord(err)) => {
                    skip_malformed(err, report);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match normalize::project(&raw) {
                Ok(project) => {
                    self.store.upsert_project(&project).await?;
                    report.projects += 1;
                    keys.push(project.key);
                }
                Err(err) => skip_malformed(err, report),
            }
        }
        info!(count = keys.len(), "projects synced");
        Ok(keys)
    }

    async fn sync_releases(&self, project_key: &str, report: &mut SyncReport) -> Result<Vec<Release>, SyncError> {
        let mut releases = Vec::new();
        let mut versions = self.tracker.fetch_releases(project_key, self.window);
        while let Some(item) = versions.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(UpstreamError::MalformedRecord(err)) => {
                    skip_malformed(err, report);
                    continue;
                }
                Err(err) if matches!(err.root(), UpstreamError::NotFound { .. }) => {
                    warn!(project = project_key, error = %err, "project versions unavailable, skipping");
                    report.missing_resources += 1;
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            match normalize::release(&raw, project_key) {
                Ok(release) => {
                    self.store.upsert_release(&release).await?;
                    report.releases += 1;
                    releases.push(release);
                }
                Err(err) => skip_malformed(err, report),
            }
        }
        debug!(project = project_key, count = releases.len(), "releases synced");
        Ok(releases)
    }

    async fn sync_stories(&self, release: &Release, report: &mut SyncReport) -> Result<(), SyncError> {
        let reference = release.reference();
        let mut stories = self.tracker.fetch_stories(&release.external_id);
        while let Some(item) = stories.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(UpstreamError::MalformedRecord(err)) => {
                    skip_malformed(err, report);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match normalize::story(&raw, &reference) {
                Ok(story) => {
                    self.store.upsert_story(&story).await?;
                    report.stories += 1;
                    if report.stories % PROGRESS_EVERY == 0 {
                        info!(stories = report.stories, "stories synced so far");
                    }
                }
                Err(err) => skip_malformed(err, report),
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lineage
    // -------------------------------------------------------------------------

    /// Native links for stories not yet fetched (or all, when refreshing).
    ///
    /// Returns the keys whose links were fetched completely.
    async fn collect_native_links(
        &self,
        matcher: &IssueKeyMatcher,
        links: &mut LinkSet,
        ledger: &mut PullRequestLedger,
        report: &mut SyncReport,
    ) -> Result<Vec<String>, SyncError> {
        let keys = if self.options.refresh_links {
            self.store.story_keys().await?
        } else {
            self.store.story_keys_pending_links().await?
        };
        info!(stories = keys.len(), "fetching native development links");

        let mut fetched = Vec::new();
        let mut without_links = 0;
        for (processed, key) in keys.iter().enumerate() {
            let reported = match self.tracker.fetch_linked_pull_requests(key).await {
                Ok(reported) => reported,
                Err(err) if matches!(err.root(), UpstreamError::NotFound { .. }) => {
                    warn!(story = %key, error = %err, "story no longer available, skipping");
                    report.missing_resources += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if reported.is_empty() {
                without_links += 1;
            }

            let mut complete = true;
            for raw in &reported {
                let reference = match normalize::dev_pull_request_ref(raw) {
                    Ok(reference) => reference,
                    Err(err) => {
                        skip_malformed(err, report);
                        continue;
                    }
                };
                if ledger.attempted.insert(reference.clone()) {
                    if let Some(fetched) = self.fetch_by_reference(&reference, report).await? {
                        self.record_pull_request(fetched, matcher, links, report).await?;
                        ledger.stored.insert(reference.clone());
                    }
                }
                if ledger.stored.contains(&reference) {
                    links.extend(native_candidates(key, [reference]));
                } else {
                    complete = false;
                }
            }
            if complete {
                fetched.push(key.clone());
            }

            if (processed + 1) % PROGRESS_EVERY == 0 {
                info!(processed = processed + 1, without_links, "stories processed");
            }
        }
        info!(processed = keys.len(), without_links, "native links fetched");
        Ok(fetched)
    }

    /// Textual signal: pull requests of the configured repositories active in the window.
    async fn scan_repositories(
        &self,
        matcher: &IssueKeyMatcher,
        links: &mut LinkSet,
        ledger: &mut PullRequestLedger,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for repo in &self.options.repositories {
            if report.organization_blocked(&repo.organization) {
                continue;
            }
            info!(repository = %repo, "scanning pull requests for issue keys");
            let mut scanned = 0;
            let mut pulls = self
                .source
                .fetch_pull_requests(&repo.organization, &repo.repository, self.window);
            while let Some(item) = pulls.next().await {
                let raw = match item {
                    Ok(raw) => raw,
                    Err(UpstreamError::MalformedRecord(err)) => {
                        skip_malformed(err, report);
                        continue;
                    }
                    Err(err) => {
                        absorb_organization_error(err, &repo.organization, report)?;
                        break;
                    }
                };
                let Some(number) = raw.number else {
                    skip_malformed_raw("pull request", "missing number", &raw, report);
                    continue;
                };
                let reference = PullRequestRef::new(&repo.organization, &repo.repository, number);
                scanned += 1;
                if scanned % PROGRESS_EVERY == 0 {
                    info!(repository = %repo, scanned, "pull requests scanned");
                }
                if !ledger.attempted.insert(reference.clone()) {
                    continue;
                }
                if let Some(fetched) = self.fetch_details(&reference, &raw, report).await? {
                    self.record_pull_request(fetched, matcher, links, report).await?;
                    ledger.stored.insert(reference);
                }
            }
            debug!(repository = %repo, scanned, "repository scanned");
        }
        Ok(())
    }

    async fn persist_links(&self, links: LinkSet, report: &mut SyncReport) -> Result<(), SyncError> {
        info!(candidates = links.len(), "persisting links");
        for candidate in links.resolve() {
            match self
                .store
                .link(&candidate.story_key, &candidate.pull_request, candidate.source)
                .await
            {
                Ok(_) => match candidate.source {
                    LinkSource::Native => report.native_links += 1,
                    LinkSource::Text => report.text_links += 1,
                },
                Err(StoreError::ReferentialIntegrity(reason)) => {
                    debug!(story = %candidate.story_key, pull_request = %candidate.pull_request, %reason, "orphan link skipped");
                    report.orphan_links += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        if report.orphan_links > 0 {
            warn!(orphan_links = report.orphan_links, "links referencing unknown stories were skipped");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Source control
    // -------------------------------------------------------------------------

    async fn fetch_by_reference(
        &self,
        reference: &PullRequestRef,
        report: &mut SyncReport,
    ) -> Result<Option<FetchedPullRequest>, SyncError> {
        if report.organization_blocked(&reference.organization) {
            return Ok(None);
        }
        match self.source.fetch_pull_request(reference).await {
            Ok(raw) => self.fetch_details(reference, &raw, report).await,
            Err(err) => {
                absorb_organization_error(err, &reference.organization, report)?;
                Ok(None)
            }
        }
    }

    /// Fetches commits and normalizes; `None` when the pull request had to be skipped.
    async fn fetch_details(
        &self,
        reference: &PullRequestRef,
        raw: &RawPullRequest,
        report: &mut SyncReport,
    ) -> Result<Option<FetchedPullRequest>, SyncError> {
        let mut commits = Vec::new();
        let mut pages = self.source.fetch_commits(reference);
        while let Some(item) = pages.next().await {
            match item {
                Ok(commit) => commits.push(commit),
                Err(UpstreamError::MalformedRecord(err)) => skip_malformed(err, report),
                Err(err) => {
                    absorb_organization_error(err, &reference.organization, report)?;
                    return Ok(None);
                }
            }
        }
        match normalize::pull_request(raw, &reference.organization, &reference.repository, &commits) {
            Ok(pull_request) => Ok(Some(FetchedPullRequest {
                pull_request,
                commit_messages: commits
                    .iter()
                    .filter_map(|c| c.message())
                    .map(str::to_string)
                    .collect(),
            })),
            Err(err) => {
                skip_malformed(err, report);
                Ok(None)
            }
        }
    }

    /// Stores a fetched pull request and adds its textual candidates.
    async fn record_pull_request(
        &self,
        fetched: FetchedPullRequest,
        matcher: &IssueKeyMatcher,
        links: &mut LinkSet,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let pr = &fetched.pull_request;
        self.store.upsert_pull_request(pr).await?;
        report.pull_requests += 1;
        if report.pull_requests % PROGRESS_EVERY == 0 {
            info!(pull_requests = report.pull_requests, "pull requests synced so far");
        }
        links.extend(text_candidates(
            matcher,
            &pr.reference,
            &pr.title,
            fetched.commit_messages.iter().map(String::as_str),
        ));
        Ok(())
    }
}

fn skip_malformed(err: MalformedRecordError, report: &mut SyncReport) {
    warn!(kind = err.kind, reason = %err.reason, record = %err.record, "skipping malformed record");
    report.malformed_records += 1;
}

fn skip_malformed_raw<R: Serialize>(kind: &'static str, reason: &str, raw: &R, report: &mut SyncReport) {
    let record = serde_json::to_value(raw).unwrap_or(serde_json::Value::Null);
    warn!(kind, reason, %record, "skipping malformed record");
    report.malformed_records += 1;
}

/// Absorbs failures scoped to one GitHub organization; anything else is fatal.
fn absorb_organization_error(
    err: UpstreamError,
    organization: &str,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    match err.root() {
        UpstreamError::Authentication { .. } => {
            warn!(organization, error = %err, "credentials rejected, skipping organization");
            report.failed_organizations.insert(organization.to_string());
            Ok(())
        }
        UpstreamError::Config(_) => {
            warn!(organization, error = %err, "organization has no token, skipping");
            report.unconfigured_organizations.insert(organization.to_string());
            Ok(())
        }
        UpstreamError::NotFound { .. } => {
            warn!(organization, error = %err, "resource not found, skipping");
            report.missing_resources += 1;
            Ok(())
        }
        _ => Err(err.into()),
    }
}
