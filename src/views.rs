//! Read-only metric and outlier views over the store.
//!
//! Every view takes an inclusive [`ReportWindow`] and returns serializable rows
//! in a deterministic order. Nothing here writes.

use chrono::{Datelike, Months, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Row};
use serde::Serialize;

use crate::config::ReportWindow;
use crate::model::{LinkSource, PullRequestRef};
use crate::store::{placeholders, LeadTimeStore, StoreError};

/// Thresholds for the lateness outliers, in whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutlierThresholds {
    /// Outlier E: resolved more than this many days after the release.
    pub resolved_after_release_days: i64,
    /// Outlier F: opened more than this many days after the first commit.
    pub opened_after_first_commit_days: i64,
}

impl Default for OutlierThresholds {
    fn default() -> Self {
        Self {
            resolved_after_release_days: 3,
            opened_after_first_commit_days: 5,
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadTimeRow {
    pub project_key: String,
    pub release_id: String,
    pub release_title: String,
    pub release_date: NaiveDate,
    pub story_key: String,
    pub story_title: String,
    pub story_type: String,
    pub pull_request: PullRequestRef,
    pub pr_title: String,
    pub pr_url: String,
    pub earliest_commit: NaiveDate,
    pub link_source: LinkSource,
    /// May be zero or negative when work was committed on or after the release.
    pub lead_time_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadTimeSummary {
    pub project_keys: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Integer-truncated mean; 0 when there are no lead times.
    pub average_lead_time_days: i64,
    pub lead_time_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyLeadTime {
    /// `YYYY-MM`.
    pub month: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub average_lead_time_days: i64,
    pub lead_time_count: i64,
}

/// Outlier A.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectWithoutReleases {
    pub project_key: String,
    pub project_title: String,
    pub project_type: String,
}

/// Outlier B.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateStory {
    pub story_key: String,
    pub story_title: String,
    pub project_key: String,
    pub release_id: String,
    pub release_title: String,
    pub release_date: NaiveDate,
}

/// Outlier C, one row per unlinked story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryWithoutPullRequests {
    pub project_key: String,
    pub story_key: String,
    pub story_title: String,
    pub story_type: String,
    pub resolved: NaiveDate,
}

/// Outlier C, per project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoriesWithoutPullRequestsSummary {
    pub project_key: String,
    pub resolved_stories: i64,
    pub stories_without_pull_requests: i64,
    pub percent_without: i64,
}

/// Outlier D.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LateClosingPullRequest {
    pub project_key: String,
    pub release_title: String,
    pub release_date: NaiveDate,
    pub story_key: String,
    pub pull_request: PullRequestRef,
    pub pr_url: String,
    pub closed: NaiveDate,
    /// Days the pull request stayed open past the release.
    pub days_open: i64,
}

/// Outlier E.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LateResolvedStory {
    pub project_key: String,
    pub story_key: String,
    pub story_title: String,
    pub release_title: String,
    pub release_date: NaiveDate,
    pub resolved: NaiveDate,
    pub days_after_release: i64,
}

/// Stories not yet resolved on their release date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenStoryAtRelease {
    pub project_key: String,
    pub story_key: String,
    pub story_title: String,
    pub release_title: String,
    pub release_date: NaiveDate,
    /// `None` while the story is still open.
    pub resolved: Option<NaiveDate>,
}

/// Outlier F.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatePullRequest {
    pub pull_request: PullRequestRef,
    pub pr_url: String,
    pub pr_title: String,
    pub earliest_commit: NaiveDate,
    pub opened: NaiveDate,
    pub days_before_open: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTiming {
    SameDay,
    AfterRelease,
}

/// Outlier G.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitAtOrAfterRelease {
    pub project_key: String,
    pub release_title: String,
    pub release_date: NaiveDate,
    pub story_key: String,
    pub pull_request: PullRequestRef,
    pub pr_url: String,
    pub earliest_commit: NaiveDate,
    pub timing: ReleaseTiming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryTypeSummary {
    pub project_key: String,
    pub story_type: String,
    pub stories: i64,
    pub linked_stories: i64,
    pub pull_requests: i64,
}

// =============================================================================
// Queries
// =============================================================================

impl LeadTimeStore {
    /// Lead-time rows for releases dated in the window, optionally limited to projects.
    pub async fn lead_times(
        &self,
        window: ReportWindow,
        project_keys: &[String],
    ) -> Result<Vec<LeadTimeRow>, StoreError> {
        let mut args = window_args(window);
        let filter = project_filter("project_key", project_keys, &mut args);
        let sql = format!(
            "SELECT project_key, release_internal_id, release_title, release_date, story_key, story_title, \
                    story_type, pr_owner, pr_repository, pr_number, pr_title, pr_url, earliest_commit_date, \
                    link_source, lead_time_days \
             FROM lead_times \
             WHERE release_date BETWEEN ?1 AND ?2{filter} \
             ORDER BY release_date, project_key, story_key, pr_owner, pr_repository, pr_number"
        );
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), lead_time_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Mean lead time over the window, excluding work committed on or after its release.
    pub async fn average_lead_time(
        &self,
        window: ReportWindow,
        project_keys: &[String],
    ) -> Result<LeadTimeSummary, StoreError> {
        let mut args = window_args(window);
        let filter = project_filter("project_key", project_keys, &mut args);
        let sql = format!(
            "SELECT COUNT(lead_time_days), COALESCE(AVG(lead_time_days), 0.0) \
             FROM lead_times \
             WHERE release_date BETWEEN ?1 AND ?2 \
               AND earliest_commit_date < release_date{filter}"
        );
        let (count, average): (i64, f64) = self
            .with_conn(move |conn| {
                Ok(conn.query_row(&sql, params_from_iter(args.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?)
            })
            .await?;

        Ok(LeadTimeSummary {
            project_keys: project_keys.to_vec(),
            start: window.start,
            end: window.end,
            average_lead_time_days: average.trunc() as i64,
            lead_time_count: count,
        })
    }

    /// One summary per calendar month touched by the window.
    pub async fn monthly_lead_times(
        &self,
        window: ReportWindow,
        project_keys: &[String],
    ) -> Result<Vec<MonthlyLeadTime>, StoreError> {
        let mut months = Vec::new();
        for (year, month) in months_between(window.start, window.end) {
            let Some((start, end)) = month_bounds(year, month) else {
                continue;
            };
            let summary = self
                .average_lead_time(ReportWindow { start, end }, project_keys)
                .await?;
            months.push(MonthlyLeadTime {
                month: format!("{year:04}-{month:02}"),
                start,
                end,
                average_lead_time_days: summary.average_lead_time_days,
                lead_time_count: summary.lead_time_count,
            });
        }
        Ok(months)
    }

    /// Outlier A: projects with no release dated inside the window.
    pub async fn projects_without_releases(
        &self,
        window: ReportWindow,
    ) -> Result<Vec<ProjectWithoutReleases>, StoreError> {
        let args = window_args(window);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.project_key, p.project_title, p.project_type \
                 FROM projects p \
                 WHERE NOT EXISTS ( \
                     SELECT 1 FROM releases r \
                     WHERE r.project_id = p.id AND r.release_date BETWEEN ?1 AND ?2 \
                 ) \
                 ORDER BY p.project_key",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                Ok(ProjectWithoutReleases {
                    project_key: row.get(0)?,
                    project_title: row.get(1)?,
                    project_type: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Outlier B: story keys under more than one distinct release date in the window.
    pub async fn duplicate_stories(&self, window: ReportWindow) -> Result<Vec<DuplicateStory>, StoreError> {
        let args = window_args(window);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "WITH windowed AS ( \
                     SELECT s.story_key, s.story_title, p.project_key, r.release_internal_id, \
                            r.release_title, r.release_date \
                     FROM stories s \
                     JOIN releases r ON r.id = s.release_id \
                     JOIN projects p ON p.id = r.project_id \
                     WHERE r.release_date BETWEEN ?1 AND ?2 \
                 ), \
                 duplicated AS ( \
                     SELECT story_key FROM windowed \
                     GROUP BY story_key HAVING COUNT(DISTINCT release_date) > 1 \
                 ) \
                 SELECT w.story_key, w.story_title, w.project_key, w.release_internal_id, \
                        w.release_title, w.release_date \
                 FROM windowed w JOIN duplicated d ON d.story_key = w.story_key \
                 ORDER BY w.story_key, w.release_date, w.release_internal_id",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                Ok(DuplicateStory {
                    story_key: row.get(0)?,
                    story_title: row.get(1)?,
                    project_key: row.get(2)?,
                    release_id: row.get(3)?,
                    release_title: row.get(4)?,
                    release_date: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Outlier C: stories resolved in the window with no linked pull request.
    pub async fn stories_without_pull_requests(
        &self,
        window: ReportWindow,
    ) -> Result<Vec<StoryWithoutPullRequests>, StoreError> {
        let args = window_args(window);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT p.project_key, s.story_key, s.story_title, s.story_type, s.story_resolved \
                 FROM stories s \
                 JOIN releases r ON r.id = s.release_id \
                 JOIN projects p ON p.id = r.project_id \
                 WHERE s.story_resolved BETWEEN ?1 AND ?2 \
                   AND NOT EXISTS (SELECT 1 FROM stories_pull_requests spr WHERE spr.story_id = s.id) \
                 ORDER BY p.project_key, s.story_key",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                Ok(StoryWithoutPullRequests {
                    project_key: row.get(0)?,
                    story_key: row.get(1)?,
                    story_title: row.get(2)?,
                    story_type: row.get(3)?,
                    resolved: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Outlier C per project: share of resolved stories without a pull request.
    pub async fn stories_without_pull_requests_summary(
        &self,
        window: ReportWindow,
    ) -> Result<Vec<StoriesWithoutPullRequestsSummary>, StoreError> {
        let args = window_args(window);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.project_key, \
                        COUNT(DISTINCT s.story_key), \
                        COUNT(DISTINCT CASE WHEN NOT EXISTS ( \
                            SELECT 1 FROM stories_pull_requests spr WHERE spr.story_id = s.id \
                        ) THEN s.story_key END) \
                 FROM stories s \
                 JOIN releases r ON r.id = s.release_id \
                 JOIN projects p ON p.id = r.project_id \
                 WHERE s.story_resolved BETWEEN ?1 AND ?2 \
                 GROUP BY p.project_key \
                 ORDER BY p.project_key",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                let resolved: i64 = row.get(1)?;
                let without: i64 = row.get(2)?;
                Ok(StoriesWithoutPullRequestsSummary {
                    project_key: row.get(0)?,
                    resolved_stories: resolved,
                    stories_without_pull_requests: without,
                    percent_without: percent_rounded(without, resolved),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Outlier D: linked pull requests closed after their story's release.
    pub async fn late_closing_pull_requests(
        &self,
        window: ReportWindow,
    ) -> Result<Vec<LateClosingPullRequest>, StoreError> {
        let args = window_args(window);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.project_key, r.release_title, r.release_date, s.story_key, \
                        pr.pr_owner, pr.pr_repository, pr.pr_number, pr.pr_url, pr.pr_close \
                 FROM releases r \
                 JOIN projects p ON p.id = r.project_id \
                 JOIN stories s ON s.release_id = r.id \
                 JOIN stories_pull_requests spr ON spr.story_id = s.id \
                 JOIN pull_requests pr ON pr.id = spr.pr_id \
                 WHERE r.release_date BETWEEN ?1 AND ?2 \
                   AND pr.pr_close IS NOT NULL \
                   AND pr.pr_close > r.release_date \
                 ORDER BY r.release_date, p.project_key, s.story_key, pr.pr_owner, pr.pr_repository, pr.pr_number",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                let release_date: NaiveDate = row.get(2)?;
                let closed: NaiveDate = row.get(8)?;
                Ok(LateClosingPullRequest {
                    project_key: row.get(0)?,
                    release_title: row.get(1)?,
                    release_date,
                    story_key: row.get(3)?,
                    pull_request: pull_request_ref(row, 4)?,
                    pr_url: row.get(7)?,
                    closed,
                    days_open: (closed - release_date).num_days(),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Outlier E: stories resolved more than the threshold after their release.
    pub async fn late_resolved_stories(
        &self,
        window: ReportWindow,
        thresholds: OutlierThresholds,
    ) -> Result<Vec<LateResolvedStory>, StoreError> {
        let mut args = window_args(window);
        args.push(Value::Integer(thresholds.resolved_after_release_days));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.project_key, s.story_key, s.story_title, r.release_title, r.release_date, \
                        s.story_resolved \
                 FROM stories s \
                 JOIN releases r ON r.id = s.release_id \
                 JOIN projects p ON p.id = r.project_id \
                 WHERE r.release_date BETWEEN ?1 AND ?2 \
                   AND s.story_resolved IS NOT NULL \
                   AND julianday(s.story_resolved) - julianday(r.release_date) > ?3 \
                 ORDER BY r.release_date, p.project_key, s.story_key",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                let release_date: NaiveDate = row.get(4)?;
                let resolved: NaiveDate = row.get(5)?;
                Ok(LateResolvedStory {
                    project_key: row.get(0)?,
                    story_key: row.get(1)?,
                    story_title: row.get(2)?,
                    release_title: row.get(3)?,
                    release_date,
                    resolved,
                    days_after_release: (resolved - release_date).num_days(),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Stories shipped in a release dated in the window while still unresolved.
    ///
    /// Covers stories resolved after the release date and stories never resolved.
    pub async fn open_stories_at_release(
        &self,
        window: ReportWindow,
    ) -> Result<Vec<OpenStoryAtRelease>, StoreError> {
        let args = window_args(window);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.project_key, s.story_key, s.story_title, r.release_title, r.release_date, \
                        s.story_resolved \
                 FROM stories s \
                 JOIN releases r ON r.id = s.release_id \
                 JOIN projects p ON p.id = r.project_id \
                 WHERE r.release_date BETWEEN ?1 AND ?2 \
                   AND (s.story_resolved IS NULL OR s.story_resolved > r.release_date) \
                 ORDER BY r.release_date, p.project_key, s.story_key",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                Ok(OpenStoryAtRelease {
                    project_key: row.get(0)?,
                    story_key: row.get(1)?,
                    story_title: row.get(2)?,
                    release_title: row.get(3)?,
                    release_date: row.get(4)?,
                    resolved: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Outlier F: pull requests opened in the window long after their first commit.
    pub async fn late_pull_requests(
        &self,
        window: ReportWindow,
        thresholds: OutlierThresholds,
    ) -> Result<Vec<LatePullRequest>, StoreError> {
        let mut args = window_args(window);
        args.push(Value::Integer(thresholds.opened_after_first_commit_days));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT pr_owner, pr_repository, pr_number, pr_url, pr_title, earliest_commit_date, pr_open \
                 FROM pull_requests \
                 WHERE pr_open BETWEEN ?1 AND ?2 \
                   AND earliest_commit_date IS NOT NULL \
                   AND julianday(pr_open) - julianday(earliest_commit_date) > ?3 \
                 ORDER BY pr_open, pr_owner, pr_repository, pr_number",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                let earliest_commit: NaiveDate = row.get(5)?;
                let opened: NaiveDate = row.get(6)?;
                Ok(LatePullRequest {
                    pull_request: pull_request_ref(row, 0)?,
                    pr_url: row.get(3)?,
                    pr_title: row.get(4)?,
                    earliest_commit,
                    opened,
                    days_before_open: (opened - earliest_commit).num_days(),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Outlier G: linked pull requests whose first commit is on or after the release.
    pub async fn commits_at_or_after_release(
        &self,
        window: ReportWindow,
    ) -> Result<Vec<CommitAtOrAfterRelease>, StoreError> {
        let args = window_args(window);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT project_key, release_title, release_date, story_key, \
                        pr_owner, pr_repository, pr_number, pr_url, earliest_commit_date \
                 FROM lead_times \
                 WHERE release_date BETWEEN ?1 AND ?2 \
                   AND earliest_commit_date >= release_date \
                 ORDER BY release_date, project_key, story_key, pr_owner, pr_repository, pr_number",
            )?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                let release_date: NaiveDate = row.get(2)?;
                let earliest_commit: NaiveDate = row.get(8)?;
                Ok(CommitAtOrAfterRelease {
                    project_key: row.get(0)?,
                    release_title: row.get(1)?,
                    release_date,
                    story_key: row.get(3)?,
                    pull_request: pull_request_ref(row, 4)?,
                    pr_url: row.get(7)?,
                    earliest_commit,
                    timing: if earliest_commit == release_date {
                        ReleaseTiming::SameDay
                    } else {
                        ReleaseTiming::AfterRelease
                    },
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn story_type_summary(&self) -> Result<Vec<StoryTypeSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT project_key, story_type, stories, linked_stories, pull_requests \
                 FROM story_type_summary \
                 ORDER BY project_key, story_type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(StoryTypeSummary {
                    project_key: row.get(0)?,
                    story_type: row.get(1)?,
                    stories: row.get(2)?,
                    linked_stories: row.get(3)?,
                    pull_requests: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn window_args(window: ReportWindow) -> Vec<Value> {
    vec![
        Value::Text(window.start.to_string()),
        Value::Text(window.end.to_string()),
    ]
}

/// Appends the project keys to `args` and returns the matching `AND … IN (…)` clause.
fn project_filter(column: &str, project_keys: &[String], args: &mut Vec<Value>) -> String {
    if project_keys.is_empty() {
        return String::new();
    }
    let clause = format!(
        " AND {column} IN ({})",
        placeholders(project_keys.len(), args.len() + 1)
    );
    args.extend(project_keys.iter().cloned().map(Value::Text));
    clause
}

fn pull_request_ref(row: &Row<'_>, first: usize) -> rusqlite::Result<PullRequestRef> {
    Ok(PullRequestRef::new(
        row.get::<_, String>(first)?,
        row.get::<_, String>(first + 1)?,
        row.get::<_, i64>(first + 2)? as u64,
    ))
}

fn lead_time_from_row(row: &Row<'_>) -> rusqlite::Result<LeadTimeRow> {
    let source: String = row.get(13)?;
    Ok(LeadTimeRow {
        project_key: row.get(0)?,
        release_id: row.get(1)?,
        release_title: row.get(2)?,
        release_date: row.get(3)?,
        story_key: row.get(4)?,
        story_title: row.get(5)?,
        story_type: row.get(6)?,
        pull_request: pull_request_ref(row, 7)?,
        pr_title: row.get(10)?,
        pr_url: row.get(11)?,
        earliest_commit: row.get(12)?,
        link_source: LinkSource::from_str(&source),
        lead_time_days: row.get(14)?,
    })
}

/// `100 × part / whole`, rounded half away from zero; 0 for an empty whole.
pub fn percent_rounded(part: i64, whole: i64) -> i64 {
    if whole == 0 {
        return 0;
    }
    (100.0 * part as f64 / whole as f64).round() as i64
}

/// `(year, month)` pairs from the month of `start` through the month of `end`.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    let Some(mut cursor) = start.with_day(1) else {
        return months;
    };
    while cursor <= end {
        months.push((cursor.year(), cursor.month()));
        match cursor.checked_add_months(Months::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    months
}

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn percent_rounds_half_away_from_zero() {
        assert_eq!(percent_rounded(2, 3), 67);
        assert_eq!(percent_rounded(1, 3), 33);
        assert_eq!(percent_rounded(1, 8), 13);
        assert_eq!(percent_rounded(0, 0), 0);
    }

    #[test]
    fn months_between_is_inclusive_of_partial_months() {
        assert_eq!(
            months_between(date("2024-11-15"), date("2025-02-03")),
            vec![(2024, 11), (2024, 12), (2025, 1), (2025, 2)]
        );
        assert_eq!(months_between(date("2025-03-31"), date("2025-03-31")), vec![(2025, 3)]);
    }

    #[test]
    fn month_bounds_handle_leap_years() {
        assert_eq!(
            month_bounds(2024, 2),
            Some((date("2024-02-01"), date("2024-02-29")))
        );
        assert_eq!(
            month_bounds(2025, 12),
            Some((date("2025-12-01"), date("2025-12-31")))
        );
        assert_eq!(month_bounds(2025, 13), None);
    }
}
