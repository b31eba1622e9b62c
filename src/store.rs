//! SQLite-backed store for projects, releases, stories, pull requests, and their links.
//!
//! Every write is an upsert on the entity's natural key, so re-running a sync
//! over the same window converges on the same rows. Lead times are never
//! stored; the `lead_times` view derives them at read time.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use fs2::FileExt;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::model::{LinkSource, Project, PullRequest, PullRequestRef, Release, Story};

// =============================================================================
// Error
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(String),
    #[error("store is closed")]
    Closed,
    #[error("another sync holds the lock on {0}")]
    Locked(PathBuf),
    /// A write referenced a row that does not exist; nothing was written.
    #[error("referential integrity: {0}")]
    ReferentialIntegrity(String),
}

// =============================================================================
// Rows
// =============================================================================

/// Row counts per table, used by sync reports and idempotence checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub projects: i64,
    pub releases: i64,
    pub stories: i64,
    pub pull_requests: i64,
    pub links: i64,
    pub link_counts: i64,
}

// =============================================================================
// Store
// =============================================================================

#[derive(Clone)]
pub struct LeadTimeStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    /// Only one blocking thread waits on the mutex at a time.
    sem: Arc<Semaphore>,
}

impl std::fmt::Debug for LeadTimeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadTimeStore").field("path", &self.path).finish()
    }
}

impl LeadTimeStore {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             PRAGMA foreign_keys=ON; \
             PRAGMA busy_timeout=5000;",
        )?;
        apply_schema(&conn)?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            sem: Arc::new(Semaphore::new(1)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the advisory run lock next to the database file without waiting.
    pub fn lock_exclusive(&self) -> Result<SyncLock, StoreError> {
        SyncLock::acquire(&self.path)
    }

    /// Runs `f` on the blocking pool with exclusive access to the connection.
    pub(crate) async fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self.sem.acquire().await.map_err(|_| StoreError::Closed)?;
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            // A panic while holding the lock leaves the connection itself usable.
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Re-applies the schema; safe to call any number of times.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        self.with_conn(apply_schema).await
    }

    // -------------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------------

    pub async fn upsert_project(&self, project: &Project) -> Result<i64, StoreError> {
        let project = project.clone();
        self.with_conn(move |conn| {
            let id = conn.query_row(
                "INSERT INTO projects (project_internal_id, project_key, project_title, project_type, \
                                       created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
                 ON CONFLICT(project_internal_id) DO UPDATE SET \
                    project_key = excluded.project_key, \
                    project_title = excluded.project_title, \
                    updated_at = excluded.updated_at \
                 RETURNING id",
                params![
                    project.external_id,
                    project.key,
                    project.title,
                    project.project_type,
                    now_epoch(),
                ],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    /// Reassigns the type of the given projects; returns how many rows changed.
    pub async fn set_project_type(&self, project_keys: &[String], project_type: &str) -> Result<usize, StoreError> {
        let keys = project_keys.to_vec();
        let project_type = project_type.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "UPDATE projects SET project_type = ?1, updated_at = ?2 WHERE project_key = ?3",
            )?;
            let now = now_epoch();
            let mut changed = 0;
            for key in &keys {
                changed += stmt.execute(params![project_type, now, key])?;
            }
            Ok(changed)
        })
        .await
    }

    /// Projects whose type is one of `types`, ordered by title; all projects when `types` is empty.
    pub async fn projects_by_type(&self, types: &[String]) -> Result<Vec<Project>, StoreError> {
        let types = types.to_vec();
        self.with_conn(move |conn| {
            let sql = if types.is_empty() {
                "SELECT project_internal_id, project_key, project_title, project_type \
                 FROM projects ORDER BY project_title"
                    .to_string()
            } else {
                format!(
                    "SELECT project_internal_id, project_key, project_title, project_type \
                     FROM projects WHERE project_type IN ({}) ORDER BY project_title",
                    placeholders(types.len(), 1)
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(types.iter()), project_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Releases and stories
    // -------------------------------------------------------------------------

    pub async fn upsert_release(&self, release: &Release) -> Result<i64, StoreError> {
        let release = release.clone();
        self.with_conn(move |conn| {
            let project_id: i64 = conn
                .query_row(
                    "SELECT id FROM projects WHERE project_key = ?1",
                    params![release.project_key],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    StoreError::ReferentialIntegrity(format!(
                        "release {} references unknown project {}",
                        release.external_id, release.project_key
                    ))
                })?;

            let id = conn.query_row(
                "INSERT INTO releases (release_internal_id, release_title, release_description, release_date, \
                                       project_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
                 ON CONFLICT(release_internal_id, project_id) DO UPDATE SET \
                    release_title = excluded.release_title, \
                    release_description = excluded.release_description, \
                    release_date = excluded.release_date, \
                    updated_at = excluded.updated_at \
                 RETURNING id",
                params![
                    release.external_id,
                    release.title,
                    release.description,
                    release.release_date,
                    project_id,
                    now_epoch(),
                ],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    /// Upserts one (story key, release) row.
    ///
    /// A row that is new for an already linked key inherits the key's links.
    pub async fn upsert_story(&self, story: &Story) -> Result<i64, StoreError> {
        let story = story.clone();
        self.with_conn(move |conn| {
            let release_id: i64 = conn
                .query_row(
                    "SELECT r.id FROM releases r JOIN projects p ON p.id = r.project_id \
                     WHERE p.project_key = ?1 AND r.release_internal_id = ?2",
                    params![story.release.project_key, story.release.external_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    StoreError::ReferentialIntegrity(format!(
                        "story {} references unknown release {}",
                        story.key, story.release
                    ))
                })?;

            let tx = conn.unchecked_transaction()?;
            let existed = tx
                .query_row(
                    "SELECT 1 FROM stories WHERE story_key = ?1 AND release_id = ?2",
                    params![story.key, release_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            let now = now_epoch();
            let id: i64 = tx.query_row(
                "INSERT INTO stories (story_key, story_title, story_type, story_created, story_resolved, \
                                      release_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
                 ON CONFLICT(story_key, release_id) DO UPDATE SET \
                    story_title = excluded.story_title, \
                    story_type = excluded.story_type, \
                    story_created = excluded.story_created, \
                    story_resolved = excluded.story_resolved, \
                    updated_at = excluded.updated_at \
                 RETURNING id",
                params![
                    story.key,
                    story.title,
                    story.story_type,
                    story.created,
                    story.resolved,
                    release_id,
                    now,
                ],
                |row| row.get(0),
            )?;

            // A new row for an already linked key joins the same pull requests.
            if !existed {
                tx.execute(
                    "INSERT INTO stories_pull_requests (story_id, pr_id, link_source, created_at, updated_at) \
                     SELECT ?1, spr.pr_id, MIN(spr.link_source), ?3, ?3 \
                     FROM stories s JOIN stories_pull_requests spr ON spr.story_id = s.id \
                     WHERE s.story_key = ?2 AND s.id != ?1 \
                     GROUP BY spr.pr_id \
                     ON CONFLICT(story_id, pr_id) DO NOTHING",
                    params![id, story.key, now],
                )?;
            }
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    /// Distinct story keys, sorted.
    pub async fn story_keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT story_key FROM stories ORDER BY story_key")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<Result<Vec<String>, _>>()?)
        })
        .await
    }

    /// Story keys whose native development links were never fetched.
    pub async fn story_keys_pending_links(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT s.story_key FROM stories s \
                 LEFT JOIN story_pull_request_counts c ON c.story_key = s.story_key \
                 WHERE c.id IS NULL \
                 ORDER BY s.story_key",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<Result<Vec<String>, _>>()?)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Pull requests
    // -------------------------------------------------------------------------

    pub async fn upsert_pull_request(&self, pull_request: &PullRequest) -> Result<i64, StoreError> {
        let pr = pull_request.clone();
        self.with_conn(move |conn| {
            let id = conn.query_row(
                "INSERT INTO pull_requests (pr_owner, pr_repository, pr_number, pr_title, pr_open, pr_close, \
                                            commit_count, earliest_commit_date, latest_commit_date, \
                                            created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10) \
                 ON CONFLICT(pr_owner, pr_repository, pr_number) DO UPDATE SET \
                    pr_title = excluded.pr_title, \
                    pr_open = excluded.pr_open, \
                    pr_close = excluded.pr_close, \
                    commit_count = excluded.commit_count, \
                    earliest_commit_date = excluded.earliest_commit_date, \
                    latest_commit_date = excluded.latest_commit_date, \
                    updated_at = excluded.updated_at \
                 RETURNING id",
                params![
                    pr.reference.organization,
                    pr.reference.repository,
                    pr.reference.number as i64,
                    pr.title,
                    pr.opened,
                    pr.closed,
                    pr.commit_count,
                    pr.earliest_commit,
                    pr.latest_commit,
                    now_epoch(),
                ],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    pub async fn get_pull_request(&self, reference: &PullRequestRef) -> Result<Option<PullRequest>, StoreError> {
        let reference = reference.clone();
        self.with_conn(move |conn| {
            let pr = conn
                .query_row(
                    "SELECT pr_owner, pr_repository, pr_number, pr_title, pr_open, pr_close, \
                            commit_count, earliest_commit_date, latest_commit_date \
                     FROM pull_requests \
                     WHERE pr_owner = ?1 AND pr_repository = ?2 AND pr_number = ?3",
                    params![reference.organization, reference.repository, reference.number as i64],
                    pull_request_from_row,
                )
                .optional()?;
            Ok(pr)
        })
        .await
    }

    /// The URL SQLite derives for a stored pull request.
    pub async fn pull_request_url(&self, reference: &PullRequestRef) -> Result<Option<String>, StoreError> {
        let reference = reference.clone();
        self.with_conn(move |conn| {
            let url = conn
                .query_row(
                    "SELECT pr_url FROM pull_requests \
                     WHERE pr_owner = ?1 AND pr_repository = ?2 AND pr_number = ?3",
                    params![reference.organization, reference.repository, reference.number as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(url)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    /// Links every story row with `story_key` to the pull request, atomically.
    ///
    /// Returns the number of story rows linked. Fails with
    /// [`StoreError::ReferentialIntegrity`] when the key or the pull request is
    /// unknown. A native link is never downgraded to text.
    pub async fn link(
        &self,
        story_key: &str,
        reference: &PullRequestRef,
        source: LinkSource,
    ) -> Result<usize, StoreError> {
        let story_key = story_key.to_string();
        let reference = reference.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;

            let pr_id: i64 = tx
                .query_row(
                    "SELECT id FROM pull_requests \
                     WHERE pr_owner = ?1 AND pr_repository = ?2 AND pr_number = ?3",
                    params![reference.organization, reference.repository, reference.number as i64],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    StoreError::ReferentialIntegrity(format!("unknown pull request {reference}"))
                })?;

            let story_ids: Vec<i64> = {
                let mut stmt = tx.prepare("SELECT id FROM stories WHERE story_key = ?1 ORDER BY id")?;
                let rows = stmt.query_map(params![story_key], |row| row.get(0))?;
                let ids = rows.collect::<Result<Vec<i64>, _>>()?;
                ids
            };
            if story_ids.is_empty() {
                return Err(StoreError::ReferentialIntegrity(format!("unknown story {story_key}")));
            }

            let now = now_epoch();
            for story_id in &story_ids {
                tx.execute(
                    "INSERT INTO stories_pull_requests (story_id, pr_id, link_source, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4) \
                     ON CONFLICT(story_id, pr_id) DO UPDATE SET \
                        link_source = CASE \
                            WHEN stories_pull_requests.link_source = 'native' THEN 'native' \
                            ELSE excluded.link_source \
                        END, \
                        updated_at = excluded.updated_at",
                    params![story_id, pr_id, source.as_str(), now],
                )?;
            }
            tx.commit()?;
            Ok(story_ids.len())
        })
        .await
    }

    /// Pull requests linked to a story key, with the link source.
    pub async fn links_for_story(&self, story_key: &str) -> Result<Vec<(PullRequestRef, LinkSource)>, StoreError> {
        let story_key = story_key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT pr.pr_owner, pr.pr_repository, pr.pr_number, MIN(spr.link_source) \
                 FROM stories s \
                 JOIN stories_pull_requests spr ON spr.story_id = s.id \
                 JOIN pull_requests pr ON pr.id = spr.pr_id \
                 WHERE s.story_key = ?1 \
                 GROUP BY pr.id \
                 ORDER BY pr.pr_owner, pr.pr_repository, pr.pr_number",
            )?;
            let rows = stmt.query_map(params![story_key], |row| {
                let source: String = row.get(3)?;
                Ok((
                    PullRequestRef::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as u64,
                    ),
                    LinkSource::from_str(&source),
                ))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Records that a story's native links were fetched, with its current link count.
    pub async fn mark_links_fetched(&self, story_key: &str) -> Result<(), StoreError> {
        let story_key = story_key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO story_pull_request_counts (story_key, pr_count, created_at, updated_at) \
                 SELECT ?1, COUNT(DISTINCT spr.pr_id), ?2, ?2 \
                 FROM stories s LEFT JOIN stories_pull_requests spr ON spr.story_id = s.id \
                 WHERE s.story_key = ?1 \
                 ON CONFLICT(story_key) DO UPDATE SET \
                    pr_count = excluded.pr_count, \
                    updated_at = excluded.updated_at",
                params![story_key, now_epoch()],
            )?;
            Ok(())
        })
        .await
    }

    /// Recomputes every cached link count; returns the number of keys refreshed.
    pub async fn refresh_link_counts(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE story_pull_request_counts SET \
                    pr_count = ( \
                        SELECT COUNT(DISTINCT spr.pr_id) \
                        FROM stories s JOIN stories_pull_requests spr ON spr.story_id = s.id \
                        WHERE s.story_key = story_pull_request_counts.story_key \
                    ), \
                    updated_at = ?1",
                params![now_epoch()],
            )?;
            Ok(updated)
        })
        .await
    }

    /// Cached link count for a story key, if its links were fetched.
    pub async fn link_count(&self, story_key: &str) -> Result<Option<i64>, StoreError> {
        let story_key = story_key.to_string();
        self.with_conn(move |conn| {
            let count = conn
                .query_row(
                    "SELECT pr_count FROM story_pull_request_counts WHERE story_key = ?1",
                    params![story_key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count)
        })
        .await
    }

    pub async fn counts(&self) -> Result<TableCounts, StoreError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<i64, rusqlite::Error> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            };
            Ok(TableCounts {
                projects: count("projects")?,
                releases: count("releases")?,
                stories: count("stories")?,
                pull_requests: count("pull_requests")?,
                links: count("stories_pull_requests")?,
                link_counts: count("story_pull_request_counts")?,
            })
        })
        .await
    }
}

// =============================================================================
// Run lock
// =============================================================================

/// Exclusive advisory lock on `<db>.lock`, released on drop.
#[derive(Debug)]
pub struct SyncLock {
    _file: std::fs::File,
}

impl SyncLock {
    fn acquire(db_path: &Path) -> Result<Self, StoreError> {
        let lock_path = lock_path_for(db_path);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(lock_path.clone()))?;
        Ok(Self { _file: file })
    }
}

/// `lead_time.sqlite` locks through `lead_time.sqlite.lock`.
fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    db_path.with_file_name(name)
}

// =============================================================================
// Schema
// =============================================================================

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects ( \
           id INTEGER PRIMARY KEY AUTOINCREMENT, \
           project_internal_id TEXT NOT NULL, \
           project_key TEXT NOT NULL, \
           project_title TEXT NOT NULL, \
           project_type TEXT NOT NULL, \
           created_at INTEGER NOT NULL, \
           updated_at INTEGER NOT NULL, \
           UNIQUE(project_internal_id), \
           UNIQUE(project_key) \
         ); \
         CREATE TABLE IF NOT EXISTS releases ( \
           id INTEGER PRIMARY KEY AUTOINCREMENT, \
           release_internal_id TEXT NOT NULL, \
           release_title TEXT NOT NULL, \
           release_description TEXT, \
           release_date TEXT, \
           project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE, \
           created_at INTEGER NOT NULL, \
           updated_at INTEGER NOT NULL, \
           UNIQUE(release_internal_id, project_id) \
         ); \
         CREATE TABLE IF NOT EXISTS stories ( \
           id INTEGER PRIMARY KEY AUTOINCREMENT, \
           story_key TEXT NOT NULL, \
           story_title TEXT NOT NULL, \
           story_type TEXT NOT NULL, \
           story_created TEXT NOT NULL, \
           story_resolved TEXT, \
           release_id INTEGER NOT NULL REFERENCES releases(id) ON DELETE CASCADE, \
           created_at INTEGER NOT NULL, \
           updated_at INTEGER NOT NULL, \
           UNIQUE(story_key, release_id) \
         ); \
         CREATE TABLE IF NOT EXISTS pull_requests ( \
           id INTEGER PRIMARY KEY AUTOINCREMENT, \
           pr_owner TEXT NOT NULL, \
           pr_repository TEXT NOT NULL, \
           pr_number INTEGER NOT NULL, \
           pr_title TEXT NOT NULL, \
           pr_open TEXT NOT NULL, \
           pr_close TEXT, \
           commit_count INTEGER NOT NULL DEFAULT 0, \
           earliest_commit_date TEXT, \
           latest_commit_date TEXT, \
           pr_url TEXT GENERATED ALWAYS AS ( \
             'https://github.com/' || pr_owner || '/' || pr_repository || '/pull/' || pr_number \
           ) VIRTUAL, \
           created_at INTEGER NOT NULL, \
           updated_at INTEGER NOT NULL, \
           UNIQUE(pr_owner, pr_repository, pr_number) \
         ); \
         CREATE TABLE IF NOT EXISTS stories_pull_requests ( \
           id INTEGER PRIMARY KEY AUTOINCREMENT, \
           story_id INTEGER NOT NULL REFERENCES stories(id) ON DELETE CASCADE, \
           pr_id INTEGER NOT NULL REFERENCES pull_requests(id) ON DELETE CASCADE, \
           link_source TEXT NOT NULL, \
           created_at INTEGER NOT NULL, \
           updated_at INTEGER NOT NULL, \
           UNIQUE(story_id, pr_id) \
         ); \
         CREATE TABLE IF NOT EXISTS story_pull_request_counts ( \
           id INTEGER PRIMARY KEY AUTOINCREMENT, \
           story_key TEXT NOT NULL, \
           pr_count INTEGER NOT NULL, \
           created_at INTEGER NOT NULL, \
           updated_at INTEGER NOT NULL, \
           UNIQUE(story_key) \
         ); \
         CREATE INDEX IF NOT EXISTS idx_releases_date ON releases(release_date); \
         CREATE INDEX IF NOT EXISTS idx_stories_key ON stories(story_key); \
         CREATE INDEX IF NOT EXISTS idx_links_pr ON stories_pull_requests(pr_id); \
         DROP VIEW IF EXISTS lead_times; \
         CREATE VIEW lead_times AS \
         SELECT \
           p.project_key, \
           r.release_internal_id, \
           r.release_title, \
           r.release_date, \
           s.story_key, \
           s.story_title, \
           s.story_type, \
           pr.pr_owner, \
           pr.pr_repository, \
           pr.pr_number, \
           pr.pr_title, \
           pr.pr_url, \
           pr.earliest_commit_date, \
           spr.link_source, \
           CAST(julianday(r.release_date) - julianday(pr.earliest_commit_date) AS INTEGER) + 1 AS lead_time_days \
         FROM releases r \
         JOIN projects p ON p.id = r.project_id \
         JOIN stories s ON s.release_id = r.id \
         JOIN stories_pull_requests spr ON spr.story_id = s.id \
         JOIN pull_requests pr ON pr.id = spr.pr_id \
         WHERE r.release_date IS NOT NULL AND pr.earliest_commit_date IS NOT NULL; \
         DROP VIEW IF EXISTS story_type_summary; \
         CREATE VIEW story_type_summary AS \
         SELECT \
           p.project_key, \
           s.story_type, \
           COUNT(DISTINCT s.story_key) AS stories, \
           COUNT(DISTINCT CASE WHEN spr.id IS NOT NULL THEN s.story_key END) AS linked_stories, \
           COUNT(DISTINCT spr.pr_id) AS pull_requests \
         FROM stories s \
         JOIN releases r ON r.id = s.release_id \
         JOIN projects p ON p.id = r.project_id \
         LEFT JOIN stories_pull_requests spr ON spr.story_id = s.id \
         GROUP BY p.project_key, s.story_type;",
    )?;
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        external_id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        project_type: row.get(3)?,
    })
}

fn pull_request_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequest> {
    Ok(PullRequest {
        reference: PullRequestRef::new(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)? as u64,
        ),
        title: row.get(3)?,
        opened: row.get::<_, NaiveDate>(4)?,
        closed: row.get(5)?,
        commit_count: row.get(6)?,
        earliest_commit: row.get(7)?,
        latest_commit: row.get(8)?,
    })
}

/// `?n, ?n+1, …` for `count` positional parameters starting at `first`.
pub(crate) fn placeholders(count: usize, first: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
