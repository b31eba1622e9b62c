//! Run configuration, built once at startup and passed by reference.
//!
//! Values come from the process environment (optionally seeded from `.env.params`
//! and `.env` files via `dotenvy`). Nothing else in the crate reads the
//! environment: every component receives the pieces of [`Config`] it needs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::RepositoryRef;
use crate::upstream::RetryPolicy;

/// Length of the default trailing reporting window, in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 60;

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_PROJECT_TYPE: &str = "software";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(String),
    #[error("{name} is invalid: {message}")]
    Invalid { name: String, message: String },
    #[error("window start {start} is after end {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },
}

impl ConfigError {
    fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Window
// =============================================================================

/// Inclusive date range for synchronization and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// `days` days back from `today`, both ends included.
    pub fn trailing(today: NaiveDate, days: i64) -> Self {
        Self {
            start: today - ChronoDuration::days(days),
            end: today,
        }
    }

    /// The default trailing window ending today (UTC).
    pub fn trailing_default() -> Self {
        Self::trailing(Utc::now().date_naive(), DEFAULT_WINDOW_DAYS)
    }

    /// Uses the explicit bounds when given, the default trailing window otherwise.
    pub fn resolve(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self, ConfigError> {
        let default = Self::trailing_default();
        Self::new(start.unwrap_or(default.start), end.unwrap_or(default.end))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// =============================================================================
// Config
// =============================================================================

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct JiraConfig {
    /// Base URL, e.g. `https://acme.atlassian.net`.
    pub base_url: String,
    pub email: String,
    pub api_token: Secret,
    /// Only projects of these types are synchronized.
    pub project_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    /// Organization name → access token.
    pub org_tokens: BTreeMap<String, Secret>,
    /// Repositories scanned for textual issue references.
    pub repositories: Vec<RepositoryRef>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jira: JiraConfig,
    pub github: GitHubConfig,
    pub sqlite_path: PathBuf,
    pub window: ReportWindow,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    /// Loads `.env.params` and `.env` (both optional), then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::from_filename(".env.params").ok();
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::Missing(name.to_string()))
        };
        let optional = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jira = JiraConfig {
            base_url: normalize_base_url(&require("JIRA_INSTANCE")?),
            email: require("EMAIL")?,
            api_token: Secret::new(require("ATLASSIAN_TOKEN")?),
            project_types: optional("JIRA_PROJECT_TYPES")
                .map(|raw| split_list(&raw))
                .filter(|types| !types.is_empty())
                .unwrap_or_else(|| vec![DEFAULT_PROJECT_TYPE.to_string()]),
        };

        let org_tokens = resolve_org_tokens(&require("GITHUB_ORG_TOKENS_MAP")?, &lookup)?;

        let mut repositories = Vec::new();
        if let Some(raw) = optional("GITHUB_REPOSITORIES") {
            for entry in split_list(&raw) {
                let repo = RepositoryRef::parse(&entry).ok_or_else(|| {
                    ConfigError::invalid("GITHUB_REPOSITORIES", format!("`{entry}` is not org/repo"))
                })?;
                if !org_tokens.contains_key(&repo.organization) {
                    return Err(ConfigError::invalid(
                        "GITHUB_REPOSITORIES",
                        format!(
                            "organization `{}` has no entry in GITHUB_ORG_TOKENS_MAP",
                            repo.organization
                        ),
                    ));
                }
                repositories.push(repo);
            }
        }

        let github = GitHubConfig {
            api_url: optional("GITHUB_API_URL")
                .map(|url| normalize_base_url(&url))
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            org_tokens,
            repositories,
        };

        let window = ReportWindow::new(
            parse_date_var("START_DATE", &require("START_DATE")?)?,
            parse_date_var("END_DATE", &require("END_DATE")?)?,
        )?;

        let http_timeout = match optional("HTTP_TIMEOUT_SECONDS") {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .map_err(|_| ConfigError::invalid("HTTP_TIMEOUT_SECONDS", "expected whole seconds"))?,
            ),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let mut retry = RetryPolicy::default();
        if let Some(raw) = optional("HTTP_MAX_RETRIES") {
            retry.max_retries = raw
                .parse()
                .map_err(|_| ConfigError::invalid("HTTP_MAX_RETRIES", "expected a non-negative integer"))?;
        }

        Ok(Self {
            jira,
            github,
            sqlite_path: PathBuf::from(require("SQLITE_PATH")?),
            window,
            http_timeout,
            retry,
        })
    }

    /// Database location alone, for read-only reporting commands.
    pub fn sqlite_path_from_env() -> Result<PathBuf, ConfigError> {
        dotenvy::from_filename(".env.params").ok();
        dotenvy::dotenv().ok();
        std::env::var("SQLITE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::Missing("SQLITE_PATH".to_string()))
    }
}

/// `GITHUB_ORG_TOKENS_MAP` names, per organization, the variable holding its token.
fn resolve_org_tokens<F>(raw: &str, lookup: &F) -> Result<BTreeMap<String, Secret>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let map: BTreeMap<String, String> = serde_json::from_str(raw)
        .map_err(|e| ConfigError::invalid("GITHUB_ORG_TOKENS_MAP", e.to_string()))?;

    let mut tokens = BTreeMap::new();
    for (org, var) in map {
        let token = lookup(&var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::Missing(format!("{var} (token for organization {org})")))?;
        tokens.insert(org, Secret::new(token));
    }
    Ok(tokens)
}

fn parse_date_var(name: &str, raw: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ConfigError::invalid(name, format!("`{raw}` is not an ISO date: {e}")))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Accepts a bare host (`acme.atlassian.net`) or a full URL.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_env() -> HashMap<String, String> {
        env(&[
            ("JIRA_INSTANCE", "acme.atlassian.net"),
            ("EMAIL", "dev@acme.test"),
            ("ATLASSIAN_TOKEN", "jira-token"),
            ("GITHUB_ORG_TOKENS_MAP", r#"{"acme": "ACME_TOKEN"}"#),
            ("ACME_TOKEN", "gh-token"),
            ("SQLITE_PATH", "/tmp/lead_time.sqlite"),
            ("START_DATE", "2025-01-01"),
            ("END_DATE", "2025-03-31"),
        ])
    }

    fn load(vars: &HashMap<String, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn loads_complete_configuration() {
        let mut vars = base_env();
        vars.insert("GITHUB_REPOSITORIES".into(), "acme/web, acme/api".into());
        let config = load(&vars).unwrap();

        assert_eq!(config.jira.base_url, "https://acme.atlassian.net");
        assert_eq!(config.jira.project_types, vec!["software"]);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.org_tokens["acme"].expose(), "gh-token");
        assert_eq!(config.github.repositories.len(), 2);
        assert_eq!(config.window.start.to_string(), "2025-01-01");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_required_variable_is_fatal() {
        let mut vars = base_env();
        vars.remove("ATLASSIAN_TOKEN");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref name) if name == "ATLASSIAN_TOKEN"));
    }

    #[test]
    fn org_token_variable_must_be_set() {
        let mut vars = base_env();
        vars.remove("ACME_TOKEN");
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("ACME_TOKEN"));
    }

    #[test]
    fn repositories_must_belong_to_mapped_organizations() {
        let mut vars = base_env();
        vars.insert("GITHUB_REPOSITORIES".into(), "other/web".into());
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "GITHUB_REPOSITORIES"));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut vars = base_env();
        vars.insert("START_DATE".into(), "2025-04-01".into());
        assert!(matches!(load(&vars).unwrap_err(), ConfigError::InvalidWindow { .. }));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = load(&base_env()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("gh-token"));
        assert!(!debug.contains("jira-token"));
    }

    #[test]
    fn trailing_window_includes_day_sixty_and_excludes_day_sixty_one() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let window = ReportWindow::trailing(today, DEFAULT_WINDOW_DAYS);
        assert!(window.contains(today - ChronoDuration::days(60)));
        assert!(!window.contains(today - ChronoDuration::days(61)));
        assert!(window.contains(today));
    }
}
