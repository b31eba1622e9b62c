#![forbid(unsafe_code)]

use std::error::Error;
use std::io::{self, Write};

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dora_lead_time::config::{Config, ReportWindow};
use dora_lead_time::store::LeadTimeStore;
use dora_lead_time::sync::{SyncEngine, SyncOptions};
use dora_lead_time::upstream::{GitHubClient, JiraClient};
use dora_lead_time::views::OutlierThresholds;

#[derive(Parser)]
#[command(name = "dora", version, about = "DORA lead time for changes from Jira and GitHub")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync Jira and GitHub into the SQLite store and print the run report
    Sync {
        /// Re-fetch development links for stories already fetched
        #[arg(long)]
        refresh_links: bool,
    },
    /// Print lead-time rows
    LeadTimes {
        #[command(flatten)]
        scope: Scope,
    },
    /// Print the monthly lead-time summary and the overall average
    Monthly {
        #[command(flatten)]
        scope: Scope,
    },
    /// Print one outlier report
    Outliers {
        #[arg(value_enum)]
        kind: OutlierKind,
        #[command(flatten)]
        window: WindowArgs,
        /// Outlier E threshold in days
        #[arg(long, default_value_t = OutlierThresholds::default().resolved_after_release_days)]
        resolved_after_days: i64,
        /// Outlier F threshold in days
        #[arg(long, default_value_t = OutlierThresholds::default().opened_after_first_commit_days)]
        opened_after_days: i64,
    },
    /// Print stories, linked stories, and pull requests per project and story type
    StoryTypes,
    /// List projects, optionally filtered by type
    Projects {
        #[arg(long = "type")]
        types: Vec<String>,
    },
    /// Assign a project type used to group projects in reports
    SetProjectType {
        #[arg(long = "type")]
        project_type: String,
        #[arg(required = true)]
        projects: Vec<String>,
    },
}

#[derive(clap::Args)]
struct WindowArgs {
    /// First day of the window (default: 60 days ago)
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last day of the window (default: today)
    #[arg(long)]
    end: Option<NaiveDate>,
}

impl WindowArgs {
    fn resolve(&self) -> Result<ReportWindow, Box<dyn Error>> {
        Ok(ReportWindow::resolve(self.start, self.end)?)
    }
}

#[derive(clap::Args)]
struct Scope {
    #[command(flatten)]
    window: WindowArgs,
    /// Restrict to these project keys
    #[arg(long = "project")]
    projects: Vec<String>,
    /// Restrict to projects of these types
    #[arg(long = "project-type")]
    project_types: Vec<String>,
}

impl Scope {
    async fn project_keys(&self, store: &LeadTimeStore) -> Result<Vec<String>, Box<dyn Error>> {
        let mut keys = self.projects.clone();
        if !self.project_types.is_empty() {
            let typed = store.projects_by_type(&self.project_types).await?;
            keys.extend(typed.into_iter().map(|p| p.key));
            if keys.is_empty() {
                return Err(format!("no projects of type {}", self.project_types.join(", ")).into());
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutlierKind {
    /// Projects without releases
    A,
    /// Stories under more than one release date
    B,
    /// Resolved stories without pull requests
    C,
    /// Per-project share of resolved stories without pull requests
    CSummary,
    /// Pull requests closed after the release
    D,
    /// Stories resolved long after the release
    E,
    /// Stories still unresolved on their release date
    OpenStories,
    /// Pull requests opened long after the first commit
    F,
    /// Pull requests whose first commit is on or after the release
    G,
}

#[derive(Serialize)]
struct MonthlyReport {
    overall: dora_lead_time::views::LeadTimeSummary,
    months: Vec<dora_lead_time::views::MonthlyLeadTime>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so JSON on stdout stays clean.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { refresh_links } => {
            let config = Config::from_env()?;
            let store = LeadTimeStore::open(&config.sqlite_path)?;
            let jira = JiraClient::new(&config.jira, config.http_timeout, config.retry.clone())?;
            let github = GitHubClient::new(&config.github, config.http_timeout, config.retry.clone())?;
            let engine = SyncEngine::new(jira, github, store, config.window).with_options(SyncOptions {
                refresh_links,
                repositories: config.github.repositories.clone(),
            });
            let report = engine.run().await?;
            print_json(&report)?;
        }
        Commands::LeadTimes { scope } => {
            let store = open_store()?;
            let window = scope.window.resolve()?;
            let keys = scope.project_keys(&store).await?;
            print_json(&store.lead_times(window, &keys).await?)?;
        }
        Commands::Monthly { scope } => {
            let store = open_store()?;
            let window = scope.window.resolve()?;
            let keys = scope.project_keys(&store).await?;
            let report = MonthlyReport {
                overall: store.average_lead_time(window, &keys).await?,
                months: store.monthly_lead_times(window, &keys).await?,
            };
            print_json(&report)?;
        }
        Commands::Outliers {
            kind,
            window,
            resolved_after_days,
            opened_after_days,
        } => {
            let store = open_store()?;
            let window = window.resolve()?;
            let thresholds = OutlierThresholds {
                resolved_after_release_days: resolved_after_days,
                opened_after_first_commit_days: opened_after_days,
            };
            match kind {
                OutlierKind::A => print_json(&store.projects_without_releases(window).await?)?,
                OutlierKind::B => print_json(&store.duplicate_stories(window).await?)?,
                OutlierKind::C => print_json(&store.stories_without_pull_requests(window).await?)?,
                OutlierKind::CSummary => {
                    print_json(&store.stories_without_pull_requests_summary(window).await?)?
                }
                OutlierKind::D => print_json(&store.late_closing_pull_requests(window).await?)?,
                OutlierKind::E => print_json(&store.late_resolved_stories(window, thresholds).await?)?,
                OutlierKind::OpenStories => print_json(&store.open_stories_at_release(window).await?)?,
                OutlierKind::F => print_json(&store.late_pull_requests(window, thresholds).await?)?,
                OutlierKind::G => print_json(&store.commits_at_or_after_release(window).await?)?,
            }
        }
        Commands::StoryTypes => {
            let store = open_store()?;
            print_json(&store.story_type_summary().await?)?;
        }
        Commands::Projects { types } => {
            let store = open_store()?;
            print_json(&store.projects_by_type(&types).await?)?;
        }
        Commands::SetProjectType {
            project_type,
            projects,
        } => {
            let store = open_store()?;
            let changed = store.set_project_type(&projects, &project_type).await?;
            if changed < projects.len() {
                tracing::warn!(requested = projects.len(), changed, "some project keys are unknown");
            }
            print_json(&serde_json::json!({ "updated": changed, "project_type": project_type }))?;
        }
    }

    Ok(())
}

/// Report commands only need the database location.
fn open_store() -> Result<LeadTimeStore, Box<dyn Error>> {
    let path = Config::sqlite_path_from_env()?;
    Ok(LeadTimeStore::open(path)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(value)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{json}")?;
    Ok(())
}
