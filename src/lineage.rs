//! Story ↔ pull request lineage.
//!
//! Two signals produce link candidates: links reported by the issue tracker's
//! development integration (native) and issue keys mentioned in pull request
//! titles or commit subjects (text). A [`LinkSet`] merges both, keeping one
//! link per pair and preferring the native source.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::model::{LinkSource, PullRequestRef};

/// Uppercase project key, a dash, and a number, on word boundaries.
static ISSUE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Z0-9]+-[0-9]+)\b").expect("valid issue key regex"));

/// Finds issue keys in free text, optionally restricted to known projects.
#[derive(Debug, Clone, Default)]
pub struct IssueKeyMatcher {
    projects: Option<BTreeSet<String>>,
}

impl IssueKeyMatcher {
    /// Accepts any well-formed key.
    pub fn any() -> Self {
        Self { projects: None }
    }

    /// Accepts keys whose project prefix is one of `keys`.
    pub fn for_projects<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            projects: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// Keys in order of first appearance, without duplicates.
    pub fn find_keys(&self, text: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        ISSUE_KEY_RE
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .filter(|key| self.accepts(key))
            .filter(|key| seen.insert(key.to_string()))
            .map(str::to_string)
            .collect()
    }

    fn accepts(&self, key: &str) -> bool {
        match &self.projects {
            None => true,
            Some(projects) => key
                .rsplit_once('-')
                .is_some_and(|(project, _)| projects.contains(project)),
        }
    }
}

/// First line of a commit message.
pub fn commit_subject(message: &str) -> &str {
    message.lines().next().unwrap_or("").trim()
}

/// A proposed story ↔ pull request link.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LinkCandidate {
    pub story_key: String,
    pub pull_request: PullRequestRef,
    pub source: LinkSource,
}

/// Candidates from keys in a pull request title and its commit subjects.
pub fn text_candidates<'m, I>(
    matcher: &IssueKeyMatcher,
    pull_request: &PullRequestRef,
    title: &str,
    commit_messages: I,
) -> Vec<LinkCandidate>
where
    I: IntoIterator<Item = &'m str>,
{
    let mut keys: Vec<String> = matcher.find_keys(title);
    for message in commit_messages {
        for key in matcher.find_keys(commit_subject(message)) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys.into_iter()
        .map(|story_key| LinkCandidate {
            story_key,
            pull_request: pull_request.clone(),
            source: LinkSource::Text,
        })
        .collect()
}

/// Candidates from the tracker's development integration for one story.
pub fn native_candidates<I>(story_key: &str, pull_requests: I) -> Vec<LinkCandidate>
where
    I: IntoIterator<Item = PullRequestRef>,
{
    pull_requests
        .into_iter()
        .map(|pull_request| LinkCandidate {
            story_key: story_key.to_string(),
            pull_request,
            source: LinkSource::Native,
        })
        .collect()
}

/// Deduplicated candidates, one per (story key, pull request) pair.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    links: BTreeMap<(String, PullRequestRef), LinkSource>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate; a native link replaces a text one for the same pair.
    pub fn insert(&mut self, candidate: LinkCandidate) {
        let key = (candidate.story_key, candidate.pull_request);
        let source = self.links.entry(key).or_insert(candidate.source);
        if candidate.source == LinkSource::Native {
            *source = LinkSource::Native;
        }
    }

    pub fn extend<I: IntoIterator<Item = LinkCandidate>>(&mut self, candidates: I) {
        for candidate in candidates {
            self.insert(candidate);
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Number of links per source.
    pub fn count(&self, source: LinkSource) -> usize {
        self.links.values().filter(|s| **s == source).count()
    }

    /// Final links in (story key, pull request) order.
    pub fn resolve(self) -> Vec<LinkCandidate> {
        self.links
            .into_iter()
            .map(|((story_key, pull_request), source)| LinkCandidate {
                story_key,
                pull_request,
                source,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr(n: u64) -> PullRequestRef {
        PullRequestRef::new("acme", "web", n)
    }

    #[test]
    fn finds_keys_in_order_without_duplicates() {
        let matcher = IssueKeyMatcher::any();
        assert_eq!(
            matcher.find_keys("Fix bug for ABC-42 and ABC-43 (ABC-42)"),
            vec!["ABC-42", "ABC-43"]
        );
        assert_eq!(matcher.find_keys("ABC-42: fix bug"), vec!["ABC-42"]);
    }

    #[test]
    fn rejects_malformed_keys() {
        let matcher = IssueKeyMatcher::any();
        assert!(matcher.find_keys("abc-42 A-1 ABC- -42 ABC42").is_empty());
        assert!(matcher.find_keys("XABC-42Y").is_empty());
        assert_eq!(matcher.find_keys("(AB2-7)"), vec!["AB2-7"]);
    }

    #[test]
    fn project_restricted_matcher_ignores_unknown_prefixes() {
        let matcher = IssueKeyMatcher::for_projects(["ABC"]);
        assert_eq!(matcher.find_keys("UTF-8 fix for ABC-1"), vec!["ABC-1"]);
    }

    #[test]
    fn text_candidates_read_title_and_commit_subjects_only() {
        let messages = ["chore: tidy\n\nRefs XYZ-9", "ABC-43 follow-up"];
        let candidates = text_candidates(
            &IssueKeyMatcher::any(),
            &pr(1),
            "ABC-42: fix bug",
            messages.iter().copied(),
        );
        let keys: Vec<_> = candidates.iter().map(|c| c.story_key.as_str()).collect();
        assert_eq!(keys, vec!["ABC-42", "ABC-43"]);
        assert!(candidates.iter().all(|c| c.source == LinkSource::Text));
    }

    #[test]
    fn native_link_wins_over_text_for_same_pair() {
        let mut links = LinkSet::new();
        links.extend(text_candidates(&IssueKeyMatcher::any(), &pr(1), "ABC-42", []));
        links.extend(native_candidates("ABC-42", [pr(1), pr(2)]));
        links.extend(text_candidates(&IssueKeyMatcher::any(), &pr(2), "ABC-42", []));

        assert_eq!(links.len(), 2);
        assert_eq!(links.count(LinkSource::Native), 2);
        let resolved = links.resolve();
        assert_eq!(resolved[0].pull_request, pr(1));
        assert!(resolved.iter().all(|c| c.source == LinkSource::Native));
    }
}
