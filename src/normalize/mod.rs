//! Converts GraphQL release nodes and feed entries into [`Release`] records
//! and merges them into the id-keyed release map.

pub mod feed;

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;

use crate::github::{ReleaseNode, RepositoryNode};
use crate::model::{Owner, Release, RepoRef, StarredRepo};

use feed::FeedEntry;

static TAG_FROM_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/releases/tag/(.+)$").expect("valid tag regex"));

static PRERELEASE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)pre-?release|alpha|beta|rc[.-]?\d+|canary").expect("valid prerelease regex")
});

static DRAFT_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)draft").expect("valid draft regex"));

/// Length of the rolling window of releases considered recent.
pub const WINDOW_MONTHS: u32 = 3;

/// Lower publish-time bound of a fan-out pass, computed once per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff(DateTime<Utc>);

impl Cutoff {
    /// `now` minus [`WINDOW_MONTHS`] calendar months.
    pub fn rolling(now: DateTime<Utc>) -> Self {
        let at = now
            .checked_sub_months(Months::new(WINDOW_MONTHS))
            .unwrap_or_else(|| now - Duration::days(90));
        Cutoff(at)
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Cutoff(time)
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn admits(&self, published_at: DateTime<Utc>) -> bool {
        published_at >= self.0
    }
}

/// Builds the repository reference embedded in releases of `node`.
pub fn repo_ref(node: &RepositoryNode) -> RepoRef {
    RepoRef {
        id: node.id.clone(),
        name: node.name.clone(),
        url: node.url.clone(),
        description: node.description.clone(),
        owner: Owner {
            login: node.owner.login.clone(),
            avatar_url: node.owner.avatar_url.clone(),
            url: node.owner.url.clone(),
        },
        stargazer_count: node.stargazer_count,
        primary_language: node.primary_language.clone(),
        languages: node.languages.nodes().take(5).cloned().collect(),
        license_info: node.license_info.clone(),
    }
}

/// Maps a GraphQL release node. Returns `None` for nodes that were never
/// published and carry no update time either.
pub fn from_graphql(node: &ReleaseNode, repo: &RepoRef) -> Option<Release> {
    let published_at = node.published_at.or(node.updated_at)?;
    let name = node
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(&node.tag_name)
        .to_string();

    Some(Release {
        id: node.id.clone(),
        name,
        tag_name: node.tag_name.clone(),
        url: node.url.clone(),
        published_at,
        description_html: node.description_html.clone().unwrap_or_default(),
        is_prerelease: node.is_prerelease,
        is_draft: node.is_draft,
        repo: repo.clone(),
    })
}

/// Maps a feed entry of `repo`. Returns `None` for entries without a timestamp.
pub fn from_feed_entry(entry: &FeedEntry, repo: &StarredRepo) -> Option<Release> {
    let published_at = entry.updated?;

    Some(Release {
        id: entry.id.clone(),
        name: entry.title.clone(),
        tag_name: extract_tag_name(&entry.link, &entry.title),
        url: entry.link.clone(),
        published_at,
        description_html: entry.content.clone(),
        is_prerelease: PRERELEASE_TITLE.is_match(&entry.title),
        is_draft: DRAFT_TITLE.is_match(&entry.title),
        repo: repo.to_repo_ref(),
    })
}

/// Percent-decoded path after `/releases/tag/`, or the title verbatim.
pub fn extract_tag_name(link: &str, title: &str) -> String {
    match TAG_FROM_LINK.captures(link).and_then(|c| c.get(1)) {
        Some(segment) => urlencoding::decode(segment.as_str())
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| segment.as_str().to_string()),
        None => title.to_string(),
    }
}

/// Normalizes the embedded release page of `node`, dropping records older
/// than `cutoff`.
pub fn releases_of(node: &RepositoryNode, cutoff: &Cutoff) -> Vec<Release> {
    let repo = repo_ref(node);
    node.releases
        .nodes()
        .filter_map(|n| from_graphql(n, &repo))
        .filter(|r| cutoff.admits(r.published_at))
        .collect()
}

/// Normalizes the feed entries of `repo`, dropping records older than `cutoff`.
pub fn releases_of_feed(entries: &[FeedEntry], repo: &StarredRepo, cutoff: &Cutoff) -> Vec<Release> {
    entries
        .iter()
        .filter_map(|e| from_feed_entry(e, repo))
        .filter(|r| cutoff.admits(r.published_at))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    New,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeStats {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::New => self.new += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// New or updated records.
    pub fn changed(&self) -> usize {
        self.new + self.updated
    }
}

/// `owner/name` plus tag, shared by the feed and GraphQL records of one release.
fn tag_key(release: &Release) -> (String, String) {
    (release.repo.full_name().to_lowercase(), release.tag_name.clone())
}

/// Releases keyed by id.
///
/// Feed entries and GraphQL nodes carry different ids for the same release,
/// so the map also indexes repository and tag. A record whose id is unknown
/// but whose tag is already held under another id is the same release seen
/// through the other source; the record seen first is kept.
#[derive(Debug, Clone, Default)]
pub struct ReleaseMap {
    releases: HashMap<String, Release>,
    tags: HashMap<(String, String), String>,
}

impl ReleaseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Release> {
        self.releases.get(id)
    }

    /// The id under which the release tagged `tag_name` in `full_name` is held.
    pub fn id_of_tag(&self, full_name: &str, tag_name: &str) -> Option<&str> {
        self.tags
            .get(&(full_name.to_lowercase(), tag_name.to_string()))
            .map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.releases.clear();
        self.tags.clear();
    }

    /// Merges one record. An id seen with the same `published_at` is left
    /// untouched; any other change replaces the stored record.
    pub fn merge(&mut self, release: Release) -> MergeOutcome {
        let key = tag_key(&release);
        match self.releases.get(&release.id) {
            None if self.tags.contains_key(&key) => MergeOutcome::Unchanged,
            None => {
                self.tags.insert(key, release.id.clone());
                self.releases.insert(release.id.clone(), release);
                MergeOutcome::New
            }
            Some(existing) if existing.published_at == release.published_at => {
                MergeOutcome::Unchanged
            }
            Some(existing) => {
                let previous = tag_key(existing);
                if previous != key {
                    self.tags.remove(&previous);
                    self.tags.insert(key, release.id.clone());
                }
                self.releases.insert(release.id.clone(), release);
                MergeOutcome::Updated
            }
        }
    }

    pub fn merge_all(&mut self, releases: impl IntoIterator<Item = Release>) -> MergeStats {
        let mut stats = MergeStats::default();
        for release in releases {
            stats.record(self.merge(release));
        }
        stats
    }

    /// Newest first; ties by `owner/repo`, then by id.
    pub fn sorted(&self) -> Vec<Release> {
        let mut releases: Vec<Release> = self.releases.values().cloned().collect();
        sort_releases(&mut releases);
        releases
    }
}

/// Sorts newest first, ties by `owner/repo`, then by id.
pub fn sort_releases(releases: &mut [Release]) {
    releases.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.repo.full_name().cmp(&b.repo.full_name()))
            .then_with(|| a.id.cmp(&b.id))
    });
}
