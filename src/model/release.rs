use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RepoRef;

/// A release from either the GraphQL API or a repository's Atom feed.
///
/// `id` is the only identity: two records with the same id are the same
/// release, and a differing `published_at` means the release was updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub name: String,
    pub tag_name: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    /// Rendered release notes; empty when fetched with the light query.
    #[serde(default, rename = "descriptionHTML")]
    pub description_html: String,
    #[serde(default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub is_draft: bool,
    pub repo: RepoRef,
}

impl Release {
    /// Key of this release's description in the description store.
    pub fn description_key(&self) -> String {
        description_key(&self.id, self.published_at)
    }
}

/// `"{id}-{published_at}"`, so a republished release gets a fresh slot.
pub fn description_key(id: &str, published_at: DateTime<Utc>) -> String {
    format!("{}-{}", id, published_at.to_rfc3339())
}

/// A release as persisted, annotated with when it was written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachedRelease {
    #[serde(flatten)]
    pub release: Release,
    pub cached_at: DateTime<Utc>,
}
