use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Language, License, Owner, StarredRepo};
use crate::normalize::feed::FeedEntry;

/// Rate-limit figures reported by every GraphQL response.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub cost: u32,
    pub limit: u32,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
    pub used: u32,
}

impl RateLimit {
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Edge<T> {
    pub node: T,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    #[serde(default)]
    pub total_count: Option<u32>,
    #[serde(default)]
    pub page_info: PageInfo,
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<T>>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self {
            total_count: None,
            page_info: PageInfo::default(),
            edges: Vec::new(),
        }
    }
}

impl<T> Connection<T> {
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}

/// A release node as returned by GraphQL.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseNode {
    pub id: String,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    /// Absent for drafts.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub url: String,
    #[serde(default, rename = "descriptionHTML")]
    pub description_html: Option<String>,
}

/// A repository node with its embedded release page.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub primary_language: Option<Language>,
    pub owner: Owner,
    #[serde(default)]
    pub stargazer_count: u32,
    #[serde(default)]
    pub languages: Connection<Language>,
    #[serde(default)]
    pub license_info: Option<License>,
    #[serde(default)]
    pub releases: Connection<ReleaseNode>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// GraphQL response envelope.
#[derive(Deserialize, Debug, Clone)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ViewerData<T> {
    pub viewer: Viewer<T>,
    pub rate_limit: RateLimit,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Viewer<T> {
    pub starred_repositories: Connection<T>,
}

/// Repository node of the lightweight starred-list query.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StarredNode {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub stargazer_count: u32,
    #[serde(default)]
    pub primary_language: Option<Language>,
    #[serde(default)]
    pub languages: Connection<Language>,
    #[serde(default)]
    pub license_info: Option<License>,
    pub owner: StarredOwner,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StarredOwner {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

impl From<StarredNode> for StarredRepo {
    fn from(node: StarredNode) -> Self {
        StarredRepo {
            id: node.id,
            name: node.name,
            owner: node.owner.login,
            url: node.url,
            stargazer_count: node.stargazer_count,
            primary_language: node.primary_language,
            languages: node.languages.edges.into_iter().map(|e| e.node).collect(),
            license_info: node.license_info,
            avatar_url: node.owner.avatar_url,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodeData {
    pub node: Option<RepositoryNode>,
    pub rate_limit: RateLimit,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodesData {
    #[serde(default)]
    pub nodes: Vec<Option<DescriptionNode>>,
    pub rate_limit: RateLimit,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct DescriptionNode {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "descriptionHTML")]
    pub description_html: Option<String>,
}

/// One page of starred repositories, each with its most recent releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarredReleasesPage {
    pub repos: Vec<RepositoryNode>,
    pub page_info: PageInfo,
    pub rate_limit: RateLimit,
}

/// One page of the starred list without releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarredReposPage {
    pub repos: Vec<StarredRepo>,
    pub total_count: u32,
    pub page_info: PageInfo,
    pub rate_limit: RateLimit,
}

/// One page of a single repository's releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoReleasesPage {
    /// `None` when the repository is gone or inaccessible.
    pub repository: Option<RepositoryNode>,
    pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescription {
    pub id: String,
    pub description_html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReleaseDescriptions {
    pub items: Vec<ReleaseDescription>,
    /// `None` when every id was served from cache.
    pub rate_limit: Option<RateLimit>,
}

/// Parsed entries of a repository's release feed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReleaseFeedPage {
    pub entries: Vec<FeedEntry>,
}

/// Cursor and size of a starred-list page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub cursor: Option<String>,
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            cursor: None,
            page_size,
        }
    }

    pub fn after(cursor: Option<String>, page_size: u32) -> Self {
        Self { cursor, page_size }
    }
}

/// Whether release bodies are requested, and how many releases per repo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Detail {
    pub with_details: bool,
    pub releases_per_repo: u32,
}

impl Detail {
    /// `full-N` or `light-N`, the detail dimension of cache keys.
    pub fn variant(&self) -> String {
        format!(
            "{}-{}",
            if self.with_details { "full" } else { "light" },
            self.releases_per_repo
        )
    }
}

/// A page of one repository's releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoReleasesRequest {
    pub repo_id: String,
    pub cursor: Option<String>,
    pub limit: u32,
    pub with_details: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_variant() {
        let light = Detail {
            with_details: false,
            releases_per_repo: 3,
        };
        let full = Detail {
            with_details: true,
            releases_per_repo: 10,
        };
        assert_eq!(light.variant(), "light-3");
        assert_eq!(full.variant(), "full-10");
    }

    #[test]
    fn test_deserialize_repository_node() {
        let json = r#"{
            "id": "R_1",
            "name": "tokio",
            "url": "https://github.com/tokio-rs/tokio",
            "description": "Runtime",
            "primaryLanguage": {"id": "L_rust", "name": "Rust"},
            "owner": {"login": "tokio-rs", "avatarUrl": "https://a/1", "url": "https://github.com/tokio-rs"},
            "stargazerCount": 100,
            "languages": {"totalCount": 1, "edges": [{"node": {"id": "L_rust", "name": "Rust"}}]},
            "licenseInfo": {"spdxId": "MIT"},
            "releases": {
                "totalCount": 5,
                "pageInfo": {"hasNextPage": true, "endCursor": "abc"},
                "edges": [{"node": {
                    "id": "RE_1",
                    "isDraft": false,
                    "isPrerelease": false,
                    "name": null,
                    "tagName": "v1.0.0",
                    "publishedAt": "2024-05-01T12:00:00Z",
                    "updatedAt": "2024-05-01T12:00:00Z",
                    "url": "https://github.com/tokio-rs/tokio/releases/tag/v1.0.0"
                }}]
            }
        }"#;

        let node: RepositoryNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.owner.login, "tokio-rs");
        assert_eq!(node.languages.nodes().count(), 1);
        assert!(node.releases.page_info.has_next_page);
        let release = node.releases.nodes().next().unwrap();
        assert_eq!(release.tag_name, "v1.0.0");
        assert!(release.name.is_none());
        assert!(release.description_html.is_none());
    }

    #[test]
    fn test_rate_limit_exhausted() {
        let json = r#"{"cost": 1, "limit": 5000, "remaining": 0, "resetAt": "2024-05-01T13:00:00Z", "used": 5000}"#;
        let rate_limit: RateLimit = serde_json::from_str(json).unwrap();
        assert!(rate_limit.is_exhausted());
    }
}
