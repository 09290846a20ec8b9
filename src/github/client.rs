use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{FeedError, classify_graphql, rate_limit_reset};
use crate::http::HttpClient;
use crate::normalize::feed::parse_feed;

use super::queries;
use super::types::{
    Detail, GraphQlResponse, NodeData, NodesData, PageRequest, ReleaseDescription,
    ReleaseDescriptions, ReleaseFeedPage, RepoReleasesPage, RepoReleasesRequest, RepositoryNode,
    StarredNode, StarredReleasesPage, StarredReposPage, ViewerData,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_WEB_URL: &str = "https://github.com";

/// Largest id list accepted by the descriptions query.
pub const MAX_DESCRIPTION_IDS: usize = 50;

const ATOM_ACCEPT: &str = "application/atom+xml";

/// The upstream operations the fetch pipeline depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// One page of starred repositories, each with its most recent releases.
    async fn starred_releases_page(
        &self,
        page: &PageRequest,
        detail: &Detail,
    ) -> Result<StarredReleasesPage, FeedError>;

    /// One page of starred repositories without releases.
    async fn starred_repos_page(&self, page: &PageRequest) -> Result<StarredReposPage, FeedError>;

    /// One page of a single repository's releases.
    async fn repo_releases(
        &self,
        request: &RepoReleasesRequest,
    ) -> Result<RepoReleasesPage, FeedError>;

    /// Release bodies for at most [`MAX_DESCRIPTION_IDS`] release ids.
    async fn release_descriptions(&self, ids: &[String]) -> Result<ReleaseDescriptions, FeedError>;

    /// The public release feed of `owner/name`.
    async fn release_feed(&self, owner: &str, name: &str) -> Result<ReleaseFeedPage, FeedError>;
}

pub struct GitHub {
    pub http: HttpClient,
    pub api_url: String,
    pub web_url: String,
    token: Option<String>,
}

impl GitHub {
    #[tracing::instrument(skip(http, token))]
    pub fn new(
        http: HttpClient,
        api_url: Option<String>,
        web_url: Option<String>,
        token: Option<String>,
    ) -> Self {
        let api_url = api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let web_url = web_url.unwrap_or_else(|| DEFAULT_WEB_URL.to_string());
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            web_url: web_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn graphql_url(&self) -> String {
        format!("{}/graphql", self.api_url)
    }

    /// Sends a GraphQL document and unwraps the response envelope.
    ///
    /// Errors that halt a run fail the call even when partial data came back;
    /// other errors only fail it when `data` is missing.
    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, FeedError> {
        let body = json!({ "query": query, "variables": variables });
        let (response, headers): (GraphQlResponse<T>, _) = self
            .http
            .post_json_with_headers(&self.graphql_url(), &body)
            .await?;

        let reset_at = rate_limit_reset(&headers);
        let errors = response.errors.unwrap_or_default();
        let classified: Vec<FeedError> = errors
            .iter()
            .map(|e| classify_graphql(e.kind.as_deref(), &e.message, reset_at))
            .collect();

        if let Some(halting) = classified.iter().find(|e| e.halts_run()) {
            return Err(halting.clone());
        }

        match response.data {
            Some(data) => {
                for error in &classified {
                    warn!("GraphQL returned partial data: {}", error);
                }
                Ok(data)
            }
            None => Err(classified.into_iter().next().unwrap_or_else(|| {
                FeedError::InvalidResponseShape("GraphQL response without data".to_string())
            })),
        }
    }
}

#[async_trait]
impl GitHubApi for GitHub {
    #[tracing::instrument(skip(self))]
    async fn starred_releases_page(
        &self,
        page: &PageRequest,
        detail: &Detail,
    ) -> Result<StarredReleasesPage, FeedError> {
        debug!(
            "Fetching starred releases page cursor={:?} size={} variant={}...",
            page.cursor,
            page.page_size,
            detail.variant()
        );

        let query = queries::starred_releases(detail.with_details, detail.releases_per_repo);
        let data: ViewerData<RepositoryNode> = self
            .graphql(
                &query,
                json!({ "cursor": page.cursor, "pageSize": page.page_size }),
            )
            .await?;

        let connection = data.viewer.starred_repositories;
        Ok(StarredReleasesPage {
            repos: connection.edges.into_iter().map(|e| e.node).collect(),
            page_info: connection.page_info,
            rate_limit: data.rate_limit,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn starred_repos_page(&self, page: &PageRequest) -> Result<StarredReposPage, FeedError> {
        debug!(
            "Fetching starred repos page cursor={:?} size={}...",
            page.cursor, page.page_size
        );

        let data: ViewerData<StarredNode> = self
            .graphql(
                &queries::starred_repos(),
                json!({ "cursor": page.cursor, "pageSize": page.page_size }),
            )
            .await?;

        let connection = data.viewer.starred_repositories;
        let total_count = connection.total_count.unwrap_or_default();
        Ok(StarredReposPage {
            repos: connection.edges.into_iter().map(|e| e.node.into()).collect(),
            total_count,
            page_info: connection.page_info,
            rate_limit: data.rate_limit,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn repo_releases(
        &self,
        request: &RepoReleasesRequest,
    ) -> Result<RepoReleasesPage, FeedError> {
        debug!(
            "Fetching releases of repo {} cursor={:?} limit={}...",
            request.repo_id, request.cursor, request.limit
        );

        let data: NodeData = self
            .graphql(
                &queries::repo_releases(request.with_details),
                json!({
                    "repoId": request.repo_id,
                    "first": request.limit,
                    "cursor": request.cursor,
                }),
            )
            .await?;

        Ok(RepoReleasesPage {
            repository: data.node,
            rate_limit: data.rate_limit,
        })
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn release_descriptions(&self, ids: &[String]) -> Result<ReleaseDescriptions, FeedError> {
        if ids.is_empty() {
            return Ok(ReleaseDescriptions::default());
        }
        if ids.len() > MAX_DESCRIPTION_IDS {
            return Err(FeedError::Rejected {
                status: 400,
                message: format!("Too many IDs. Max {} per request.", MAX_DESCRIPTION_IDS),
            });
        }

        debug!("Fetching descriptions of {} releases...", ids.len());

        let data: NodesData = self
            .graphql(&queries::release_descriptions(), json!({ "ids": ids }))
            .await?;

        let items = data
            .nodes
            .into_iter()
            .flatten()
            .filter_map(|node| {
                node.id.map(|id| ReleaseDescription {
                    id,
                    description_html: node.description_html.unwrap_or_default(),
                })
            })
            .collect();

        Ok(ReleaseDescriptions {
            items,
            rate_limit: Some(data.rate_limit),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn release_feed(&self, owner: &str, name: &str) -> Result<ReleaseFeedPage, FeedError> {
        let url = format!(
            "{}/{}/{}/releases.atom",
            self.web_url,
            urlencoding::encode(owner),
            urlencoding::encode(name)
        );

        let xml = self
            .http
            .get_text(&url, ATOM_ACCEPT, self.token.as_deref())
            .await?;

        Ok(ReleaseFeedPage {
            entries: parse_feed(&xml)?,
        })
    }
}
