//! Upstream response cache with in-flight coalescing.
//!
//! [`CacheService`] owns the response caches and in-flight maps and is shared
//! through an `Arc`, so separate request paths observe one source of truth
//! while tests can build an isolated instance. [`CachedGitHub`] decorates any
//! [`GitHubApi`] with it.

mod coalesce;
mod response;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;

use crate::error::FeedError;
use crate::github::{
    Detail, GitHubApi, PageRequest, RateLimit, ReleaseDescription, ReleaseDescriptions,
    ReleaseFeedPage, RepoReleasesPage, RepoReleasesRequest, StarredReleasesPage, StarredReposPage,
};

pub use coalesce::Coalescer;
pub use response::{CacheEntry, ResponseCache};

/// How a response was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Coalesce,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Hit => write!(f, "HIT"),
            CacheStatus::Miss => write!(f, "MISS"),
            CacheStatus::Coalesce => write!(f, "COALESCE"),
        }
    }
}

/// Cache status and rate-limit figures of the most recent upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub operation: &'static str,
    pub status: CacheStatus,
    pub remaining: Option<i64>,
    pub cost: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl Diagnostics {
    fn new(operation: &'static str, status: CacheStatus, rate_limit: Option<&RateLimit>) -> Self {
        Self {
            operation,
            status,
            remaining: rate_limit.map(|r| r.remaining),
            cost: rate_limit.map(|r| r.cost),
            reset_at: rate_limit.map(|r| r.reset_at),
        }
    }
}

pub const DEFAULT_RELEASES_TTL_SECS: u64 = 300;
pub const DEFAULT_STARRED_TTL_SECS: u64 = 300;
pub const DEFAULT_REPO_RELEASES_TTL_SECS: u64 = 180;
pub const DEFAULT_DETAILS_TTL_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub releases: Duration,
    pub starred: Duration,
    pub repo_releases: Duration,
    pub details: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            releases: Duration::from_secs(DEFAULT_RELEASES_TTL_SECS),
            starred: Duration::from_secs(DEFAULT_STARRED_TTL_SECS),
            repo_releases: Duration::from_secs(DEFAULT_REPO_RELEASES_TTL_SECS),
            details: Duration::from_secs(DEFAULT_DETAILS_TTL_SECS),
        }
    }
}

/// Response caches and in-flight maps of every cached operation.
#[derive(Default)]
pub struct CacheService {
    pub starred_releases: ResponseCache<StarredReleasesPage>,
    pub starred_repos: ResponseCache<StarredReposPage>,
    pub repo_releases: ResponseCache<RepoReleasesPage>,
    pub descriptions: ResponseCache<String>,
    starred_releases_inflight: Coalescer<StarredReleasesPage>,
    starred_repos_inflight: Coalescer<StarredReposPage>,
    repo_releases_inflight: Coalescer<RepoReleasesPage>,
}

impl CacheService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.starred_releases.clear();
        self.starred_repos.clear();
        self.repo_releases.clear();
        self.descriptions.clear();
    }
}

fn cursor_key(cursor: Option<&str>) -> String {
    match cursor {
        Some(c) => urlencoding::encode(c).into_owned(),
        None => "root".to_string(),
    }
}

pub fn starred_releases_key(user_id: &str, page: &PageRequest, detail: &Detail) -> String {
    format!(
        "gh:releases:{}:{}:{}:{}",
        user_id,
        cursor_key(page.cursor.as_deref()),
        page.page_size,
        detail.variant()
    )
}

pub fn starred_repos_key(user_id: &str, page: &PageRequest) -> String {
    format!(
        "gh:starred:{}:{}:{}",
        user_id,
        cursor_key(page.cursor.as_deref()),
        page.page_size
    )
}

pub fn repo_releases_key(user_id: &str, request: &RepoReleasesRequest) -> String {
    let detail = Detail {
        with_details: request.with_details,
        releases_per_repo: request.limit,
    };
    format!(
        "gh:repo-releases:{}:{}:{}:{}",
        user_id,
        urlencoding::encode(&request.repo_id),
        cursor_key(request.cursor.as_deref()),
        detail.variant()
    )
}

pub fn release_details_key(user_id: &str, release_id: &str) -> String {
    format!(
        "gh:release-details:{}:{}",
        user_id,
        urlencoding::encode(release_id)
    )
}

/// [`GitHubApi`] decorator serving repeated requests from [`CacheService`].
pub struct CachedGitHub {
    inner: Arc<dyn GitHubApi>,
    cache: Arc<CacheService>,
    user_id: String,
    ttls: CacheTtls,
    last: Mutex<Option<Diagnostics>>,
}

impl CachedGitHub {
    pub fn new(
        inner: Arc<dyn GitHubApi>,
        cache: Arc<CacheService>,
        user_id: impl Into<String>,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            inner,
            cache,
            user_id: user_id.into(),
            ttls,
            last: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    pub fn last_diagnostics(&self) -> Option<Diagnostics> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, diagnostics: Diagnostics) {
        match (diagnostics.remaining, diagnostics.cost, diagnostics.reset_at) {
            (Some(remaining), Some(cost), Some(reset_at)) => debug!(
                "[{}] cache {} remaining={} cost={} resetAt={}",
                diagnostics.operation,
                diagnostics.status,
                remaining,
                cost,
                reset_at.to_rfc3339()
            ),
            _ => debug!("[{}] cache {}", diagnostics.operation, diagnostics.status),
        }
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(diagnostics);
    }
}

#[async_trait]
impl GitHubApi for CachedGitHub {
    #[tracing::instrument(skip(self))]
    async fn starred_releases_page(
        &self,
        page: &PageRequest,
        detail: &Detail,
    ) -> Result<StarredReleasesPage, FeedError> {
        let key = starred_releases_key(&self.user_id, page, detail);

        if let Some(hit) = self.cache.starred_releases.lookup(&key) {
            self.record(Diagnostics::new("releases", CacheStatus::Hit, Some(&hit.rate_limit)));
            return Ok(hit);
        }

        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let (page, detail) = (page.clone(), *detail);
        let store_key = key.clone();
        let ttl = self.ttls.releases;

        let (result, status) = self
            .cache
            .starred_releases_inflight
            .dedupe(&key, move || async move {
                let data = inner.starred_releases_page(&page, &detail).await?;
                cache.starred_releases.store(&store_key, data.clone(), ttl);
                Ok(data)
            })
            .await;

        let data = result?;
        self.record(Diagnostics::new("releases", status, Some(&data.rate_limit)));
        Ok(data)
    }

    #[tracing::instrument(skip(self))]
    async fn starred_repos_page(&self, page: &PageRequest) -> Result<StarredReposPage, FeedError> {
        let key = starred_repos_key(&self.user_id, page);

        if let Some(hit) = self.cache.starred_repos.lookup(&key) {
            self.record(Diagnostics::new("starred", CacheStatus::Hit, Some(&hit.rate_limit)));
            return Ok(hit);
        }

        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let page = page.clone();
        let store_key = key.clone();
        let ttl = self.ttls.starred;

        let (result, status) = self
            .cache
            .starred_repos_inflight
            .dedupe(&key, move || async move {
                let data = inner.starred_repos_page(&page).await?;
                cache.starred_repos.store(&store_key, data.clone(), ttl);
                Ok(data)
            })
            .await;

        let data = result?;
        self.record(Diagnostics::new("starred", status, Some(&data.rate_limit)));
        Ok(data)
    }

    #[tracing::instrument(skip(self))]
    async fn repo_releases(
        &self,
        request: &RepoReleasesRequest,
    ) -> Result<RepoReleasesPage, FeedError> {
        let key = repo_releases_key(&self.user_id, request);

        if let Some(hit) = self.cache.repo_releases.lookup(&key) {
            self.record(Diagnostics::new("repo", CacheStatus::Hit, Some(&hit.rate_limit)));
            return Ok(hit);
        }

        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let request = request.clone();
        let store_key = key.clone();
        let ttl = self.ttls.repo_releases;

        let (result, status) = self
            .cache
            .repo_releases_inflight
            .dedupe(&key, move || async move {
                let data = inner.repo_releases(&request).await?;
                cache.repo_releases.store(&store_key, data.clone(), ttl);
                Ok(data)
            })
            .await;

        let data = result?;
        self.record(Diagnostics::new("repo", status, Some(&data.rate_limit)));
        Ok(data)
    }

    /// Serves each id from its own cache entry and fetches only the rest.
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn release_descriptions(&self, ids: &[String]) -> Result<ReleaseDescriptions, FeedError> {
        let mut items = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();

        for id in ids {
            match self
                .cache
                .descriptions
                .lookup(&release_details_key(&self.user_id, id))
                .filter(|html| !html.is_empty())
            {
                Some(description_html) => items.push(ReleaseDescription {
                    id: id.clone(),
                    description_html,
                }),
                None => missing.push(id.clone()),
            }
        }

        let hits = items.len();
        if missing.is_empty() {
            self.record(Diagnostics::new("details", CacheStatus::Hit, None));
            return Ok(ReleaseDescriptions {
                items,
                rate_limit: None,
            });
        }

        let fetched = self.inner.release_descriptions(&missing).await?;
        for item in &fetched.items {
            self.cache.descriptions.store(
                &release_details_key(&self.user_id, &item.id),
                item.description_html.clone(),
                self.ttls.details,
            );
        }

        debug!(
            "[details] hits={} misses={} fetched={}",
            hits,
            missing.len(),
            fetched.items.len()
        );
        self.record(Diagnostics::new(
            "details",
            CacheStatus::Miss,
            fetched.rate_limit.as_ref(),
        ));

        items.extend(fetched.items);
        Ok(ReleaseDescriptions {
            items,
            rate_limit: fetched.rate_limit,
        })
    }

    /// Feeds are not cached.
    async fn release_feed(&self, owner: &str, name: &str) -> Result<ReleaseFeedPage, FeedError> {
        self.inner.release_feed(owner, name).await
    }
}
