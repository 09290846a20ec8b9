use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::error::FeedError;
use crate::github::{Detail, GitHubApi, MAX_DESCRIPTION_IDS, PageRequest, RepositoryNode};
use crate::model::Release;
use crate::normalize;
use crate::retry::with_backoff;

use super::{Continuation, FetchContext, ReleaseFetchStrategy, pause};

/// Starred repositories per page.
pub const PAGE_SIZE: u32 = 20;

/// Repositories normalized and merged together before progress is updated.
pub const REPO_BATCH_SIZE: usize = 5;

pub const DEFAULT_RELEASES_PER_REPO: u32 = 3;
pub const MAX_RELEASES_PER_REPO: u32 = 10;

pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);

/// Walks the starred list with each repository's latest releases embedded.
///
/// A page is followed by the next one only while it keeps producing new
/// releases; the first page is always followed.
pub struct CombinedStrategy {
    api: Arc<dyn GitHubApi>,
    pub detail: Detail,
    pub page_size: u32,
    pub page_delay: Duration,
    /// Fetch missing bodies with the details query in the light variant.
    pub hydrate_descriptions: bool,
}

impl CombinedStrategy {
    pub fn new(api: Arc<dyn GitHubApi>, with_details: bool, releases_per_repo: u32) -> Self {
        Self {
            api,
            detail: Detail {
                with_details,
                releases_per_repo: releases_per_repo.clamp(1, MAX_RELEASES_PER_REPO),
            },
            page_size: PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
            hydrate_descriptions: true,
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Queues repositories whose embedded releases are all in the window and
    /// that report more releases than were embedded.
    fn queue_continuation(&self, ctx: &FetchContext, repo: &RepositoryNode, in_window: usize) {
        let page_info = &repo.releases.page_info;
        if page_info.has_next_page && in_window == repo.releases.edges.len() {
            ctx.continuation.enqueue(Continuation {
                repo_id: repo.id.clone(),
                full_name: format!("{}/{}", repo.owner.login, repo.name),
                cursor: page_info.end_cursor.clone(),
                known: 0,
                with_details: self.detail.with_details,
            });
        }
    }

    /// Fills empty bodies from the store, then from the details query.
    async fn hydrate(&self, ctx: &FetchContext, releases: &mut [Release]) -> Result<(), FeedError> {
        ctx.reuse_descriptions(releases);
        if !self.hydrate_descriptions {
            return Ok(());
        }

        let missing: Vec<String> = releases
            .iter()
            .filter(|r| r.description_html.is_empty())
            .map(|r| r.id.clone())
            .collect();

        for chunk in missing.chunks(MAX_DESCRIPTION_IDS) {
            let tracker = ctx.progress.clone();
            let result = with_backoff(
                "release descriptions",
                &ctx.backoff,
                || tracker.retried(),
                || self.api.release_descriptions(chunk),
            )
            .await;

            match result {
                Ok(descriptions) => {
                    if let Some(rate_limit) = &descriptions.rate_limit {
                        ctx.progress.observe_rate_limit(rate_limit);
                    }
                    for item in descriptions.items {
                        if let Some(release) = releases.iter_mut().find(|r| r.id == item.id) {
                            release.description_html = item.description_html;
                        }
                    }
                }
                Err(e) if e.halts_run() => return Err(e),
                Err(e) => warn!("Failed to fetch {} release descriptions: {}", chunk.len(), e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseFetchStrategy for CombinedStrategy {
    fn name(&self) -> &'static str {
        "combined"
    }

    #[tracing::instrument(skip(self, ctx), fields(variant = %self.detail.variant()))]
    async fn run(&self, ctx: &mut FetchContext) -> Result<(), FeedError> {
        let mut cursor: Option<String> = None;

        loop {
            ctx.progress.loading_page(cursor.as_deref());
            let request = PageRequest::after(cursor.clone(), self.page_size);
            let tracker = ctx.progress.clone();
            let page = with_backoff(
                "starred releases page",
                &ctx.backoff,
                || tracker.retried(),
                || self.api.starred_releases_page(&request, &self.detail),
            )
            .await?;
            ctx.progress.page_fetched();

            let mut new_on_page = 0;
            for batch in page.repos.chunks(REPO_BATCH_SIZE) {
                let mut releases = Vec::new();
                for repo in batch {
                    let found = normalize::releases_of(repo, &ctx.cutoff);
                    self.queue_continuation(ctx, repo, found.len());
                    releases.extend(found);
                }
                if !self.detail.with_details {
                    self.hydrate(ctx, &mut releases).await?;
                }

                let stats = ctx.absorb(releases);
                new_on_page += stats.new;
                ctx.progress.repos_processed(batch.len());
            }
            ctx.persist();
            debug!(
                "Page after {:?}: {} repos, {} new releases",
                cursor,
                page.repos.len(),
                new_on_page
            );

            ctx.check_rate_limit(&page.rate_limit)?;

            let first_page = cursor.is_none();
            let keep_going = page.page_info.has_next_page && (first_page || new_on_page > 0);
            match page.page_info.end_cursor {
                Some(next) if keep_going => {
                    cursor = Some(next);
                    pause(self.page_delay).await;
                }
                _ => break,
            }
        }

        let extra = ctx.drain_continuations(self.api.as_ref()).await?;
        info!(
            "Fetched {} releases ({} extra pages)",
            ctx.releases.len(),
            extra
        );
        Ok(())
    }
}
