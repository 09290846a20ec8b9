use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, info, warn};

use crate::error::FeedError;
use crate::github::{GitHubApi, PageRequest};
use crate::model::StarredRepo;
use crate::normalize;
use crate::retry::with_backoff;

use super::{Continuation, FetchContext, ReleaseFetchStrategy, pause};

/// Starred repositories per phase-one page.
pub const STARRED_PAGE_SIZE: u32 = 100;

/// Feeds fetched concurrently per batch.
pub const FEED_BATCH_SIZE: usize = 20;

/// Entries GitHub serves in one release feed.
pub const FEED_PAGE_SIZE: usize = 10;

pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Lists every starred repository, then reads each one's release feed.
///
/// Feed failures are logged and counted; only authentication and rate-limit
/// failures stop the run.
pub struct TwoPhaseStrategy {
    api: Arc<dyn GitHubApi>,
    pub page_size: u32,
    pub batch_size: usize,
    pub page_delay: Duration,
    pub batch_delay: Duration,
}

impl TwoPhaseStrategy {
    pub fn new(api: Arc<dyn GitHubApi>) -> Self {
        Self {
            api,
            page_size: STARRED_PAGE_SIZE,
            batch_size: FEED_BATCH_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    pub fn without_delays(mut self) -> Self {
        self.page_delay = Duration::ZERO;
        self.batch_delay = Duration::ZERO;
        self
    }

    async fn starred_repos(&self, ctx: &mut FetchContext) -> Result<Vec<StarredRepo>, FeedError> {
        let mut repos = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            ctx.progress.loading_page(cursor.as_deref());
            let request = PageRequest::after(cursor.clone(), self.page_size);
            let tracker = ctx.progress.clone();
            let page = with_backoff(
                "starred repos page",
                &ctx.backoff,
                || tracker.retried(),
                || self.api.starred_repos_page(&request),
            )
            .await?;
            ctx.progress.page_fetched();
            ctx.progress.set_repos_total(page.total_count as usize);

            repos.extend(page.repos);
            debug!("Listed {}/{} starred repos", repos.len(), page.total_count);

            ctx.check_rate_limit(&page.rate_limit)?;

            match page.page_info.end_cursor {
                Some(next) if page.page_info.has_next_page => {
                    cursor = Some(next);
                    pause(self.page_delay).await;
                }
                _ => break,
            }
        }

        Ok(repos)
    }

    async fn read_feeds(&self, ctx: &mut FetchContext, repos: &[StarredRepo]) -> Result<(), FeedError> {
        for (index, batch) in repos.chunks(self.batch_size.max(1)).enumerate() {
            if index > 0 {
                pause(self.batch_delay).await;
            }

            let backoff = ctx.backoff;
            let tracker = ctx.progress.clone();
            let results = join_all(batch.iter().map(|repo| {
                let tracker = tracker.clone();
                async move {
                    let result = with_backoff(
                        "release feed",
                        &backoff,
                        || tracker.retried(),
                        || self.api.release_feed(&repo.owner, &repo.name),
                    )
                    .await;
                    (repo, result)
                }
            }))
            .await;

            let mut releases = Vec::new();
            let mut halt = None;
            for (repo, result) in results {
                match result {
                    Ok(feed) => {
                        let found = normalize::releases_of_feed(&feed.entries, repo, &ctx.cutoff);
                        if feed.entries.len() >= FEED_PAGE_SIZE && found.len() == feed.entries.len() {
                            ctx.continuation.enqueue(Continuation {
                                repo_id: repo.id.clone(),
                                full_name: repo.full_name(),
                                cursor: None,
                                known: feed.entries.len(),
                                with_details: true,
                            });
                        }
                        releases.extend(found);
                    }
                    Err(e) if e.halts_run() => {
                        halt.get_or_insert(e);
                    }
                    Err(e) => {
                        warn!("Failed to read release feed of {}: {}", repo.full_name(), e);
                        ctx.progress.repo_failed();
                    }
                }
            }

            ctx.absorb(releases);
            ctx.progress.repos_processed(batch.len());
            ctx.persist();

            if let Some(e) = halt {
                return Err(e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseFetchStrategy for TwoPhaseStrategy {
    fn name(&self) -> &'static str {
        "two-phase"
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn run(&self, ctx: &mut FetchContext) -> Result<(), FeedError> {
        info!("Phase 1: listing starred repositories...");
        let repos = self.starred_repos(ctx).await?;
        info!("Found {} starred repositories", repos.len());

        info!("Phase 2: reading release feeds...");
        self.read_feeds(ctx, &repos).await?;

        let extra = ctx.drain_continuations(self.api.as_ref()).await?;
        info!(
            "Fetched {} releases ({} failed feeds, {} extra pages)",
            ctx.releases.len(),
            ctx.progress.snapshot().repos_failed,
            extra
        );
        Ok(())
    }
}
