//! Follow-up pages for repositories with more in-window releases than the
//! first fetch returned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};

use crate::error::FeedError;
use crate::github::{GitHubApi, RepoReleasesRequest};
use crate::normalize;
use crate::retry::with_backoff;

use super::FetchContext;

/// Extra pages fetched per repository.
pub const MAX_EXTRA_PAGES: usize = 2;

/// Releases requested per extra page.
pub const CONTINUATION_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub repo_id: String,
    /// `owner/name`, for logging.
    pub full_name: String,
    /// Where the first fetch stopped; `None` starts from the newest release.
    pub cursor: Option<String>,
    /// Newest releases already merged from another source. The first extra
    /// page is widened by this many; the release map drops them by tag.
    pub known: usize,
    pub with_details: bool,
}

/// Pending continuations plus a single-flight drain guard.
#[derive(Debug, Default)]
pub struct ContinuationQueue {
    pending: Mutex<VecDeque<Continuation>>,
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ContinuationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Continuation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `item` unless its repository is already queued.
    pub fn enqueue(&self, item: Continuation) -> bool {
        let mut pending = self.pending();
        if pending.iter().any(|c| c.repo_id == item.repo_id) {
            return false;
        }
        debug!("Queued continuation for {}", item.full_name);
        pending.push_back(item);
        true
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn pop(&self) -> Option<Continuation> {
        self.pending().pop_front()
    }

    /// Fetches up to [`MAX_EXTRA_PAGES`] pages for every queued repository
    /// and merges them into `ctx`. Returns the number of pages fetched.
    ///
    /// Only one drain runs at a time; a concurrent call returns `Ok(0)`
    /// without touching the queue.
    pub async fn drain(&self, api: &dyn GitHubApi, ctx: &mut FetchContext) -> Result<usize, FeedError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Continuation drain already running");
            return Ok(0);
        }
        let _guard = DrainGuard(&self.draining);

        let mut pages = 0;
        while let Some(item) = self.pop() {
            match self.continue_repo(api, ctx, &item).await {
                Ok(fetched) => pages += fetched,
                Err(e) if e.halts_run() => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch more releases of {}: {}", item.full_name, e);
                    ctx.progress.repo_failed();
                }
            }
        }
        Ok(pages)
    }

    async fn continue_repo(
        &self,
        api: &dyn GitHubApi,
        ctx: &mut FetchContext,
        item: &Continuation,
    ) -> Result<usize, FeedError> {
        let mut cursor = item.cursor.clone();
        let mut known = item.known;
        let mut pages = 0;

        while pages < MAX_EXTRA_PAGES {
            let request = RepoReleasesRequest {
                repo_id: item.repo_id.clone(),
                cursor: cursor.clone(),
                limit: CONTINUATION_PAGE_SIZE + known as u32,
                with_details: item.with_details,
            };
            let tracker = ctx.progress.clone();
            let page = with_backoff(
                "repo releases",
                &ctx.backoff,
                || tracker.retried(),
                || api.repo_releases(&request),
            )
            .await?;
            pages += 1;
            ctx.progress.page_fetched();

            let Some(node) = page.repository.as_ref() else {
                debug!("{} is no longer accessible", item.full_name);
                break;
            };

            let releases = normalize::releases_of(node, &ctx.cutoff);
            let left_window = releases.len() < node.releases.edges.len();
            known = 0;
            let stats = ctx.absorb(releases);
            ctx.persist();
            debug!(
                "{}: extra page {} added {} new releases",
                item.full_name, pages, stats.new
            );

            ctx.check_rate_limit(&page.rate_limit)?;

            if left_window || !node.releases.page_info.has_next_page {
                break;
            }
            match node.releases.page_info.end_cursor.clone() {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(pages)
    }
}
