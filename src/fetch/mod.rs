//! Pagination and fan-out over the upstream API.
//!
//! A [`ReleaseFetchStrategy`] walks the upstream and feeds every page into a
//! [`FetchContext`], which owns the merged release map, the optional store
//! and the progress counters. Two strategies exist:
//!
//! - [`TwoPhaseStrategy`] (default): the starred list first, then one
//!   release feed per repository in concurrent batches.
//! - [`CombinedStrategy`]: starred repositories with their latest releases
//!   embedded, one GraphQL page at a time.
//!
//! Both enqueue repositories that likely have more in-window releases on the
//! shared [`ContinuationQueue`] and drain it before returning.

pub mod combined;
pub mod continuation;
pub mod progress;
pub mod two_phase;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::warn;

use crate::error::{FeedError, rate_limit_reached_message};
use crate::github::{GitHubApi, RateLimit};
use crate::model::Release;
use crate::normalize::{Cutoff, MergeOutcome, MergeStats, ReleaseMap};
use crate::retry::BackoffPolicy;
use crate::store::ReleaseStore;

pub use combined::CombinedStrategy;
pub use continuation::{Continuation, ContinuationQueue};
pub use progress::{FetchState, Progress, ProgressTracker};
pub use two_phase::TwoPhaseStrategy;

#[async_trait]
pub trait ReleaseFetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Walks the upstream, merging into `ctx` as it goes. Releases merged
    /// before an error stay in `ctx`.
    async fn run(&self, ctx: &mut FetchContext) -> Result<(), FeedError>;
}

/// The sorted releases of a run, readable while the run is in flight.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSnapshot(Arc<Mutex<Vec<Release>>>);

impl ReleaseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, releases: &ReleaseMap) {
        self.replace(releases.sorted());
    }

    pub fn replace(&self, releases: Vec<Release>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = releases;
    }

    /// Newest first.
    pub fn get(&self) -> Vec<Release> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Mutable state of one fetch run.
pub struct FetchContext {
    pub releases: ReleaseMap,
    pub store: Option<Arc<dyn ReleaseStore>>,
    pub progress: ProgressTracker,
    pub cutoff: Cutoff,
    pub backoff: BackoffPolicy,
    pub continuation: Arc<ContinuationQueue>,
    pub snapshot: ReleaseSnapshot,
}

impl FetchContext {
    pub fn new(cutoff: Cutoff) -> Self {
        Self {
            releases: ReleaseMap::new(),
            store: None,
            progress: ProgressTracker::new(),
            cutoff,
            backoff: BackoffPolicy::default(),
            continuation: Arc::new(ContinuationQueue::new()),
            snapshot: ReleaseSnapshot::new(),
        }
    }

    pub fn with_releases(mut self, releases: ReleaseMap) -> Self {
        self.releases = releases;
        self
    }

    pub fn with_store(mut self, store: Option<Arc<dyn ReleaseStore>>) -> Self {
        self.store = store;
        self
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_continuation(mut self, continuation: Arc<ContinuationQueue>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_snapshot(mut self, snapshot: ReleaseSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Fills empty bodies from the store's description region.
    pub fn reuse_descriptions(&self, releases: &mut [Release]) {
        let Some(store) = &self.store else {
            return;
        };

        for release in releases
            .iter_mut()
            .filter(|r| r.description_html.is_empty())
        {
            match store.get_description(&release.description_key()) {
                Ok(Some(html)) => release.description_html = html,
                Ok(None) => {}
                Err(e) => warn!("Failed to read cached description of {}: {:#}", release.id, e),
            }
        }
    }

    /// Merges a unit of work into the release map, writes new or updated
    /// records through to the store and republishes the snapshot.
    pub fn absorb(&mut self, mut releases: Vec<Release>) -> MergeStats {
        self.reuse_descriptions(&mut releases);

        let mut stats = MergeStats::default();
        for release in releases {
            if let Some(store) = &self.store
                && !release.description_html.is_empty()
                && let Err(e) =
                    store.put_description(&release.description_key(), &release.description_html)
            {
                warn!("Failed to cache description of {}: {:#}", release.id, e);
            }

            let persisted = self.store.as_ref().map(|_| release.clone());
            let outcome = self.releases.merge(release);
            if outcome != MergeOutcome::Unchanged
                && let (Some(store), Some(release)) = (&self.store, persisted)
                && let Err(e) = store.put(&release)
            {
                warn!("Failed to cache release {}: {:#}", release.id, e);
            }
            stats.record(outcome);
        }

        self.progress.record_merge(&stats);
        if stats.changed() > 0 {
            self.snapshot.publish(&self.releases);
        }
        stats
    }

    /// Flushes pending store writes. Store failures never fail a run.
    pub fn persist(&self) {
        if let Some(store) = &self.store
            && let Err(e) = store.flush()
        {
            warn!("Failed to flush release cache: {:#}", e);
        }
    }

    /// Records the figures of a GraphQL response and stops the run when the
    /// quota is spent.
    pub fn check_rate_limit(&self, rate_limit: &RateLimit) -> Result<(), FeedError> {
        self.progress.observe_rate_limit(rate_limit);
        if !rate_limit.is_exhausted() {
            return Ok(());
        }

        let message = rate_limit_reached_message(
            rate_limit.used,
            rate_limit.limit,
            self.progress.rate_limit_cost(),
            rate_limit.reset_at,
            Utc::now(),
        );
        Err(FeedError::RateLimited {
            message,
            reset_at: Some(rate_limit.reset_at),
        })
    }

    pub async fn drain_continuations(&mut self, api: &dyn GitHubApi) -> Result<usize, FeedError> {
        let queue = Arc::clone(&self.continuation);
        queue.drain(api, self).await
    }
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::github::{Connection, Edge, PageInfo, ReleaseNode, RepositoryNode};
    use crate::normalize::tests::{release, repo};
    use crate::store::MockReleaseStore;
    use chrono::{DateTime, Duration as ChronoDuration};
    use mockall::predicate::*;

    pub(crate) fn now() -> DateTime<Utc> {
        Utc::now()
    }

    pub(crate) fn rate_limit(remaining: i64) -> RateLimit {
        RateLimit {
            cost: 1,
            limit: 5000,
            remaining,
            reset_at: Utc::now() + ChronoDuration::minutes(30),
            used: (5000 - remaining.max(0)) as u32,
        }
    }

    pub(crate) fn no_delay() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            initial_delay: std::time::Duration::ZERO,
        }
    }

    pub(crate) fn release_node(id: &str, published_at: DateTime<Utc>) -> ReleaseNode {
        ReleaseNode {
            id: id.to_string(),
            is_draft: false,
            is_prerelease: false,
            name: Some(format!("Release {}", id)),
            tag_name: format!("v-{}", id),
            published_at: Some(published_at),
            updated_at: None,
            url: format!("https://github.com/o/r/releases/tag/v-{}", id),
            description_html: None,
        }
    }

    pub(crate) fn repository(
        owner: &str,
        name: &str,
        releases: Vec<ReleaseNode>,
        has_more: bool,
    ) -> RepositoryNode {
        let r = repo(owner, name);
        RepositoryNode {
            id: r.id,
            name: r.name,
            url: r.url,
            description: None,
            primary_language: None,
            owner: r.owner,
            stargazer_count: 1,
            languages: Connection::default(),
            license_info: None,
            releases: Connection {
                total_count: Some(releases.len() as u32),
                page_info: PageInfo {
                    has_next_page: has_more,
                    end_cursor: has_more.then(|| format!("{}-cursor", name)),
                },
                edges: releases.into_iter().map(|node| Edge { node }).collect(),
            },
        }
    }

    #[test]
    fn test_absorb_writes_through_changed_records_only() {
        let t = now() - ChronoDuration::days(1);
        let r = repo("o", "r");
        let mut store = MockReleaseStore::new();

        store.expect_get_description().returning(|_| Ok(None));
        store.expect_put().times(1).returning(|_| Ok(()));

        let mut ctx = FetchContext::new(Cutoff::rolling(now()))
            .with_store(Some(Arc::new(store)));

        let stats = ctx.absorb(vec![release("a", &r, t)]);
        assert_eq!(stats.new, 1);

        let stats = ctx.absorb(vec![release("a", &r, t)]);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(ctx.progress.snapshot().new_releases, 1);
    }

    #[test]
    fn test_absorb_reuses_cached_description() {
        let t = now() - ChronoDuration::days(1);
        let r = repo("o", "r");
        let key = release("a", &r, t).description_key();
        let mut store = MockReleaseStore::new();

        store
            .expect_get_description()
            .with(eq(key))
            .returning(|_| Ok(Some("<p>cached</p>".to_string())));
        store
            .expect_put_description()
            .returning(|_, _| Ok(false));
        store.expect_put().returning(|_| Ok(()));

        let mut ctx = FetchContext::new(Cutoff::rolling(now()))
            .with_store(Some(Arc::new(store)));
        ctx.absorb(vec![release("a", &r, t)]);

        assert_eq!(ctx.releases.get("a").unwrap().description_html, "<p>cached</p>");
    }

    #[test]
    fn test_absorb_stores_new_description() {
        let t = now() - ChronoDuration::days(1);
        let r = repo("o", "r");
        let mut with_body = release("a", &r, t);
        with_body.description_html = "<p>fresh</p>".to_string();
        let key = with_body.description_key();
        let mut store = MockReleaseStore::new();

        store
            .expect_put_description()
            .with(eq(key), eq("<p>fresh</p>"))
            .times(1)
            .returning(|_, _| Ok(true));
        store.expect_put().returning(|_| Ok(()));

        let mut ctx = FetchContext::new(Cutoff::rolling(now()))
            .with_store(Some(Arc::new(store)));
        ctx.absorb(vec![with_body]);
    }

    #[test]
    fn test_store_failures_do_not_fail_absorb() {
        let t = now() - ChronoDuration::days(1);
        let mut store = MockReleaseStore::new();
        store
            .expect_get_description()
            .returning(|_| Err(anyhow::anyhow!("disk gone")));
        store
            .expect_put()
            .returning(|_| Err(anyhow::anyhow!("disk gone")));
        store
            .expect_flush()
            .returning(|| Err(anyhow::anyhow!("disk gone")));

        let mut ctx = FetchContext::new(Cutoff::rolling(now()))
            .with_store(Some(Arc::new(store)));
        let stats = ctx.absorb(vec![release("a", &repo("o", "r"), t)]);
        ctx.persist();

        assert_eq!(stats.new, 1);
        assert_eq!(ctx.releases.len(), 1);
    }

    #[test]
    fn test_absorb_publishes_snapshot_when_something_changed() {
        let r = repo("o", "r");
        let snapshot = ReleaseSnapshot::new();
        let mut ctx = FetchContext::new(Cutoff::rolling(now())).with_snapshot(snapshot.clone());

        ctx.absorb(vec![release("old", &r, now() - ChronoDuration::days(3))]);
        assert_eq!(snapshot.get().len(), 1);

        ctx.absorb(vec![release("new", &r, now() - ChronoDuration::days(1))]);
        let ids: Vec<String> = snapshot.get().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "old"]);

        snapshot.replace(Vec::new());
        ctx.absorb(vec![release("new", &r, now() - ChronoDuration::days(1))]);
        assert!(snapshot.get().is_empty());
    }

    #[test]
    fn test_check_rate_limit() {
        let ctx = FetchContext::new(Cutoff::rolling(now()));

        assert!(ctx.check_rate_limit(&rate_limit(10)).is_ok());

        let err = ctx.check_rate_limit(&rate_limit(0)).unwrap_err();
        match err {
            FeedError::RateLimited { message, reset_at } => {
                assert!(message.starts_with("GitHub API rate limit reached (5000/5000, Cost: 2)"));
                assert!(reset_at.is_some());
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
        assert_eq!(ctx.progress.snapshot().rate_limit_remaining, Some(0));
    }
}
