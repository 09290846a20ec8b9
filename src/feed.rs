//! The inbound facade: one object that fetches, caches and exposes the feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::cache::CacheService;
use crate::error::FeedError;
use crate::fetch::{
    FetchContext, FetchState, Progress, ProgressTracker, ReleaseFetchStrategy, ReleaseSnapshot,
};
use crate::group::ReleaseGrouper;
use crate::model::{Release, ReleaseGroup};
use crate::normalize::{Cutoff, ReleaseMap};
use crate::retry::BackoffPolicy;
use crate::session::SessionProvider;
use crate::store::{FetchMetadata, ReleaseStore};

#[derive(Debug, Default)]
struct View {
    error: Option<String>,
    last_fetched: Option<DateTime<Utc>>,
}

/// Resets the flag it was created for when dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReleaseFeed {
    strategy: Arc<dyn ReleaseFetchStrategy>,
    store: Option<Arc<dyn ReleaseStore>>,
    cache: Arc<CacheService>,
    session: Arc<dyn SessionProvider>,
    backoff: BackoffPolicy,
    view: Mutex<View>,
    releases: ReleaseSnapshot,
    progress: ProgressTracker,
    running: AtomicBool,
    background: AtomicBool,
    grouper: Mutex<ReleaseGrouper>,
}

impl ReleaseFeed {
    pub fn new(
        strategy: Arc<dyn ReleaseFetchStrategy>,
        store: Option<Arc<dyn ReleaseStore>>,
        cache: Arc<CacheService>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            strategy,
            store,
            cache,
            session,
            backoff: BackoffPolicy::default(),
            view: Mutex::new(View::default()),
            releases: ReleaseSnapshot::new(),
            progress: ProgressTracker::new(),
            running: AtomicBool::new(false),
            background: AtomicBool::new(false),
            grouper: Mutex::new(ReleaseGrouper::new()),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shows whatever the store holds. Returns whether anything was loaded.
    pub fn load_cached(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let cached = match store.load_cached() {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Failed to load cached releases: {:#}", e);
                return false;
            }
        };

        let cutoff = Cutoff::rolling(Utc::now());
        let mut releases = ReleaseMap::new();
        releases.merge_all(cached.into_iter().filter(|r| cutoff.admits(r.published_at)));
        debug!("Loaded {} cached releases", releases.len());

        self.releases.publish(&releases);
        if let Ok(metadata) = store.metadata() {
            self.view().last_fetched = metadata.last_fetch_timestamp;
        }
        !releases.is_empty()
    }

    /// Runs the configured strategy to completion. Releases become visible
    /// as each unit of work is merged, and those merged before a failure are
    /// kept. A call made while a run is in progress returns immediately.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_all_releases(&self) -> Result<(), FeedError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Fetch already in progress");
            return Ok(());
        }
        let _guard = RunGuard(&self.running);

        if self.session.session().is_none() {
            let error = FeedError::Unauthorized("Not authenticated".to_string());
            self.record_failure(&error);
            return Err(error);
        }

        let now = Utc::now();
        let cutoff = Cutoff::rolling(now);
        let mut seed = ReleaseMap::new();
        seed.merge_all(
            self.releases()
                .into_iter()
                .filter(|r| cutoff.admits(r.published_at)),
        );

        let mut ctx = FetchContext::new(cutoff)
            .with_releases(seed)
            .with_store(self.store.clone())
            .with_progress(self.progress.clone())
            .with_backoff(self.backoff)
            .with_snapshot(self.releases.clone());

        self.progress.start();
        info!("Fetching releases with the {} strategy", self.strategy.name());
        let result = self.strategy.run(&mut ctx).await;

        self.releases.publish(&ctx.releases);

        match result {
            Ok(()) => {
                self.record_success(now);
                let progress = self.progress.snapshot();
                info!(
                    "Fetched {} new and {} updated releases",
                    progress.new_releases, progress.updated_releases
                );
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e);
                if matches!(e, FeedError::Unauthorized(_)) {
                    self.session.on_session_invalid();
                }
                Err(e)
            }
        }
    }

    fn record_success(&self, fetched_at: DateTime<Utc>) {
        if let Some(store) = &self.store {
            let etag = store.metadata().ok().and_then(|m| m.etag);
            let metadata = FetchMetadata {
                last_fetch_timestamp: Some(fetched_at),
                etag,
            };
            if let Err(e) = store.update_metadata(&metadata).and_then(|_| store.flush()) {
                warn!("Failed to record fetch time: {:#}", e);
            }
        }

        let mut view = self.view();
        view.error = None;
        view.last_fetched = Some(fetched_at);
        drop(view);
        self.progress.finish();
    }

    fn record_failure(&self, error: &FeedError) {
        let message = error.to_string();
        warn!("Fetch failed: {}", message);
        self.view().error = Some(message.clone());
        self.progress.fail(message);
    }

    /// Fetches in the background when the last successful fetch is older
    /// than `max_age`. Returns whether a fetch ran.
    pub async fn refresh_if_stale(&self, max_age: chrono::Duration) -> Result<bool, FeedError> {
        let last_fetched = self
            .store
            .as_ref()
            .and_then(|s| s.metadata().ok())
            .and_then(|m| m.last_fetch_timestamp)
            .or(self.view().last_fetched);
        let metadata = FetchMetadata {
            last_fetch_timestamp: last_fetched,
            etag: None,
        };
        if !metadata.is_stale(Utc::now(), max_age) {
            debug!("Cached releases are fresh; skipping refresh");
            return Ok(false);
        }

        self.background.store(true, Ordering::Release);
        let _guard = RunGuard(&self.background);
        self.fetch_all_releases().await?;
        Ok(true)
    }

    /// Drops every cached release, response and group.
    pub fn clear_cache(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.clear()?;
        }
        self.cache.clear();
        self.grouper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.view() = View::default();
        self.releases.replace(Vec::new());
        info!("Cleared release cache");
        Ok(())
    }

    /// Newest first.
    pub fn releases(&self) -> Vec<Release> {
        self.releases.get()
    }

    pub fn groups(&self) -> Vec<ReleaseGroup> {
        let releases = self.releases();
        self.grouper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .group(&releases)
            .to_vec()
    }

    pub fn state(&self) -> FetchState {
        self.progress.state()
    }

    pub fn progress(&self) -> Progress {
        self.progress.snapshot()
    }

    pub fn error(&self) -> Option<String> {
        self.view().error.clone()
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.view().last_fetched
    }

    pub fn is_loading(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_background_loading(&self) -> bool {
        self.background.load(Ordering::Acquire)
    }
}
