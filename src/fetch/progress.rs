use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::github::RateLimit;
use crate::normalize::MergeStats;

/// Where a fetch run currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchState {
    #[default]
    Idle,
    Loading {
        cursor: Option<String>,
    },
    Error(String),
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchState::Idle => write!(f, "idle"),
            FetchState::Loading { cursor: None } => write!(f, "loading"),
            FetchState::Loading { cursor: Some(c) } => write!(f, "loading (after {})", c),
            FetchState::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Counters of a fetch run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    pub state: FetchState,
    pub pages_fetched: usize,
    /// Known once the starred list reports its size.
    pub repos_total: Option<usize>,
    pub repos_processed: usize,
    pub repos_failed: usize,
    pub new_releases: usize,
    pub updated_releases: usize,
    /// Caller-level retries spent on timeouts and network failures.
    pub retries: usize,
    /// Sum of the rate-limit cost reported by each GraphQL response.
    pub rate_limit_cost: u32,
    pub rate_limit_remaining: Option<i64>,
}

/// Shared, cloneable view of a run's [`Progress`].
///
/// The fetch engine writes through it while the facade reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<Mutex<Progress>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Progress {
        self.lock().clone()
    }

    pub fn state(&self) -> FetchState {
        self.lock().state.clone()
    }

    /// Resets the counters and enters `Loading` at the first page.
    pub fn start(&self) {
        *self.lock() = Progress {
            state: FetchState::Loading { cursor: None },
            ..Progress::default()
        };
    }

    pub fn loading_page(&self, cursor: Option<&str>) {
        self.lock().state = FetchState::Loading {
            cursor: cursor.map(str::to_string),
        };
    }

    pub fn page_fetched(&self) {
        self.lock().pages_fetched += 1;
    }

    pub fn observe_rate_limit(&self, rate_limit: &RateLimit) {
        let mut p = self.lock();
        p.rate_limit_cost += rate_limit.cost;
        p.rate_limit_remaining = Some(rate_limit.remaining);
    }

    pub fn set_repos_total(&self, total: usize) {
        self.lock().repos_total = Some(total);
    }

    pub fn repos_processed(&self, count: usize) {
        self.lock().repos_processed += count;
    }

    pub fn repo_failed(&self) {
        self.lock().repos_failed += 1;
    }

    pub fn record_merge(&self, stats: &MergeStats) {
        let mut p = self.lock();
        p.new_releases += stats.new;
        p.updated_releases += stats.updated;
    }

    pub fn retried(&self) {
        self.lock().retries += 1;
    }

    pub fn rate_limit_cost(&self) -> u32 {
        self.lock().rate_limit_cost
    }

    pub fn finish(&self) {
        self.lock().state = FetchState::Idle;
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.lock().state = FetchState::Error(message.into());
    }
}
