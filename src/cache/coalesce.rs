//! In-flight request deduplication.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use log::{debug, warn};

use crate::error::FeedError;

use super::CacheStatus;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FeedError>>>;

enum Step<V: Clone> {
    Join(u64, SharedFetch<V>),
    Lead(u64, SharedFetch<V>),
}

/// Removes a leader's registration when the leader settles or is dropped.
struct Registration<'a, V: Clone> {
    coalescer: &'a Coalescer<V>,
    key: &'a str,
    generation: u64,
}

impl<V: Clone> Drop for Registration<'_, V> {
    fn drop(&mut self) {
        let mut inflight = self
            .coalescer
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if inflight.get(self.key).map(|(g, _)| *g) == Some(self.generation) {
            inflight.remove(self.key);
        }
    }
}

/// Shares one pending fetch between concurrent callers of the same key.
///
/// A fetch is registered before it is first polled and unregistered once its
/// leader settles or is dropped, so the suppression window spans the whole
/// retried operation and a cancelled leader never leaves a stale entry.
/// Each registration carries a generation; a settling fetch only removes its
/// own registration.
pub struct Coalescer<V: Clone> {
    inflight: Mutex<HashMap<String, (u64, SharedFetch<V>)>>,
    generation: AtomicU64,
}

impl<V> Coalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<String, (u64, SharedFetch<V>)>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of fetches currently registered.
    pub fn pending(&self) -> usize {
        self.inflight().len()
    }

    /// Joins the fetch in flight for `key`, or runs `producer` as the new one.
    ///
    /// A caller that joined a fetch which then failed does not see that
    /// failure: it makes a fresh attempt of its own.
    pub async fn dedupe<F, Fut>(&self, key: &str, producer: F) -> (Result<V, FeedError>, CacheStatus)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FeedError>> + Send + 'static,
    {
        let mut producer = Some(producer);
        let mut failed_generation = None;

        loop {
            let step = {
                let mut inflight = self.inflight();
                match inflight.get(key) {
                    Some((generation, shared)) if Some(*generation) != failed_generation => {
                        Step::Join(*generation, shared.clone())
                    }
                    _ => {
                        let Some(producer) = producer.take() else {
                            return (
                                Err(FeedError::InvalidResponseShape(format!(
                                    "coalesced fetch for {} could not be restarted",
                                    key
                                ))),
                                CacheStatus::Miss,
                            );
                        };
                        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                        let shared = producer().boxed().shared();
                        inflight.insert(key.to_string(), (generation, shared.clone()));
                        Step::Lead(generation, shared)
                    }
                }
            };

            match step {
                Step::Join(generation, shared) => {
                    debug!("Joining in-flight fetch for {}", key);
                    match shared.await {
                        Ok(value) => return (Ok(value), CacheStatus::Coalesce),
                        Err(e) => {
                            warn!("Coalesced fetch for {} failed, trying fresh: {}", key, e);
                            failed_generation = Some(generation);
                        }
                    }
                }
                Step::Lead(generation, shared) => {
                    let _registration = Registration {
                        coalescer: self,
                        key,
                        generation,
                    };
                    return (shared.await, CacheStatus::Miss);
                }
            }
        }
    }
}

impl<V> Default for Coalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
