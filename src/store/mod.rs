//! Local persistent store of releases, release bodies and fetch metadata.
//!
//! The store is optional everywhere it is used: callers hold an
//! `Option<Arc<dyn ReleaseStore>>` and fall back to always fetching.

mod file;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Release;

pub use file::{DESCRIPTIONS_FILE, FileStore, METADATA_FILE, RELEASES_FILE, SCHEMA_VERSION};

/// Cached data older than this is refreshed in the background.
pub const STALE_THRESHOLD_SECS: i64 = 5 * 60;

/// When the last successful fetch finished, and the opaque validator that came with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMetadata {
    #[serde(default)]
    pub last_fetch_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub etag: Option<String>,
}

impl FetchMetadata {
    /// Never-fetched data is stale.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.last_fetch_timestamp {
            Some(at) => now - at > max_age,
            None => true,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait ReleaseStore: Send + Sync {
    /// Opens the store, creating or migrating its regions. Idempotent.
    fn init(&self) -> Result<()>;

    /// All persisted releases, bodies rejoined from the description region.
    fn load_cached(&self) -> Result<Vec<Release>>;

    fn put(&self, release: &Release) -> Result<()>;

    fn get_description(&self, key: &str) -> Result<Option<String>>;

    /// Stores a body unless the same one is already stored. Returns whether it wrote.
    fn put_description(&self, key: &str, html: &str) -> Result<bool>;

    fn metadata(&self) -> Result<FetchMetadata>;

    fn update_metadata(&self, metadata: &FetchMetadata) -> Result<()>;

    /// Writes pending changes to durable storage.
    fn flush(&self) -> Result<()>;

    /// Wipes every region.
    fn clear(&self) -> Result<()>;
}
