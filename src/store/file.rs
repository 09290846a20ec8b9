//! JSON-file implementation of [`ReleaseStore`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::model::{CachedRelease, Release};
use crate::runtime::Runtime;

use super::{FetchMetadata, ReleaseStore};

pub const RELEASES_FILE: &str = "releases.json";
pub const DESCRIPTIONS_FILE: &str = "descriptions.json";
pub const METADATA_FILE: &str = "metadata.json";

/// Bumped when a region's layout changes; older regions are discarded on open.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataDocument {
    schema_version: u32,
    #[serde(flatten)]
    metadata: FetchMetadata,
}

#[derive(Default)]
struct Dirty {
    releases: bool,
    descriptions: bool,
    metadata: bool,
}

#[derive(Default)]
struct Regions {
    opened: bool,
    releases: BTreeMap<String, CachedRelease>,
    descriptions: BTreeMap<String, String>,
    metadata: FetchMetadata,
    dirty: Dirty,
}

impl Regions {
    /// Drops bodies that no stored release points at. Returns how many went.
    fn prune_descriptions(&mut self) -> usize {
        let live: HashSet<String> = self
            .releases
            .values()
            .map(|cached| cached.release.description_key())
            .collect();
        let before = self.descriptions.len();
        self.descriptions.retain(|key, _| live.contains(key));
        before - self.descriptions.len()
    }
}

/// Keeps the three regions in memory and writes each to its own JSON file
/// under `dir` on [`ReleaseStore::flush`]. Writes go to a temp file that is
/// then renamed over the region file.
///
/// Release records are stored without their bodies; bodies live in the
/// description region keyed by `"{id}-{published_at}"`. A flush drops bodies
/// whose key matches no stored release.
pub struct FileStore<R: Runtime> {
    runtime: R,
    dir: PathBuf,
    regions: Mutex<Regions>,
}

impl<R: Runtime> FileStore<R> {
    pub fn new(runtime: R, dir: PathBuf) -> Self {
        Self {
            runtime,
            dir,
            regions: Mutex::new(Regions::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn region_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn regions(&self) -> MutexGuard<'_, Regions> {
        self.regions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reads a region file, treating a missing file as empty and an
    /// unreadable one as discarded.
    fn read_region<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.region_path(name);
        if !self.runtime.exists(&path) {
            return T::default();
        }

        match self
            .runtime
            .read_to_string(&path)
            .and_then(|content| serde_json::from_str(&content).map_err(Into::into))
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding unreadable cache region {:?}: {}", path, e);
                T::default()
            }
        }
    }

    fn write_region<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.region_path(name);
        let tmp = self.region_path(&format!("{}.tmp", name));
        let content = serde_json::to_string(value)?;

        self.runtime
            .write(&tmp, content.as_bytes())
            .with_context(|| format!("Failed to write cache region to {:?}", tmp))?;
        self.runtime
            .rename(&tmp, &path)
            .with_context(|| format!("Failed to replace cache region {:?}", path))
    }

    fn open(&self, regions: &mut Regions) -> Result<()> {
        if regions.opened {
            return Ok(());
        }

        if !self.runtime.exists(&self.dir) {
            self.runtime
                .create_dir_all(&self.dir)
                .with_context(|| format!("Failed to create cache directory {:?}", self.dir))?;
        }

        let metadata: Option<MetadataDocument> = self.read_region(METADATA_FILE);
        match metadata {
            Some(doc) if doc.schema_version == SCHEMA_VERSION => {
                regions.metadata = doc.metadata;
                let releases: Vec<CachedRelease> = self.read_region(RELEASES_FILE);
                regions.releases = releases
                    .into_iter()
                    .map(|r| (r.release.id.clone(), r))
                    .collect();
                regions.descriptions = self.read_region(DESCRIPTIONS_FILE);
            }
            Some(doc) => {
                debug!(
                    "Migrating cache from schema {} to {}",
                    doc.schema_version, SCHEMA_VERSION
                );
                regions.dirty = Dirty {
                    releases: true,
                    descriptions: true,
                    metadata: true,
                };
            }
            None => {
                regions.dirty.metadata = true;
            }
        }

        regions.opened = true;
        debug!(
            "Opened cache at {:?}: {} releases, {} descriptions",
            self.dir,
            regions.releases.len(),
            regions.descriptions.len()
        );
        Ok(())
    }

    fn with_regions<T>(&self, f: impl FnOnce(&mut Regions) -> T) -> Result<T> {
        let mut regions = self.regions();
        self.open(&mut regions)?;
        Ok(f(&mut regions))
    }
}

impl<R: Runtime> ReleaseStore for FileStore<R> {
    #[tracing::instrument(skip(self))]
    fn init(&self) -> Result<()> {
        self.with_regions(|_| ())
    }

    fn load_cached(&self) -> Result<Vec<Release>> {
        self.with_regions(|regions| {
            regions
                .releases
                .values()
                .map(|cached| {
                    let mut release = cached.release.clone();
                    if let Some(html) = regions.descriptions.get(&release.description_key()) {
                        release.description_html = html.clone();
                    }
                    release
                })
                .collect()
        })
    }

    fn put(&self, release: &Release) -> Result<()> {
        self.with_regions(|regions| {
            let key = release.description_key();
            if !release.description_html.is_empty()
                && regions.descriptions.get(&key) != Some(&release.description_html)
            {
                regions
                    .descriptions
                    .insert(key, release.description_html.clone());
                regions.dirty.descriptions = true;
            }

            let mut stored = release.clone();
            stored.description_html = String::new();
            regions.releases.insert(
                stored.id.clone(),
                CachedRelease {
                    release: stored,
                    cached_at: Utc::now(),
                },
            );
            regions.dirty.releases = true;
        })
    }

    fn get_description(&self, key: &str) -> Result<Option<String>> {
        self.with_regions(|regions| regions.descriptions.get(key).cloned())
    }

    fn put_description(&self, key: &str, html: &str) -> Result<bool> {
        self.with_regions(|regions| {
            if regions.descriptions.get(key).map(String::as_str) == Some(html) {
                return false;
            }
            regions
                .descriptions
                .insert(key.to_string(), html.to_string());
            regions.dirty.descriptions = true;
            true
        })
    }

    fn metadata(&self) -> Result<FetchMetadata> {
        self.with_regions(|regions| regions.metadata.clone())
    }

    fn update_metadata(&self, metadata: &FetchMetadata) -> Result<()> {
        self.with_regions(|regions| {
            regions.metadata = metadata.clone();
            regions.dirty.metadata = true;
        })
    }

    #[tracing::instrument(skip(self))]
    fn flush(&self) -> Result<()> {
        let mut regions = self.regions();
        self.open(&mut regions)?;

        if regions.dirty.releases || regions.dirty.descriptions {
            let pruned = regions.prune_descriptions();
            if pruned > 0 {
                debug!("Pruned {} orphaned descriptions", pruned);
                regions.dirty.descriptions = true;
            }
        }
        if regions.dirty.releases {
            let releases: Vec<&CachedRelease> = regions.releases.values().collect();
            self.write_region(RELEASES_FILE, &releases)?;
            regions.dirty.releases = false;
        }
        if regions.dirty.descriptions {
            self.write_region(DESCRIPTIONS_FILE, &regions.descriptions)?;
            regions.dirty.descriptions = false;
        }
        if regions.dirty.metadata {
            let doc = MetadataDocument {
                schema_version: SCHEMA_VERSION,
                metadata: regions.metadata.clone(),
            };
            self.write_region(METADATA_FILE, &doc)?;
            regions.dirty.metadata = false;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn clear(&self) -> Result<()> {
        let mut regions = self.regions();
        regions.releases.clear();
        regions.descriptions.clear();
        regions.metadata = FetchMetadata::default();
        regions.dirty = Dirty::default();

        for name in [RELEASES_FILE, DESCRIPTIONS_FILE, METADATA_FILE] {
            let path = self.region_path(name);
            if self.runtime.exists(&path) {
                self.runtime
                    .remove_file(&path)
                    .with_context(|| format!("Failed to remove cache region {:?}", path))?;
            }
        }

        // Reopening after a clear starts from empty regions.
        regions.opened = false;
        Ok(())
    }
}
