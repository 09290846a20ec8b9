use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Owner, Release};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupRepo {
    pub name: String,
    pub url: String,
    pub owner: Owner,
}

/// Consecutive releases of one repository published close together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseGroup {
    pub id: String,
    /// Newest first.
    pub releases: Vec<Release>,
    /// Publish time of the first (newest) release.
    pub published_at: DateTime<Utc>,
    pub repo: GroupRepo,
    pub is_single_release: bool,
}
