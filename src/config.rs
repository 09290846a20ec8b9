use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;

use crate::cache::CacheTtls;
use crate::fetch::combined::{DEFAULT_RELEASES_PER_REPO, MAX_RELEASES_PER_REPO};
use crate::http::ClientOptions;
use crate::runtime::Runtime;
use crate::session::mask_token;

/// Directory under the platform cache dir holding the release store.
pub const STORE_DIR_NAME: &str = "starfeed";

/// User id used in cache keys when none is configured.
pub const DEFAULT_USER_ID: &str = "viewer";

/// Which fan-out strategy a fetch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StrategyKind {
    /// Starred list, then one release feed per repository.
    #[default]
    TwoPhase,
    /// Starred repositories with embedded releases, page by page.
    Combined,
}

/// Values given on the command line. They win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub dir: Option<PathBuf>,
    pub api_url: Option<String>,
    pub web_url: Option<String>,
    pub no_store: bool,
    pub strategy: Option<StrategyKind>,
    pub with_details: bool,
    pub releases_per_repo: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: Option<String>,
    pub user_id: String,
    pub api_url: Option<String>,
    pub web_url: Option<String>,
    pub releases_per_repo: u32,
    pub ttls: CacheTtls,
    /// `None` disables the persistent store.
    pub store_dir: Option<PathBuf>,
    pub strategy: StrategyKind,
    pub with_details: bool,
    pub client: ClientOptions,
}

fn non_empty<R: Runtime>(runtime: &R, key: &str) -> Option<String> {
    runtime
        .env_var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<R: Runtime, T: FromStr>(runtime: &R, key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    non_empty(runtime, key)
        .map(|v| {
            v.parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", key, v))
        })
        .transpose()
}

fn ttl_secs<R: Runtime>(runtime: &R, key: &str, default: Duration) -> Result<Duration> {
    Ok(parse_env::<R, u64>(runtime, key)?
        .map(Duration::from_secs)
        .unwrap_or(default))
}

impl Config {
    /// Reads the environment through `runtime` and applies `overrides`.
    pub fn load<R: Runtime>(runtime: &R, overrides: ConfigOverrides) -> Result<Self> {
        let token = non_empty(runtime, "GITHUB_TOKEN");
        if let Some(token) = &token {
            debug!("Using GITHUB_TOKEN for authentication: {}", mask_token(token));
        }

        let user_id = non_empty(runtime, "STARFEED_USER").unwrap_or_else(|| DEFAULT_USER_ID.to_string());

        let releases_per_repo = match overrides.releases_per_repo {
            Some(n) => n,
            None => parse_env(runtime, "GITHUB_RELEASES_PER_REPO")?.unwrap_or(DEFAULT_RELEASES_PER_REPO),
        }
        .clamp(1, MAX_RELEASES_PER_REPO);

        let defaults = CacheTtls::default();
        let ttls = CacheTtls {
            releases: ttl_secs(runtime, "GITHUB_CACHE_TTL", defaults.releases)?,
            starred: ttl_secs(runtime, "GITHUB_CACHE_TTL", defaults.starred)?,
            repo_releases: ttl_secs(runtime, "GITHUB_REPO_RELEASES_TTL", defaults.repo_releases)?,
            details: ttl_secs(runtime, "GITHUB_DETAILS_TTL", defaults.details)?,
        };

        let store_dir = if overrides.no_store {
            None
        } else {
            overrides
                .dir
                .or_else(|| non_empty(runtime, "STARFEED_DIR").map(PathBuf::from))
                .or_else(|| runtime.cache_dir().map(|d| d.join(STORE_DIR_NAME)))
        };
        if store_dir.is_none() {
            debug!("Release store disabled; every run fetches from GitHub");
        }

        Ok(Self {
            token,
            user_id,
            api_url: overrides.api_url.or_else(|| non_empty(runtime, "GITHUB_API_URL")),
            web_url: overrides.web_url.or_else(|| non_empty(runtime, "GITHUB_WEB_URL")),
            releases_per_repo,
            ttls,
            store_dir,
            strategy: overrides.strategy.unwrap_or_default(),
            with_details: overrides.with_details,
            client: ClientOptions::default(),
        })
    }
}
