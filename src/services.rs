//! Service factory for building the fetch pipeline.
//!
//! This module separates the construction of the pipeline's collaborators
//! (HTTP client, cached GitHub API, store, strategy) from the configuration
//! they are built from.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};

use crate::cache::{CacheService, CachedGitHub};
use crate::config::{Config, StrategyKind};
use crate::feed::ReleaseFeed;
use crate::fetch::{CombinedStrategy, ReleaseFetchStrategy, TwoPhaseStrategy};
use crate::github::{GitHub, GitHubApi};
use crate::http::{ClientOptions, HttpClient};
use crate::runtime::Runtime;
use crate::session::{SessionProvider, TokenSession};
use crate::store::{FileStore, ReleaseStore};

/// Build an HTTP client with optional authentication token
pub fn build_http_client(token: Option<&str>, options: ClientOptions) -> Result<HttpClient> {
    HttpClient::build(token, options)
}

/// Build the uncached GitHub client from configuration
pub fn build_github(config: &Config) -> Result<GitHub> {
    let http = build_http_client(config.token.as_deref(), config.client)?;
    Ok(GitHub::new(
        http,
        config.api_url.clone(),
        config.web_url.clone(),
        config.token.clone(),
    ))
}

/// Open the release store, or `None` when it is disabled or unusable.
pub fn build_store<R: Runtime + 'static>(runtime: R, config: &Config) -> Option<Arc<dyn ReleaseStore>> {
    let dir = config.store_dir.clone()?;
    let store = FileStore::new(runtime, dir);
    match store.init() {
        Ok(()) => {
            debug!("Using release store at {:?}", store.dir());
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!("Release store unavailable, fetching without it: {:#}", e);
            None
        }
    }
}

/// Build the configured fan-out strategy over `api`
pub fn build_strategy(config: &Config, api: Arc<dyn GitHubApi>) -> Arc<dyn ReleaseFetchStrategy> {
    match config.strategy {
        StrategyKind::TwoPhase => Arc::new(TwoPhaseStrategy::new(api)),
        StrategyKind::Combined => Arc::new(CombinedStrategy::new(
            api,
            config.with_details,
            config.releases_per_repo,
        )),
    }
}

/// Container for the collaborators of a [`ReleaseFeed`].
pub struct Services {
    pub github: Arc<CachedGitHub>,
    pub cache: Arc<CacheService>,
    pub store: Option<Arc<dyn ReleaseStore>>,
    pub strategy: Arc<dyn ReleaseFetchStrategy>,
    pub session: Arc<dyn SessionProvider>,
}

impl Services {
    pub fn from_config<R: Runtime + 'static>(runtime: R, config: &Config) -> Result<Self> {
        let cache = Arc::new(CacheService::new());
        let github = Arc::new(CachedGitHub::new(
            Arc::new(build_github(config)?),
            Arc::clone(&cache),
            config.user_id.clone(),
            config.ttls,
        ));
        let strategy = build_strategy(config, github.clone());

        Ok(Self {
            github,
            cache,
            store: build_store(runtime, config),
            strategy,
            session: Arc::new(TokenSession::new(
                config.user_id.clone(),
                config.token.clone(),
            )),
        })
    }

    pub fn into_feed(self) -> ReleaseFeed {
        ReleaseFeed::new(self.strategy, self.store, self.cache, self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockito::{Matcher, Server};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn config(store_dir: Option<PathBuf>) -> Config {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .returning(|_| Err(std::env::VarError::NotPresent));
        runtime.expect_cache_dir().returning(|| None);
        let overrides = ConfigOverrides {
            dir: store_dir,
            ..Default::default()
        };
        Config::load(&runtime, overrides).unwrap()
    }

    #[tokio::test]
    async fn test_build_http_client_with_token() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/")
            .match_header(
                "Authorization",
                Matcher::Exact("Bearer test_token".to_string()),
            )
            .create();

        let client = build_http_client(Some("test_token"), ClientOptions::default()).unwrap();
        let _ = client.inner().get(server.url()).send().await;

        mock.assert();
    }

    #[tokio::test]
    async fn test_build_http_client_without_token() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/")
            .match_header("Authorization", Matcher::Missing)
            .create();

        let client = build_http_client(None, ClientOptions::default()).unwrap();
        let _ = client.inner().get(server.url()).send().await;

        mock.assert();
    }

    #[test]
    fn test_build_store_disabled_without_dir() {
        assert!(build_store(RealRuntime, &config(None)).is_none());
    }

    #[test]
    fn test_build_store_initializes_dir() {
        let dir = tempdir().unwrap();
        let store_dir = dir.path().join("starfeed");

        let store = build_store(RealRuntime, &config(Some(store_dir.clone())));

        assert!(store.is_some());
        assert!(store_dir.is_dir());
    }

    #[test]
    fn test_build_strategy_follows_config() {
        let api: Arc<dyn GitHubApi> = Arc::new(crate::github::MockGitHubApi::new());
        let mut config = config(None);
        assert_eq!(build_strategy(&config, Arc::clone(&api)).name(), "two-phase");

        config.strategy = StrategyKind::Combined;
        assert_eq!(build_strategy(&config, api).name(), "combined");
    }
}
