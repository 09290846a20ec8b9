use anyhow::Result;
use clap::Parser;
use starfeed::config::{Config, ConfigOverrides, StrategyKind};
use starfeed::render::render;
use starfeed::services::Services;
use starfeed::store::STALE_THRESHOLD_SECS;
use std::path::PathBuf;

/// starfeed - Recent releases of your starred GitHub repositories
///
/// Collects the releases of the last 3 months from every repository you
/// starred and prints them newest first, grouped by repository.
///
/// Requires a GITHUB_TOKEN environment variable for authentication.
///
/// Examples:
///   starfeed fetch                  # Fetch and print the feed
///   starfeed refresh --max-age 600  # Fetch only if older than 10 minutes
#[derive(Parser, Debug)]
#[command(author, version = env!("STARFEED_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Release store directory (overrides defaults; also via STARFEED_DIR)
    #[arg(long, env = "STARFEED_DIR", value_name = "PATH", global = true)]
    pub dir: Option<PathBuf>,

    /// GitHub API URL (defaults to https://api.github.com)
    #[arg(long = "api-url", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// GitHub web URL serving release feeds (defaults to https://github.com)
    #[arg(long = "web-url", value_name = "URL", global = true)]
    pub web_url: Option<String>,

    /// Do not read or write the release store
    #[arg(long = "no-store", global = true)]
    pub no_store: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Fetch releases and print the feed
    Fetch(FetchArgs),

    /// Print the cached feed, fetching first if it is stale
    Refresh(RefreshArgs),

    /// Delete every cached release
    Clear,
}

#[derive(clap::Args, Debug, Default)]
pub struct FetchArgs {
    /// How releases are collected
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Fetch release notes with each page (combined strategy)
    #[arg(long)]
    pub details: bool,

    /// Releases embedded per repository, 1 to 10 (combined strategy)
    #[arg(long, value_name = "N")]
    pub releases_per_repo: Option<u32>,
}

#[derive(clap::Args, Debug)]
pub struct RefreshArgs {
    /// Seconds after which the cached feed is refetched
    #[arg(long, value_name = "SECS", default_value_t = STALE_THRESHOLD_SECS)]
    pub max_age: i64,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let fetch = match &self.command {
            Commands::Fetch(args) => Some(args),
            Commands::Refresh(args) => Some(&args.fetch),
            Commands::Clear => None,
        };
        ConfigOverrides {
            dir: self.dir.clone(),
            api_url: self.api_url.clone(),
            web_url: self.web_url.clone(),
            no_store: self.no_store,
            strategy: fetch.and_then(|f| f.strategy),
            with_details: fetch.is_some_and(|f| f.details),
            releases_per_repo: fetch.and_then(|f| f.releases_per_repo),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = starfeed::runtime::RealRuntime;

    let config = Config::load(&runtime, cli.overrides())?;
    let feed = Services::from_config(runtime, &config)?.into_feed();

    match cli.command {
        Commands::Fetch(_) => {
            feed.load_cached();
            let result = feed.fetch_all_releases().await;
            print!("{}", render(&feed.groups()));
            result?;
        }
        Commands::Refresh(args) => {
            feed.load_cached();
            let result = feed
                .refresh_if_stale(chrono::Duration::seconds(args.max_age))
                .await;
            print!("{}", render(&feed.groups()));
            result?;
        }
        Commands::Clear => {
            feed.clear_cache()?;
            println!("Release cache cleared");
        }
    }
    Ok(())
}
