//! share-index server
//!
//! Crawls a file share, publishes its inherited ACL resources and serves
//! permission-filtered search over HTTP.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use share_index::{
    api::{self, AppState},
    indexer::{crawl_task, CrawlIndexer},
};
use share_index_core::{
    adaptor::ShareAdaptor,
    config::AdaptorConfig,
    delegate::LocalDelegate,
    index::AclIndex,
    publisher::AclPublisher,
    search::SearchIndex,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "share-index")]
#[command(about = "Index a file share together with its inherited ACLs")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Share root, overrides the configured one
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single crawl pass and print its statistics
    Crawl,

    /// Crawl periodically and serve the HTTP API
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        addr: String,

        /// Seconds between crawl passes
        #[arg(long, default_value_t = 3600)]
        recrawl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(cli.config, cli.root)?);

    let adaptor = Arc::new(ShareAdaptor::new(config.clone(), Arc::new(LocalDelegate::new()))?);
    let acl_index = Arc::new(AclIndex::new());
    let publisher = Arc::new(AclPublisher::from_config(acl_index.clone(), &config));
    let search = Arc::new(SearchIndex::new(&config.index_dir)?);
    let crawler = Arc::new(CrawlIndexer::new(
        adaptor.clone(),
        publisher.clone(),
        acl_index.clone(),
        search.clone(),
    ));

    match cli.command {
        Commands::Crawl => {
            let stats = crawler.crawl().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Serve { addr, recrawl_secs } => {
            let recrawl = tokio::spawn(crawl_task(crawler, Duration::from_secs(recrawl_secs)));
            let app = api::router(AppState {
                adaptor,
                acl_index,
                search,
            });

            let listener = TcpListener::bind(&addr).await?;
            info!("listening on {addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("shutting down");
                    recrawl.abort();
                    publisher.abort_all().await;
                })
                .await?;
        }
    }

    Ok(())
}

fn load_config(file: Option<PathBuf>, root: Option<PathBuf>) -> Result<AdaptorConfig> {
    let root = match root {
        Some(root) if root.is_relative() => Some(std::env::current_dir()?.join(root)),
        root => root,
    };
    let config = match (file, root) {
        (Some(file), root) => {
            let mut config = AdaptorConfig::from_json_file(&file)?;
            if let Some(root) = root {
                config.root = root;
            }
            config
        }
        (None, Some(root)) => AdaptorConfig::new(root),
        (None, None) => bail!("either --config or --root is required"),
    };
    config.validate()?;
    Ok(config)
}
