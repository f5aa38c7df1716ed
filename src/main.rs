//! Trawler node entry point
//!
//! Wires the in-memory stores, the partition detector, and the crawl and
//! PageRank services together according to the configuration, then runs the
//! service group until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use trawler::config::{load_config, Config, PartitionMode};
use trawler::crawler::{DnsPrivateNetworkDetector, HttpGetter};
use trawler::graph::InMemoryGraph;
use trawler::index::InMemoryIndex;
use trawler::pagerank::PageRankConfig;
use trawler::partition::{EnvPartitionDetector, FixedPartitionDetector, PartitionDetector};
use trawler::service::{
    CrawlerService, CrawlerServiceConfig, PageRankService, PageRankServiceConfig, Service,
    ServiceGroup,
};
use trawler::shutdown;

/// Which services this node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Crawl and calculate PageRank in one process.
    All,
    /// Crawl only.
    Crawler,
    /// Calculate PageRank only.
    Pagerank,
}

/// Trawler: a partitioned web crawl and PageRank engine
#[derive(Parser, Debug)]
#[command(name = "trawler", version, about)]
struct Cli {
    /// Path to a TOML configuration file; defaults apply when omitted
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Services to run
    #[arg(long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            load_config(path)?
        }
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    let graph = Arc::new(InMemoryGraph::new());
    let index = Arc::new(InMemoryIndex::new());
    let partition_detector: Arc<dyn PartitionDetector> = match config.partition.mode {
        PartitionMode::Fixed => Arc::new(FixedPartitionDetector {
            partition: config.partition.partition,
            num_partitions: config.partition.num_partitions,
        }),
        PartitionMode::Env => Arc::new(EnvPartitionDetector::new()),
    };

    let mut services: Vec<Arc<dyn Service>> = Vec::new();
    if matches!(cli.mode, Mode::All | Mode::Crawler) {
        services.push(Arc::new(CrawlerService::new(CrawlerServiceConfig {
            graph: graph.clone(),
            indexer: index.clone(),
            url_getter: Arc::new(HttpGetter::new(
                &config.fetcher.user_agent,
                config.fetcher.request_timeout(),
            )?),
            private_network_detector: Arc::new(DnsPrivateNetworkDetector::new()),
            partition_detector: partition_detector.clone(),
            fetch_workers: config.crawler.fetch_workers,
            update_interval: config.crawler.update_interval(),
            reindex_threshold: config.crawler.reindex_threshold(),
        })?));
    }
    if matches!(cli.mode, Mode::All | Mode::Pagerank) {
        services.push(Arc::new(PageRankService::new(PageRankServiceConfig {
            graph,
            indexer: index,
            partition_detector,
            pagerank: PageRankConfig {
                damping_factor: config.pagerank.damping_factor,
                tolerance: config.pagerank.tolerance,
                max_iterations: config.pagerank.max_iterations,
                compute_workers: config.pagerank.compute_workers,
            },
            update_interval: config.pagerank.update_interval(),
        })?));
    }

    let (handle, token) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            handle.shutdown();
        }
    });

    ServiceGroup::new(services).run(&token).await?;
    Ok(())
}

fn setup_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
