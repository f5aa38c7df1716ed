//! Crawler service
//!
//! Wakes on a fixed interval, asks the partition detector which slice of
//! the UUID key space this node owns, and crawls the links in that slice
//! that have not been retrieved since the re-index threshold.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::{Service, ServiceError};
use crate::crawler::{Crawler, CrawlerConfig, PrivateNetworkDetector, UrlGetter};
use crate::graph::LinkGraph;
use crate::index::Indexer;
use crate::partition::{partition_range, PartitionDetector, PartitionError};
use crate::shutdown::ShutdownToken;

/// Configuration for the [`CrawlerService`].
pub struct CrawlerServiceConfig {
    pub graph: Arc<dyn LinkGraph>,
    pub indexer: Arc<dyn Indexer>,
    pub url_getter: Arc<dyn UrlGetter>,
    pub private_network_detector: Arc<dyn PrivateNetworkDetector>,
    pub partition_detector: Arc<dyn PartitionDetector>,
    /// Number of concurrent fetch workers.
    pub fetch_workers: usize,
    /// Time between crawl passes.
    pub update_interval: Duration,
    /// Minimum age before an already-crawled link is re-fetched.
    pub reindex_threshold: Duration,
}

impl CrawlerServiceConfig {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.fetch_workers == 0 {
            return Err(ServiceError::InvalidConfig(
                "fetch_workers must be > 0".to_string(),
            ));
        }
        if self.update_interval.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "update_interval must be > 0".to_string(),
            ));
        }
        if self.reindex_threshold.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "reindex_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Periodically crawls this node's slice of the link graph.
pub struct CrawlerService {
    crawler: Crawler,
    graph: Arc<dyn LinkGraph>,
    partition_detector: Arc<dyn PartitionDetector>,
    update_interval: Duration,
    reindex_threshold: Duration,
}

impl CrawlerService {
    pub fn new(config: CrawlerServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let crawler = Crawler::new(CrawlerConfig {
            url_getter: config.url_getter,
            private_network_detector: config.private_network_detector,
            graph: config.graph.clone(),
            indexer: config.indexer,
            fetch_workers: config.fetch_workers,
        });
        Ok(Self {
            crawler,
            graph: config.graph,
            partition_detector: config.partition_detector,
            update_interval: config.update_interval,
            reindex_threshold: config.reindex_threshold,
        })
    }

    async fn crawl_pass(
        &self,
        shutdown: &ShutdownToken,
        partition: u32,
        total: u32,
    ) -> anyhow::Result<()> {
        let (from, to) = partition_range(partition, total)?;
        tracing::info!(partition, total, "starting crawl pass");

        let started = Instant::now();
        let reindex_horizon = Utc::now() - chrono::Duration::from_std(self.reindex_threshold)?;
        let links = self.graph.links(from, to, reindex_horizon)?;
        let crawled = self.crawler.crawl(shutdown, links).await?;

        tracing::info!(
            crawled_links = crawled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completed crawl pass"
        );
        Ok(())
    }
}

#[async_trait]
impl Service for CrawlerService {
    fn name(&self) -> &'static str {
        "crawler"
    }

    async fn run(&self, shutdown: ShutdownToken) -> anyhow::Result<()> {
        tracing::info!(update_interval = ?self.update_interval, "crawler service running");
        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = tokio::time::sleep(self.update_interval) => {}
            }

            match self.partition_detector.partition_info() {
                Ok((partition, total)) => {
                    if let Err(err) = self.crawl_pass(&shutdown, partition, total).await {
                        // A pass aborted by shutdown is a clean exit.
                        if shutdown.is_shutdown() {
                            return Ok(());
                        }
                        return Err(err);
                    }
                }
                Err(PartitionError::NotYetAvailable) => {
                    tracing::warn!("deferring crawl pass: partition data not yet available");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::HttpGetter;
    use crate::graph::{InMemoryGraph, Link};
    use crate::index::InMemoryIndex;
    use crate::partition::FixedPartitionDetector;
    use crate::shutdown;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct AllowAll;

    #[async_trait]
    impl PrivateNetworkDetector for AllowAll {
        async fn is_private(&self, _host: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct NeverReady;

    impl PartitionDetector for NeverReady {
        fn partition_info(&self) -> Result<(u32, u32), PartitionError> {
            Err(PartitionError::NotYetAvailable)
        }
    }

    fn service_config(
        graph: Arc<InMemoryGraph>,
        detector: Arc<dyn PartitionDetector>,
    ) -> CrawlerServiceConfig {
        CrawlerServiceConfig {
            graph,
            indexer: Arc::new(InMemoryIndex::new()),
            url_getter: Arc::new(
                HttpGetter::new("trawler-test/0.1", Duration::from_secs(1)).unwrap(),
            ),
            private_network_detector: Arc::new(AllowAll),
            partition_detector: detector,
            fetch_workers: 2,
            update_interval: Duration::from_millis(20),
            reindex_threshold: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_config_validation_rejects_zero_values() {
        let graph = Arc::new(InMemoryGraph::new());
        let mut config = service_config(graph, Arc::new(NeverReady));
        config.fetch_workers = 0;
        assert!(CrawlerService::new(config).is_err());
    }

    #[tokio::test]
    async fn test_pass_crawls_links_in_the_owned_partition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><title>t</title><body>text</body></html>",
                    "text/html",
                ),
            )
            .mount(&server)
            .await;

        let graph = Arc::new(InMemoryGraph::new());
        let mut link = Link::new(format!("{}/", server.uri()));
        graph.upsert_link(&mut link).unwrap();

        let detector = Arc::new(FixedPartitionDetector {
            partition: 0,
            num_partitions: 1,
        });
        let service =
            CrawlerService::new(service_config(graph.clone(), detector)).unwrap();

        let (handle, token) = shutdown::channel();
        let run = service.run(token);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.shutdown();
        };
        let (result, ()) = tokio::join!(run, stop);
        result.unwrap();

        // The pass refreshed the link's retrieval time.
        let stored = graph.find_link(link.id).unwrap();
        assert!(stored.retrieved_at > Link::new("x").retrieved_at);
        assert!(!server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_partition_data_defers_the_pass() {
        let graph = Arc::new(InMemoryGraph::new());
        let mut link = Link::new("https://example.com/");
        graph.upsert_link(&mut link).unwrap();
        let before = graph.find_link(link.id).unwrap().retrieved_at;

        let service =
            CrawlerService::new(service_config(graph.clone(), Arc::new(NeverReady))).unwrap();

        let (handle, token) = shutdown::channel();
        let run = service.run(token);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.shutdown();
        };
        let (result, ()) = tokio::join!(run, stop);
        result.unwrap();

        // Every pass was deferred; the link was never crawled.
        assert_eq!(graph.find_link(link.id).unwrap().retrieved_at, before);
    }
}
