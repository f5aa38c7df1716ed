//! Web crawler pipeline
//!
//! Composes the crawl stages into a pipeline:
//!
//! ```text
//! FixedPool(fetch, W) -> FIFO(extract links) -> FIFO(extract text)
//!                     -> Broadcast(update graph, index text)
//! ```
//!
//! A [`Crawler`] runs the pipeline over an iterator of links drawn from the
//! link graph, feeding payloads from a shared pool and counting the ones
//! that reach the sink.

mod extractor;
mod fetcher;
mod indexer;
mod payload;
mod privnet;
mod text;
mod updater;

pub use fetcher::{FetchResponse, HttpGetter, UrlGetter};
pub use payload::{CrawlPayload, PayloadPool};
pub use privnet::{DnsPrivateNetworkDetector, PrivateNetworkDetector};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::graph::{LinkGraph, LinkIterator};
use crate::index::Indexer;
use crate::pipeline::{
    broadcast, fifo, fixed_worker_pool, Payload, Pipeline, PipelineResult, Processor, Sink, Source,
};
use crate::shutdown::ShutdownToken;

use extractor::LinkExtractor;
use fetcher::LinkFetcher;
use indexer::TextIndexer;
use text::TextExtractor;
use updater::GraphUpdater;

/// Downcasts a pipeline payload to the crawler's payload variant.
pub(crate) fn as_crawl_payload(payload: &mut dyn Payload) -> anyhow::Result<&mut CrawlPayload> {
    payload
        .as_any_mut()
        .downcast_mut::<CrawlPayload>()
        .ok_or_else(|| anyhow::anyhow!("payload is not a crawl payload"))
}

/// Configuration for assembling a [`Crawler`].
pub struct CrawlerConfig {
    /// Performs the HTTP GET requests for the fetch stage.
    pub url_getter: Arc<dyn UrlGetter>,
    /// Rejects hosts that resolve into private address space.
    pub private_network_detector: Arc<dyn PrivateNetworkDetector>,
    /// Receives upserted links and edges.
    pub graph: Arc<dyn LinkGraph>,
    /// Receives extracted documents.
    pub indexer: Arc<dyn Indexer>,
    /// Number of concurrent fetch workers; must be greater than zero.
    pub fetch_workers: usize,
}

/// The crawl pipeline over a link graph.
pub struct Crawler {
    pipeline: Pipeline,
    pool: Arc<PayloadPool>,
}

/// The final stage broadcasts to the graph updater and the text indexer, so
/// the sink sees this many payloads per crawled link.
const BROADCAST_FACTOR: usize = 2;

impl Crawler {
    pub fn new(config: CrawlerConfig) -> Self {
        let pipeline = Pipeline::new(vec![
            fixed_worker_pool(
                LinkFetcher::new(
                    config.url_getter,
                    config.private_network_detector.clone(),
                ),
                config.fetch_workers,
            ),
            fifo(LinkExtractor::new(config.private_network_detector)),
            fifo(TextExtractor::new()),
            broadcast(vec![
                Box::new(GraphUpdater::new(config.graph)) as Box<dyn Processor>,
                Box::new(TextIndexer::new(config.indexer)),
            ]),
        ]);
        Self {
            pipeline,
            pool: PayloadPool::new(),
        }
    }

    /// Sends every link produced by `links` through the crawl pipeline and
    /// returns how many made it all the way through.
    pub async fn crawl(
        &self,
        shutdown: &ShutdownToken,
        links: LinkIterator,
    ) -> PipelineResult<usize> {
        let consumed = Arc::new(AtomicUsize::new(0));
        let source = LinkSource {
            links,
            pool: self.pool.clone(),
        };
        let sink = CountingSink {
            consumed: consumed.clone(),
        };
        self.pipeline.process(shutdown, source, sink).await?;
        Ok(consumed.load(Ordering::SeqCst) / BROADCAST_FACTOR)
    }
}

/// Feeds links from a graph iterator into the pipeline as pooled payloads.
struct LinkSource {
    links: LinkIterator,
    pool: Arc<PayloadPool>,
}

#[async_trait]
impl Source for LinkSource {
    async fn next(&mut self) -> Option<anyhow::Result<Box<dyn Payload>>> {
        match self.links.next()? {
            Ok(link) => {
                let payload: Box<dyn Payload> = self.pool.acquire_for_link(&link);
                Some(Ok(payload))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

/// Counts the payloads that reach the end of the pipeline.
struct CountingSink {
    consumed: Arc<AtomicUsize>,
}

#[async_trait]
impl Sink for CountingSink {
    async fn consume(&mut self, _payload: &dyn Payload) -> anyhow::Result<()> {
        self.consumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
