//! PageRank service
//!
//! Wakes on a fixed interval and recomputes PageRank scores over the whole
//! link graph. The calculation is single-leader: only partition 0 runs it,
//! and every pass loads the full UUID range rather than a slice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Service, ServiceError};
use crate::bsp::BspError;
use crate::graph::LinkGraph;
use crate::index::{IndexError, Indexer};
use crate::pagerank::{Calculator, PageRankConfig};
use crate::partition::{PartitionDetector, PartitionError};
use crate::shutdown::ShutdownToken;

/// Configuration for the [`PageRankService`].
pub struct PageRankServiceConfig {
    pub graph: Arc<dyn LinkGraph>,
    pub indexer: Arc<dyn Indexer>,
    pub partition_detector: Arc<dyn PartitionDetector>,
    pub pagerank: PageRankConfig,
    /// Time between score update passes.
    pub update_interval: Duration,
}

impl PageRankServiceConfig {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.update_interval.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "update_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Periodically recomputes and persists PageRank scores.
pub struct PageRankService {
    graph: Arc<dyn LinkGraph>,
    indexer: Arc<dyn Indexer>,
    partition_detector: Arc<dyn PartitionDetector>,
    update_interval: Duration,
    calculator: Mutex<Calculator>,
}

impl PageRankService {
    /// Creates the service and its calculator. Must be called from within a
    /// tokio runtime.
    pub fn new(config: PageRankServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let calculator = Calculator::new(config.pagerank)
            .map_err(|err| ServiceError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            graph: config.graph,
            indexer: config.indexer,
            partition_detector: config.partition_detector,
            update_interval: config.update_interval,
            calculator: Mutex::new(calculator),
        })
    }

    async fn update_scores(&self, shutdown: &ShutdownToken) -> anyhow::Result<()> {
        let mut calculator = self.calculator.lock().await;
        calculator.reset();

        let populate_started = Instant::now();
        let now = Utc::now();
        for link in self.graph.links(Uuid::nil(), Uuid::max(), now)? {
            calculator.add_vertex(&link?.id.to_string());
        }
        for edge in self.graph.edges(Uuid::nil(), Uuid::max(), now)? {
            let edge = edge?;
            // New edges may appear between the link and edge scans; be
            // tolerant of sources the vertex load has not seen.
            match calculator.add_edge(&edge.src.to_string(), &edge.dst.to_string()) {
                Ok(()) | Err(BspError::UnknownEdgeSource { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        let populate_ms = populate_started.elapsed().as_millis() as u64;

        let run_started = Instant::now();
        calculator.run(shutdown).await?;
        let run_ms = run_started.elapsed().as_millis() as u64;

        let persist_started = Instant::now();
        let mut updated = 0u64;
        let mut unindexed = 0u64;
        calculator.scores(|id, score| {
            let link_id = Uuid::parse_str(id)?;
            match self.indexer.update_score(link_id, score) {
                Ok(()) => updated += 1,
                // Links that were discovered but never indexed pick their
                // score up on a later crawl pass.
                Err(IndexError::NotFound) => unindexed += 1,
                Err(err) => return Err(err.into()),
            }
            Ok(())
        })?;
        let persist_ms = persist_started.elapsed().as_millis() as u64;

        tracing::info!(
            processed_links = calculator.vertex_count(),
            updated,
            unindexed,
            populate_ms,
            run_ms,
            persist_ms,
            "completed pagerank pass"
        );
        Ok(())
    }
}

#[async_trait]
impl Service for PageRankService {
    fn name(&self) -> &'static str {
        "pagerank"
    }

    async fn run(&self, shutdown: ShutdownToken) -> anyhow::Result<()> {
        tracing::info!(update_interval = ?self.update_interval, "pagerank service running");
        loop {
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = tokio::time::sleep(self.update_interval) => {}
            }

            let partition = match self.partition_detector.partition_info() {
                Ok((partition, _total)) => partition,
                Err(PartitionError::NotYetAvailable) => {
                    tracing::warn!("deferring pagerank pass: partition data not yet available");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if partition != 0 {
                tracing::info!("pagerank only runs on the leader of the cluster");
                return Ok(());
            }

            if let Err(err) = self.update_scores(&shutdown).await {
                // A pass aborted by shutdown is a clean exit.
                if shutdown.is_shutdown() {
                    return Ok(());
                }
                return Err(err);
            }
        }
    }
}
