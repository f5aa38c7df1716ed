//! Graph update stage
//!
//! Writes a crawled page into the link graph: the source link is refreshed,
//! every discovered destination is upserted (no-follow destinations without
//! an edge, follow destinations with one), and edges the pass did not touch
//! are garbage-collected as stale.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::graph::{Edge, Link, LinkGraph};
use crate::pipeline::{Payload, Processor};

/// The graph update stage processor.
pub(crate) struct GraphUpdater {
    graph: Arc<dyn LinkGraph>,
}

impl GraphUpdater {
    pub(crate) fn new(graph: Arc<dyn LinkGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Processor for GraphUpdater {
    async fn process(&self, mut payload: Box<dyn Payload>) -> anyhow::Result<Option<Box<dyn Payload>>> {
        let crawl = super::as_crawl_payload(payload.as_mut())?;

        let mut src = Link {
            id: crawl.link_id,
            url: crawl.url.clone(),
            retrieved_at: Utc::now(),
        };
        self.graph.upsert_link(&mut src)?;

        // No-follow destinations become links but never edges.
        for url in &crawl.nofollow_links {
            let mut dst = Link::new(url.clone());
            self.graph.upsert_link(&mut dst)?;
        }

        // Edges refreshed after this instant survive the stale sweep below.
        let stale_cutoff = Utc::now();
        for url in &crawl.follow_links {
            let mut dst = Link::new(url.clone());
            self.graph.upsert_link(&mut dst)?;
            let mut edge = Edge::new(src.id, dst.id);
            self.graph.upsert_edge(&mut edge)?;
        }

        self.graph.remove_stale_edges(src.id, stale_cutoff)?;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::crawler::payload::PayloadPool;
    use crate::graph::InMemoryGraph;

    fn payload_with_links(
        pool: &Arc<PayloadPool>,
        url: &str,
        follow: &[&str],
        nofollow: &[&str],
    ) -> Box<dyn Payload> {
        let mut payload = pool.acquire();
        payload.url.push_str(url);
        payload.follow_links = follow.iter().map(|s| s.to_string()).collect();
        payload.nofollow_links = nofollow.iter().map(|s| s.to_string()).collect();
        payload
    }

    fn all_edges(graph: &InMemoryGraph) -> Vec<Edge> {
        graph
            .edges(Uuid::nil(), Uuid::max(), Utc::now() + chrono::Duration::hours(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn find_by_url(graph: &InMemoryGraph, url: &str) -> Option<Link> {
        graph
            .links(Uuid::nil(), Uuid::max(), Utc::now() + chrono::Duration::hours(1))
            .unwrap()
            .filter_map(Result::ok)
            .find(|link| link.url == url)
    }

    #[tokio::test]
    async fn test_destinations_are_upserted_with_edges_for_follow_links() {
        let graph = Arc::new(InMemoryGraph::new());
        let updater = GraphUpdater::new(graph.clone());
        let pool = PayloadPool::new();

        let payload = payload_with_links(
            &pool,
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
            &["https://elsewhere.com/c"],
        );
        updater.process(payload).await.unwrap().expect("forwarded");

        let src = find_by_url(&graph, "https://example.com/").expect("source stored");
        assert!(src.retrieved_at > Link::new("x").retrieved_at);

        // Both follow destinations got links and edges.
        for url in ["https://example.com/a", "https://example.com/b"] {
            assert!(find_by_url(&graph, url).is_some(), "{url}");
        }
        let edges = all_edges(&graph);
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.src == src.id));

        // The no-follow destination got a link but no edge.
        let nofollow = find_by_url(&graph, "https://elsewhere.com/c").expect("nofollow stored");
        assert!(!edges.iter().any(|e| e.dst == nofollow.id));
    }

    #[tokio::test]
    async fn test_stale_edges_are_removed_after_the_pass() {
        let graph = Arc::new(InMemoryGraph::new());
        let updater = GraphUpdater::new(graph.clone());
        let pool = PayloadPool::new();

        let first = payload_with_links(
            &pool,
            "https://example.com/",
            &["https://example.com/old"],
            &[],
        );
        updater.process(first).await.unwrap();
        assert_eq!(all_edges(&graph).len(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;

        // The re-crawled page no longer links to /old.
        let second = payload_with_links(
            &pool,
            "https://example.com/",
            &["https://example.com/new"],
            &[],
        );
        updater.process(second).await.unwrap();

        let edges = all_edges(&graph);
        assert_eq!(edges.len(), 1);
        let new_dst = find_by_url(&graph, "https://example.com/new").unwrap();
        assert_eq!(edges[0].dst, new_dst.id);
    }

    #[tokio::test]
    async fn test_source_keeps_its_id_across_passes() {
        let graph = Arc::new(InMemoryGraph::new());
        let updater = GraphUpdater::new(graph.clone());
        let pool = PayloadPool::new();

        let first = payload_with_links(&pool, "https://example.com/", &[], &[]);
        updater.process(first).await.unwrap();
        let id = find_by_url(&graph, "https://example.com/").unwrap().id;

        let second = payload_with_links(&pool, "https://example.com/", &[], &[]);
        updater.process(second).await.unwrap();
        assert_eq!(find_by_url(&graph, "https://example.com/").unwrap().id, id);
    }
}
