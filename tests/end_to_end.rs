//! End-to-end exercises: a crawl pass over a mock site feeding the link
//! graph and text index, a PageRank pass persisting scores, and the
//! partitioned iteration guarantees the services rely on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trawler::crawler::{Crawler, CrawlerConfig, HttpGetter, PrivateNetworkDetector};
use trawler::graph::{InMemoryGraph, Link, LinkGraph};
use trawler::index::{Indexer, InMemoryIndex, Query, QueryType};
use trawler::pagerank::{Calculator, PageRankConfig};
use trawler::partition::partition_range;
use trawler::shutdown::ShutdownToken;

/// Wiremock listens on loopback, which the real detector would reject.
struct AllowAll;

#[async_trait]
impl PrivateNetworkDetector for AllowAll {
    async fn is_private(&self, _host: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

async fn serve_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "text/html"),
        )
        .mount(server)
        .await;
}

fn crawler_for(graph: Arc<InMemoryGraph>, index: Arc<InMemoryIndex>) -> Crawler {
    Crawler::new(CrawlerConfig {
        url_getter: Arc::new(
            HttpGetter::new("trawler-e2e/0.1", Duration::from_secs(2)).unwrap(),
        ),
        private_network_detector: Arc::new(AllowAll),
        graph,
        indexer: index,
        fetch_workers: 4,
    })
}

#[tokio::test]
async fn crawl_then_rank_produces_searchable_scored_documents() {
    let server = MockServer::start().await;
    // Three pages in a cycle, plus one page that links nowhere.
    serve_page(
        &server,
        "/a",
        format!(
            r#"<html><head><title>Alpha</title></head>
               <body>alpha content <a href="{0}/b">b</a></body></html>"#,
            server.uri()
        ),
    )
    .await;
    serve_page(
        &server,
        "/b",
        format!(
            r#"<html><head><title>Beta</title></head>
               <body>beta content <a href="{0}/c">c</a></body></html>"#,
            server.uri()
        ),
    )
    .await;
    serve_page(
        &server,
        "/c",
        format!(
            r#"<html><head><title>Gamma</title></head>
               <body>gamma content <a href="{0}/a">a</a>
               <a href="{0}/leaf">leaf</a></body></html>"#,
            server.uri()
        ),
    )
    .await;
    serve_page(
        &server,
        "/leaf",
        "<html><head><title>Leaf</title></head><body>leaf content</body></html>".to_string(),
    )
    .await;

    let graph = Arc::new(InMemoryGraph::new());
    let index = Arc::new(InMemoryIndex::new());

    // Seed only /a; the crawl discovers the rest.
    let mut seed = Link::new(format!("{}/a", server.uri()));
    graph.upsert_link(&mut seed).unwrap();

    let crawler = crawler_for(graph.clone(), index.clone());
    let shutdown = ShutdownToken::never();

    // First pass crawls the seed and discovers /b. Repeat until the
    // frontier stops growing; each pass only sees links not yet crawled.
    for _ in 0..4 {
        let links = graph
            .links(Uuid::nil(), Uuid::max(), Utc::now() - chrono::Duration::seconds(1))
            .unwrap();
        crawler.crawl(&shutdown, links).await.unwrap();
    }

    let all_links: Vec<Link> = graph
        .links(Uuid::nil(), Uuid::max(), Utc::now() + chrono::Duration::hours(1))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(all_links.len(), 4, "links: {all_links:?}");

    let edges: Vec<_> = graph
        .edges(Uuid::nil(), Uuid::max(), Utc::now() + chrono::Duration::hours(1))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(edges.len(), 4);

    // Every page ended up indexed and searchable.
    let results = index
        .search(&Query {
            query_type: QueryType::Match,
            expression: "content".to_string(),
            offset: 0,
        })
        .unwrap();
    assert_eq!(results.total_count(), 4);

    // Rank the crawled graph and persist the scores.
    let mut calculator = Calculator::new(PageRankConfig {
        compute_workers: 2,
        ..Default::default()
    })
    .unwrap();
    for link in &all_links {
        calculator.add_vertex(&link.id.to_string());
    }
    for edge in &edges {
        calculator
            .add_edge(&edge.src.to_string(), &edge.dst.to_string())
            .unwrap();
    }
    calculator.run(&shutdown).await.unwrap();

    let mut total = 0.0;
    calculator
        .scores(|id, score| {
            let link_id = Uuid::parse_str(id)?;
            index.update_score(link_id, score)?;
            total += score;
            Ok(())
        })
        .unwrap();
    calculator.close().await;
    assert!((total - 1.0).abs() < 1e-4, "rank sum was {total}");

    // Search results come back ordered by the persisted scores.
    let ranked: Vec<_> = index
        .search(&Query {
            query_type: QueryType::Match,
            expression: "content".to_string(),
            offset: 0,
        })
        .unwrap()
        .collect();
    assert_eq!(ranked.len(), 4);
    for pair in ranked.windows(2) {
        assert!(pair[0].page_rank >= pair[1].page_rank);
    }
    // The leaf page has no outbound links and cannot outrank the cycle.
    assert!(ranked[0].title != "Leaf");
}

#[tokio::test]
async fn partitioned_link_iteration_covers_every_link_exactly_once() {
    let graph = InMemoryGraph::new();
    let mut inserted = HashSet::new();
    for i in 0..100 {
        let mut link = Link::new(format!("https://example.com/page/{i}"));
        graph.upsert_link(&mut link).unwrap();
        inserted.insert(link.id);
    }

    // An odd partition count exercises the remainder handling; an even one
    // the exact division.
    for total in [11u32, 4] {
        let mut seen: HashSet<Uuid> = HashSet::new();
        for partition in 0..total {
            let (from, to) = partition_range(partition, total).unwrap();
            for link in graph.links(from, to, Utc::now()).unwrap() {
                let link = link.unwrap();
                assert!(
                    seen.insert(link.id),
                    "link {} appeared in two partitions (total={total})",
                    link.id
                );
            }
        }
        assert_eq!(seen, inserted, "partition union mismatch for total={total}");
    }
}
