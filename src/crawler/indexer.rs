//! Text index stage
//!
//! Writes the extracted title and text of a crawled page into the text
//! index, keyed by the page's link ID and stamped with the current time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::index::{Document, Indexer};
use crate::pipeline::{Payload, Processor};

/// The text index stage processor.
pub(crate) struct TextIndexer {
    indexer: Arc<dyn Indexer>,
}

impl TextIndexer {
    pub(crate) fn new(indexer: Arc<dyn Indexer>) -> Self {
        Self { indexer }
    }
}

#[async_trait]
impl Processor for TextIndexer {
    async fn process(&self, mut payload: Box<dyn Payload>) -> anyhow::Result<Option<Box<dyn Payload>>> {
        let crawl = super::as_crawl_payload(payload.as_mut())?;

        let doc = Document {
            link_id: crawl.link_id,
            url: crawl.url.clone(),
            title: crawl.title.clone(),
            content: crawl.text_content.clone(),
            indexed_at: Utc::now(),
            page_rank: 0.0,
        };
        self.indexer.index(&doc)?;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::crawler::payload::PayloadPool;
    use crate::index::InMemoryIndex;

    #[tokio::test]
    async fn test_document_is_indexed_under_link_id() {
        let index = Arc::new(InMemoryIndex::new());
        let stage = TextIndexer::new(index.clone());
        let pool = PayloadPool::new();

        let link_id = Uuid::new_v4();
        let mut payload = pool.acquire();
        payload.link_id = link_id;
        payload.url.push_str("https://example.com/doc");
        payload.title.push_str("A Document");
        payload.text_content.push_str("searchable words");

        stage.process(payload).await.unwrap().expect("forwarded");

        let doc = index.find_by_id(link_id).unwrap();
        assert_eq!(doc.title, "A Document");
        assert_eq!(doc.content, "searchable words");
        assert!(doc.indexed_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_missing_link_id_aborts_the_stage() {
        let index = Arc::new(InMemoryIndex::new());
        let stage = TextIndexer::new(index);
        let pool = PayloadPool::new();

        let mut payload = pool.acquire();
        payload.url.push_str("https://example.com/doc");

        assert!(stage.process(payload).await.is_err());
    }
}
