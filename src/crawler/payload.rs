//! Crawl payloads and their pool
//!
//! A [`CrawlPayload`] carries one link through the crawl pipeline, growing
//! buffers for the fetched body, extracted text, and discovered URLs along
//! the way. Payloads come from an explicit, constructor-injected
//! [`PayloadPool`]; marking a payload as processed moves its buffers back
//! into the pool so their capacity is reused by later links.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::graph::Link;
use crate::pipeline::Payload;

/// The unit of work flowing through the crawl pipeline.
pub struct CrawlPayload {
    pub link_id: Uuid,
    pub url: String,
    pub retrieved_at: DateTime<Utc>,
    /// Raw response body written by the fetch stage.
    pub raw_content: String,
    /// Page title written by the text extraction stage.
    pub title: String,
    /// Body text written by the text extraction stage.
    pub text_content: String,
    /// Outbound URLs to follow, in document order.
    pub follow_links: Vec<String>,
    /// Outbound URLs marked no-follow.
    pub nofollow_links: Vec<String>,

    pool: Arc<PayloadPool>,
}

impl CrawlPayload {
    fn empty(pool: Arc<PayloadPool>) -> Self {
        Self {
            link_id: Uuid::nil(),
            url: String::new(),
            retrieved_at: DateTime::<Utc>::UNIX_EPOCH,
            raw_content: String::new(),
            title: String::new(),
            text_content: String::new(),
            follow_links: Vec::new(),
            nofollow_links: Vec::new(),
            pool,
        }
    }

    /// Clears every field while keeping buffer capacity.
    fn reset(&mut self) {
        self.link_id = Uuid::nil();
        self.url.clear();
        self.retrieved_at = DateTime::<Utc>::UNIX_EPOCH;
        self.raw_content.clear();
        self.title.clear();
        self.text_content.clear();
        self.follow_links.clear();
        self.nofollow_links.clear();
    }
}

impl Payload for CrawlPayload {
    fn clone_payload(&self) -> Box<dyn Payload> {
        let mut clone = self.pool.acquire();
        clone.link_id = self.link_id;
        clone.url.clone_from(&self.url);
        clone.retrieved_at = self.retrieved_at;
        clone.raw_content.clone_from(&self.raw_content);
        clone.title.clone_from(&self.title);
        clone.text_content.clone_from(&self.text_content);
        clone.follow_links.clone_from(&self.follow_links);
        clone.nofollow_links.clone_from(&self.nofollow_links);
        clone
    }

    fn mark_as_processed(&mut self) {
        let pool = self.pool.clone();
        // Move the buffers into a fresh payload and hand it to the pool;
        // what stays behind is an empty husk.
        let recycled = CrawlPayload {
            link_id: self.link_id,
            url: std::mem::take(&mut self.url),
            retrieved_at: self.retrieved_at,
            raw_content: std::mem::take(&mut self.raw_content),
            title: std::mem::take(&mut self.title),
            text_content: std::mem::take(&mut self.text_content),
            follow_links: std::mem::take(&mut self.follow_links),
            nofollow_links: std::mem::take(&mut self.nofollow_links),
            pool: pool.clone(),
        };
        pool.release(recycled);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A pool of reusable crawl payloads shared by a pipeline's source, clone,
/// and mark-as-processed paths.
pub struct PayloadPool {
    free: Mutex<Vec<CrawlPayload>>,
}

impl PayloadPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
        })
    }

    /// Takes a cleared payload from the pool, allocating one if empty.
    pub fn acquire(self: &Arc<Self>) -> Box<CrawlPayload> {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        Box::new(recycled.unwrap_or_else(|| CrawlPayload::empty(self.clone())))
    }

    /// Takes a payload primed with a link's identity, for the crawl source.
    pub fn acquire_for_link(self: &Arc<Self>, link: &Link) -> Box<CrawlPayload> {
        let mut payload = self.acquire();
        payload.link_id = link.id;
        payload.url.clone_from(&link.url);
        payload.retrieved_at = link.retrieved_at;
        payload
    }

    fn release(&self, mut payload: CrawlPayload) {
        payload.reset();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
    }

    /// Number of payloads currently sitting in the pool.
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_as_processed_returns_payload_to_pool() {
        let pool = PayloadPool::new();
        assert_eq!(pool.available(), 0);

        let mut payload = pool.acquire();
        payload.url.push_str("https://example.com/");
        payload.mark_as_processed();

        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_acquire_reuses_cleared_payload() {
        let pool = PayloadPool::new();
        let mut payload = pool.acquire();
        payload.url.push_str("https://example.com/");
        payload.follow_links.push("https://example.com/next".to_string());
        payload.mark_as_processed();

        let reused = pool.acquire();
        assert_eq!(pool.available(), 0);
        assert!(reused.url.is_empty());
        assert!(reused.follow_links.is_empty());
        assert!(reused.link_id.is_nil());
    }

    #[test]
    fn test_clone_payload_copies_fields() {
        let pool = PayloadPool::new();
        let link = Link::new("https://example.com/page");
        let mut payload = pool.acquire_for_link(&link);
        payload.title.push_str("Example");
        payload.follow_links.push("https://example.com/a".to_string());

        let clone = payload.clone_payload();
        let clone = clone
            .as_any()
            .downcast_ref::<CrawlPayload>()
            .expect("clone should be a crawl payload");
        assert_eq!(clone.url, "https://example.com/page");
        assert_eq!(clone.title, "Example");
        assert_eq!(clone.follow_links, payload.follow_links);
    }
}
