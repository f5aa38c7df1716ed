//! Text index model
//!
//! Documents are the indexed text content of crawled links, keyed by link
//! ID. The [`Indexer`] trait is the seam between the crawl/PageRank
//! workloads and the search backend; [`InMemoryIndex`] is the bundled
//! implementation.

mod memory;

pub use memory::InMemoryIndex;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// An indexed document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// The ID of the link this document was extracted from.
    pub link_id: Uuid,
    pub url: String,
    pub title: String,
    pub content: String,
    pub indexed_at: DateTime<Utc>,
    /// The link's PageRank score, written by the score updater.
    pub page_rank: f64,
}

/// The kind of match a query performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Match documents containing all query terms.
    Match,
    /// Match documents containing the expression as a phrase.
    Phrase,
}

/// A search query against the index.
#[derive(Debug, Clone)]
pub struct Query {
    pub query_type: QueryType,
    pub expression: String,
    /// Number of leading results to skip, for pagination.
    pub offset: u64,
}

/// Errors reported by index stores.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("document not found")]
    NotFound,

    #[error("missing link ID")]
    MissingLinkId,

    #[error("index store error: {0}")]
    Store(String),
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// The documents matching a query, ordered by descending PageRank.
pub struct SearchResults {
    docs: std::vec::IntoIter<Document>,
    total_count: u64,
}

impl SearchResults {
    pub(crate) fn new(docs: Vec<Document>, total_count: u64) -> Self {
        Self {
            docs: docs.into_iter(),
            total_count,
        }
    }

    /// Total number of matches before pagination.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }
}

impl Iterator for SearchResults {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.docs.next()
    }
}

/// Implemented by stores that index crawled documents.
pub trait Indexer: Send + Sync {
    /// Inserts a document or updates the entry for an existing one. The
    /// document's previously persisted PageRank, if any, is preserved.
    fn index(&self, doc: &Document) -> IndexResult<()>;

    /// Looks up a document by its link ID.
    fn find_by_id(&self, link_id: Uuid) -> IndexResult<Document>;

    /// Runs a search query and returns the matching documents.
    fn search(&self, query: &Query) -> IndexResult<SearchResults>;

    /// Updates the PageRank score for an indexed document.
    fn update_score(&self, link_id: Uuid, score: f64) -> IndexResult<()>;
}
