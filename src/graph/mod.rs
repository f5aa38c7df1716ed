//! Link graph model
//!
//! Links are crawled URLs; edges are the directed connections discovered
//! between them. The [`LinkGraph`] trait is the seam between the crawl and
//! PageRank workloads and whatever store backs the graph; [`InMemoryGraph`]
//! is the bundled implementation.

mod memory;

pub use memory::InMemoryGraph;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// A crawled (or discovered) URL in the link graph.
///
/// Links are unique by URL. The ID is assigned by the store on first insert
/// and preserved by every later upsert of the same URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: Uuid,
    pub url: String,
    pub retrieved_at: DateTime<Utc>,
}

impl Link {
    /// Creates a not-yet-stored link for the given URL. The zero
    /// `retrieved_at` keeps the link eligible for the next crawl pass.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            url: url.into(),
            retrieved_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A directed edge between two links.
///
/// Edges are unique by `(src, dst)`; `updated_at` is rewritten on each
/// upsert so stale edges can be garbage-collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: Uuid,
    pub src: Uuid,
    pub dst: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Creates a not-yet-stored edge between two link IDs.
    pub fn new(src: Uuid, dst: Uuid) -> Self {
        Self {
            id: Uuid::nil(),
            src,
            dst,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Errors reported by link graph stores.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("edge references unknown links")]
    UnknownEdgeLinks,

    #[error("link not found")]
    NotFound,

    #[error("graph store error: {0}")]
    Store(String),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Iterator over a range of links. Dropping the iterator releases it.
pub type LinkIterator = Box<dyn Iterator<Item = GraphResult<Link>> + Send>;

/// Iterator over a range of edges. Dropping the iterator releases it.
pub type EdgeIterator = Box<dyn Iterator<Item = GraphResult<Edge>> + Send>;

/// Implemented by stores that maintain the link graph.
pub trait LinkGraph: Send + Sync {
    /// Creates a new link or updates an existing one.
    ///
    /// The store resolves the link's identity by URL: on update the stored
    /// ID is written back into `link` and `retrieved_at` keeps the larger of
    /// the stored and submitted timestamps.
    fn upsert_link(&self, link: &mut Link) -> GraphResult<()>;

    /// Looks up a link by its ID.
    fn find_link(&self, id: Uuid) -> GraphResult<Link>;

    /// Creates a new edge or refreshes an existing one.
    ///
    /// Fails with [`GraphError::UnknownEdgeLinks`] unless both endpoints
    /// exist. The stored ID and fresh `updated_at` are written back into
    /// `edge`.
    fn upsert_edge(&self, edge: &mut Edge) -> GraphResult<()>;

    /// Removes every edge originating from `src` whose `updated_at` is
    /// older than `updated_before`.
    fn remove_stale_edges(&self, src: Uuid, updated_before: DateTime<Utc>) -> GraphResult<()>;

    /// Iterates the links whose IDs fall in `[from, to)` and that were
    /// retrieved before the given time. A `to` equal to the maximum UUID is
    /// treated as an unbounded upper limit so the last partition of the key
    /// space includes it.
    fn links(
        &self,
        from: Uuid,
        to: Uuid,
        retrieved_before: DateTime<Utc>,
    ) -> GraphResult<LinkIterator>;

    /// Iterates the edges whose source link IDs fall in `[from, to)` and
    /// that were updated before the given time.
    fn edges(&self, from: Uuid, to: Uuid, updated_before: DateTime<Utc>)
        -> GraphResult<EdgeIterator>;
}
