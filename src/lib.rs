//! Trawler: a partitioned web crawl and PageRank engine
//!
//! This crate implements the two core engines of a distributed web search
//! engine: a staged concurrent processing pipeline that powers the crawler,
//! and a Bulk-Synchronous-Parallel graph processor that powers the PageRank
//! calculator. Long-lived services drive both engines over a partitioned
//! slice of the link graph.

pub mod bsp;
pub mod config;
pub mod crawler;
pub mod graph;
pub mod index;
pub mod pagerank;
pub mod partition;
pub mod pipeline;
pub mod service;
pub mod shutdown;

// Re-export commonly used types
pub use config::Config;
pub use graph::{Edge, Link, LinkGraph};
pub use index::{Document, Indexer, Query, QueryType};
pub use shutdown::{ShutdownHandle, ShutdownToken};
