//! Bulk-Synchronous-Parallel graph engine
//!
//! A vertex-centric graph processor in the Pregel model. A run proceeds in
//! supersteps: every active vertex (or vertex with pending messages) is
//! handed to a pool of compute workers, messages produced during a superstep
//! are delivered at the next one, and a barrier separates consecutive steps.
//!
//! The engine is generic over the vertex value `V`, edge value `E`, and
//! message type `M`. User algorithms plug in through a compute function plus
//! the optional [`ExecutorCallbacks`]; named [`Aggregator`]s give compute
//! invocations a concurrent-safe side channel for global state such as
//! convergence deltas.

mod aggregator;
mod executor;
mod graph;
mod message;

pub use aggregator::{Aggregator, Float64Accumulator};
pub use executor::{Executor, ExecutorCallbacks};
pub use graph::{ComputeFn, Edge, Graph, GraphConfig, GraphState, Vertex};
pub use message::Messages;

use thiserror::Error;

/// Errors reported by the BSP engine.
#[derive(Debug, Error)]
pub enum BspError {
    #[error("cannot create edge from {src} to {dst}: source vertex is not part of the graph")]
    UnknownEdgeSource { src: String, dst: String },

    #[error("message cannot be delivered to {dst}: invalid message destination")]
    InvalidMessageDestination { dst: String },

    #[error("relaying message to {dst} failed: {cause}")]
    Relay { dst: String, cause: anyhow::Error },

    #[error("compute function failed for vertex {vertex}: {cause}")]
    Compute { vertex: String, cause: anyhow::Error },

    #[error("executor callback failed: {cause}")]
    Callback { cause: anyhow::Error },

    #[error("graph run cancelled")]
    Cancelled,

    #[error("graph has been closed")]
    Closed,

    #[error("graph configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for BSP operations.
pub type BspResult<T> = Result<T, BspError>;

/// Error returned by [`Relayer`] implementations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The destination belongs to the local graph, not the relayer. The
    /// engine treats this as an unresolvable destination.
    #[error("message destination is assigned to the local graph")]
    DestinationIsLocal,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Implemented by types that can deliver messages to vertices owned by a
/// remote graph instance.
pub trait Relayer<M>: Send + Sync {
    fn relay(&self, dst_id: &str, msg: M) -> Result<(), RelayError>;
}
