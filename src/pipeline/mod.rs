//! Staged concurrent processing pipeline
//!
//! A pipeline is an ordered chain of stages wired together with bounded
//! channels. Payloads enter through a [`Source`], traverse each stage's
//! [`Processor`], and leave through a [`Sink`]. Stage runners differ in how
//! they schedule processor invocations:
//!
//! - [`fifo`]: a single worker, preserves input order
//! - [`fixed_worker_pool`]: k workers sharing one input channel
//! - [`dynamic_worker_pool`]: one task per payload, bounded by a token pool
//! - [`broadcast`]: replicates every payload to a set of sub-processors
//!
//! The first error emitted by any worker cancels the run; all collected
//! errors are reported as a composite.

mod driver;
mod stage;

pub use driver::Pipeline;
pub use stage::{broadcast, dynamic_worker_pool, fifo, fixed_worker_pool, StageParams, StageRunner};

use std::any::Any;

use async_trait::async_trait;
use thiserror::Error;

/// A unit of work travelling through a pipeline.
///
/// Payload values are drawn from a pool; [`Payload::mark_as_processed`]
/// releases a payload's resources back to it. Concrete processors recover
/// their payload variant through [`Payload::as_any_mut`].
pub trait Payload: Send + Sync + Any {
    /// Returns a deep copy of this payload, used by broadcast fan-out.
    fn clone_payload(&self) -> Box<dyn Payload>;

    /// Releases the payload's resources after terminal consumption.
    fn mark_as_processed(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A single transformation step within a pipeline stage.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Operates on an input payload and returns the payload to forward to
    /// the next stage. Returning `Ok(None)` removes the payload from the
    /// pipeline; a processor that does so must call `mark_as_processed`
    /// before letting the payload go. Returning an error aborts the run.
    async fn process(&self, payload: Box<dyn Payload>) -> anyhow::Result<Option<Box<dyn Payload>>>;
}

/// Produces the payloads for a pipeline run.
#[async_trait]
pub trait Source: Send {
    /// Fetches the next payload. `None` signals end of input; an `Err` item
    /// is a terminal source error that aborts the run.
    async fn next(&mut self) -> Option<anyhow::Result<Box<dyn Payload>>>;
}

/// Consumes the payloads that exit the final stage.
///
/// The pipeline's sink worker calls `mark_as_processed` on every payload
/// after a successful consume; sinks only observe the payload.
#[async_trait]
pub trait Sink: Send {
    async fn consume(&mut self, payload: &dyn Payload) -> anyhow::Result<()>;
}

/// Errors reported by a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline stage {stage}: {cause}")]
    Stage { stage: usize, cause: anyhow::Error },

    #[error("pipeline source: {0}")]
    Source(anyhow::Error),

    #[error("pipeline sink: {0}")]
    Sink(anyhow::Error),

    #[error("pipeline run cancelled")]
    Cancelled,

    #[error("pipeline failed with {} errors: {}", .0.len(), summarize(.0))]
    Multiple(Vec<PipelineError>),
}

impl PipelineError {
    /// Folds collected worker errors into a run result.
    pub(crate) fn fold(mut errors: Vec<PipelineError>) -> Result<(), PipelineError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(PipelineError::Multiple(errors)),
        }
    }
}

fn summarize(errors: &[PipelineError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
