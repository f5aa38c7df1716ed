//! PageRank calculator
//!
//! Runs the PageRank recurrence over a BSP graph. Each vertex starts at
//! `1/|V|`; on every later superstep it combines the contributions messaged
//! by its in-neighbors with a uniform share of the rank parked by dangling
//! vertices, applies the damping factor, and broadcasts its new rank split
//! across its out-edges. The run converges when the total absolute rank
//! change of a superstep falls below the configured tolerance.

use std::sync::Arc;

use thiserror::Error;

use crate::bsp::{
    Aggregator, BspError, ComputeFn, Executor, ExecutorCallbacks, Float64Accumulator, Graph,
    GraphConfig, GraphState,
};
use crate::shutdown::ShutdownToken;

/// Aggregator tracking the total absolute rank change per superstep.
const RANK_DELTA: &str = "rank_delta";
/// Parity-indexed pair of aggregators holding the rank parked by dangling
/// vertices, redistributed uniformly on the following superstep.
const RESIDUALS: [&str; 2] = ["residual_0", "residual_1"];

/// Errors reported by the PageRank calculator.
#[derive(Debug, Error)]
pub enum PageRankError {
    #[error("pagerank configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Bsp(#[from] BspError),
}

/// Configuration for a [`Calculator`].
#[derive(Debug, Clone)]
pub struct PageRankConfig {
    /// Probability that a random surfer follows an out-edge.
    pub damping_factor: f64,
    /// Convergence threshold for the per-step total rank change.
    pub tolerance: f64,
    /// Upper bound on supersteps when convergence is slow.
    pub max_iterations: usize,
    /// Number of BSP compute workers.
    pub compute_workers: usize,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping_factor: 0.85,
            tolerance: 1e-6,
            max_iterations: 100,
            compute_workers: 1,
        }
    }
}

impl PageRankConfig {
    fn validate(&self) -> Result<(), PageRankError> {
        if !(0.0..1.0).contains(&self.damping_factor) || self.damping_factor == 0.0 {
            return Err(PageRankError::InvalidConfig(
                "damping_factor must be in (0, 1)".to_string(),
            ));
        }
        if self.tolerance <= 0.0 {
            return Err(PageRankError::InvalidConfig(
                "tolerance must be > 0".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(PageRankError::InvalidConfig(
                "max_iterations must be > 0".to_string(),
            ));
        }
        if self.compute_workers == 0 {
            return Err(PageRankError::InvalidConfig(
                "compute_workers must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Calculates PageRank scores for a link graph loaded into a BSP graph.
pub struct Calculator {
    executor: Executor<f64, (), f64>,
}

impl Calculator {
    /// Creates a calculator with its own BSP graph and worker pool. Must be
    /// called from within a tokio runtime.
    pub fn new(config: PageRankConfig) -> Result<Self, PageRankError> {
        config.validate()?;

        let graph = Graph::new(GraphConfig {
            compute_workers: config.compute_workers,
            compute_fn: make_compute_fn(config.damping_factor),
            relayer: None,
        })?;
        register_aggregators(&graph);

        let tolerance = config.tolerance;
        let max_iterations = config.max_iterations;
        let callbacks = ExecutorCallbacks {
            // Zero the residual accumulator this step is about to fill.
            pre_step: Some(Box::new(|state: &GraphState<f64, (), f64>| {
                let write_parity = (state.superstep() + 1) % 2;
                aggregator(state, RESIDUALS[write_parity])?.set(0.0);
                Ok(())
            })),
            post_step: None,
            post_step_keep_running: Some(Box::new(move |state, _active| {
                let step_delta = aggregator(state, RANK_DELTA)?.delta();
                Ok(step_delta.abs() > tolerance && state.superstep() + 1 < max_iterations)
            })),
        };

        Ok(Self {
            executor: Executor::new(graph, callbacks),
        })
    }

    /// Registers a graph vertex for the given link ID.
    pub fn add_vertex(&self, id: &str) {
        self.executor.graph().add_vertex(id, 0.0);
    }

    /// Registers a directed edge between two link IDs. Returns
    /// [`BspError::UnknownEdgeSource`] if the source has not been added;
    /// loaders racing with link discovery may ignore that error.
    pub fn add_edge(&self, src_id: &str, dst_id: &str) -> Result<(), BspError> {
        self.executor.graph().add_edge(src_id, dst_id, ())
    }

    /// Number of vertices currently loaded.
    pub fn vertex_count(&self) -> usize {
        self.executor.graph().state().vertex_count()
    }

    /// Runs the recurrence until convergence, the iteration cap, an error,
    /// or cancellation.
    pub async fn run(&mut self, shutdown: &ShutdownToken) -> Result<(), PageRankError> {
        Ok(self.executor.run_to_completion(shutdown).await?)
    }

    /// Invokes `visitor` with every vertex ID and its converged score.
    pub fn scores(
        &self,
        mut visitor: impl FnMut(&str, f64) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        for vertex in self.executor.graph().state().vertices() {
            visitor(vertex.id(), vertex.value())?;
        }
        Ok(())
    }

    /// Clears the loaded graph and primes the aggregators for another pass.
    pub fn reset(&mut self) {
        let graph = self.executor.graph_mut();
        graph.reset();
        register_aggregators(graph);
    }

    /// Shuts down the underlying BSP worker pool.
    pub async fn close(&mut self) {
        self.executor.graph_mut().close().await;
    }
}

fn register_aggregators(graph: &Graph<f64, (), f64>) {
    graph.register_aggregator(RANK_DELTA, Arc::new(Float64Accumulator::new()));
    graph.register_aggregator(RESIDUALS[0], Arc::new(Float64Accumulator::new()));
    graph.register_aggregator(RESIDUALS[1], Arc::new(Float64Accumulator::new()));
}

fn aggregator(
    state: &GraphState<f64, (), f64>,
    name: &str,
) -> anyhow::Result<Arc<dyn Aggregator>> {
    state
        .aggregator(name)
        .ok_or_else(|| anyhow::anyhow!("aggregator {name} is not registered"))
}

fn make_compute_fn(damping: f64) -> ComputeFn<f64, (), f64> {
    Arc::new(move |graph, vertex, messages| {
        let superstep = graph.superstep();
        let vertex_count = graph.vertex_count() as f64;

        let old_rank = vertex.value();
        let new_rank = if superstep == 0 {
            1.0 / vertex_count
        } else {
            let incoming: f64 = messages.sum();
            let parked = aggregator(graph, RESIDUALS[superstep % 2])?.get();
            (1.0 - damping) / vertex_count + damping * (incoming + parked / vertex_count)
        };

        aggregator(graph, RANK_DELTA)?.aggregate((new_rank - old_rank).abs());
        vertex.set_value(new_rank);

        let out_degree = vertex.edge_count();
        if out_degree == 0 {
            // Dangling vertex: park the rank for uniform redistribution.
            aggregator(graph, RESIDUALS[(superstep + 1) % 2])?.aggregate(new_rank);
        } else {
            graph.broadcast_to_neighbors(vertex, new_rank / out_degree as f64)?;
        }
        Ok(())
    })
}
