//! Superstep orchestration
//!
//! An [`Executor`] wraps a graph and drives supersteps until an error
//! occurs, a stop condition is met, or the run is cancelled. Callbacks slot
//! user logic around each step; a run with no keep-running callback stops
//! once a step processes zero vertices.

use super::graph::{Graph, GraphState};
use super::{BspError, BspResult};
use crate::shutdown::ShutdownToken;

type StepCallback<V, E, M> =
    Box<dyn Fn(&GraphState<V, E, M>) -> anyhow::Result<()> + Send + Sync>;
type PostStepCallback<V, E, M> =
    Box<dyn Fn(&GraphState<V, E, M>, usize) -> anyhow::Result<()> + Send + Sync>;
type KeepRunningCallback<V, E, M> =
    Box<dyn Fn(&GraphState<V, E, M>, usize) -> anyhow::Result<bool> + Send + Sync>;

/// Optional hooks invoked around each superstep.
pub struct ExecutorCallbacks<V, E, M> {
    /// Invoked before running the next superstep, a place to prime
    /// aggregators and per-step variables.
    pub pre_step: Option<StepCallback<V, E, M>>,
    /// Invoked after a superstep with the number of vertices processed.
    pub post_step: Option<PostStepCallback<V, E, M>>,
    /// Decides whether the run's stop condition has been met.
    pub post_step_keep_running: Option<KeepRunningCallback<V, E, M>>,
}

impl<V, E, M> Default for ExecutorCallbacks<V, E, M> {
    fn default() -> Self {
        Self {
            pre_step: None,
            post_step: None,
            post_step_keep_running: None,
        }
    }
}

/// Drives a [`Graph`] through supersteps until an exit condition is met.
pub struct Executor<V, E, M> {
    graph: Graph<V, E, M>,
    callbacks: ExecutorCallbacks<V, E, M>,
}

impl<V, E, M> Executor<V, E, M>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
    M: Send + 'static,
{
    /// Wraps `graph`, rewinding its superstep counter for a fresh run.
    pub fn new(graph: Graph<V, E, M>, callbacks: ExecutorCallbacks<V, E, M>) -> Self {
        graph.rewind_superstep();
        Self { graph, callbacks }
    }

    pub fn graph(&self) -> &Graph<V, E, M> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph<V, E, M> {
        &mut self.graph
    }

    /// Runs at most `max_steps` supersteps.
    pub async fn run_steps(
        &mut self,
        shutdown: &ShutdownToken,
        max_steps: usize,
    ) -> BspResult<()> {
        self.run(shutdown, Some(max_steps)).await
    }

    /// Runs supersteps until a stop condition fires.
    pub async fn run_to_completion(&mut self, shutdown: &ShutdownToken) -> BspResult<()> {
        self.run(shutdown, None).await
    }

    async fn run(&mut self, shutdown: &ShutdownToken, max_steps: Option<usize>) -> BspResult<()> {
        let mut remaining = max_steps;
        while remaining.map_or(true, |n| n > 0) {
            if shutdown.is_shutdown() {
                return Err(BspError::Cancelled);
            }

            if let Some(pre_step) = &self.callbacks.pre_step {
                pre_step(self.graph.state()).map_err(|cause| BspError::Callback { cause })?;
            }

            let active = self.graph.step().await?;

            if let Some(post_step) = &self.callbacks.post_step {
                post_step(self.graph.state(), active)
                    .map_err(|cause| BspError::Callback { cause })?;
            }

            let keep_running = match &self.callbacks.post_step_keep_running {
                Some(keep) => keep(self.graph.state(), active)
                    .map_err(|cause| BspError::Callback { cause })?,
                // Without a custom stop condition the run ends once every
                // vertex is inactive with no pending messages.
                None => active > 0,
            };
            if !keep_running {
                break;
            }

            self.graph.advance_superstep();
            remaining = remaining.map(|n| n - 1);
        }
        Ok(())
    }
}
