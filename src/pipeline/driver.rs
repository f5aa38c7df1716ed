//! Pipeline driver
//!
//! Wires a source, an ordered set of stage runners, and a sink together with
//! bounded channels, then supervises the run: one task per stage plus one
//! each for the source and sink, all sharing an error channel. The first
//! error cancels the run-internal shutdown token, which cascades through
//! every worker's select loops.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::stage::{try_emit_error, StageParams, StageRunner};
use super::{Payload, PipelineError, PipelineResult, Sink, Source};
use crate::shutdown::{self, ShutdownToken};

/// An ordered chain of stages payloads traverse between a source and a sink.
pub struct Pipeline {
    stages: Vec<Arc<dyn StageRunner>>,
}

impl Pipeline {
    /// Creates a pipeline from the given stage runners. Payloads traverse
    /// the stages in the order provided.
    pub fn new(stages: Vec<Box<dyn StageRunner>>) -> Self {
        Self {
            stages: stages.into_iter().map(Arc::from).collect(),
        }
    }

    /// Streams the source's payloads through every stage and into the sink.
    ///
    /// Blocks until the source is exhausted and all stages have drained, any
    /// worker reports an error, or `shutdown` is triggered. All errors
    /// observed during the run are folded into the returned composite; an
    /// external shutdown surfaces as [`PipelineError::Cancelled`].
    ///
    /// It is safe to run the same pipeline concurrently with different
    /// sources and sinks.
    pub async fn process(
        &self,
        shutdown: &ShutdownToken,
        source: impl Source + 'static,
        sink: impl Sink + 'static,
    ) -> PipelineResult<()> {
        let (run_handle, run_token) = shutdown::channel();

        // One best-effort error slot per worker.
        let (err_tx, mut err_rx) = mpsc::channel(self.stages.len() + 2);

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.stages.len() + 2);

        // Source worker. Dropping its sender on exit closes the first
        // stage's input, which ripples end-of-input down the chain.
        let (source_tx, mut next_input) = mpsc::channel::<Box<dyn Payload>>(1);
        workers.push(tokio::spawn(source_worker(
            source,
            source_tx,
            err_tx.clone(),
            run_token.clone(),
        )));

        // Stage workers, each fed by its predecessor's output channel.
        for (stage, runner) in self.stages.iter().enumerate() {
            let (tx, rx) = mpsc::channel::<Box<dyn Payload>>(1);
            let params = StageParams {
                stage,
                input: std::mem::replace(&mut next_input, rx),
                output: tx,
                errors: err_tx.clone(),
                shutdown: run_token.clone(),
            };
            let runner = runner.clone();
            workers.push(tokio::spawn(async move { runner.run(params).await }));
        }

        // Sink worker consumes the final stage's output.
        workers.push(tokio::spawn(sink_worker(
            sink,
            next_input,
            err_tx.clone(),
            run_token.clone(),
        )));

        // The workers now hold the only error senders; the channel closes
        // once every worker has exited.
        drop(err_tx);

        let mut errors = Vec::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = shutdown.wait(), if !cancelled => {
                    cancelled = true;
                    errors.push(PipelineError::Cancelled);
                    run_handle.shutdown();
                }
                received = err_rx.recv() => match received {
                    Some(err) => {
                        errors.push(err);
                        run_handle.shutdown();
                    }
                    None => break,
                }
            }
        }

        for worker in workers {
            let _ = worker.await;
        }

        PipelineError::fold(errors)
    }
}

async fn source_worker(
    mut source: impl Source,
    output: mpsc::Sender<Box<dyn Payload>>,
    errors: mpsc::Sender<PipelineError>,
    shutdown: ShutdownToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.wait() => return,
            next = source.next() => next,
        };
        let payload = match next {
            None => return,
            Some(Err(cause)) => {
                try_emit_error(&errors, PipelineError::Source(cause));
                return;
            }
            Some(Ok(payload)) => payload,
        };
        tokio::select! {
            _ = shutdown.wait() => return,
            sent = output.send(payload) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn sink_worker(
    mut sink: impl Sink,
    mut input: mpsc::Receiver<Box<dyn Payload>>,
    errors: mpsc::Sender<PipelineError>,
    shutdown: ShutdownToken,
) {
    loop {
        let mut payload = tokio::select! {
            _ = shutdown.wait() => return,
            received = input.recv() => match received {
                Some(payload) => payload,
                None => return,
            },
        };
        if let Err(cause) = sink.consume(payload.as_ref()).await {
            try_emit_error(&errors, PipelineError::Sink(cause));
            return;
        }
        payload.mark_as_processed();
    }
}
