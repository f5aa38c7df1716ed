//! Stage runners
//!
//! Each runner drains an input channel, hands payloads to its processor, and
//! forwards results to an output channel. Every potentially blocking await
//! also selects on the run's shutdown token so a cancelled run drains
//! promptly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};

use super::{Payload, PipelineError, Processor};
use crate::shutdown::ShutdownToken;

/// The channels and identity handed to a stage by the pipeline driver.
pub struct StageParams {
    pub(crate) stage: usize,
    pub(crate) input: mpsc::Receiver<Box<dyn Payload>>,
    pub(crate) output: mpsc::Sender<Box<dyn Payload>>,
    pub(crate) errors: mpsc::Sender<PipelineError>,
    pub(crate) shutdown: ShutdownToken,
}

impl StageParams {
    /// The position of this stage in the pipeline, used for error wrapping.
    pub fn stage_index(&self) -> usize {
        self.stage
    }
}

/// Implemented by types that can be strung together to form a pipeline.
///
/// A runner returns when its input channel closes, when its processor fails,
/// or when the run is cancelled. Dropping the output sender on return is what
/// signals end-of-input to the next stage.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, params: StageParams);
}

/// Input channel shared between the workers of one stage.
type SharedInput = Arc<Mutex<mpsc::Receiver<Box<dyn Payload>>>>;

/// Emits an error without blocking. The channel reserves one slot per
/// worker; anything beyond that is dropped, the first error having already
/// cancelled the run.
pub(crate) fn try_emit_error(errors: &mpsc::Sender<PipelineError>, err: PipelineError) {
    let _ = errors.try_send(err);
}

/// The worker loop shared by the FIFO, fixed-pool, and broadcast runners.
async fn process_loop(
    proc: Arc<dyn Processor>,
    stage: usize,
    input: SharedInput,
    output: mpsc::Sender<Box<dyn Payload>>,
    errors: mpsc::Sender<PipelineError>,
    shutdown: ShutdownToken,
) {
    loop {
        // The lock is held only while waiting for the next payload, so pool
        // workers take turns receiving but process in parallel.
        let payload = {
            let mut input = input.lock().await;
            tokio::select! {
                _ = shutdown.wait() => return,
                received = input.recv() => match received {
                    Some(payload) => payload,
                    None => return,
                },
            }
        };

        let forwarded = match proc.process(payload).await {
            Ok(forwarded) => forwarded,
            Err(cause) => {
                try_emit_error(&errors, PipelineError::Stage { stage, cause });
                return;
            }
        };

        // A processor returning None has dropped the payload from the run.
        let Some(payload) = forwarded else { continue };

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

struct Fifo {
    proc: Arc<dyn Processor>,
}

/// Returns a stage runner that processes payloads one at a time, preserving
/// their order.
pub fn fifo(proc: impl Processor + 'static) -> Box<dyn StageRunner> {
    Box::new(Fifo {
        proc: Arc::new(proc),
    })
}

#[async_trait]
impl StageRunner for Fifo {
    async fn run(&self, params: StageParams) {
        process_loop(
            self.proc.clone(),
            params.stage,
            Arc::new(Mutex::new(params.input)),
            params.output,
            params.errors,
            params.shutdown,
        )
        .await;
    }
}

struct FixedWorkerPool {
    proc: Arc<dyn Processor>,
    workers: usize,
}

/// Returns a stage runner that spins up `workers` FIFO workers sharing one
/// input channel. Output ordering is not preserved across workers.
///
/// # Panics
///
/// Panics if `workers` is zero.
pub fn fixed_worker_pool(proc: impl Processor + 'static, workers: usize) -> Box<dyn StageRunner> {
    assert!(workers > 0, "fixed_worker_pool: workers must be > 0");
    Box::new(FixedWorkerPool {
        proc: Arc::new(proc),
        workers,
    })
}

#[async_trait]
impl StageRunner for FixedWorkerPool {
    async fn run(&self, params: StageParams) {
        let input: SharedInput = Arc::new(Mutex::new(params.input));

        let mut workers = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            workers.push(tokio::spawn(process_loop(
                self.proc.clone(),
                params.stage,
                input.clone(),
                params.output.clone(),
                params.errors.clone(),
                params.shutdown.clone(),
            )));
        }
        for worker in workers {
            let _ = worker.await;
        }
    }
}

struct DynamicWorkerPool {
    proc: Arc<dyn Processor>,
    max_workers: usize,
}

/// Returns a stage runner that processes each payload in a fresh task,
/// bounding concurrency with a token pool of `max_workers` permits.
///
/// # Panics
///
/// Panics if `max_workers` is zero.
pub fn dynamic_worker_pool(
    proc: impl Processor + 'static,
    max_workers: usize,
) -> Box<dyn StageRunner> {
    assert!(max_workers > 0, "dynamic_worker_pool: max_workers must be > 0");
    Box::new(DynamicWorkerPool {
        proc: Arc::new(proc),
        max_workers,
    })
}

#[async_trait]
impl StageRunner for DynamicWorkerPool {
    async fn run(&self, mut params: StageParams) {
        let tokens = Arc::new(Semaphore::new(self.max_workers));

        loop {
            let payload = tokio::select! {
                _ = params.shutdown.wait() => break,
                received = params.input.recv() => match received {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = params.shutdown.wait() => break,
                permit = tokens.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let proc = self.proc.clone();
            let stage = params.stage;
            let output = params.output.clone();
            let errors = params.errors.clone();
            let shutdown = params.shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let forwarded = match proc.process(payload).await {
                    Ok(forwarded) => forwarded,
                    Err(cause) => {
                        try_emit_error(&errors, PipelineError::Stage { stage, cause });
                        return;
                    }
                };
                let Some(payload) = forwarded else { return };
                tokio::select! {
                    _ = shutdown.wait() => {}
                    _ = output.send(payload) => {}
                }
            });
        }

        // Wait for in-flight workers by reclaiming the whole token pool.
        let _ = tokens.acquire_many(self.max_workers as u32).await;
    }
}

struct Broadcast {
    procs: Vec<Arc<dyn Processor>>,
}

/// Returns a stage runner that delivers every input payload to all of the
/// given processors. All but one receive a clone; outputs from every branch
/// flow into the same downstream channel.
///
/// # Panics
///
/// Panics if `procs` is empty.
pub fn broadcast(procs: Vec<Box<dyn Processor>>) -> Box<dyn StageRunner> {
    assert!(!procs.is_empty(), "broadcast: at least one processor required");
    Box::new(Broadcast {
        procs: procs.into_iter().map(Arc::from).collect(),
    })
}

#[async_trait]
impl StageRunner for Broadcast {
    async fn run(&self, mut params: StageParams) {
        let mut branch_inputs = Vec::with_capacity(self.procs.len());
        let mut branches = Vec::with_capacity(self.procs.len());

        for proc in &self.procs {
            let (tx, rx) = mpsc::channel::<Box<dyn Payload>>(1);
            branch_inputs.push(tx);
            branches.push(tokio::spawn(process_loop(
                proc.clone(),
                params.stage,
                Arc::new(Mutex::new(rx)),
                params.output.clone(),
                params.errors.clone(),
                params.shutdown.clone(),
            )));
        }

        'dispatch: loop {
            let payload = tokio::select! {
                _ = params.shutdown.wait() => break,
                received = params.input.recv() => match received {
                    Some(payload) => payload,
                    None => break,
                },
            };

            // Clones feed every branch but the first; the original payload
            // goes to the first branch last so it is never copied.
            for branch in branch_inputs.iter().skip(1) {
                let clone = payload.clone_payload();
                tokio::select! {
                    _ = params.shutdown.wait() => break 'dispatch,
                    sent = branch.send(clone) => {
                        if sent.is_err() {
                            break 'dispatch;
                        }
                    }
                }
            }
            tokio::select! {
                _ = params.shutdown.wait() => break,
                sent = branch_inputs[0].send(payload) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        // Close branch channels and wait for the sub-runners to drain.
        drop(branch_inputs);
        for branch in branches {
            let _ = branch.await;
        }
    }
}
