//! BSP graph state and superstep execution
//!
//! The graph owns its vertices; vertices own their outgoing edges, which
//! name destination vertices by ID rather than holding references. A fixed
//! pool of compute workers persists across supersteps, consuming vertices
//! from a shared dispatch channel and signalling a barrier when the last
//! pending vertex of a step has been processed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::aggregator::Aggregator;
use super::message::{MessageQueue, Messages};
use super::{BspError, BspResult, RelayError, Relayer};

/// The function a graph invokes on each vertex when executing a superstep.
///
/// The messages are those delivered during the previous superstep; anything
/// sent through the graph inside the call is delivered at the next one.
pub type ComputeFn<V, E, M> = Arc<
    dyn Fn(&GraphState<V, E, M>, &Vertex<V, E, M>, Messages<M>) -> anyhow::Result<()>
        + Send
        + Sync,
>;

/// Configuration for creating a [`Graph`].
pub struct GraphConfig<V, E, M> {
    /// Number of worker tasks executing compute calls each superstep.
    pub compute_workers: usize,
    /// The vertex compute function.
    pub compute_fn: ComputeFn<V, E, M>,
    /// Optional delivery of messages to vertices owned by remote graphs.
    pub relayer: Option<Arc<dyn Relayer<M>>>,
}

/// An outgoing edge owned by a vertex.
pub struct Edge<E> {
    dst_id: String,
    value: E,
}

impl<E> Edge<E> {
    /// The ID of the edge's target vertex, which may be local or remote.
    pub fn dst_id(&self) -> &str {
        &self.dst_id
    }

    pub fn value(&self) -> &E {
        &self.value
    }
}

/// A vertex registered with a BSP graph.
pub struct Vertex<V, E, M> {
    id: String,
    value: Mutex<V>,
    active: AtomicBool,
    edges: RwLock<Vec<Edge<E>>>,
    queues: [MessageQueue<M>; 2],
}

impl<V, E, M> Vertex<V, E, M> {
    fn new(id: String, value: V) -> Self {
        Self {
            id,
            value: Mutex::new(value),
            active: AtomicBool::new(true),
            edges: RwLock::new(Vec::new()),
            queues: [MessageQueue::new(), MessageQueue::new()],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> V
    where
        V: Clone,
    {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_value(&self, value: V) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Marks the vertex as inactive. An inactive vertex is skipped by the
    /// next superstep unless a message arrives for it.
    pub fn freeze(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of outgoing edges.
    pub fn edge_count(&self) -> usize {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs `f` over the vertex's outgoing edges.
    pub fn with_edges<R>(&self, f: impl FnOnce(&[Edge<E>]) -> R) -> R {
        let edges = self.edges.read().unwrap_or_else(PoisonError::into_inner);
        f(&edges)
    }
}

/// The shared graph state visible to compute functions and executor
/// callbacks: vertices, aggregators, the current superstep, and messaging.
pub struct GraphState<V, E, M> {
    superstep: AtomicUsize,
    vertices: RwLock<HashMap<String, Arc<Vertex<V, E, M>>>>,
    aggregators: RwLock<HashMap<String, Arc<dyn Aggregator>>>,
    compute_fn: ComputeFn<V, E, M>,
    relayer: Option<Arc<dyn Relayer<M>>>,

    active_in_step: AtomicU64,
    pending_in_step: AtomicI64,
    step_done_tx: mpsc::Sender<()>,
    // One error slot, matching the engine's first-error-wins reporting.
    error_slot: Mutex<Option<BspError>>,
}

impl<V, E, M> GraphState<V, E, M>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
    M: Send + 'static,
{
    /// The current superstep number.
    pub fn superstep(&self) -> usize {
        self.superstep.load(Ordering::SeqCst)
    }

    /// Number of registered vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// A snapshot of the registered vertices.
    pub fn vertices(&self) -> Vec<Arc<Vertex<V, E, M>>> {
        self.vertices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Looks up an aggregator registered under `name`.
    pub fn aggregator(&self, name: &str) -> Option<Arc<dyn Aggregator>> {
        self.aggregators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Attempts to deliver a message to the vertex with the given ID.
    ///
    /// A locally known destination has the message queued for the next
    /// superstep. An unknown destination is delegated to the relayer, if one
    /// is configured; a relayer answering [`RelayError::DestinationIsLocal`]
    /// (or the absence of a relayer) makes the destination unresolvable.
    pub fn send_message(&self, dst_id: &str, msg: M) -> BspResult<()> {
        {
            let vertices = self.vertices.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(vertex) = vertices.get(dst_id) {
                let queue = (self.superstep() + 1) % 2;
                vertex.queues[queue].enqueue(msg);
                return Ok(());
            }
        }
        if let Some(relayer) = &self.relayer {
            return match relayer.relay(dst_id, msg) {
                Ok(()) => Ok(()),
                Err(RelayError::DestinationIsLocal) => Err(BspError::InvalidMessageDestination {
                    dst: dst_id.to_string(),
                }),
                Err(RelayError::Other(cause)) => Err(BspError::Relay {
                    dst: dst_id.to_string(),
                    cause,
                }),
            };
        }
        Err(BspError::InvalidMessageDestination {
            dst: dst_id.to_string(),
        })
    }

    /// Sends `msg` to every neighbor of `vertex`, aborting on the first
    /// delivery error.
    pub fn broadcast_to_neighbors(&self, vertex: &Vertex<V, E, M>, msg: M) -> BspResult<()>
    where
        M: Clone,
    {
        let edges = vertex.edges.read().unwrap_or_else(PoisonError::into_inner);
        for edge in edges.iter() {
            self.send_message(&edge.dst_id, msg.clone())?;
        }
        Ok(())
    }

    fn record_error(&self, err: BspError) {
        let mut slot = self
            .error_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_error(&self) -> Option<BspError> {
        self.error_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A parallel graph processor based on the concepts described in the Pregel
/// paper.
///
/// Construct with [`Graph::new`] from within a tokio runtime (the compute
/// workers are spawned immediately) and call [`Graph::close`] when done.
pub struct Graph<V, E, M> {
    state: Arc<GraphState<V, E, M>>,
    vertex_tx: Option<mpsc::UnboundedSender<Arc<Vertex<V, E, M>>>>,
    step_done_rx: mpsc::Receiver<()>,
    workers: Vec<JoinHandle<()>>,
}

impl<V, E, M> Graph<V, E, M>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
    M: Send + 'static,
{
    /// Creates a graph and spawns its compute worker pool.
    pub fn new(config: GraphConfig<V, E, M>) -> BspResult<Self> {
        if config.compute_workers == 0 {
            return Err(BspError::InvalidConfig(
                "compute_workers must be > 0".to_string(),
            ));
        }

        let (step_done_tx, step_done_rx) = mpsc::channel(1);
        let state = Arc::new(GraphState {
            superstep: AtomicUsize::new(0),
            vertices: RwLock::new(HashMap::new()),
            aggregators: RwLock::new(HashMap::new()),
            compute_fn: config.compute_fn,
            relayer: config.relayer,
            active_in_step: AtomicU64::new(0),
            pending_in_step: AtomicI64::new(0),
            step_done_tx,
            error_slot: Mutex::new(None),
        });

        let (vertex_tx, vertex_rx) = mpsc::unbounded_channel();
        let vertex_rx = Arc::new(tokio::sync::Mutex::new(vertex_rx));
        let mut workers = Vec::with_capacity(config.compute_workers);
        for _ in 0..config.compute_workers {
            workers.push(tokio::spawn(step_worker(state.clone(), vertex_rx.clone())));
        }

        Ok(Self {
            state,
            vertex_tx: Some(vertex_tx),
            step_done_rx,
            workers,
        })
    }

    /// The shared state handed to compute functions and callbacks.
    pub fn state(&self) -> &GraphState<V, E, M> {
        &self.state
    }

    /// Inserts a vertex with the given ID and initial value. Re-adding an
    /// existing vertex only overwrites its value.
    pub fn add_vertex(&self, id: &str, value: V) {
        let mut vertices = self
            .state
            .vertices
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match vertices.get(id) {
            Some(vertex) => vertex.set_value(value),
            None => {
                vertices.insert(id.to_string(), Arc::new(Vertex::new(id.to_string(), value)));
            }
        }
    }

    /// Inserts a directed edge annotated with `value`. The destination may
    /// be a vertex owned by a remote graph; the source must be local.
    pub fn add_edge(&self, src_id: &str, dst_id: &str, value: E) -> BspResult<()> {
        let vertices = self
            .state
            .vertices
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let src = vertices.get(src_id).ok_or_else(|| BspError::UnknownEdgeSource {
            src: src_id.to_string(),
            dst: dst_id.to_string(),
        })?;
        src.edges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Edge {
                dst_id: dst_id.to_string(),
                value,
            });
        Ok(())
    }

    /// Registers a named aggregator for the next run.
    pub fn register_aggregator(&self, name: &str, aggregator: Arc<dyn Aggregator>) {
        self.state
            .aggregators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), aggregator);
    }

    /// Executes the next superstep and returns the number of vertices that
    /// were processed, either because they were active or because they had
    /// pending messages.
    pub(crate) async fn step(&mut self) -> BspResult<usize> {
        self.state.active_in_step.store(0, Ordering::SeqCst);
        let vertices = self.state.vertices();
        self.state
            .pending_in_step
            .store(vertices.len() as i64, Ordering::SeqCst);
        if vertices.is_empty() {
            return Ok(0);
        }

        let vertex_tx = self.vertex_tx.as_ref().ok_or(BspError::Closed)?;
        for vertex in vertices {
            if vertex_tx.send(vertex).is_err() {
                return Err(BspError::Closed);
            }
        }

        // Block until the worker pool has processed every vertex.
        if self.step_done_rx.recv().await.is_none() {
            return Err(BspError::Closed);
        }
        if let Some(err) = self.state.take_error() {
            return Err(err);
        }
        Ok(self.state.active_in_step.load(Ordering::SeqCst) as usize)
    }

    pub(crate) fn advance_superstep(&self) {
        self.state.superstep.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn rewind_superstep(&self) {
        self.state.superstep.store(0, Ordering::SeqCst);
    }

    /// Clears vertices, aggregators, queued messages, and the superstep
    /// counter, reclaiming the graph for a fresh run.
    pub fn reset(&mut self) {
        {
            let vertices = self
                .state
                .vertices
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for vertex in vertices.values() {
                vertex.queues[0].discard();
                vertex.queues[1].discard();
            }
        }
        self.state
            .vertices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state
            .aggregators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state.superstep.store(0, Ordering::SeqCst);
    }

    /// Shuts down the worker pool and resets the graph. Steps must not be
    /// executed after closing.
    pub async fn close(&mut self) {
        // Dropping the dispatch sender is what makes the workers exit.
        self.vertex_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        self.reset();
    }
}

/// Polls the dispatch channel for vertices and runs the compute function on
/// each. Workers persist across supersteps and exit when the channel closes.
async fn step_worker<V, E, M>(
    state: Arc<GraphState<V, E, M>>,
    input: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<Vertex<V, E, M>>>>>,
) where
    V: Send + 'static,
    E: Send + Sync + 'static,
    M: Send + 'static,
{
    loop {
        let vertex = {
            let mut input = input.lock().await;
            match input.recv().await {
                Some(vertex) => vertex,
                None => return,
            }
        };

        let queue = state.superstep() % 2;
        if vertex.active.load(Ordering::SeqCst) || vertex.queues[queue].has_pending() {
            state.active_in_step.fetch_add(1, Ordering::SeqCst);
            vertex.active.store(true, Ordering::SeqCst);

            let messages = vertex.queues[queue].drain();
            if let Err(cause) = (state.compute_fn)(&state, &vertex, messages) {
                state.record_error(BspError::Compute {
                    vertex: vertex.id().to_string(),
                    cause,
                });
            }
            // Drop anything the compute function left unread so the queue
            // is empty when this parity comes around again.
            vertex.queues[queue].discard();
        }

        if state.pending_in_step.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = state.step_done_tx.try_send(());
        }
    }
}
