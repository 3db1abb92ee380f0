//! The engine's entry point: owns all network state and drives the tick.
//!
//! Structural changes and holder access arrive through a cloneable
//! [`ManagerHandle`] and are applied at fixed points of [`NetworkManager::tick`]:
//!
//! 1. queued structural tasks, then unknown-edge retries and cluster rebuilds
//! 2. `pre_tick_sync` on every cluster (revalidation)
//! 3. queued holder reads and updates
//! 4. `pre_tick`, `tick`, `post_tick`, on the worker pool when enabled
//! 5. `post_tick_sync`

use crate::builder::ClusterBuilder;
use crate::cluster::NetworkCluster;
use crate::command_queue::{NetworkTask, TaskQueue};
use crate::config::EngineConfig;
use crate::discovery::{CancelToken, DiscoveryError};
use crate::holder::Holders;
use crate::id::ClusterId;
use crate::network::{NetworkType, TypeRegistry};
use crate::node::{EndPoint, NetworkNode};
use crate::persist::{HolderPersistence, PersistError};
use crate::position::{ChunkPos, Position};
use crate::provider::NodeProvider;
use crate::proto::ProtoState;
use crate::request::{HolderRequest, RequestQueue};
use crossbeam_channel::Sender;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("network manager is not running")]
    NotRunning,
    #[error("network manager is already running")]
    AlreadyRunning,
    /// The manager behind a handle has been dropped.
    #[error("network manager is gone")]
    Disconnected,
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

// ===========================================================================
// ManagerHandle
// ===========================================================================

/// Submission side of the manager's queues. Cheap to clone and safe to use
/// from any thread.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tasks: Sender<NetworkTask>,
    requests: Sender<HolderRequest>,
}

impl ManagerHandle {
    fn send_task(&self, task: NetworkTask) -> Result<(), ManagerError> {
        self.tasks.send(task).map_err(|_| ManagerError::Disconnected)
    }

    fn send_request(&self, request: HolderRequest) -> Result<(), ManagerError> {
        self.requests.send(request).map_err(|_| ManagerError::Disconnected)
    }

    /// Queue a node for discovery. Cancelling the returned token abandons
    /// the add if it has not been applied yet.
    pub fn queue_add_node(&self, node: impl Into<NetworkNode>) -> Result<CancelToken, ManagerError> {
        let (task, token) = NetworkTask::add(node.into());
        self.send_task(task)?;
        Ok(token)
    }

    pub fn queue_remove_node(&self, pos: Position) -> Result<(), ManagerError> {
        self.send_task(NetworkTask::RemoveNode { pos })
    }

    /// Re-read a node's connections on the next cycle.
    pub fn invalidate_node(&self, pos: Position) -> Result<(), ManagerError> {
        self.send_task(NetworkTask::InvalidateNode { pos })
    }

    pub fn load_chunk(&self, chunk: ChunkPos) -> Result<(), ManagerError> {
        self.send_task(NetworkTask::LoadChunk { chunk })
    }

    pub fn unload_chunk(&self, chunk: ChunkPos) -> Result<(), ManagerError> {
        self.send_task(NetworkTask::UnloadChunk { chunk })
    }

    /// Run `f` against the holders at `pos` at the next safe point.
    pub fn queue_read(&self, pos: Position, f: impl FnOnce(&Holders) + Send + 'static) -> Result<(), ManagerError> {
        self.send_request(HolderRequest::Read { pos, f: Box::new(f) })
    }

    /// Mutate the holders at `pos` at the next safe point. The node is
    /// invalidated afterwards.
    pub fn queue_update(
        &self,
        pos: Position,
        f: impl FnOnce(&mut Holders) + Send + 'static,
    ) -> Result<(), ManagerError> {
        self.send_request(HolderRequest::Update { pos, f: Box::new(f) })
    }
}

// ===========================================================================
// NetworkManager
// ===========================================================================

pub struct NetworkManager {
    config: EngineConfig,
    provider: Arc<dyn NodeProvider>,
    registry: TypeRegistry,
    proto: ProtoState,
    clusters: BTreeMap<ClusterId, NetworkCluster>,
    builder: ClusterBuilder,
    tasks: TaskQueue,
    requests: RequestQueue,
    persistence: Option<Box<dyn HolderPersistence>>,
    tick: u64,
    running: bool,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl NetworkManager {
    pub fn new(config: EngineConfig, provider: Arc<dyn NodeProvider>) -> Self {
        let config = config.normalized();
        let builder = ClusterBuilder::new(config.seed);
        Self {
            config,
            provider,
            registry: TypeRegistry::new(),
            proto: ProtoState::new(),
            clusters: BTreeMap::new(),
            builder,
            tasks: TaskQueue::new(),
            requests: RequestQueue::new(),
            persistence: None,
            tick: 0,
            running: false,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }

    pub fn with_persistence(mut self, persistence: impl HolderPersistence + 'static) -> Self {
        self.persistence = Some(Box::new(persistence));
        self
    }

    /// Register (or replace) the algorithm for one resource type. Every
    /// cluster is rebuilt on the next tick.
    pub fn register_type(&mut self, network_type: Arc<dyn NetworkType>) {
        let resource_type = network_type.resource_type();
        if self.registry.register(network_type).is_some() {
            log::info!("replaced network type for {resource_type}");
        }
        self.proto.mark_all_dirty();
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            tasks: self.tasks.sender(),
            requests: self.requests.sender(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&mut self) -> Result<(), ManagerError> {
        if self.running {
            return Err(ManagerError::AlreadyRunning);
        }
        #[cfg(feature = "parallel")]
        if self.config.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.worker_threads)
                .thread_name(|i| format!("conduit-worker-{i}"))
                .build()
                .map_err(|e| ManagerError::ThreadPool(e.to_string()))?;
            self.pool = Some(pool);
        }
        self.running = true;
        log::info!(
            "network manager started ({} network types, parallel: {})",
            self.registry.len(),
            self.config.parallel
        );
        Ok(())
    }

    /// Apply everything still queued, hand every known endpoint's holders to
    /// the persistence layer and drop all network state. If persisting fails
    /// the manager keeps running and nothing is dropped.
    pub fn stop(&mut self) -> Result<(), ManagerError> {
        if !self.running {
            return Err(ManagerError::NotRunning);
        }
        self.process_pending();
        self.drain_requests();
        self.process_pending();

        match self.persistence.as_mut() {
            Some(persistence) => {
                let mut saved = 0;
                for ep in self.proto.nodes().filter_map(NetworkNode::as_end_point) {
                    persistence.save(ep.pos(), &ep.lock())?;
                    saved += 1;
                }
                log::info!("persisted holders of {saved} endpoints");
            }
            None => log::debug!("no persistence configured, holder state is not saved"),
        }

        self.proto.clear();
        self.proto.take_removed();
        self.clusters.clear();
        self.running = false;
        #[cfg(feature = "parallel")]
        {
            self.pool = None;
        }
        log::info!("network manager stopped after {} ticks", self.tick);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    pub fn tick(&mut self) -> Result<(), ManagerError> {
        if !self.running {
            return Err(ManagerError::NotRunning);
        }
        let tick = self.tick;

        self.process_pending();

        for cluster in self.clusters.values_mut() {
            cluster.pre_tick_sync(tick);
        }

        self.drain_requests();

        self.run_parallel_phases(tick);

        for cluster in self.clusters.values_mut() {
            cluster.post_tick_sync(tick);
        }

        self.tick += 1;
        Ok(())
    }

    fn run_parallel_phases(&mut self, tick: u64) {
        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            use rayon::prelude::*;
            let clusters = &mut self.clusters;
            pool.install(|| {
                clusters
                    .par_iter_mut()
                    .for_each(|(_, cluster)| cluster.run_parallel_phases(tick));
            });
            return;
        }

        for cluster in self.clusters.values_mut() {
            cluster.run_parallel_phases(tick);
        }
    }

    /// Apply queued structural tasks, retry unknown edges and rebuild every
    /// cluster that changed.
    fn process_pending(&mut self) {
        for task in self.tasks.drain() {
            if let Err(DiscoveryError::Cancelled) = self.apply_task(task) {
                log::debug!("queued add was cancelled during discovery");
            }
        }

        match self.proto.retry_incomplete(self.provider.as_ref()) {
            Ok(0) => {}
            Ok(n) => log::debug!("re-discovered {n} networks with resolved unknown edges"),
            Err(e) => log::warn!("retrying unknown edges: {e}"),
        }

        for id in self.proto.take_removed() {
            if self.clusters.remove(&id).is_some() {
                log::debug!("dropped cluster {id:?}");
            }
        }
        for id in self.proto.split_dirty() {
            let cluster = self.builder.build(id, self.proto.networks_in(id), &self.registry);
            self.proto.mark_clean(id);
            self.clusters.insert(id, cluster);
        }
    }

    fn apply_task(&mut self, task: NetworkTask) -> Result<(), DiscoveryError> {
        let provider = self.provider.as_ref();
        match task {
            NetworkTask::AddNode { node, token } => {
                self.proto.add_node(node, provider, Some(&token))?;
            }
            NetworkTask::RemoveNode { pos } => {
                if self.proto.remove_node(pos, provider)?.is_none() {
                    log::debug!("remove of unknown node at {pos}");
                }
            }
            NetworkTask::InvalidateNode { pos } => {
                let current = provider.get_node(pos);
                self.proto.remove_node(pos, provider)?;
                if let Some(node) = current {
                    self.proto.add_node(node, provider, None)?;
                }
            }
            NetworkTask::LoadChunk { chunk } => {
                let nodes = provider.get_nodes(chunk);
                let present: BTreeSet<Position> = nodes.iter().map(NetworkNode::pos).collect();
                let vanished: Vec<Position> = self
                    .proto
                    .nodes()
                    .map(NetworkNode::pos)
                    .filter(|pos| chunk.contains(*pos) && !present.contains(pos))
                    .collect();
                for pos in vanished {
                    log::debug!("node at {pos} disappeared while chunk {chunk:?} was unloaded");
                    self.proto.remove_node(pos, provider)?;
                }
                // Everything in the chunk must be valid before discovery
                // walks from any one of them.
                for node in &nodes {
                    node.set_valid(true);
                }
                log::debug!("loading {} nodes in chunk {chunk:?}", nodes.len());
                for node in nodes {
                    self.proto.add_node(node, provider, None)?;
                }
            }
            NetworkTask::UnloadChunk { chunk } => {
                let count = self.proto.mark_chunk_unknown(chunk);
                log::debug!("chunk {chunk:?} unloaded, {count} nodes now unknown");
            }
        }
        Ok(())
    }

    fn drain_requests(&mut self) {
        let proto = &self.proto;
        let provider = self.provider.as_ref();
        let updated = self.requests.drain(|pos| {
            proto
                .node(pos)
                .and_then(|n| n.as_end_point().cloned())
                .or_else(|| provider.get_node(pos).and_then(|n| n.as_end_point().cloned()))
        });
        for pos in updated {
            self.tasks.push(NetworkTask::InvalidateNode { pos });
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of completed ticks.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn proto(&self) -> &ProtoState {
        &self.proto
    }

    pub fn clusters(&self) -> impl Iterator<Item = &NetworkCluster> {
        self.clusters.values()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&NetworkCluster> {
        self.clusters.get(&id)
    }

    pub fn cluster_of(&self, pos: Position) -> Option<&NetworkCluster> {
        self.proto.cluster_of(pos).and_then(|id| self.clusters.get(&id))
    }

    /// The endpoint the manager knows at `pos`, if any.
    pub fn end_point(&self, pos: Position) -> Option<Arc<EndPoint>> {
        self.proto.node(pos).and_then(|n| n.as_end_point().cloned())
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending_count()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.pending_count()
    }
}
