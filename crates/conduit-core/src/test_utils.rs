//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::builder::ClusterBuilder;
use crate::cluster::NetworkCluster;
use crate::holder::{
    ConnectionType, EnergyHolder, FluidContainer, FluidHolder, Holders, ItemContainer, ItemHolder,
};
use crate::id::{ContainerId, FluidTypeId, ItemTypeId, ResourceType, WorldId};
use crate::item::Inventory;
use crate::network::TypeRegistry;
use crate::node::{Bridge, EndPoint, NetworkNode};
use crate::position::{BlockFace, ChunkPos, Position};
use crate::proto::ProtoState;
use crate::provider::NodeProvider;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

// ===========================================================================
// Positions and resource ids
// ===========================================================================

pub fn pos(x: i32, y: i32, z: i32) -> Position {
    Position::new(WorldId(0), x, y, z)
}

pub fn iron() -> ItemTypeId {
    ItemTypeId(0)
}
pub fn copper() -> ItemTypeId {
    ItemTypeId(1)
}

pub fn water() -> FluidTypeId {
    FluidTypeId(0)
}
pub fn lava() -> FluidTypeId {
    FluidTypeId(1)
}

// ===========================================================================
// Holder builders
// ===========================================================================

/// An energy holder with every face set to `connection`. Per-tick limits
/// equal the capacity.
pub fn energy_holder(capacity: u64, stored: u64, connection: ConnectionType) -> EnergyHolder {
    let mut holder = EnergyHolder::new(capacity, capacity, capacity, ConnectionType::Both).with_energy(stored);
    for face in BlockFace::ALL {
        holder.set_connection(face, connection);
    }
    holder
}

pub fn energy_holders(capacity: u64, stored: u64, connection: ConnectionType) -> Holders {
    Holders {
        energy: Some(energy_holder(capacity, stored, connection)),
        ..Holders::default()
    }
}

/// A single-inventory item holder exposed on every face as `connection`.
pub fn item_holder(slots: usize, stack_limit: u32, connection: ConnectionType) -> ItemHolder {
    let container = ItemContainer::new(ContainerId(0), Inventory::new(slots, stack_limit), ConnectionType::Both);
    let mut holder = ItemHolder::new(vec![container]).expect("one container");
    for face in BlockFace::ALL {
        holder.attach(face, ContainerId(0)).expect("container exists");
        holder.set_connection(face, connection).expect("container on face");
    }
    holder
}

pub fn item_holders(slots: usize, stack_limit: u32, connection: ConnectionType) -> Holders {
    Holders {
        item: Some(item_holder(slots, stack_limit, connection)),
        ..Holders::default()
    }
}

/// A single-tank fluid holder exposed on every face as `connection`.
pub fn fluid_holder(capacity: u64, connection: ConnectionType) -> FluidHolder {
    let container = FluidContainer::new(ContainerId(0), capacity, ConnectionType::Both);
    let mut holder = FluidHolder::new(vec![container]).expect("one container");
    for face in BlockFace::ALL {
        holder.attach(face, ContainerId(0)).expect("container exists");
        holder.set_connection(face, connection).expect("container on face");
    }
    holder
}

pub fn fluid_holders(capacity: u64, connection: ConnectionType) -> Holders {
    Holders {
        fluid: Some(fluid_holder(capacity, connection)),
        ..Holders::default()
    }
}

/// Stored energy of the endpoint, 0 without an energy holder.
pub fn energy_of(ep: &EndPoint) -> u64 {
    ep.lock().energy().map(|h| h.energy()).unwrap_or(0)
}

/// Quantity of `item` across the endpoint's inventories.
pub fn items_of(ep: &EndPoint, item: ItemTypeId) -> u32 {
    ep.lock()
        .item()
        .map(|h| h.merged_contents().get(&item).copied().unwrap_or(0))
        .unwrap_or(0)
}

/// Fluid type and amount held in container 0.
pub fn fluid_of(ep: &EndPoint) -> (Option<FluidTypeId>, u64) {
    let holders = ep.lock();
    match holders.fluid().and_then(|h| h.containers().get(ContainerId(0))) {
        Ok(tank) => (tank.fluid(), tank.amount()),
        Err(_) => (None, 0),
    }
}

// ===========================================================================
// Cluster harness
// ===========================================================================

/// Add the nodes at `positions` and build the cluster containing the first.
pub fn build_cluster(
    world: &TestWorld,
    positions: impl IntoIterator<Item = Position>,
    registry: &TypeRegistry,
) -> NetworkCluster {
    let mut state = ProtoState::new();
    let mut first = None;
    for pos in positions {
        let node = world.node(pos).expect("node placed at position");
        state.add_node(node, world, None).expect("discovery succeeds");
        first.get_or_insert(pos);
    }
    let start = first.expect("at least one position");
    let id = state.cluster_of(start).expect("node joined a cluster");
    ClusterBuilder::new(0).build(id, state.networks_in(id), registry)
}

/// Drive `cluster` through every phase of ticks `0..ticks`.
pub fn run_ticks(cluster: &mut NetworkCluster, ticks: u64) {
    for tick in 0..ticks {
        cluster.pre_tick_sync(tick);
        cluster.run_parallel_phases(tick);
        cluster.post_tick_sync(tick);
    }
}

// ===========================================================================
// TestWorld
// ===========================================================================

/// An in-memory world. Positions in unloaded chunks, or explicitly marked,
/// report as unknown.
#[derive(Default)]
pub struct TestWorld {
    nodes: RwLock<BTreeMap<Position, NetworkNode>>,
    unknown: RwLock<BTreeSet<Position>>,
    unloaded: RwLock<BTreeSet<ChunkPos>>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, node: NetworkNode) {
        self.nodes.write().unwrap().insert(node.pos(), node);
    }

    pub fn place_cable(&self, pos: Position, resource_type: ResourceType) -> Arc<Bridge> {
        let bridge = Bridge::cable(pos, resource_type);
        self.place(NetworkNode::Bridge(bridge.clone()));
        bridge
    }

    pub fn place_end_point(&self, pos: Position, holders: Holders) -> Arc<EndPoint> {
        let ep = EndPoint::new(pos, holders);
        self.place(NetworkNode::EndPoint(ep.clone()));
        ep
    }

    /// Remove the node at `pos` and clear its validity flag.
    pub fn remove(&self, pos: Position) -> Option<NetworkNode> {
        let node = self.nodes.write().unwrap().remove(&pos);
        if let Some(node) = &node {
            node.set_valid(false);
        }
        node
    }

    pub fn node(&self, pos: Position) -> Option<NetworkNode> {
        self.nodes.read().unwrap().get(&pos).cloned()
    }

    pub fn mark_unknown(&self, pos: Position) {
        self.unknown.write().unwrap().insert(pos);
    }

    pub fn clear_unknown(&self, pos: Position) {
        self.unknown.write().unwrap().remove(&pos);
    }

    pub fn unload_chunk(&self, chunk: ChunkPos) {
        self.unloaded.write().unwrap().insert(chunk);
    }

    pub fn load_chunk(&self, chunk: ChunkPos) {
        self.unloaded.write().unwrap().remove(&chunk);
    }

    fn is_loaded(&self, pos: Position) -> bool {
        !self.unloaded.read().unwrap().contains(&pos.chunk())
    }
}

impl NodeProvider for TestWorld {
    fn get_node(&self, pos: Position) -> Option<NetworkNode> {
        if !self.is_loaded(pos) {
            return None;
        }
        self.node(pos)
    }

    fn get_nodes(&self, chunk: ChunkPos) -> Vec<NetworkNode> {
        if self.unloaded.read().unwrap().contains(&chunk) {
            return Vec::new();
        }
        self.nodes
            .read()
            .unwrap()
            .values()
            .filter(|node| chunk.contains(node.pos()))
            .cloned()
            .collect()
    }

    fn is_unknown(&self, pos: Position) -> bool {
        !self.is_loaded(pos) || self.unknown.read().unwrap().contains(&pos)
    }
}
