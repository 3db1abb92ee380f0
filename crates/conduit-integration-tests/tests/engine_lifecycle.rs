//! Cross-crate tests driving the full engine through `NetworkManager`.
//!
//! Every test places nodes in a `TestWorld`, queues them through a
//! `ManagerHandle` and observes holder state after whole ticks.

use std::sync::{Arc, Mutex};

use conduit_core::config::EngineConfig;
use conduit_core::holder::{ConnectionType, EnergyHolder, Holders, ItemFilter};
use conduit_core::id::{ContainerId, ResourceType};
use conduit_core::manager::NetworkManager;
use conduit_core::network::{Network, NetworkGroup, NetworkType, TickError};
use conduit_core::persist::BitcodeStore;
use conduit_core::position::{BlockFace, Position};
use conduit_core::test_utils::*;
use conduit_energy::EnergyNetworkType;
use conduit_fluid::FluidNetworkType;
use conduit_item::ItemNetworkType;

// ===========================================================================
// Helpers
// ===========================================================================

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A running manager with all three network types, every type ticking on
/// every tick.
fn engine(world: &Arc<TestWorld>) -> NetworkManager {
    init_logging();
    let mut config = EngineConfig::default();
    config.item.tick_delay = 1;
    let mut manager = NetworkManager::new(config.clone(), world.clone());
    manager.register_type(Arc::new(EnergyNetworkType::new(&config.energy)));
    manager.register_type(Arc::new(ItemNetworkType::new(&config.item)));
    manager.register_type(Arc::new(FluidNetworkType::new(&config.fluid)));
    manager.start().unwrap();
    manager
}

fn queue_all(world: &TestWorld, manager: &NetworkManager, positions: &[Position]) {
    let handle = manager.handle();
    for &at in positions {
        handle.queue_add_node(world.node(at).unwrap()).unwrap();
    }
}

fn ticks(manager: &mut NetworkManager, n: usize) {
    for _ in 0..n {
        manager.tick().unwrap();
    }
}

/// A machine carrying energy and items on every face.
fn machine(energy: u64, iron_count: u32, connection: ConnectionType) -> Holders {
    let mut holders = energy_holders(1000, energy, connection);
    let mut items = item_holder(4, 64, connection);
    assert_eq!(items.merged_insert(iron(), iron_count), 0);
    holders.item = Some(items);
    holders
}

/// Energy storage moving at most `rate` per tick in either direction.
fn limited(capacity: u64, stored: u64, rate: u64, connection: ConnectionType) -> Holders {
    let mut holder = EnergyHolder::new(capacity, rate, rate, ConnectionType::Both).with_energy(stored);
    for face in BlockFace::ALL {
        holder.set_connection(face, connection);
    }
    Holders {
        energy: Some(holder),
        ..Holders::default()
    }
}

// ===========================================================================
// Structure
// ===========================================================================

#[test]
fn bridge_merges_then_removal_splits() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    world.place_end_point(pos(0, 0, 0), energy_holders(100, 0, ConnectionType::Both));
    world.place_cable(pos(1, 0, 0), ResourceType::Energy);
    world.place_end_point(pos(2, 0, 0), energy_holders(100, 0, ConnectionType::Both));
    world.place_cable(pos(0, 0, 1), ResourceType::Energy);
    queue_all(&world, &manager, &[pos(0, 0, 0), pos(2, 0, 0), pos(0, 0, 1)]);
    ticks(&mut manager, 1);

    // Without the joining cable the two machines are apart.
    let a = manager.cluster_of(pos(0, 0, 0)).map(|c| c.id());
    let b = manager.cluster_of(pos(2, 0, 0)).map(|c| c.id());
    assert_ne!(a, b);

    queue_all(&world, &manager, &[pos(1, 0, 0)]);
    ticks(&mut manager, 1);
    let a = manager.cluster_of(pos(0, 0, 0)).map(|c| c.id());
    let b = manager.cluster_of(pos(2, 0, 0)).map(|c| c.id());
    assert!(a.is_some());
    assert_eq!(a, b);

    world.remove(pos(1, 0, 0));
    manager.handle().queue_remove_node(pos(1, 0, 0)).unwrap();
    ticks(&mut manager, 1);
    let a = manager.cluster_of(pos(0, 0, 0)).map(|c| c.id());
    let b = manager.cluster_of(pos(2, 0, 0)).map(|c| c.id());
    assert_ne!(a, b);
    assert!(manager.cluster_of(pos(1, 0, 0)).is_none());
}

#[test]
fn shared_machine_joins_energy_and_item_networks() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    world.place_cable(pos(-1, 0, 0), ResourceType::Energy);
    world.place_end_point(pos(0, 0, 0), machine(0, 0, ConnectionType::Both));
    world.place_cable(pos(1, 0, 0), ResourceType::Item);
    queue_all(&world, &manager, &[pos(-1, 0, 0), pos(1, 0, 0), pos(0, 0, 0)]);
    ticks(&mut manager, 1);

    assert_eq!(manager.cluster_count(), 1);
    let cluster = manager.cluster_of(pos(0, 0, 0)).unwrap();
    assert_eq!(cluster.resource_types(), vec![ResourceType::Energy, ResourceType::Item]);
}

// ===========================================================================
// Distribution
// ===========================================================================

#[test]
fn energy_offers_and_capacities() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    world.place_cable(pos(0, 0, 0), ResourceType::Energy);
    let a = world.place_end_point(pos(-1, 0, 0), energy_holders(100, 50, ConnectionType::Extract));
    let b = world.place_end_point(pos(0, 0, -1), energy_holders(100, 30, ConnectionType::Extract));
    let c = world.place_end_point(pos(1, 0, 0), energy_holders(40, 0, ConnectionType::Insert));
    let d = world.place_end_point(pos(0, 0, 1), energy_holders(40, 0, ConnectionType::Insert));
    queue_all(&world, &manager, &[pos(0, 0, 0)]);
    ticks(&mut manager, 1);

    assert_eq!(energy_of(&c), 40);
    assert_eq!(energy_of(&d), 40);
    assert_eq!(energy_of(&a) + energy_of(&b), 0);
}

#[test]
fn energy_priority_fills_high_first() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    let prioritised = |priority: i32| {
        let mut holders = energy_holders(40, 0, ConnectionType::Insert);
        if let Some(energy) = holders.energy.as_mut() {
            for face in BlockFace::ALL {
                energy.set_insert_priority(face, priority);
            }
        }
        holders
    };
    world.place_cable(pos(0, 0, 0), ResourceType::Energy);
    world.place_end_point(pos(-1, 0, 0), energy_holders(100, 50, ConnectionType::Extract));
    let high = world.place_end_point(pos(1, 0, 0), prioritised(100));
    let low = world.place_end_point(pos(0, 0, 1), prioritised(0));
    queue_all(&world, &manager, &[pos(0, 0, 0)]);
    ticks(&mut manager, 1);

    assert_eq!(energy_of(&high), 40);
    assert_eq!(energy_of(&low), 10);
}

#[test]
fn fluid_of_another_type_is_rejected() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    let filled = |fluid, amount| {
        let mut holders = fluid_holders(1000, ConnectionType::Extract);
        let tank = holders.fluid_mut().unwrap().container_mut(ContainerId(0)).unwrap();
        assert_eq!(tank.insert(fluid, amount), amount);
        holders
    };
    world.place_cable(pos(0, 0, 0), ResourceType::Fluid);
    world.place_end_point(pos(-1, 0, 0), filled(water(), 400));
    let tank = world.place_end_point(pos(1, 0, 0), fluid_holders(1000, ConnectionType::Insert));
    queue_all(&world, &manager, &[pos(0, 0, 0)]);
    ticks(&mut manager, 1);
    assert_eq!(fluid_of(&tank), (Some(water()), 400));

    let lava_source = world.place_end_point(pos(0, 0, 1), filled(lava(), 400));
    queue_all(&world, &manager, &[pos(0, 0, 1)]);
    ticks(&mut manager, 3);
    assert_eq!(fluid_of(&tank), (Some(water()), 400));
    assert_eq!(fluid_of(&lava_source), (Some(lava()), 400));
}

#[test]
fn items_follow_filters_through_the_manager() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    let mut source = item_holders(4, 64, ConnectionType::Extract);
    if let Some(items) = source.item.as_mut() {
        assert_eq!(items.merged_insert(iron(), 10), 0);
        assert_eq!(items.merged_insert(copper(), 10), 0);
    }
    let mut sink = item_holders(4, 64, ConnectionType::Insert);
    if let Some(items) = sink.item.as_mut() {
        items
            .insert_filters
            .insert(BlockFace::West, ItemFilter::blacklist([copper()]));
    }
    world.place_cable(pos(0, 0, 0), ResourceType::Item);
    let source = world.place_end_point(pos(-1, 0, 0), source);
    let sink = world.place_end_point(pos(1, 0, 0), sink);
    queue_all(&world, &manager, &[pos(0, 0, 0)]);
    ticks(&mut manager, 3);

    assert_eq!(items_of(&sink, iron()), 10);
    assert_eq!(items_of(&sink, copper()), 0);
    assert_eq!(items_of(&source, copper()), 10);
}

// ===========================================================================
// Validity and failure containment
// ===========================================================================

#[test]
fn unknown_neighbour_means_no_mutations() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    world.place_cable(pos(0, 0, 0), ResourceType::Energy);
    let source = world.place_end_point(pos(-1, 0, 0), machine(500, 30, ConnectionType::Extract));
    let sink = world.place_end_point(pos(1, 0, 0), machine(0, 0, ConnectionType::Insert));
    world.place_cable(pos(-1, 1, 0), ResourceType::Item);
    world.place_cable(pos(0, 1, 0), ResourceType::Item);
    world.place_cable(pos(1, 1, 0), ResourceType::Item);
    // The middle item cable cannot be vouched for yet, so the item network
    // is incomplete and the whole cluster, energy included, waits.
    world.mark_unknown(pos(0, 1, 0));
    queue_all(&world, &manager, &[pos(0, 0, 0), pos(-1, 1, 0), pos(1, 1, 0)]);
    ticks(&mut manager, 3);

    assert_eq!(manager.cluster_count(), 1);
    assert!(!manager.cluster_of(pos(0, 0, 0)).unwrap().is_valid());
    assert_eq!(energy_of(&source), 500);
    assert_eq!(items_of(&source, iron()), 30);
    assert_eq!(energy_of(&sink), 0);
    assert_eq!(items_of(&sink, iron()), 0);

    world.clear_unknown(pos(0, 1, 0));
    queue_all(&world, &manager, &[pos(0, 1, 0)]);
    ticks(&mut manager, 1);
    assert!(manager.cluster_of(pos(0, 0, 0)).unwrap().is_valid());
    assert_eq!(energy_of(&sink), 500);
    assert_eq!(items_of(&sink, iron()), 16);
}

/// Panics on every tick.
#[derive(Debug)]
struct FaultyItemType;

#[derive(Debug)]
struct FaultyGroup(Vec<Network>);

impl NetworkType for FaultyItemType {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Item
    }

    fn create_group(&self, networks: Vec<Network>) -> Box<dyn NetworkGroup> {
        Box::new(FaultyGroup(networks))
    }
}

impl NetworkGroup for FaultyGroup {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Item
    }

    fn networks(&self) -> &[Network] {
        &self.0
    }

    fn tick(&mut self) -> Result<(), TickError> {
        panic!("faulty item algorithm");
    }
}

#[test]
fn panicking_group_does_not_stop_others() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    manager.register_type(Arc::new(FaultyItemType));
    world.place_cable(pos(0, 0, 0), ResourceType::Energy);
    world.place_cable(pos(0, 1, 0), ResourceType::Item);
    world.place_end_point(pos(-1, 0, 0), machine(100, 10, ConnectionType::Extract));
    let sink = world.place_end_point(pos(1, 0, 0), machine(0, 0, ConnectionType::Insert));
    world.place_cable(pos(-1, 1, 0), ResourceType::Item);
    world.place_cable(pos(1, 1, 0), ResourceType::Item);
    queue_all(&world, &manager, &[pos(0, 0, 0), pos(0, 1, 0), pos(-1, 1, 0), pos(1, 1, 0)]);
    ticks(&mut manager, 2);

    assert_eq!(energy_of(&sink), 100);
    assert_eq!(items_of(&sink, iron()), 0);
    assert_eq!(manager.current_tick(), 2);
}

// ===========================================================================
// Queues, chunks and persistence
// ===========================================================================

#[test]
fn update_request_reconfigures_next_cycle() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    world.place_cable(pos(0, 0, 0), ResourceType::Energy);
    let source = world.place_end_point(pos(-1, 0, 0), limited(1000, 1000, 10, ConnectionType::Extract));
    let sink = world.place_end_point(pos(1, 0, 0), limited(1000, 0, 10, ConnectionType::Insert));
    queue_all(&world, &manager, &[pos(0, 0, 0)]);
    ticks(&mut manager, 1);
    let moved = energy_of(&sink);
    assert_eq!(moved, 10);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = manager.handle();
    let s = seen.clone();
    handle
        .queue_read(pos(1, 0, 0), move |h| s.lock().unwrap().push(h.energy().unwrap().energy()))
        .unwrap();
    handle
        .queue_update(pos(-1, 0, 0), |h| {
            if let Ok(energy) = h.energy_mut() {
                for face in BlockFace::ALL {
                    energy.set_connection(face, ConnectionType::None);
                }
            }
        })
        .unwrap();
    ticks(&mut manager, 3);

    assert_eq!(*seen.lock().unwrap(), vec![moved]);
    assert_eq!(energy_of(&sink) + energy_of(&source), 1000);
    // At most the tick that ran alongside the update still moved energy.
    assert!(energy_of(&sink) <= moved * 2);
    let after = energy_of(&sink);
    ticks(&mut manager, 2);
    assert_eq!(energy_of(&sink), after);
}

#[test]
fn unloaded_chunk_stalls_until_reloaded() {
    let world = Arc::new(TestWorld::new());
    let mut manager = engine(&world);
    world.place_cable(pos(15, 0, 0), ResourceType::Energy);
    world.place_cable(pos(16, 0, 0), ResourceType::Energy);
    let source = world.place_end_point(pos(14, 0, 0), limited(100, 100, 10, ConnectionType::Extract));
    let sink = world.place_end_point(pos(17, 0, 0), limited(100, 0, 10, ConnectionType::Insert));
    queue_all(&world, &manager, &[pos(15, 0, 0), pos(16, 0, 0)]);
    ticks(&mut manager, 1);
    assert_eq!(energy_of(&sink), 10);

    // The network straddles two chunks; losing the far one stalls it.
    let far = pos(17, 0, 0).chunk();
    assert_ne!(far, pos(14, 0, 0).chunk());
    world.unload_chunk(far);
    manager.handle().unload_chunk(far).unwrap();
    ticks(&mut manager, 3);
    assert_eq!(energy_of(&source), 90);
    assert_eq!(energy_of(&sink), 10);

    world.load_chunk(far);
    manager.handle().load_chunk(far).unwrap();
    ticks(&mut manager, 1);
    assert_eq!(energy_of(&sink), 20);
    assert_eq!(energy_of(&source), 80);
}

#[test]
fn stop_persists_every_machine() {
    let world = Arc::new(TestWorld::new());
    let store = Arc::new(Mutex::new(BitcodeStore::new()));
    let mut manager = engine(&world).with_persistence(store.clone());
    world.place_cable(pos(0, 0, 0), ResourceType::Energy);
    world.place_end_point(pos(-1, 0, 0), energy_holders(100, 80, ConnectionType::Extract));
    world.place_end_point(pos(1, 0, 0), energy_holders(100, 0, ConnectionType::Insert));
    queue_all(&world, &manager, &[pos(0, 0, 0), pos(-1, 0, 0), pos(1, 0, 0)]);
    ticks(&mut manager, 1);
    manager.stop().unwrap();

    let store = store.lock().unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.load(pos(-1, 0, 0)).unwrap().energy().unwrap().energy(), 0);
    assert_eq!(store.load(pos(1, 0, 0)).unwrap().energy().unwrap().energy(), 80);
    assert!(manager.tick().is_err());
}
